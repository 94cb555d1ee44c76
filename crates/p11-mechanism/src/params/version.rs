//! `CK_VERSION`: a major/minor protocol or library version.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use p11_platform::{
    dispatch, per_variant, FieldSpec, NativeLayout, NativeWriter, Selected, StructLayout,
    Variant, VariantBuilder,
};

use crate::error::{MarshalError, Result};
use crate::params::{MechanismParams, NativeStruct};

/// Native `CK_VERSION { CK_BYTE major; CK_BYTE minor }` for layout `L`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CkVersionNative<L: NativeLayout> {
    major: u8,
    minor: u8,
    _layout: PhantomData<L>,
}

impl<L: NativeLayout> CkVersionNative<L> {
    pub(crate) fn new(major: u8, minor: u8) -> Self {
        Self {
            major,
            minor,
            _layout: PhantomData,
        }
    }

    /// Layout of `CK_VERSION` for `L`.
    pub fn struct_layout() -> Result<StructLayout> {
        Ok(StructLayout::new(
            "CK_VERSION",
            L::VARIANT,
            &[FieldSpec::byte("major"), FieldSpec::byte("minor")],
        )?)
    }

    /// Decode a version a native library wrote into memory.
    pub(crate) fn from_native_bytes(bytes: &[u8]) -> Result<Self> {
        let layout = Self::struct_layout()?;
        if bytes.len() != layout.size {
            return Err(MarshalError::InvalidArgument {
                detail: format!(
                    "CK_VERSION is {} bytes, got {}",
                    layout.size,
                    bytes.len()
                ),
            });
        }
        let at = |name: &str| layout.offset_of(name).map(|offset| bytes[offset]);
        match (at("major"), at("minor")) {
            (Some(major), Some(minor)) => Ok(Self::new(major, minor)),
            _ => Err(MarshalError::InvalidArgument {
                detail: "CK_VERSION layout lacks major/minor".to_string(),
            }),
        }
    }

    pub fn major(&self) -> u8 {
        self.major
    }

    pub fn minor(&self) -> u8 {
        self.minor
    }
}

impl<L: NativeLayout> NativeStruct for CkVersionNative<L> {
    fn variant(&self) -> Variant {
        L::VARIANT
    }

    fn layout(&self) -> Result<StructLayout> {
        Self::struct_layout()
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        let layout = self.layout()?;
        let mut writer = NativeWriter::new(&layout);
        writer.byte("major", self.major)?.byte("minor", self.minor)?;
        Ok(writer.finish()?)
    }

    fn release(&mut self) {}
}

struct VersionBuilder {
    major: u8,
    minor: u8,
}

impl VariantBuilder for VersionBuilder {
    type Output<L: NativeLayout> = CkVersionNative<L>;
    type Error = MarshalError;

    fn build<L: NativeLayout>(self) -> Result<CkVersionNative<L>> {
        Ok(CkVersionNative::new(self.major, self.minor))
    }
}

/// Version information, e.g. the protocol version returned by a key
/// derivation or passed to `CKM_SSL3_PRE_MASTER_KEY_GEN`.
#[derive(Debug)]
pub struct CkVersion {
    native: Selected<VersionBuilder>,
}

impl CkVersion {
    /// Build for the process-wide platform.
    pub fn new(major: u8, minor: u8) -> Result<Self> {
        Self::new_for(Variant::current()?, major, minor)
    }

    /// Build for an explicit variant.
    pub(crate) fn new_for(variant: Variant, major: u8, minor: u8) -> Result<Self> {
        Ok(Self {
            native: dispatch(variant, VersionBuilder { major, minor })?,
        })
    }

    pub fn major(&self) -> u8 {
        per_variant!(&self.native, native => native.major())
    }

    pub fn minor(&self) -> u8 {
        per_variant!(&self.native, native => native.minor())
    }
}

impl fmt::Display for CkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

impl MechanismParams for CkVersion {
    fn variant(&self) -> Variant {
        self.native.variant()
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        NativeStruct::to_native_bytes(&self.native)
    }

    fn release(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}
