//! `CK_EXTRACT_PARAMS`: which bit of the base key starts the derived key.

use std::any::Any;

use p11_platform::{
    dispatch, per_variant, FieldSpec, NativeLayout, NativeWriter, Selected, StructLayout,
    Variant, VariantBuilder,
};

use crate::error::{MarshalError, Result};
use crate::params::{MechanismParams, NativeStruct};

/// Native `CK_EXTRACT_PARAMS { CK_ULONG bit }` for layout `L`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CkExtractParamsNative<L: NativeLayout> {
    bit: L::ULong,
}

impl<L: NativeLayout> CkExtractParamsNative<L> {
    /// Fails with `Overflow` if `bit` does not fit this variant's `CK_ULONG`.
    pub(crate) fn new(bit: u64) -> Result<Self> {
        Ok(Self {
            bit: L::ulong("bit", bit)?,
        })
    }

    pub fn bit(&self) -> u64 {
        self.bit.into()
    }
}

impl<L: NativeLayout> NativeStruct for CkExtractParamsNative<L> {
    fn variant(&self) -> Variant {
        L::VARIANT
    }

    fn layout(&self) -> Result<StructLayout> {
        Ok(StructLayout::new(
            "CK_EXTRACT_PARAMS",
            L::VARIANT,
            &[FieldSpec::ulong("bit")],
        )?)
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        let layout = self.layout()?;
        let mut writer = NativeWriter::new(&layout);
        writer.ulong("bit", self.bit())?;
        Ok(writer.finish()?)
    }

    fn release(&mut self) {}
}

struct ExtractBuilder {
    bit: u64,
}

impl VariantBuilder for ExtractBuilder {
    type Output<L: NativeLayout> = CkExtractParamsNative<L>;
    type Error = MarshalError;

    fn build<L: NativeLayout>(self) -> Result<CkExtractParamsNative<L>> {
        CkExtractParamsNative::new(self.bit)
    }
}

/// Parameters for `CKM_EXTRACT_KEY_FROM_KEY`.
#[derive(Debug)]
pub struct CkExtractParams {
    native: Selected<ExtractBuilder>,
}

impl CkExtractParams {
    /// Build for the process-wide platform.
    pub fn new(bit: u64) -> Result<Self> {
        Self::new_for(Variant::current()?, bit)
    }

    /// Build for an explicit variant.
    pub(crate) fn new_for(variant: Variant, bit: u64) -> Result<Self> {
        Ok(Self {
            native: dispatch(variant, ExtractBuilder { bit })?,
        })
    }

    /// Index of the first bit of the base key used for the derived key.
    pub fn bit(&self) -> u64 {
        per_variant!(&self.native, native => native.bit())
    }
}

impl MechanismParams for CkExtractParams {
    fn variant(&self) -> Variant {
        self.native.variant()
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        tracing::trace!(variant = %self.native.variant(), "marshaling CK_EXTRACT_PARAMS");
        NativeStruct::to_native_bytes(&self.native)
    }

    fn release(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::thread_stats;

    #[test]
    fn bytes_per_variant() {
        for variant in Variant::ALL {
            let p = CkExtractParams::new_for(variant, 0x1234).unwrap();
            let bytes = p.to_native_bytes().unwrap();
            match variant.ulong_size() {
                4 => assert_eq!(bytes, 0x1234u32.to_ne_bytes().to_vec()),
                _ => assert_eq!(bytes, 0x1234u64.to_ne_bytes().to_vec()),
            }
            assert_eq!(p.bit(), 0x1234);
            assert_eq!(MechanismParams::variant(&p), variant);
        }
    }

    #[test]
    fn largest_four_byte_value_fits() {
        let p = CkExtractParams::new_for(Variant::V40, 0xFFFF_FFFF).unwrap();
        assert_eq!(p.to_native_bytes().unwrap(), vec![0xFF; 4]);
    }

    #[test]
    fn four_byte_variants_reject_wide_values() {
        for variant in [Variant::V40, Variant::V41] {
            let before = thread_stats();
            let err = CkExtractParams::new_for(variant, 0x1_0000_0000).unwrap_err();
            assert!(matches!(
                err,
                MarshalError::Overflow {
                    value: 0x1_0000_0000,
                    width_bytes: 4,
                    ..
                }
            ));
            assert_eq!(thread_stats().since(before).allocations, 0);
        }
    }

    #[test]
    fn eight_byte_variants_accept_wide_values() {
        for variant in [Variant::V80, Variant::V81] {
            let p = CkExtractParams::new_for(variant, 0x1_0000_0000).unwrap();
            assert_eq!(
                p.to_native_bytes().unwrap(),
                0x1_0000_0000u64.to_ne_bytes().to_vec()
            );
        }
    }

    #[test]
    fn native_layout_offsets() {
        let native = CkExtractParamsNative::<p11_platform::Layout41>::new(3).unwrap();
        let layout = native.layout().unwrap();
        assert_eq!(layout.offset_of("bit"), Some(0));
        assert_eq!(layout.size, 4);
    }

    #[test]
    fn current_platform_construction() {
        let p = CkExtractParams::new(5).unwrap();
        assert_eq!(
            MechanismParams::variant(&p),
            p11_platform::platform::resolve().unwrap().variant()
        );
    }
}
