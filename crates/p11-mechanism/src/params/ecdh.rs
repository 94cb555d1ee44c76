//! `CK_ECDH1_DERIVE_PARAMS`: elliptic-curve Diffie-Hellman key derivation.

use std::any::Any;

use p11_platform::{
    dispatch, per_variant, FieldSpec, Layout40, Layout41, Layout80, Layout81, NativeLayout,
    NativeWriter, PerVariant, StructLayout, Variant, VariantBuilder,
};

use crate::ckm::Ckd;
use crate::error::{MarshalError, Result};
use crate::lifecycle::Lifecycle;
use crate::memory::{self, UnmanagedBuffer};
use crate::params::{MechanismParams, NativeStruct};

/// Native `CK_ECDH1_DERIVE_PARAMS` for layout `L`.
#[derive(Debug)]
pub struct CkEcdh1DeriveParamsNative<L: NativeLayout> {
    kdf: Ckd,
    shared_data: Option<UnmanagedBuffer>,
    shared_data_len: L::ULong,
    public_data: Option<UnmanagedBuffer>,
    public_data_len: L::ULong,
}

impl<L: NativeLayout> CkEcdh1DeriveParamsNative<L> {
    /// Fails with `InvalidArgument` when `public_data` is empty or when
    /// `CKD_NULL` is combined with shared data.
    pub(crate) fn new(kdf: Ckd, shared_data: &[u8], public_data: &[u8]) -> Result<Self> {
        if public_data.is_empty() {
            return Err(MarshalError::InvalidArgument {
                detail: "public_data must not be empty".to_string(),
            });
        }
        if kdf == Ckd::Null && !shared_data.is_empty() {
            return Err(MarshalError::InvalidArgument {
                detail: "shared_data must be empty with CKD_NULL".to_string(),
            });
        }
        let shared_data_len = L::ulong("ulSharedDataLen", shared_data.len() as u64)?;
        let public_data_len = L::ulong("ulPublicDataLen", public_data.len() as u64)?;
        Ok(Self {
            kdf,
            shared_data: UnmanagedBuffer::from_bytes_or_null(shared_data)?,
            shared_data_len,
            public_data: Some(UnmanagedBuffer::from_bytes(public_data)?),
            public_data_len,
        })
    }

    pub fn kdf(&self) -> Ckd {
        self.kdf
    }

    pub fn shared_data(&self) -> Result<Vec<u8>> {
        memory::read_or_empty(&self.shared_data)
    }

    pub fn public_data(&self) -> Result<Vec<u8>> {
        memory::read_or_empty(&self.public_data)
    }
}

impl<L: NativeLayout> NativeStruct for CkEcdh1DeriveParamsNative<L> {
    fn variant(&self) -> Variant {
        L::VARIANT
    }

    fn layout(&self) -> Result<StructLayout> {
        Ok(StructLayout::new(
            "CK_ECDH1_DERIVE_PARAMS",
            L::VARIANT,
            &[
                FieldSpec::ulong("kdf"),
                FieldSpec::ulong("ulSharedDataLen"),
                FieldSpec::pointer("pSharedData"),
                FieldSpec::ulong("ulPublicDataLen"),
                FieldSpec::pointer("pPublicData"),
            ],
        )?)
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        let layout = self.layout()?;
        let mut writer = NativeWriter::new(&layout);
        writer
            .ulong("kdf", u64::from(self.kdf.code()))?
            .ulong("ulSharedDataLen", self.shared_data_len.into())?
            .pointer("pSharedData", memory::address_or_null(&self.shared_data))?
            .ulong("ulPublicDataLen", self.public_data_len.into())?
            .pointer("pPublicData", memory::address_or_null(&self.public_data))?;
        Ok(writer.finish()?)
    }

    fn release(&mut self) {
        memory::free_slot(&mut self.shared_data);
        memory::free_slot(&mut self.public_data);
    }
}

struct Ecdh1Builder<'a> {
    kdf: Ckd,
    shared_data: &'a [u8],
    public_data: &'a [u8],
}

impl VariantBuilder for Ecdh1Builder<'_> {
    type Output<L: NativeLayout> = CkEcdh1DeriveParamsNative<L>;
    type Error = MarshalError;

    fn build<L: NativeLayout>(self) -> Result<CkEcdh1DeriveParamsNative<L>> {
        CkEcdh1DeriveParamsNative::new(self.kdf, self.shared_data, self.public_data)
    }
}

type Ecdh1Variants = PerVariant<
    CkEcdh1DeriveParamsNative<Layout40>,
    CkEcdh1DeriveParamsNative<Layout41>,
    CkEcdh1DeriveParamsNative<Layout80>,
    CkEcdh1DeriveParamsNative<Layout81>,
>;

/// Parameters for `CKM_ECDH1_DERIVE`.
#[derive(Debug)]
pub struct CkEcdh1DeriveParams {
    variant: Variant,
    state: Lifecycle<Ecdh1Variants>,
}

impl CkEcdh1DeriveParams {
    const NAME: &'static str = "CkEcdh1DeriveParams";

    /// Build for the process-wide platform. `public_data` is the other
    /// party's EC public key; pass an empty `shared_data` for none.
    pub fn new(kdf: Ckd, shared_data: &[u8], public_data: &[u8]) -> Result<Self> {
        Self::new_for(Variant::current()?, kdf, shared_data, public_data)
    }

    /// Build for an explicit variant.
    pub(crate) fn new_for(
        variant: Variant,
        kdf: Ckd,
        shared_data: &[u8],
        public_data: &[u8],
    ) -> Result<Self> {
        let native = dispatch(
            variant,
            Ecdh1Builder {
                kdf,
                shared_data,
                public_data,
            },
        )?;
        Ok(Self {
            variant,
            state: Lifecycle::new(native),
        })
    }

    pub fn kdf(&self) -> Result<Ckd> {
        let native = self.state.undisposed(Self::NAME, "kdf")?;
        Ok(per_variant!(native, native => native.kdf()))
    }

    pub fn shared_data(&self) -> Result<Vec<u8>> {
        let native = self.state.undisposed(Self::NAME, "shared_data")?;
        per_variant!(native, native => native.shared_data())
    }

    pub fn public_data(&self) -> Result<Vec<u8>> {
        let native = self.state.undisposed(Self::NAME, "public_data")?;
        per_variant!(native, native => native.public_data())
    }

    pub fn is_disposed(&self) -> bool {
        self.state.is_released()
    }

    pub fn dispose(&mut self) {
        if let Some(mut native) = self.state.release() {
            native.release();
            tracing::debug!(variant = %self.variant, "disposed CK_ECDH1_DERIVE_PARAMS");
        }
    }
}

impl MechanismParams for CkEcdh1DeriveParams {
    fn variant(&self) -> Variant {
        self.variant
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        let native = self.state.undisposed(Self::NAME, "to_native_bytes")?;
        tracing::trace!(variant = %self.variant, "marshaling CK_ECDH1_DERIVE_PARAMS");
        NativeStruct::to_native_bytes(native)
    }

    fn release(&mut self) {
        self.dispose();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::thread_stats;

    const POINT: [u8; 65] = [0x04; 65];

    #[test]
    fn layout_per_variant() {
        let expected = [
            (Variant::V40, [0, 4, 8, 12, 16], 20),
            (Variant::V41, [0, 4, 8, 12, 16], 20),
            (Variant::V80, [0, 8, 16, 24, 32], 40),
            (Variant::V81, [0, 8, 16, 24, 32], 40),
        ];
        let names = ["kdf", "ulSharedDataLen", "pSharedData", "ulPublicDataLen", "pPublicData"];
        for (variant, offsets, size) in expected {
            let params = CkEcdh1DeriveParams::new_for(variant, Ckd::Null, &[], &POINT).unwrap();
            let native = params.state.undisposed("test", "layout").unwrap();
            let layout = NativeStruct::layout(native).unwrap();
            for (name, offset) in names.iter().zip(offsets) {
                assert_eq!(layout.offset_of(name), Some(offset), "{variant} {name}");
            }
            assert_eq!(layout.size, size);
        }
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn native_bytes_on_eight_byte_variant() {
        let params =
            CkEcdh1DeriveParams::new_for(Variant::V80, Ckd::Sha1Kdf, b"info", &POINT).unwrap();
        let bytes = params.to_native_bytes().unwrap();
        let word = |at: usize| u64::from_ne_bytes(bytes[at..at + 8].try_into().unwrap());
        assert_eq!(word(0), 2);
        assert_eq!(word(8), 4);
        assert_ne!(word(16), 0);
        assert_eq!(word(24), 65);
        assert_ne!(word(32), 0);
        assert_eq!(params.shared_data().unwrap(), b"info".to_vec());
        assert_eq!(params.public_data().unwrap(), POINT.to_vec());
    }

    #[test]
    fn invalid_input_allocates_nothing() {
        let before = thread_stats();
        let err = CkEcdh1DeriveParams::new_for(Variant::V80, Ckd::Sha1Kdf, &[], &[]).unwrap_err();
        assert!(matches!(err, MarshalError::InvalidArgument { .. }));
        let err =
            CkEcdh1DeriveParams::new_for(Variant::V40, Ckd::Null, b"info", &POINT).unwrap_err();
        assert!(matches!(err, MarshalError::InvalidArgument { .. }));
        assert_eq!(thread_stats().since(before).allocations, 0);
    }

    #[test]
    fn dispose_gates_accessors() {
        let before = thread_stats();
        let mut params =
            CkEcdh1DeriveParams::new_for(Variant::V81, Ckd::Sha1KdfAsn1, b"x", &POINT).unwrap();
        assert_eq!(params.kdf().unwrap(), Ckd::Sha1KdfAsn1);
        params.dispose();
        params.dispose();
        assert!(params.is_disposed());
        assert!(matches!(
            params.kdf().unwrap_err(),
            MarshalError::ObjectDisposed { operation: "kdf", .. }
        ));
        assert!(params.to_native_bytes().is_err());
        let delta = thread_stats().since(before);
        assert_eq!(delta.allocations, 2);
        assert_eq!(delta.frees, 2);
    }
}
