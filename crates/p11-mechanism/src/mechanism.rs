//! The caller-facing mechanism: a mechanism type plus optional parameters,
//! owning the native `CK_MECHANISM` record handed to the token.

use p11_platform::Variant;

use crate::error::{MarshalError, Result};
use crate::lifecycle::Lifecycle;
use crate::params::MechanismParams;
use crate::record::NativeMechanismRecord;

#[derive(Debug)]
struct Owned {
    record: NativeMechanismRecord,
    /// Kept alive for as long as the record may point into its buffers.
    params: Option<Box<dyn MechanismParams>>,
}

/// A PKCS#11 mechanism ready to be passed to the token.
///
/// After [`release`](Self::release) every accessor fails with
/// [`MarshalError::UseAfterRelease`]. Dropping an unreleased mechanism
/// releases it.
#[derive(Debug)]
pub struct Mechanism {
    variant: Variant,
    state: Lifecycle<Owned>,
}

impl Mechanism {
    /// A mechanism without parameters, for the process-wide platform.
    pub fn new(mechanism_type: impl Into<u32>) -> Result<Self> {
        Self::new_for(Variant::current()?, mechanism_type)
    }

    pub(crate) fn new_for(variant: Variant, mechanism_type: impl Into<u32>) -> Result<Self> {
        let record = NativeMechanismRecord::build(variant, mechanism_type.into(), None)?;
        Ok(Self::assemble(variant, record, None))
    }

    /// A mechanism whose parameter block is the given raw bytes.
    pub fn with_bytes(mechanism_type: impl Into<u32>, parameter: &[u8]) -> Result<Self> {
        Self::with_bytes_for(Variant::current()?, mechanism_type, parameter)
    }

    pub(crate) fn with_bytes_for(
        variant: Variant,
        mechanism_type: impl Into<u32>,
        parameter: &[u8],
    ) -> Result<Self> {
        let record = NativeMechanismRecord::build(variant, mechanism_type.into(), Some(parameter))?;
        Ok(Self::assemble(variant, record, None))
    }

    /// A mechanism with structured parameters, for the process-wide platform.
    /// The mechanism takes ownership of `params`.
    pub fn with_params<P: MechanismParams>(
        mechanism_type: impl Into<u32>,
        params: P,
    ) -> Result<Self> {
        Self::with_params_for(Variant::current()?, mechanism_type, params)
    }

    /// `params` must have been built for `variant`.
    pub(crate) fn with_params_for<P: MechanismParams>(
        variant: Variant,
        mechanism_type: impl Into<u32>,
        params: P,
    ) -> Result<Self> {
        if params.variant() != variant {
            return Err(MarshalError::InvalidArgument {
                detail: format!(
                    "parameters built for variant {} used with variant {variant}",
                    params.variant()
                ),
            });
        }
        let bytes = params.to_native_bytes()?;
        let record = NativeMechanismRecord::build(variant, mechanism_type.into(), Some(&bytes))?;
        Ok(Self::assemble(variant, record, Some(Box::new(params))))
    }

    fn assemble(
        variant: Variant,
        record: NativeMechanismRecord,
        params: Option<Box<dyn MechanismParams>>,
    ) -> Self {
        tracing::debug!(
            mechanism = record.mechanism_type(),
            %variant,
            parameter_len = record.parameter_len(),
            "constructed mechanism"
        );
        Self {
            variant,
            state: Lifecycle::new(Owned { record, params }),
        }
    }

    fn owned(&self, operation: &'static str) -> Result<&Owned> {
        self.state
            .active()
            .ok_or(MarshalError::UseAfterRelease { operation })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn mechanism_type(&self) -> Result<u32> {
        Ok(self.owned("mechanism_type")?.record.mechanism_type())
    }

    pub fn record(&self) -> Result<&NativeMechanismRecord> {
        Ok(&self.owned("record")?.record)
    }

    pub fn parameter_ptr(&self) -> Result<*const u8> {
        Ok(self.owned("parameter_ptr")?.record.parameter_ptr())
    }

    pub fn parameter_len(&self) -> Result<u64> {
        Ok(self.owned("parameter_len")?.record.parameter_len())
    }

    pub fn parameter_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.owned("parameter_bytes")?.record.parameter_bytes()
    }

    /// The `CK_MECHANISM` bytes.
    pub fn native_bytes(&self) -> Result<Vec<u8>> {
        self.owned("native_bytes")?.record.to_native_bytes()
    }

    pub fn params(&self) -> Result<Option<&dyn MechanismParams>> {
        Ok(self.owned("params")?.params.as_deref())
    }

    /// The parameters as `T`; `None` without parameters or for another type.
    pub fn params_as<T: MechanismParams>(&self) -> Result<Option<&T>> {
        Ok(self
            .owned("params_as")?
            .params
            .as_deref()
            .and_then(|p| p.as_any().downcast_ref::<T>()))
    }

    pub fn is_released(&self) -> bool {
        self.state.is_released()
    }

    /// Free the parameter buffer and release the owned parameters. Later
    /// calls are no-ops.
    pub fn release(&mut self) {
        let Some(mut owned) = self.state.release() else {
            return;
        };
        let mechanism = owned.record.mechanism_type();
        owned.record.release();
        if let Some(params) = owned.params.as_mut() {
            params.release();
        }
        tracing::debug!(
            mechanism,
            variant = %self.variant,
            "released mechanism"
        );
    }
}

impl Drop for Mechanism {
    fn drop(&mut self) {
        if !self.state.is_released() {
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ckm::Ckm;
    use crate::memory::thread_stats;
    use crate::params::{CkExtractParams, CkVersion, CkWtlsMasterKeyDeriveParams, CkWtlsRandomData};

    #[test]
    fn without_parameters() {
        for (variant, size) in Variant::ALL.into_iter().zip([12, 12, 24, 20]) {
            let before = thread_stats();
            let mechanism = Mechanism::new_for(variant, 0x0000_0001u32).unwrap();
            assert_eq!(mechanism.mechanism_type().unwrap(), 1);
            assert!(mechanism.parameter_ptr().unwrap().is_null());
            assert_eq!(mechanism.parameter_len().unwrap(), 0);
            assert!(mechanism.params().unwrap().is_none());

            let bytes = mechanism.native_bytes().unwrap();
            assert_eq!(bytes.len(), size);
            assert_eq!(&bytes[..4], &1u32.to_ne_bytes());
            assert!(bytes[4..].iter().all(|b| *b == 0));
            assert_eq!(thread_stats().since(before).allocations, 0);
        }
    }

    #[test]
    fn double_release_frees_one_buffer() {
        let before = thread_stats();
        let mut mechanism =
            Mechanism::with_bytes_for(Variant::V40, Ckm::AesCbc, &[0xAA; 16]).unwrap();
        assert_eq!(mechanism.parameter_len().unwrap(), 16);
        assert_eq!(mechanism.parameter_bytes().unwrap(), Some(vec![0xAA; 16]));

        mechanism.release();
        mechanism.release();
        drop(mechanism);
        let delta = thread_stats().since(before);
        assert_eq!(delta.allocations, 1);
        assert_eq!(delta.frees, 1);
    }

    #[test]
    fn accessors_fail_after_release() {
        let mut mechanism = Mechanism::with_bytes_for(Variant::V81, Ckm::AesCbc, &[1, 2]).unwrap();
        mechanism.release();
        assert!(mechanism.is_released());
        assert!(matches!(
            mechanism.parameter_len().unwrap_err(),
            MarshalError::UseAfterRelease {
                operation: "parameter_len"
            }
        ));
        assert!(mechanism.native_bytes().is_err());
        assert!(mechanism.mechanism_type().is_err());
        assert!(mechanism.params().is_err());
        assert_eq!(mechanism.variant(), Variant::V81);
    }

    #[test]
    fn structured_parameters() {
        let params = CkExtractParams::new_for(Variant::V41, 0x10).unwrap();
        let expected = params.to_native_bytes().unwrap();
        let mechanism =
            Mechanism::with_params_for(Variant::V41, Ckm::ExtractKeyFromKey, params).unwrap();
        assert_eq!(mechanism.parameter_bytes().unwrap(), Some(expected));
        assert_eq!(mechanism.parameter_len().unwrap(), 4);

        let extract = mechanism.params_as::<CkExtractParams>().unwrap().unwrap();
        assert_eq!(extract.bit(), 0x10);
        assert!(mechanism.params_as::<CkVersion>().unwrap().is_none());
    }

    #[test]
    fn parameter_variant_must_match() {
        let params = CkVersion::new_for(Variant::V40, 1, 0).unwrap();
        let before = thread_stats();
        let err = Mechanism::with_params_for(Variant::V81, Ckm::Ssl3PreMasterKeyGen, params)
            .unwrap_err();
        assert!(matches!(err, MarshalError::InvalidArgument { .. }));
        assert_eq!(thread_stats().since(before).allocations, 0);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn wtls_mechanism_owns_composite() {
        let before = thread_stats();
        let random_info = CkWtlsRandomData::new_for(Variant::V80, &[1; 16], &[2; 16]).unwrap();
        let params =
            CkWtlsMasterKeyDeriveParams::new_for(Variant::V80, Ckm::Sha1, random_info, false).unwrap();
        let mut mechanism =
            Mechanism::with_params_for(Variant::V80, Ckm::WtlsMasterKeyDerive, params).unwrap();
        assert_eq!(mechanism.parameter_len().unwrap(), 48);

        let params = mechanism
            .params_as::<CkWtlsMasterKeyDeriveParams>()
            .unwrap()
            .unwrap();
        assert_eq!(params.digest_mechanism().unwrap(), 0x220);
        let version = params.version().unwrap().unwrap();
        assert_eq!((version.major(), version.minor()), (0, 0));

        mechanism.release();
        let delta = thread_stats().since(before);
        assert_eq!(delta.allocations, 4);
        assert_eq!(delta.frees, 4);
    }

    #[test]
    fn public_constructors_pin_the_resolved_variant() {
        let active = Variant::current().unwrap();
        let other = Variant::ALL.into_iter().find(|v| *v != active).unwrap();

        let params = CkExtractParams::new_for(other, 7).unwrap();
        let before = thread_stats();
        let err = Mechanism::with_params(Ckm::ExtractKeyFromKey, params).unwrap_err();
        assert!(matches!(err, MarshalError::InvalidArgument { .. }));
        assert_eq!(thread_stats().since(before).allocations, 0);

        let mechanism =
            Mechanism::with_params(Ckm::ExtractKeyFromKey, CkExtractParams::new(7).unwrap()).unwrap();
        assert_eq!(mechanism.variant(), active);
        assert_eq!(mechanism.record().unwrap().variant(), active);
        let mechanism = Mechanism::with_bytes(Ckm::AesCbc, &[0; 16]).unwrap();
        assert_eq!(mechanism.record().unwrap().variant(), active);
    }

    #[test]
    fn drop_releases() {
        let before = thread_stats();
        {
            let _mechanism =
                Mechanism::with_bytes_for(Variant::V80, Ckm::RsaPkcs, &[0; 8]).unwrap();
        }
        assert_eq!(thread_stats().since(before).live(), 0);
    }

    #[test]
    fn current_platform_mechanism() {
        let mechanism = Mechanism::new(Ckm::Sha256).unwrap();
        assert_eq!(mechanism.variant(), Variant::current().unwrap());
        assert_eq!(mechanism.mechanism_type().unwrap(), 0x250);
    }
}
