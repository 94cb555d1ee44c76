//! WTLS key derivation parameters.
//!
//! [`CkWtlsMasterKeyDeriveParams`] is a composite: its native struct embeds a
//! `CK_WTLS_RANDOM_DATA` whose pointers refer to buffers owned by the
//! [`CkWtlsRandomData`] child, and points at a `CK_VERSION` output buffer the
//! token fills during derivation. The composite takes the child by value, so
//! the child cannot be released while the parent still references it.

use std::any::Any;

use p11_platform::{
    dispatch, per_variant, FieldSpec, Layout40, Layout41, Layout80, Layout81, NativeLayout,
    NativeWriter, PerVariant, Selected, StructLayout, Variant, VariantBuilder,
};

use crate::error::{MarshalError, Result};
use crate::lifecycle::Lifecycle;
use crate::memory::{self, UnmanagedBuffer};
use crate::params::version::{CkVersion, CkVersionNative};
use crate::params::{MechanismParams, NativeStruct};

/// Native `CK_WTLS_RANDOM_DATA` for layout `L`.
///
/// An empty random array is marshaled as a null pointer with zero length.
#[derive(Debug)]
pub struct CkWtlsRandomDataNative<L: NativeLayout> {
    client_random: Option<UnmanagedBuffer>,
    client_random_len: L::ULong,
    server_random: Option<UnmanagedBuffer>,
    server_random_len: L::ULong,
}

impl<L: NativeLayout> CkWtlsRandomDataNative<L> {
    pub(crate) fn new(client_random: &[u8], server_random: &[u8]) -> Result<Self> {
        let client_random_len = L::ulong("ulClientRandomLen", client_random.len() as u64)?;
        let server_random_len = L::ulong("ulServerRandomLen", server_random.len() as u64)?;
        Ok(Self {
            client_random: UnmanagedBuffer::from_bytes_or_null(client_random)?,
            client_random_len,
            server_random: UnmanagedBuffer::from_bytes_or_null(server_random)?,
            server_random_len,
        })
    }

    pub fn struct_layout() -> Result<StructLayout> {
        Ok(StructLayout::new(
            "CK_WTLS_RANDOM_DATA",
            L::VARIANT,
            &[
                FieldSpec::pointer("pClientRandom"),
                FieldSpec::ulong("ulClientRandomLen"),
                FieldSpec::pointer("pServerRandom"),
                FieldSpec::ulong("ulServerRandomLen"),
            ],
        )?)
    }

    pub fn client_random(&self) -> Result<Vec<u8>> {
        memory::read_or_empty(&self.client_random)
    }

    pub fn server_random(&self) -> Result<Vec<u8>> {
        memory::read_or_empty(&self.server_random)
    }
}

impl<L: NativeLayout> NativeStruct for CkWtlsRandomDataNative<L> {
    fn variant(&self) -> Variant {
        L::VARIANT
    }

    fn layout(&self) -> Result<StructLayout> {
        Self::struct_layout()
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        let layout = self.layout()?;
        let mut writer = NativeWriter::new(&layout);
        writer
            .pointer("pClientRandom", memory::address_or_null(&self.client_random))?
            .ulong("ulClientRandomLen", self.client_random_len.into())?
            .pointer("pServerRandom", memory::address_or_null(&self.server_random))?
            .ulong("ulServerRandomLen", self.server_random_len.into())?;
        Ok(writer.finish()?)
    }

    fn release(&mut self) {
        memory::free_slot(&mut self.client_random);
        memory::free_slot(&mut self.server_random);
    }
}

struct RandomDataBuilder<'a> {
    client_random: &'a [u8],
    server_random: &'a [u8],
}

impl VariantBuilder for RandomDataBuilder<'_> {
    type Output<L: NativeLayout> = CkWtlsRandomDataNative<L>;
    type Error = MarshalError;

    fn build<L: NativeLayout>(self) -> Result<CkWtlsRandomDataNative<L>> {
        CkWtlsRandomDataNative::new(self.client_random, self.server_random)
    }
}

type RandomDataVariants = PerVariant<
    CkWtlsRandomDataNative<Layout40>,
    CkWtlsRandomDataNative<Layout41>,
    CkWtlsRandomDataNative<Layout80>,
    CkWtlsRandomDataNative<Layout81>,
>;

/// Client and server random data of a WTLS handshake.
#[derive(Debug)]
pub struct CkWtlsRandomData {
    variant: Variant,
    state: Lifecycle<RandomDataVariants>,
}

impl CkWtlsRandomData {
    const NAME: &'static str = "CkWtlsRandomData";

    /// Build for the process-wide platform.
    pub fn new(client_random: &[u8], server_random: &[u8]) -> Result<Self> {
        Self::new_for(Variant::current()?, client_random, server_random)
    }

    /// Build for an explicit variant.
    pub(crate) fn new_for(variant: Variant, client_random: &[u8], server_random: &[u8]) -> Result<Self> {
        let native = dispatch(
            variant,
            RandomDataBuilder {
                client_random,
                server_random,
            },
        )?;
        Ok(Self {
            variant,
            state: Lifecycle::new(native),
        })
    }

    pub fn client_random(&self) -> Result<Vec<u8>> {
        let native = self.state.undisposed(Self::NAME, "client_random")?;
        per_variant!(native, native => native.client_random())
    }

    pub fn server_random(&self) -> Result<Vec<u8>> {
        let native = self.state.undisposed(Self::NAME, "server_random")?;
        per_variant!(native, native => native.server_random())
    }

    pub fn is_disposed(&self) -> bool {
        self.state.is_released()
    }

    /// Free both random buffers. Later calls are no-ops.
    pub fn dispose(&mut self) {
        if let Some(mut native) = self.state.release() {
            native.release();
            tracing::debug!(variant = %self.variant, "disposed CK_WTLS_RANDOM_DATA");
        }
    }

    /// Hand the native instance over to a parent that embeds it.
    pub(crate) fn into_native<L: NativeLayout>(self) -> Result<CkWtlsRandomDataNative<L>> {
        let Lifecycle::Active(native) = self.state else {
            return Err(MarshalError::ObjectDisposed {
                object: Self::NAME,
                operation: "into_native",
            });
        };
        native
            .downcast::<CkWtlsRandomDataNative<L>>()
            .map_err(|held| MarshalError::InvalidArgument {
                detail: format!(
                    "random data built for variant {} cannot be embedded in variant {}",
                    held.variant(),
                    L::VARIANT
                ),
            })
    }
}

impl MechanismParams for CkWtlsRandomData {
    fn variant(&self) -> Variant {
        self.variant
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        let native = self.state.undisposed(Self::NAME, "to_native_bytes")?;
        tracing::trace!(variant = %self.variant, "marshaling CK_WTLS_RANDOM_DATA");
        NativeStruct::to_native_bytes(native)
    }

    fn release(&mut self) {
        self.dispose();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Native `CK_WTLS_MASTER_KEY_DERIVE_PARAMS` for layout `L`.
#[derive(Debug)]
pub struct CkWtlsMasterKeyDeriveParamsNative<L: NativeLayout> {
    digest_mechanism: L::ULong,
    random_info: CkWtlsRandomDataNative<L>,
    version: Option<UnmanagedBuffer>,
}

impl<L: NativeLayout> CkWtlsMasterKeyDeriveParamsNative<L> {
    /// Takes ownership of `random_info`. Unless `dh` is set, a `CK_VERSION`
    /// output buffer is allocated for the token to fill.
    pub(crate) fn new(
        digest_mechanism: u64,
        random_info: CkWtlsRandomDataNative<L>,
        dh: bool,
    ) -> Result<Self> {
        let digest_mechanism = L::ulong("DigestMechanism", digest_mechanism)?;
        let version = if dh {
            None
        } else {
            let size = CkVersionNative::<L>::struct_layout()?.size;
            Some(UnmanagedBuffer::allocate(size)?)
        };
        Ok(Self {
            digest_mechanism,
            random_info,
            version,
        })
    }

    pub fn digest_mechanism(&self) -> u64 {
        self.digest_mechanism.into()
    }

    pub fn random_info(&self) -> &CkWtlsRandomDataNative<L> {
        &self.random_info
    }

    /// The version written by the token; `None` for the DH/ECC form.
    pub fn version(&self) -> Result<Option<CkVersionNative<L>>> {
        self.version
            .as_ref()
            .map(|buffer| CkVersionNative::from_native_bytes(&buffer.read()?))
            .transpose()
    }
}

impl<L: NativeLayout> NativeStruct for CkWtlsMasterKeyDeriveParamsNative<L> {
    fn variant(&self) -> Variant {
        L::VARIANT
    }

    fn layout(&self) -> Result<StructLayout> {
        let random_info = CkWtlsRandomDataNative::<L>::struct_layout()?;
        Ok(StructLayout::new(
            "CK_WTLS_MASTER_KEY_DERIVE_PARAMS",
            L::VARIANT,
            &[
                FieldSpec::ulong("DigestMechanism"),
                FieldSpec::embedded("RandomInfo", &random_info),
                FieldSpec::pointer("pVersion"),
            ],
        )?)
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        let layout = self.layout()?;
        let random_info = self.random_info.to_native_bytes()?;
        let mut writer = NativeWriter::new(&layout);
        writer
            .ulong("DigestMechanism", self.digest_mechanism())?
            .embedded("RandomInfo", &random_info)?
            .pointer("pVersion", memory::address_or_null(&self.version))?;
        Ok(writer.finish()?)
    }

    fn release(&mut self) {
        self.random_info.release();
        memory::free_slot(&mut self.version);
    }
}

struct MasterKeyDeriveBuilder {
    digest_mechanism: u64,
    random_info: CkWtlsRandomData,
    dh: bool,
}

impl VariantBuilder for MasterKeyDeriveBuilder {
    type Output<L: NativeLayout> = CkWtlsMasterKeyDeriveParamsNative<L>;
    type Error = MarshalError;

    fn build<L: NativeLayout>(self) -> Result<CkWtlsMasterKeyDeriveParamsNative<L>> {
        let random_info = self.random_info.into_native::<L>()?;
        CkWtlsMasterKeyDeriveParamsNative::new(self.digest_mechanism, random_info, self.dh)
    }
}

/// Parameters for `CKM_WTLS_MASTER_KEY_DERIVE` and
/// `CKM_WTLS_MASTER_KEY_DERIVE_DH_ECC`.
///
/// Every accessor fails with [`MarshalError::ObjectDisposed`] once
/// [`dispose`](Self::dispose) has run.
#[derive(Debug)]
pub struct CkWtlsMasterKeyDeriveParams {
    variant: Variant,
    state: Lifecycle<Selected<MasterKeyDeriveBuilder>>,
}

impl CkWtlsMasterKeyDeriveParams {
    const NAME: &'static str = "CkWtlsMasterKeyDeriveParams";

    /// Build for the process-wide platform.
    ///
    /// `dh` selects the DH/ECC form, which has no version output.
    pub fn new(
        digest_mechanism: impl Into<u64>,
        random_info: impl Into<Option<CkWtlsRandomData>>,
        dh: bool,
    ) -> Result<Self> {
        Self::new_for(Variant::current()?, digest_mechanism, random_info, dh)
    }

    /// Build for an explicit variant. The random data must have been built
    /// for the same variant.
    pub(crate) fn new_for(
        variant: Variant,
        digest_mechanism: impl Into<u64>,
        random_info: impl Into<Option<CkWtlsRandomData>>,
        dh: bool,
    ) -> Result<Self> {
        let Some(random_info) = random_info.into() else {
            return Err(MarshalError::InvalidArgument {
                detail: "random_info must not be null".to_string(),
            });
        };
        if random_info.variant != variant {
            return Err(MarshalError::InvalidArgument {
                detail: format!(
                    "random_info built for variant {}, expected {variant}",
                    random_info.variant
                ),
            });
        }
        let native = dispatch(
            variant,
            MasterKeyDeriveBuilder {
                digest_mechanism: digest_mechanism.into(),
                random_info,
                dh,
            },
        )?;
        tracing::debug!(%variant, dh, "built CK_WTLS_MASTER_KEY_DERIVE_PARAMS");
        Ok(Self {
            variant,
            state: Lifecycle::new(native),
        })
    }

    fn native(&self, operation: &'static str) -> Result<&Selected<MasterKeyDeriveBuilder>> {
        self.state.undisposed(Self::NAME, operation)
    }

    pub fn digest_mechanism(&self) -> Result<u64> {
        let native = self.native("digest_mechanism")?;
        Ok(per_variant!(native, native => native.digest_mechanism()))
    }

    pub fn client_random(&self) -> Result<Vec<u8>> {
        let native = self.native("client_random")?;
        per_variant!(native, native => native.random_info().client_random())
    }

    pub fn server_random(&self) -> Result<Vec<u8>> {
        let native = self.native("server_random")?;
        per_variant!(native, native => native.random_info().server_random())
    }

    /// Protocol version returned by the token after derivation; `None` for
    /// the DH/ECC form.
    pub fn version(&self) -> Result<Option<CkVersion>> {
        let native = self.native("version")?;
        let version = per_variant!(native, native => native.version()?.map(|v| (v.major(), v.minor())));
        version
            .map(|(major, minor)| CkVersion::new_for(self.variant, major, minor))
            .transpose()
    }

    pub fn is_disposed(&self) -> bool {
        self.state.is_released()
    }

    /// Release the native instance, the random data it owns, and the version
    /// buffer. Later calls are no-ops.
    pub fn dispose(&mut self) {
        if let Some(mut native) = self.state.release() {
            native.release();
            tracing::debug!(variant = %self.variant, "disposed CK_WTLS_MASTER_KEY_DERIVE_PARAMS");
        }
    }
}

impl MechanismParams for CkWtlsMasterKeyDeriveParams {
    fn variant(&self) -> Variant {
        self.variant
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        let native = self.native("to_native_bytes")?;
        tracing::trace!(variant = %self.variant, "marshaling CK_WTLS_MASTER_KEY_DERIVE_PARAMS");
        NativeStruct::to_native_bytes(native)
    }

    fn release(&mut self) {
        self.dispose();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
