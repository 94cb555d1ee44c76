//! Mechanism parameter values.
//!
//! Every parameter type comes in two layers:
//!
//! - a native struct generic over [`NativeLayout`](p11_platform::NativeLayout),
//!   implementing [`NativeStruct`], which knows its exact byte layout;
//! - a logical value implementing [`MechanismParams`], which builds exactly
//!   one native instance for the active variant and owns it (and any child
//!   values it embeds) until released.
//!
//! ## Types
//!
//! - [`CkExtractParams`] — `CKM_EXTRACT_KEY_FROM_KEY`
//! - [`CkVersion`] — protocol version info
//! - [`CkWtlsRandomData`] — client/server random data
//! - [`CkWtlsMasterKeyDeriveParams`] — `CKM_WTLS_MASTER_KEY_DERIVE(_DH_ECC)`
//! - [`CkEcdh1DeriveParams`] — `CKM_ECDH1_DERIVE`

use std::any::Any;
use std::fmt;

use p11_platform::{per_variant, PerVariant, StructLayout, Variant};

use crate::error::Result;

pub mod ecdh;
pub mod extract;
pub mod version;
pub mod wtls;

pub use ecdh::CkEcdh1DeriveParams;
pub use extract::CkExtractParams;
pub use version::CkVersion;
pub use wtls::{CkWtlsMasterKeyDeriveParams, CkWtlsRandomData};

/// One variant of a native struct.
pub trait NativeStruct: fmt::Debug + Send {
    /// The variant this instance was built for.
    fn variant(&self) -> Variant;

    /// Field layout of this struct for its variant.
    fn layout(&self) -> Result<StructLayout>;

    /// The exact native bytes. Pointer fields carry live addresses of buffers
    /// owned by this instance.
    fn to_native_bytes(&self) -> Result<Vec<u8>>;

    /// Free unmanaged sub-allocations. Idempotent.
    fn release(&mut self);
}

impl<A, B, C, D> NativeStruct for PerVariant<A, B, C, D>
where
    A: NativeStruct,
    B: NativeStruct,
    C: NativeStruct,
    D: NativeStruct,
{
    fn variant(&self) -> Variant {
        PerVariant::variant(self)
    }

    fn layout(&self) -> Result<StructLayout> {
        per_variant!(self, native => native.layout())
    }

    fn to_native_bytes(&self) -> Result<Vec<u8>> {
        per_variant!(self, native => native.to_native_bytes())
    }

    fn release(&mut self) {
        per_variant!(self, native => native.release())
    }
}

/// A logical mechanism parameter that can marshal itself for the variant it
/// was built for.
pub trait MechanismParams: fmt::Debug + Send + 'static {
    /// The variant chosen at construction.
    fn variant(&self) -> Variant;

    /// Native parameter block, ready to be copied into a mechanism record.
    fn to_native_bytes(&self) -> Result<Vec<u8>>;

    /// Release the native instance and everything it owns. Idempotent and
    /// infallible.
    fn release(&mut self);

    /// For recovering the concrete type from a mechanism.
    fn as_any(&self) -> &dyn Any;
}
