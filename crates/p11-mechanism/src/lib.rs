//! PKCS#11 mechanism construction and parameter marshaling.
//!
//! Builds byte-exact `CK_MECHANISM` records and parameter blocks for the
//! active platform variant, and owns the unmanaged memory they reference.
//!
//! ## Modules
//!
//! - [`memory`] — Unmanaged buffers and per-thread allocation counters
//! - [`lifecycle`] — Active/released state gate shared by all owners
//! - [`record`] — Native `CK_MECHANISM` record factory
//! - [`mechanism`] — Caller-facing mechanism owning its record and parameters
//! - [`params`] — Parameter values, simple and composite
//! - [`ckm`] — Mechanism type and key derivation function codes

pub mod ckm;
pub mod error;
pub mod lifecycle;
pub mod mechanism;
pub mod memory;
pub mod params;
pub mod record;

// Re-export key types for convenience
pub use ckm::{Ckd, Ckm};
pub use error::MarshalError;
pub use lifecycle::Lifecycle;
pub use mechanism::Mechanism;
pub use memory::{thread_stats, AllocationStats, UnmanagedBuffer};
pub use params::{
    CkEcdh1DeriveParams, CkExtractParams, CkVersion, CkWtlsMasterKeyDeriveParams,
    CkWtlsRandomData, MechanismParams, NativeStruct,
};
pub use record::NativeMechanismRecord;
