//! Native PKCS#11 ABI model.
//!
//! The same logical PKCS#11 structures exist in four physical layouts,
//! selected by two platform facts: pointer/`CK_ULONG` width (4 or 8 bytes)
//! and struct packing (natural or 1-byte).
//!
//! ## Modules
//!
//! - [`platform`] — Process-wide platform descriptor resolution
//! - [`variant`] — The four layout variants and the single dispatch point
//! - [`layout`] — Field offsets, padding, and native byte emission
//! - [`config`] — TOML configuration for pinning the descriptor

pub mod config;
pub mod error;
pub mod layout;
pub mod platform;
pub mod variant;

pub use config::PlatformConfig;
pub use error::PlatformError;
pub use layout::{FieldKind, FieldLayout, FieldSpec, NativeWriter, StructLayout};
pub use platform::{Packing, PlatformDescriptor, PointerWidth};
pub use variant::{
    dispatch, Layout40, Layout41, Layout80, Layout81, NativeLayout, PerVariant, Selected, Variant,
    VariantBuilder,
};
