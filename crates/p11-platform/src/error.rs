//! Error types for platform resolution and native layout.

use std::path::PathBuf;

use crate::platform::PlatformDescriptor;

/// Errors that can occur while resolving the native ABI or laying out structs.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The native ABI of the host cannot be expressed as a descriptor.
    #[error("unsupported platform: {detail}")]
    UnsupportedPlatform {
        /// Description of what could not be determined.
        detail: String,
    },

    /// A different descriptor was installed after the process-wide one was fixed.
    #[error("platform already resolved as {resolved}, refusing to install {requested}")]
    PlatformConflict {
        /// The descriptor already in effect.
        resolved: PlatformDescriptor,
        /// The descriptor that was rejected.
        requested: PlatformDescriptor,
    },

    /// A logical value does not fit the active variant's field width.
    #[error("value {value:#x} of field '{field}' does not fit {width_bytes}-byte native field")]
    Overflow {
        /// Name of the native field.
        field: String,
        /// The rejected value.
        value: u64,
        /// Width of the native field in bytes.
        width_bytes: usize,
    },

    /// A struct was written with fields out of order or left incomplete.
    #[error("layout mismatch in {struct_name}: {detail}")]
    LayoutMismatch {
        /// Native struct name.
        struct_name: String,
        /// Description of the mismatch.
        detail: String,
    },

    /// Caller supplied an invalid configuration value.
    #[error("invalid configuration: {detail}")]
    InvalidConfig {
        /// Description of the invalid value.
        detail: String,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {}", path.display())]
    NotFound {
        /// The path that was not found.
        path: PathBuf,
    },

    /// TOML deserialization error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O error reading configuration files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for platform operations.
pub type Result<T> = std::result::Result<T, PlatformError>;
