//! Marshaling error types.

use p11_platform::PlatformError;

/// Errors that can occur while building or using native mechanism data.
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    /// Missing or out-of-range caller input.
    #[error("invalid argument: {detail}")]
    InvalidArgument {
        /// What was wrong with the input.
        detail: String,
    },

    /// A logical value does not fit the active variant's field width.
    #[error("value {value:#x} of field '{field}' does not fit {width_bytes}-byte native field")]
    Overflow {
        /// Native field name.
        field: String,
        /// The value that did not fit.
        value: u64,
        /// Width of the native field.
        width_bytes: usize,
    },

    /// Unmanaged allocation failed.
    #[error("out of memory allocating {size} bytes of unmanaged memory")]
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
    },

    /// Internal invariant violation: data larger than its destination buffer.
    #[error("buffer too small: {needed} bytes do not fit in {capacity}")]
    BufferTooSmall {
        /// Bytes to be written.
        needed: usize,
        /// Size of the destination buffer.
        capacity: usize,
    },

    /// Operation on a released mechanism or freed buffer.
    #[error("{operation} called after release")]
    UseAfterRelease {
        /// The rejected accessor or operation.
        operation: &'static str,
    },

    /// Operation on a disposed parameter value.
    #[error("{operation} called on disposed {object}")]
    ObjectDisposed {
        /// Type name of the disposed value.
        object: &'static str,
        /// The rejected accessor or operation.
        operation: &'static str,
    },

    /// The native ABI could not be resolved.
    #[error("unsupported platform: {detail}")]
    UnsupportedPlatform {
        /// Why the platform was rejected.
        detail: String,
    },

    /// Any other platform or layout error.
    #[error("platform error: {0}")]
    Platform(PlatformError),
}

impl From<PlatformError> for MarshalError {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Overflow {
                field,
                value,
                width_bytes,
            } => Self::Overflow {
                field,
                value,
                width_bytes,
            },
            PlatformError::UnsupportedPlatform { detail } => Self::UnsupportedPlatform { detail },
            other => Self::Platform(other),
        }
    }
}

/// Result type alias for marshaling operations.
pub type Result<T> = std::result::Result<T, MarshalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_errors_keep_their_kind() {
        let err = MarshalError::from(PlatformError::Overflow {
            field: "ulMaxObjectCount".to_string(),
            value: 0x1_0000_0000,
            width_bytes: 4,
        });
        assert!(matches!(err, MarshalError::Overflow { width_bytes: 4, .. }));
        assert_eq!(
            err.to_string(),
            "value 0x100000000 of field 'ulMaxObjectCount' does not fit 4-byte native field"
        );

        let err = MarshalError::from(PlatformError::UnsupportedPlatform {
            detail: "no pointers".to_string(),
        });
        assert_eq!(err.to_string(), "unsupported platform: no pointers");
    }
}
