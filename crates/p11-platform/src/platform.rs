//! Platform descriptor: the native ABI actually in use.
//!
//! A descriptor is the pair (pointer width, struct packing). It is resolved
//! once per process and never changes afterwards; every variant selection in
//! the workspace is derived from it.

use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};
use crate::variant::Variant;

/// Width of native pointers and of `CK_ULONG`-like fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PointerWidth {
    /// 4-byte pointers and unmanaged longs.
    Four,
    /// 8-byte pointers and unmanaged longs.
    Eight,
}

impl PointerWidth {
    /// Width in bytes.
    pub fn bytes(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Largest value a field of this width can hold.
    pub fn max_value(self) -> u64 {
        match self {
            Self::Four => u64::from(u32::MAX),
            Self::Eight => u64::MAX,
        }
    }
}

impl TryFrom<u8> for PointerWidth {
    type Error = PlatformError;

    fn try_from(bytes: u8) -> Result<Self> {
        match bytes {
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            other => Err(PlatformError::InvalidConfig {
                detail: format!("pointer width must be 4 or 8 bytes, got {other}"),
            }),
        }
    }
}

impl From<PointerWidth> for u8 {
    fn from(width: PointerWidth) -> Self {
        match width {
            PointerWidth::Four => 4,
            PointerWidth::Eight => 8,
        }
    }
}

/// Struct packing rule of the native library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Packing {
    /// Fields aligned to their own size, struct padded to its largest field.
    Natural,
    /// 1-byte packing: no padding anywhere.
    Packed,
}

impl fmt::Display for Packing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Natural => write!(f, "natural"),
            Self::Packed => write!(f, "packed"),
        }
    }
}

/// The resolved (pointer width, packing) pair describing the native ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlatformDescriptor {
    /// Native pointer and unmanaged long width.
    pub pointer_width: PointerWidth,
    /// Native struct packing rule.
    pub packing: Packing,
}

impl fmt::Display for PlatformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-byte/{}", self.pointer_width.bytes(), self.packing)
    }
}

impl PlatformDescriptor {
    /// Construct a descriptor from its two axes.
    pub fn new(pointer_width: PointerWidth, packing: Packing) -> Self {
        Self {
            pointer_width,
            packing,
        }
    }

    /// Introspect the host ABI.
    ///
    /// PKCS#11 libraries on Windows are built with 1-byte packing; everywhere
    /// else they use the compiler's natural alignment.
    pub fn detect() -> Result<Self> {
        detect_host().map_err(|detail| PlatformError::UnsupportedPlatform { detail })
    }

    /// The layout variant this descriptor selects.
    pub fn variant(&self) -> Variant {
        Variant::select(self)
    }
}

fn detect_host() -> std::result::Result<PlatformDescriptor, String> {
    let pointer_width = match std::mem::size_of::<usize>() {
        4 => PointerWidth::Four,
        8 => PointerWidth::Eight,
        other => return Err(format!("native pointer width of {other} bytes")),
    };
    let packing = if cfg!(windows) {
        Packing::Packed
    } else {
        Packing::Natural
    };
    Ok(PlatformDescriptor::new(pointer_width, packing))
}

static RESOLVED: OnceLock<std::result::Result<PlatformDescriptor, String>> = OnceLock::new();

/// Resolve the process-wide descriptor, detecting it on first use.
///
/// The result is cached: every call in a process returns the same value.
/// An error here means no marshaling can ever succeed in this process and
/// should be treated as fatal at startup.
pub fn resolve() -> Result<PlatformDescriptor> {
    RESOLVED
        .get_or_init(|| {
            let detected = detect_host();
            match &detected {
                Ok(descriptor) => tracing::info!(%descriptor, "resolved native platform"),
                Err(detail) => tracing::error!(%detail, "native platform cannot be resolved"),
            }
            detected
        })
        .clone()
        .map_err(|detail| PlatformError::UnsupportedPlatform { detail })
}

/// Pin the process-wide descriptor before first use.
///
/// Only the packing can differ from the host; a pointer width other than the
/// host's fails with [`PlatformError::UnsupportedPlatform`] and leaves the
/// process-wide descriptor untouched. Installing the value that is already in
/// effect is accepted; any other value after resolution fails with
/// [`PlatformError::PlatformConflict`].
pub fn install(descriptor: PlatformDescriptor) -> Result<PlatformDescriptor> {
    let host = PlatformDescriptor::detect()?;
    if descriptor.pointer_width != host.pointer_width {
        tracing::warn!(%descriptor, %host, "platform install rejected");
        return Err(PlatformError::UnsupportedPlatform {
            detail: format!(
                "{}-byte pointers requested on a host with {}-byte pointers",
                descriptor.pointer_width.bytes(),
                host.pointer_width.bytes()
            ),
        });
    }

    let mut installed = false;
    let resolved = RESOLVED.get_or_init(|| {
        installed = true;
        Ok(descriptor)
    });
    match resolved {
        Ok(current) if *current == descriptor => {
            if installed {
                tracing::info!(%descriptor, "installed native platform");
            }
            Ok(*current)
        }
        Ok(current) => {
            tracing::warn!(resolved = %current, requested = %descriptor, "platform install rejected");
            Err(PlatformError::PlatformConflict {
                resolved: *current,
                requested: descriptor,
            })
        }
        Err(detail) => Err(PlatformError::UnsupportedPlatform {
            detail: detail.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_matches_host_pointer_width() {
        let d = PlatformDescriptor::detect().unwrap();
        assert_eq!(d.pointer_width.bytes(), std::mem::size_of::<usize>());
        if cfg!(windows) {
            assert_eq!(d.packing, Packing::Packed);
        } else {
            assert_eq!(d.packing, Packing::Natural);
        }
    }

    #[test]
    fn resolve_is_idempotent() {
        let first = resolve().unwrap();
        let second = resolve().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.pointer_width, second.pointer_width);
        assert_eq!(first.packing, second.packing);
    }

    #[test]
    fn install_same_value_is_accepted() {
        let current = resolve().unwrap();
        assert_eq!(install(current).unwrap(), current);
    }

    #[test]
    fn install_different_value_conflicts() {
        let current = resolve().unwrap();
        let other = PlatformDescriptor::new(
            current.pointer_width,
            match current.packing {
                Packing::Natural => Packing::Packed,
                Packing::Packed => Packing::Natural,
            },
        );
        let err = install(other).unwrap_err();
        assert!(matches!(err, PlatformError::PlatformConflict { .. }));
        assert_eq!(resolve().unwrap(), current);
    }

    #[test]
    fn install_foreign_pointer_width_is_unsupported() {
        let current = resolve().unwrap();
        let foreign = match current.pointer_width {
            PointerWidth::Four => PointerWidth::Eight,
            PointerWidth::Eight => PointerWidth::Four,
        };
        for packing in [Packing::Natural, Packing::Packed] {
            let err = install(PlatformDescriptor::new(foreign, packing)).unwrap_err();
            assert!(matches!(err, PlatformError::UnsupportedPlatform { .. }));
        }
        assert_eq!(resolve().unwrap(), current);
    }

    #[test]
    fn pointer_width_from_bytes() {
        assert_eq!(PointerWidth::try_from(4).unwrap(), PointerWidth::Four);
        assert_eq!(PointerWidth::try_from(8).unwrap(), PointerWidth::Eight);
        assert!(PointerWidth::try_from(2).is_err());
        assert_eq!(PointerWidth::Four.max_value(), 0xFFFF_FFFF);
    }

    #[test]
    fn descriptor_display() {
        let d = PlatformDescriptor::new(PointerWidth::Eight, Packing::Packed);
        assert_eq!(d.to_string(), "8-byte/packed");
        let d = PlatformDescriptor::new(PointerWidth::Four, Packing::Natural);
        assert_eq!(d.to_string(), "4-byte/natural");
    }
}
