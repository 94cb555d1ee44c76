//! TOML configuration for pinning the native ABI.
//!
//! Applications loading a PKCS#11 library whose ABI differs from the host
//! defaults (e.g. a packed library on a non-Windows host) can state it
//! explicitly:
//!
//! ```toml
//! [platform]
//! pointer-width = 8
//! packing = "packed"
//! ```
//!
//! Keys left out fall back to [`PlatformDescriptor::detect`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};
use crate::platform::{self, Packing, PlatformDescriptor, PointerWidth};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlatformConfig {
    /// Native ABI overrides.
    #[serde(default)]
    pub platform: PlatformSection,
}

/// The `[platform]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlatformSection {
    /// Pointer / unmanaged long width in bytes (4 or 8).
    #[serde(default)]
    pub pointer_width: Option<PointerWidth>,
    /// Struct packing of the native library.
    #[serde(default)]
    pub packing: Option<Packing>,
}

impl PlatformConfig {
    /// Parse a configuration from a TOML string.
    pub fn parse(input: &str) -> Result<Self> {
        let config: PlatformConfig = toml::from_str(input)?;
        Ok(config)
    }

    /// Parse a configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PlatformError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// The descriptor this configuration describes, completing missing keys
    /// from the host.
    pub fn descriptor(&self) -> Result<PlatformDescriptor> {
        if let (Some(pointer_width), Some(packing)) =
            (self.platform.pointer_width, self.platform.packing)
        {
            return Ok(PlatformDescriptor::new(pointer_width, packing));
        }
        let host = PlatformDescriptor::detect()?;
        Ok(PlatformDescriptor::new(
            self.platform.pointer_width.unwrap_or(host.pointer_width),
            self.platform.packing.unwrap_or(host.packing),
        ))
    }

    /// Install the configured descriptor as the process-wide one. A pointer
    /// width other than the host's is rejected as unsupported.
    pub fn apply(&self) -> Result<PlatformDescriptor> {
        platform::install(self.descriptor()?)
    }
}
