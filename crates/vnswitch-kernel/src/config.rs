//! Switch configuration.
//!
//! Loaded from RON. Every field has a default, so an empty document is a
//! valid configuration:
//!
//! ```ron
//! (
//!     cache: (slots: 4096, cached_divisor: 4),
//!     max_symlinks: 16,
//! )
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vfs::Fd;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RON parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Vnode cache sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Fixed number of vnode slots.
    pub slots: usize,
    /// The Cached list holds at most `slots / cached_divisor` entries.
    pub cached_divisor: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            slots: 1024,
            cached_divisor: 4,
        }
    }
}

impl CacheConfig {
    /// Bound on unreferenced vnodes kept loaded.
    pub fn max_cached(&self) -> usize {
        (self.slots / self.cached_divisor.max(1)).max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchConfig {
    pub cache: CacheConfig,
    /// Symlink substitutions allowed in one resolution.
    pub max_symlinks: usize,
    /// Descriptor slots per I/O context.
    pub max_fds: usize,
    pub max_name_len: usize,
    pub max_path_len: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            max_symlinks: 16,
            max_fds: 256,
            max_name_len: 255,
            max_path_len: 1024,
        }
    }
}

impl SwitchConfig {
    /// Parse and validate RON text.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: SwitchConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a RON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.slots == 0 {
            return Err(ConfigError::Invalid("cache.slots must be at least 1".into()));
        }
        if self.cache.cached_divisor == 0 {
            return Err(ConfigError::Invalid(
                "cache.cached_divisor must be at least 1".into(),
            ));
        }
        if self.max_fds == 0 || self.max_fds > Fd::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_fds must be between 1 and {}",
                Fd::MAX
            )));
        }
        if self.max_name_len == 0 || self.max_path_len < self.max_name_len {
            return Err(ConfigError::Invalid(format!(
                "max_path_len ({}) must be at least max_name_len ({}), which must be nonzero",
                self.max_path_len, self.max_name_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = SwitchConfig::from_ron("()").unwrap();
        assert_eq!(config, SwitchConfig::default());
        assert_eq!(config.cache.max_cached(), 256);
    }

    #[test]
    fn test_partial_override() {
        let config = SwitchConfig::from_ron("(cache: (slots: 8), max_symlinks: 4)").unwrap();
        assert_eq!(config.cache.slots, 8);
        assert_eq!(config.cache.cached_divisor, 4);
        assert_eq!(config.cache.max_cached(), 2);
        assert_eq!(config.max_symlinks, 4);
        assert_eq!(config.max_fds, 256);
    }

    #[test]
    fn test_max_cached_never_zero() {
        let cache = CacheConfig {
            slots: 3,
            cached_divisor: 4,
        };
        assert_eq!(cache.max_cached(), 1);
    }

    #[test]
    fn test_rejects_zero_slots() {
        let err = SwitchConfig::from_ron("(cache: (slots: 0))").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_descriptor_count_past_fd_range() {
        let config = SwitchConfig {
            max_fds: Fd::MAX as usize + 1,
            ..SwitchConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = SwitchConfig {
            max_fds: Fd::MAX as usize,
            ..SwitchConfig::default()
        };
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_error() {
        let err = SwitchConfig::from_ron("(cache: ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(max_fds: 32)").unwrap();
        let config = SwitchConfig::load(file.path()).unwrap();
        assert_eq!(config.max_fds, 32);

        let missing = SwitchConfig::load(Path::new("/nonexistent/vnswitch.ron"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
