//! Configuration for the I/O server

use crate::{IoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Platform name of the host, as used in standard archive names.
pub fn host_platform_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "win32"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        std::env::consts::OS
    }
}

/// Configuration for an [`IoContext`](crate::IoContext)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Consult mounted archives before the real filesystem
    pub archive_file_system_enabled: bool,

    /// Memory-map archive data instead of reading it into memory
    pub enable_mmap: bool,

    /// Platform part of the standard archive name (`export_<platform>.zip`)
    pub platform_name: String,

    /// Target of the `root:` assign. Defaults to the current directory
    pub root: Option<PathBuf>,

    /// Additional assigns, name to path
    pub assigns: BTreeMap<String, String>,

    /// Scratch buffer size for file copies (in bytes)
    pub copy_buffer_size: usize,

    /// Buffer size for checksum computation (in bytes)
    pub crc_buffer_size: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            archive_file_system_enabled: true,
            enable_mmap: true,
            platform_name: host_platform_name().to_string(),
            root: None,
            assigns: BTreeMap::new(),
            copy_buffer_size: 1024 * 1024, // 1 MiB
            crc_buffer_size: 64 * 1024,    // 64 KiB
        }
    }
}

impl IoConfig {
    /// Create a configuration rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| IoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| IoError::Filesystem {
            op: "read config",
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Check the configuration for values the server cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.copy_buffer_size == 0 {
            return Err(IoError::Config("copy_buffer_size must be non-zero".into()));
        }
        if self.crc_buffer_size == 0 {
            return Err(IoError::Config("crc_buffer_size must be non-zero".into()));
        }
        if self.platform_name.is_empty() {
            return Err(IoError::Config("platform_name must not be empty".into()));
        }
        if let Some(name) = self
            .assigns
            .keys()
            .find(|name| name.len() < 2 || name.contains(':'))
        {
            return Err(IoError::Config(format!("invalid assign name '{name}'")));
        }
        Ok(())
    }

    /// Resolved root directory
    pub fn root_dir(&self) -> PathBuf {
        self.root
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Set the root directory
    #[must_use]
    pub fn with_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.root = Some(root.as_ref().to_path_buf());
        self
    }

    /// Enable or disable archive precedence
    #[must_use]
    pub const fn with_archive_file_system(mut self, enable: bool) -> Self {
        self.archive_file_system_enabled = enable;
        self
    }

    /// Enable or disable memory-mapped archives
    #[must_use]
    pub const fn with_mmap(mut self, enable: bool) -> Self {
        self.enable_mmap = enable;
        self
    }

    /// Set the platform name
    #[must_use]
    pub fn with_platform_name(mut self, name: impl Into<String>) -> Self {
        self.platform_name = name.into();
        self
    }

    /// Add an assign
    #[must_use]
    pub fn with_assign(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.assigns.insert(name.into(), path.into());
        self
    }

    /// Set the copy buffer size
    #[must_use]
    pub const fn with_copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = size;
        self
    }

    /// Set the checksum buffer size
    #[must_use]
    pub const fn with_crc_buffer_size(mut self, size: usize) -> Self {
        self.crc_buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = IoConfig::default();
        assert!(config.archive_file_system_enabled);
        assert!(config.enable_mmap);
        assert_eq!(config.copy_buffer_size, 1024 * 1024);
        assert_eq!(config.crc_buffer_size, 64 * 1024);
        assert_eq!(config.platform_name, host_platform_name());
        config.validate().unwrap();
    }

    #[test]
    fn test_builder() {
        let config = IoConfig::new("/game")
            .with_archive_file_system(false)
            .with_platform_name("win32")
            .with_assign("textures", "root:textures/");
        assert_eq!(config.root_dir(), PathBuf::from("/game"));
        assert!(!config.archive_file_system_enabled);
        assert_eq!(config.assigns.get("textures").map(String::as_str), Some("root:textures/"));
    }

    #[test]
    fn test_json_partial() {
        let config = IoConfig::from_json_str(
            r#"{ "platform_name": "xbox360", "assigns": { "data": "root:data/" } }"#,
        )
        .unwrap();
        assert_eq!(config.platform_name, "xbox360");
        assert!(config.archive_file_system_enabled);
        assert_eq!(config.assigns.len(), 1);
    }

    #[test]
    fn test_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("io.json");
        let config = IoConfig::new(dir.path()).with_mmap(false);
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        assert_eq!(IoConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn test_validation() {
        assert!(IoConfig::default().with_copy_buffer_size(0).validate().is_err());
        assert!(IoConfig::default().with_crc_buffer_size(0).validate().is_err());
        assert!(IoConfig::default().with_platform_name("").validate().is_err());
        assert!(IoConfig::default().with_assign("x", "/tmp").validate().is_err());
        assert!(matches!(
            IoConfig::from_json_str("{ not json"),
            Err(IoError::Config(_))
        ));
    }
}
