//! Shared state behind every [`IoServer`](crate::IoServer)

use crate::archive::{ARCHIVE_SCHEME, ArchiveFileSystem};
use crate::assign::{Assign, AssignRegistry};
use crate::config::IoConfig;
use crate::fs::{FilesystemBackend, NativeFilesystem};
use crate::scheme::SchemeRegistry;
use crate::stream::{FileStream, Stream, ZipStream};
use crate::uri::Uri;
use crate::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Process-wide I/O state: the assign, scheme and archive registries plus
/// the filesystem backend.
///
/// Create one at startup and hand clones of the `Arc` to every
/// [`IoServer`](crate::IoServer). Registries use interior locking, so the
/// context itself is never mutated through `&mut`.
#[derive(Debug)]
pub struct IoContext {
    config: IoConfig,
    assigns: AssignRegistry,
    schemes: SchemeRegistry,
    archives: Arc<ArchiveFileSystem>,
    filesystem: Arc<dyn FilesystemBackend>,
    archive_fs_enabled: AtomicBool,
    standard_archives_mounted: Mutex<bool>,
}

impl IoContext {
    /// Create a context with the native filesystem, the `file` and `zip`
    /// schemes and the standard assigns.
    pub fn new(config: IoConfig) -> Result<Arc<Self>> {
        IoContextBuilder::new(config).build()
    }

    /// Start a customised context.
    pub fn builder(config: IoConfig) -> IoContextBuilder {
        IoContextBuilder::new(config)
    }

    /// Configuration the context was built with.
    pub fn config(&self) -> &IoConfig {
        &self.config
    }

    /// The assign registry.
    pub fn assigns(&self) -> &AssignRegistry {
        &self.assigns
    }

    /// The scheme registry.
    pub fn schemes(&self) -> &SchemeRegistry {
        &self.schemes
    }

    /// The mounted archives.
    pub fn archive_file_system(&self) -> &Arc<ArchiveFileSystem> {
        &self.archives
    }

    /// The real filesystem.
    pub fn filesystem(&self) -> &dyn FilesystemBackend {
        self.filesystem.as_ref()
    }

    /// Whether mounted archives take precedence over the real filesystem.
    pub fn is_archive_file_system_enabled(&self) -> bool {
        self.archive_fs_enabled.load(Ordering::Acquire)
    }

    /// Turn archive precedence on or off for every server.
    pub fn set_archive_file_system_enabled(&self, enabled: bool) {
        let previous = self.archive_fs_enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            info!(
                "Archive file system {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
    }

    pub(crate) fn standard_archives_mounted(&self) -> &Mutex<bool> {
        &self.standard_archives_mounted
    }
}

/// Builder for an [`IoContext`] with a custom backend or registrations.
#[derive(Debug)]
pub struct IoContextBuilder {
    config: IoConfig,
    filesystem: Option<Arc<dyn FilesystemBackend>>,
    standard_schemes: bool,
    standard_assigns: bool,
}

impl IoContextBuilder {
    /// Start from a configuration.
    pub fn new(config: IoConfig) -> Self {
        Self {
            config,
            filesystem: None,
            standard_schemes: true,
            standard_assigns: true,
        }
    }

    /// Use a different filesystem backend.
    #[must_use]
    pub fn with_filesystem(mut self, filesystem: Arc<dyn FilesystemBackend>) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    /// Skip registering the `file` and `zip` schemes.
    #[must_use]
    pub fn without_standard_schemes(mut self) -> Self {
        self.standard_schemes = false;
        self
    }

    /// Skip defining `root`, `home`, `bin`, `temp`, `user` and `export`.
    /// Assigns from the configuration are still defined.
    #[must_use]
    pub fn without_standard_assigns(mut self) -> Self {
        self.standard_assigns = false;
        self
    }

    /// Validate the configuration and build the context.
    pub fn build(self) -> Result<Arc<IoContext>> {
        self.config.validate()?;

        let archives = Arc::new(ArchiveFileSystem::new(self.config.enable_mmap));
        let context = IoContext {
            assigns: AssignRegistry::new(),
            schemes: SchemeRegistry::new(),
            archives: Arc::clone(&archives),
            filesystem: self
                .filesystem
                .unwrap_or_else(|| Arc::new(NativeFilesystem::new())),
            archive_fs_enabled: AtomicBool::new(self.config.archive_file_system_enabled),
            standard_archives_mounted: Mutex::new(false),
            config: self.config,
        };

        if self.standard_schemes {
            context.schemes.register_uri_scheme(
                "file",
                Arc::new(|uri: &Uri| Box::new(FileStream::new(uri.clone())) as Box<dyn Stream>),
            )?;
            context.schemes.register_uri_scheme(
                ARCHIVE_SCHEME,
                Arc::new(move |uri: &Uri| {
                    Box::new(ZipStream::new(uri.clone(), Arc::clone(&archives))) as Box<dyn Stream>
                }),
            )?;
        }

        if self.standard_assigns {
            context
                .assigns
                .setup_standard_assigns(&context.config.root_dir());
        }
        for (name, path) in &context.config.assigns {
            context.assigns.set_assign(Assign::new(name.clone(), path.clone()));
        }

        debug!(
            "I/O context ready: root {}, platform {}, archive fs {}",
            context.config.root_dir().display(),
            context.config.platform_name,
            context.is_archive_file_system_enabled()
        );
        Ok(Arc::new(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IoError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_standard_setup() {
        let dir = tempfile::tempdir().unwrap();
        let context = IoContext::new(IoConfig::new(dir.path()).with_assign("data", "root:data/")).unwrap();

        assert!(context.schemes().is_uri_scheme_registered("file"));
        assert!(context.schemes().is_uri_scheme_registered("zip"));
        for name in ["root", "home", "bin", "temp", "export", "data"] {
            assert!(context.assigns().has_assign(name), "missing assign {name}");
        }

        let resolved = context
            .assigns()
            .resolve_assigns_in_string("data:a.txt")
            .unwrap();
        let expected = Uri::from_native_path(&dir.path().join("data").join("a.txt"));
        assert_eq!(Uri::parse(&resolved).unwrap().local_path(), expected.local_path());
    }

    #[test]
    fn test_bare_context() {
        let context = IoContext::builder(IoConfig::default())
            .without_standard_schemes()
            .without_standard_assigns()
            .build()
            .unwrap();
        assert!(context.schemes().registered_schemes().is_empty());
        assert!(context.assigns().assigns().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = IoContext::new(IoConfig::default().with_copy_buffer_size(0));
        assert!(matches!(result, Err(IoError::Config(_))));
    }

    #[test]
    fn test_archive_fs_toggle() {
        let context = IoContext::new(IoConfig::default().with_archive_file_system(false)).unwrap();
        assert!(!context.is_archive_file_system_enabled());
        context.set_archive_file_system_enabled(true);
        assert!(context.is_archive_file_system_enabled());
    }
}
