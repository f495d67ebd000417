//! The I/O server façade
//!
//! [`IoServer`] is the single entry point applications use: it resolves
//! assigns, picks the stream type by URI scheme, redirects file accesses into
//! mounted archives and wraps the real filesystem for everything else.

use crate::archive::{ARCHIVE_EXTENSION, archive_file_uri, normalize_entry_path};
use crate::assign::Assign;
use crate::context::IoContext;
use crate::scheme::StreamFactory;
use crate::stream::{AccessMode, Stream};
use crate::uri::Uri;
use crate::{IoError, Result};
use crc32fast::Hasher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// Handle on a shared [`IoContext`].
///
/// Cloning is cheap and every clone sees the same assigns, schemes and
/// mounted archives. Paths passed to the server may contain assigns
/// (`home:data/a.txt`), be full URIs (`file:///tmp/a.txt`) or be native paths.
#[derive(Debug, Clone)]
pub struct IoServer {
    context: Arc<IoContext>,
}

impl IoServer {
    /// Create a server over a context.
    pub fn new(context: Arc<IoContext>) -> Self {
        Self { context }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<IoContext> {
        &self.context
    }

    // Assigns and schemes

    /// Define or overwrite an assign.
    pub fn set_assign(&self, name: &str, path: &str) {
        self.context.assigns().set_assign(Assign::new(name, path));
    }

    /// Returns true if an assign with this name exists.
    pub fn has_assign(&self, name: &str) -> bool {
        self.context.assigns().has_assign(name)
    }

    /// Look up the path an assign expands to.
    pub fn get_assign(&self, name: &str) -> Result<String> {
        self.context.assigns().get_assign(name)
    }

    /// Remove an assign. Returns false if it did not exist.
    pub fn clear_assign(&self, name: &str) -> bool {
        self.context.assigns().clear_assign(name)
    }

    /// Expand leading assign tokens in `path`.
    pub fn resolve_assigns_in_string(&self, path: &str) -> Result<String> {
        self.context.assigns().resolve_assigns_in_string(path)
    }

    /// Register the stream factory for a URI scheme.
    pub fn register_uri_scheme(&self, scheme: &str, factory: Arc<dyn StreamFactory>) -> Result<()> {
        self.context.schemes().register_uri_scheme(scheme, factory)
    }

    /// Returns true if the scheme has a stream factory.
    pub fn is_uri_scheme_registered(&self, scheme: &str) -> bool {
        self.context.schemes().is_uri_scheme_registered(scheme)
    }

    /// Resolve assigns and parse the result.
    ///
    /// Strings that do not parse as a URI are taken as native paths; relative
    /// ones are anchored at the configured root directory.
    pub fn resolve_uri(&self, path: &str) -> Result<Uri> {
        let resolved = self.resolve_assigns_in_string(path)?;
        if let Ok(uri) = Uri::parse(&resolved) {
            return Ok(uri);
        }
        if resolved.is_empty() {
            return Err(IoError::InvalidUri(path.to_string()));
        }
        let native = Path::new(&resolved);
        if native.is_absolute() {
            Ok(Uri::from_native_path(native))
        } else {
            Ok(Uri::from_native_path(&self.context.config().root_dir().join(native)))
        }
    }

    // Streams

    /// Create an unopened stream for `path`.
    ///
    /// When the archive file system is enabled and a mounted archive holds
    /// the file, the stream reads the archive entry instead.
    pub fn create_stream(&self, path: &str) -> Result<Box<dyn Stream>> {
        let uri = self.resolve_uri(path)?;
        self.stream_for(&uri, true)
    }

    /// Create an unopened stream for an already resolved URI.
    pub fn create_stream_for_uri(&self, uri: &Uri) -> Result<Box<dyn Stream>> {
        self.stream_for(uri, true)
    }

    fn stream_for(&self, uri: &Uri, archive_redirect: bool) -> Result<Box<dyn Stream>> {
        let uri = if archive_redirect && self.is_archive_file_system_enabled() {
            self.context
                .archive_file_system()
                .convert_file_to_archive_uri_if_exists(uri)
        } else {
            uri.clone()
        };
        let factory = self.context.schemes().stream_factory(uri.scheme()).inspect_err(|e| {
            error!("Cannot create stream for {}: {}", uri, e);
        })?;
        Ok(factory.create_stream(&uri))
    }

    fn open_stream(&self, uri: &Uri, mode: AccessMode, archive_redirect: bool) -> Result<Box<dyn Stream>> {
        let mut stream = self.stream_for(uri, archive_redirect)?;
        stream.set_access_mode(mode);
        stream.open().inspect_err(|e| {
            error!("Failed to open {} ({:?}): {}", stream.uri(), mode, e);
        })?;
        Ok(stream)
    }

    // Queries

    /// Returns true if the file exists in a mounted archive or on disk.
    pub fn file_exists(&self, path: &str) -> bool {
        let Ok(uri) = self.resolve_uri(path) else {
            return false;
        };
        if self.is_archive_file_system_enabled()
            && self
                .context
                .archive_file_system()
                .find_archive_with_file(&uri)
                .is_some()
        {
            return true;
        }
        match uri.scheme() {
            "file" => self.context.filesystem().file_exists(&uri.to_native_path()),
            "zip" => self.archive_entry_exists(&uri),
            _ => false,
        }
    }

    /// Returns true if the directory exists in a mounted archive or on disk.
    pub fn directory_exists(&self, path: &str) -> bool {
        let Ok(uri) = self.resolve_uri(path) else {
            return false;
        };
        if self.is_archive_file_system_enabled()
            && self
                .context
                .archive_file_system()
                .find_archive_with_dir(&uri)
                .is_some()
        {
            return true;
        }
        uri.scheme() == "file" && self.context.filesystem().directory_exists(&uri.to_native_path())
    }

    fn archive_entry_exists(&self, uri: &Uri) -> bool {
        let Some(file) = uri.query_value("file") else {
            return false;
        };
        self.context
            .archive_file_system()
            .find_or_open_archive(&archive_file_uri(uri))
            .is_ok_and(|archive| archive.find_file(&normalize_entry_path(file)).is_some())
    }

    /// Returns true for anything inside a mounted archive, otherwise the
    /// file's read-only flag.
    pub fn is_read_only(&self, path: &str) -> bool {
        let Ok(uri) = self.resolve_uri(path) else {
            return false;
        };
        if uri.scheme() == "zip" || self.archive_holds(&uri) {
            return true;
        }
        uri.scheme() == "file" && self.context.filesystem().is_read_only(&uri.to_native_path())
    }

    /// Names of the files in a directory matching `pattern` (`*`, `?`).
    ///
    /// A directory inside a mounted archive is listed from the archive
    /// index only. With `as_full_path` each name is returned as a full URI.
    pub fn list_files(&self, path: &str, pattern: &str, as_full_path: bool) -> Result<Vec<String>> {
        self.list(path, pattern, as_full_path, false)
    }

    /// Names of the subdirectories of a directory matching `pattern`.
    pub fn list_directories(&self, path: &str, pattern: &str, as_full_path: bool) -> Result<Vec<String>> {
        self.list(path, pattern, as_full_path, true)
    }

    fn list(&self, path: &str, pattern: &str, as_full_path: bool, dirs: bool) -> Result<Vec<String>> {
        let uri = self.resolve_uri(path)?;

        let in_archive = if self.is_archive_file_system_enabled() {
            self.context.archive_file_system().find_archive_with_dir(&uri)
        } else {
            None
        };
        let names = match in_archive {
            Some((archive, dir)) => {
                debug!("Listing {} from archive {}", uri, archive.uri());
                if dirs {
                    archive.list_dirs(&dir, pattern)
                } else {
                    archive.list_files(&dir, pattern)
                }
            }
            None => {
                let native = native_path(&uri)?;
                let filesystem = self.context.filesystem();
                if dirs {
                    filesystem.list_directories(&native, pattern)?
                } else {
                    filesystem.list_files(&native, pattern)?
                }
            }
        };

        if as_full_path {
            Ok(names
                .iter()
                .map(|name| uri.append_local_path(name).as_string())
                .collect())
        } else {
            Ok(names)
        }
    }

    // File operations

    /// Copy a file. The source may live in a mounted archive, the target is
    /// always written to disk. A read-only target is made writable first.
    pub fn copy_file(&self, from: &str, to: &str) -> Result<()> {
        let from_uri = self.resolve_uri(from)?;
        let to_uri = self.resolve_uri(to)?;

        if to_uri.scheme() == "file" {
            let target = to_uri.to_native_path();
            let filesystem = self.context.filesystem();
            if filesystem.file_exists(&target) && filesystem.is_read_only(&target) {
                filesystem.set_read_only(&target, false)?;
            }
        }

        let mut source = self.open_stream(&from_uri, AccessMode::Read, true)?;
        let mut target = match self.open_stream(&to_uri, AccessMode::Write, false) {
            Ok(target) => target,
            Err(e) => {
                source.close();
                return Err(e);
            }
        };

        let mut buffer = vec![0u8; self.context.config().copy_buffer_size];
        let mut copied = 0u64;
        let result = loop {
            if source.eof() {
                break Ok(());
            }
            match source.read(&mut buffer) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    if let Err(e) = target.write(&buffer[..n]) {
                        break Err(e);
                    }
                    copied += n as u64;
                }
                Err(e) => break Err(e),
            }
        };
        let result = result.and_then(|()| target.flush());

        source.close();
        target.close();
        match &result {
            Ok(()) => debug!("Copied {} to {} ({} bytes)", from_uri, to_uri, copied),
            Err(e) => error!("Failed to copy {} to {}: {}", from_uri, to_uri, e),
        }
        result
    }

    /// CRC-32 of a file's contents. The file may live in a mounted archive.
    pub fn compute_file_crc(&self, path: &str) -> Result<u32> {
        let uri = self.resolve_uri(path)?;
        let mut stream = self.open_stream(&uri, AccessMode::Read, true)?;

        let mut buffer = vec![0u8; self.context.config().crc_buffer_size];
        let mut hasher = Hasher::new();
        let result = loop {
            match stream.read(&mut buffer) {
                Ok(0) => break Ok(()),
                Ok(n) => hasher.update(&buffer[..n]),
                Err(e) => break Err(e),
            }
            if stream.eof() {
                break Ok(());
            }
        };
        stream.close();
        result.map(|()| hasher.finalize())
    }

    /// Read a whole file into memory. The file may live in a mounted archive.
    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let uri = self.resolve_uri(path)?;
        let mut stream = self.open_stream(&uri, AccessMode::Read, true)?;

        let mut data = vec![0u8; usize::try_from(stream.size()).unwrap_or(0)];
        let result = stream.read(&mut data).map(|n| data.truncate(n));
        stream.close();
        result.map(|()| data)
    }

    /// Create a directory along with any missing parents.
    pub fn create_directory(&self, path: &str) -> Result<()> {
        let uri = self.resolve_uri(path)?;
        let native = native_path(&uri)?;
        let filesystem = self.context.filesystem();

        let mut missing = Vec::new();
        let mut current = native.as_path();
        while !filesystem.directory_exists(current) {
            missing.push(current.to_path_buf());
            match current.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => current = parent,
                _ => break,
            }
        }

        while let Some(dir) = missing.pop() {
            filesystem.create_directory(&dir)?;
        }
        Ok(())
    }

    /// Delete a file on disk. Archive contents cannot be deleted.
    pub fn delete_file(&self, path: &str) -> Result<()> {
        let uri = self.writable_uri(path, "delete file")?;
        self.context.filesystem().delete_file(&native_path(&uri)?)
    }

    /// Delete an empty directory on disk.
    pub fn delete_directory(&self, path: &str) -> Result<()> {
        let uri = self.writable_uri(path, "delete directory")?;
        self.context.filesystem().delete_directory(&native_path(&uri)?)
    }

    /// Set or clear a file's read-only flag.
    pub fn set_read_only(&self, path: &str, read_only: bool) -> Result<()> {
        let uri = self.writable_uri(path, "set read-only")?;
        self.context.filesystem().set_read_only(&native_path(&uri)?, read_only)
    }

    /// Last modification time. Files inside an archive report the archive's.
    pub fn file_write_time(&self, path: &str) -> Result<SystemTime> {
        let uri = self.resolve_uri(path)?;
        if self.is_archive_file_system_enabled()
            && let Some((archive, _)) = self.context.archive_file_system().find_archive_with_file(&uri)
        {
            return self
                .context
                .filesystem()
                .file_write_time(&archive.uri().to_native_path());
        }
        self.context.filesystem().file_write_time(&native_path(&uri)?)
    }

    /// Set the last modification time of a file on disk.
    pub fn set_file_write_time(&self, path: &str, time: SystemTime) -> Result<()> {
        let uri = self.writable_uri(path, "set write time")?;
        self.context
            .filesystem()
            .set_file_write_time(&native_path(&uri)?, time)
    }

    fn archive_holds(&self, uri: &Uri) -> bool {
        if !self.is_archive_file_system_enabled() {
            return false;
        }
        let archives = self.context.archive_file_system();
        archives.find_archive_with_file(uri).is_some() || archives.find_archive_with_dir(uri).is_some()
    }

    fn writable_uri(&self, path: &str, op: &'static str) -> Result<Uri> {
        let uri = self.resolve_uri(path)?;
        if uri.scheme() == "zip" || self.archive_holds(&uri) {
            return Err(IoError::UnsupportedAccess {
                uri: uri.as_string(),
                mode: AccessMode::Read,
                op,
            });
        }
        Ok(uri)
    }

    // Archives

    /// Returns true if mounted archives take precedence over the real
    /// filesystem.
    pub fn is_archive_file_system_enabled(&self) -> bool {
        self.context.is_archive_file_system_enabled()
    }

    /// Turn archive precedence on or off. Mounted archives stay mounted.
    pub fn set_archive_file_system_enabled(&self, enabled: bool) {
        self.context.set_archive_file_system_enabled(enabled);
    }

    /// Mount an archive at the directory that contains it.
    pub fn mount_archive(&self, path: &str) -> Result<()> {
        let uri = self.resolve_archive_uri(path)?;
        let mount_point = uri.parent().unwrap_or_else(|| uri.clone());
        self.mount(&uri, &mount_point)
    }

    /// Mount an archive so that its contents appear below `mount_point`.
    pub fn mount_archive_at(&self, path: &str, mount_point: &str) -> Result<()> {
        let uri = self.resolve_archive_uri(path)?;
        let mount_point = self.resolve_uri(mount_point)?;
        self.mount(&uri, &mount_point)
    }

    fn mount(&self, uri: &Uri, mount_point: &Uri) -> Result<()> {
        match self.context.archive_file_system().mount(uri, mount_point) {
            Ok(_) => Ok(()),
            Err(e @ IoError::AlreadyMounted(_)) => {
                error!("{}", e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Unmount an archive.
    pub fn unmount_archive(&self, path: &str) -> Result<()> {
        let uri = self.resolve_archive_uri(path)?;
        self.context
            .archive_file_system()
            .unmount(&uri)
            .inspect_err(|e| error!("{}", e))
    }

    /// Returns true if the archive is mounted.
    pub fn is_archive_mounted(&self, path: &str) -> bool {
        self.resolve_archive_uri(path)
            .is_ok_and(|uri| self.context.archive_file_system().is_mounted(&uri))
    }

    fn resolve_archive_uri(&self, path: &str) -> Result<Uri> {
        let uri = self.resolve_uri(path)?;
        if uri.scheme() != "file" {
            return Err(IoError::InvalidUri(format!(
                "archive location must be a file: URI, got {uri}"
            )));
        }
        Ok(uri)
    }

    /// Location of the platform's standard archive, with assigns unresolved.
    pub fn standard_archive_uri(&self) -> String {
        format!(
            "root:export_{}.{}",
            self.context.config().platform_name,
            ARCHIVE_EXTENSION
        )
    }

    /// Mount the standard archive at `root:`.
    ///
    /// A missing archive file is not an error: the application then runs
    /// from loose files. Calling this twice without an unmount in between
    /// fails with [`IoError::StandardArchivesMounted`].
    pub fn mount_standard_archives(&self) -> Result<()> {
        let mut mounted = self.context.standard_archives_mounted().lock();
        if *mounted {
            error!("Standard archives mounted twice");
            return Err(IoError::StandardArchivesMounted);
        }

        let path = self.standard_archive_uri();
        let uri = self.resolve_archive_uri(&path)?;
        if self.context.filesystem().file_exists(&uri.to_native_path()) {
            let root = self.resolve_uri("root:")?;
            self.mount(&uri, &root)?;
            info!("Mounted standard archive {}", uri);
        } else {
            warn!("Standard archive {} not found, using loose files", uri);
        }

        *mounted = true;
        Ok(())
    }

    /// Unmount the standard archive.
    ///
    /// Fails with [`IoError::StandardArchivesNotMounted`] unless
    /// [`IoServer::mount_standard_archives`] was called before.
    pub fn unmount_standard_archives(&self) -> Result<()> {
        let mut mounted = self.context.standard_archives_mounted().lock();
        if !*mounted {
            error!("Standard archives unmounted without being mounted");
            return Err(IoError::StandardArchivesNotMounted);
        }

        let uri = self.resolve_archive_uri(&self.standard_archive_uri())?;
        let archives = self.context.archive_file_system();
        if archives.is_mounted(&uri) {
            archives.unmount(&uri)?;
            info!("Unmounted standard archive {}", uri);
        }

        *mounted = false;
        Ok(())
    }

    /// Returns true between `mount_standard_archives` and
    /// `unmount_standard_archives`.
    pub fn has_standard_archives_mounted(&self) -> bool {
        *self.context.standard_archives_mounted().lock()
    }
}

fn native_path(uri: &Uri) -> Result<PathBuf> {
    if uri.scheme() == "file" {
        Ok(uri.to_native_path())
    } else {
        Err(IoError::InvalidUri(format!(
            "{uri} does not address the local filesystem"
        )))
    }
}
