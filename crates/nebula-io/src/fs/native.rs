//! std-backed filesystem primitives

use super::{FilesystemBackend, matches_pattern};
use crate::{IoError, Result};
use std::fs::{self, File};
use std::path::Path;
use std::time::SystemTime;
use tracing::trace;

/// The host operating system's filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeFilesystem;

impl NativeFilesystem {
    /// Create the native backend.
    pub const fn new() -> Self {
        Self
    }

    fn list_entries(dir: &Path, pattern: &str, want_dirs: bool) -> Result<Vec<String>> {
        let entries = fs::read_dir(dir).map_err(|source| IoError::Filesystem {
            op: "list directory",
            path: dir.to_path_buf(),
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let matches_kind = if want_dirs {
                file_type.is_dir()
            } else {
                file_type.is_file()
            };
            if !matches_kind {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && matches_pattern(name, pattern)
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn fs_error<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> IoError + 'a {
    move |source| IoError::Filesystem {
        op,
        path: path.to_path_buf(),
        source,
    }
}

impl FilesystemBackend for NativeFilesystem {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn directory_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        trace!("create_dir {}", path.display());
        fs::create_dir(path).map_err(fs_error("create directory", path))
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        trace!("remove_file {}", path.display());
        fs::remove_file(path).map_err(fs_error("delete file", path))
    }

    fn delete_directory(&self, path: &Path) -> Result<()> {
        trace!("remove_dir {}", path.display());
        fs::remove_dir(path).map_err(fs_error("delete directory", path))
    }

    fn list_files(&self, dir: &Path, pattern: &str) -> Result<Vec<String>> {
        Self::list_entries(dir, pattern, false)
    }

    fn list_directories(&self, dir: &Path, pattern: &str) -> Result<Vec<String>> {
        Self::list_entries(dir, pattern, true)
    }

    fn file_write_time(&self, path: &Path) -> Result<SystemTime> {
        fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(fs_error("read write time", path))
    }

    fn set_file_write_time(&self, path: &Path, time: SystemTime) -> Result<()> {
        File::options()
            .write(true)
            .open(path)
            .and_then(|file| file.set_modified(time))
            .map_err(fs_error("set write time", path))
    }

    fn set_read_only(&self, path: &Path, read_only: bool) -> Result<()> {
        let mut permissions = fs::metadata(path)
            .map_err(fs_error("read permissions", path))?
            .permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(read_only);
        fs::set_permissions(path, permissions).map_err(fs_error("set permissions", path))
    }

    fn is_read_only(&self, path: &Path) -> bool {
        fs::metadata(path)
            .map(|meta| meta.permissions().readonly())
            .unwrap_or(false)
    }
}
