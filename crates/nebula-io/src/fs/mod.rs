//! Real filesystem access
//!
//! [`FilesystemBackend`] is the set of platform primitives the server needs.
//! It knows nothing about archives or assigns: every path handed to it is
//! absolute and already resolved.

mod native;

pub use native::NativeFilesystem;

use crate::Result;
use std::fmt;
use std::path::Path;
use std::time::SystemTime;

/// Platform filesystem primitives.
///
/// Existence probes return plain booleans. Mutating operations return a
/// [`Result`] and never panic; whether a failure is fatal is the caller's
/// decision.
pub trait FilesystemBackend: Send + Sync + fmt::Debug {
    /// Returns true if `path` is an existing regular file.
    fn file_exists(&self, path: &Path) -> bool;

    /// Returns true if `path` is an existing directory.
    fn directory_exists(&self, path: &Path) -> bool;

    /// Create a single directory. The parent must exist.
    fn create_directory(&self, path: &Path) -> Result<()>;

    /// Delete a file.
    fn delete_file(&self, path: &Path) -> Result<()>;

    /// Delete an empty directory.
    fn delete_directory(&self, path: &Path) -> Result<()>;

    /// Names of files in `dir` matching `pattern`, sorted.
    fn list_files(&self, dir: &Path, pattern: &str) -> Result<Vec<String>>;

    /// Names of subdirectories of `dir` matching `pattern`, sorted.
    fn list_directories(&self, dir: &Path, pattern: &str) -> Result<Vec<String>>;

    /// Last modification time of a file.
    fn file_write_time(&self, path: &Path) -> Result<SystemTime>;

    /// Set the last modification time of a file.
    fn set_file_write_time(&self, path: &Path, time: SystemTime) -> Result<()>;

    /// Set or clear the read-only flag.
    fn set_read_only(&self, path: &Path, read_only: bool) -> Result<()>;

    /// Returns true if the file exists and is read-only.
    fn is_read_only(&self, path: &Path) -> bool;
}

/// Match a name against a wildcard pattern.
///
/// `*` matches any run of characters (including none), `?` matches exactly
/// one character. Everything else matches literally.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    let name: Vec<char> = name.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut n, mut p) = (0, 0);
    // Position of the last '*' in the pattern and the name index it was tried at
    let mut backtrack: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            n += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, n));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            n = matched + 1;
            backtrack = Some((star, n));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
