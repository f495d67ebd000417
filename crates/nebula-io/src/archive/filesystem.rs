//! Registry of mounted archives

use super::Archive;
use crate::uri::Uri;
use crate::{IoError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mount lifecycle of one archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    /// Not known to the archive file system.
    Unmounted,
    /// Being opened and indexed.
    Mounting,
    /// Indexed and visible to lookups.
    Mounted,
    /// Being removed.
    Unmounting,
}

/// The set of mounted archives, consulted before the real filesystem.
///
/// Lookups walk the archives most-recently-mounted first, so a later mount
/// shadows an earlier one wherever both contain the same path. Lookups take
/// a shared read lock; mount and unmount take the write lock only for the
/// list update, never while an archive is being opened.
#[derive(Debug)]
pub struct ArchiveFileSystem {
    /// Mounted archives, most recent first.
    archives: RwLock<Vec<Arc<Archive>>>,
    /// Archives in a mount or unmount transition, keyed by URI string.
    transitions: Mutex<HashMap<String, ArchiveState>>,
    use_mmap: bool,
}

impl Default for ArchiveFileSystem {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ArchiveFileSystem {
    /// Create an empty archive file system.
    pub fn new(use_mmap: bool) -> Self {
        Self {
            archives: RwLock::new(Vec::new()),
            transitions: Mutex::new(HashMap::new()),
            use_mmap,
        }
    }

    /// Whether archive data is memory-mapped.
    pub fn uses_mmap(&self) -> bool {
        self.use_mmap
    }

    /// Mount the archive at `uri` so that its contents appear below
    /// `mount_point`.
    ///
    /// `uri` must be an assign-resolved `file:` URI. Mounting an archive that
    /// is mounted or mid-transition fails with [`IoError::AlreadyMounted`].
    /// If the archive cannot be opened nothing is registered and
    /// [`IoError::ArchiveOpen`] is returned.
    pub fn mount(&self, uri: &Uri, mount_point: &Uri) -> Result<Arc<Archive>> {
        let key = uri.as_string();
        {
            let mut transitions = self.transitions.lock();
            if transitions.contains_key(&key) || self.find_archive(uri).is_some() {
                return Err(IoError::AlreadyMounted(key));
            }
            transitions.insert(key.clone(), ArchiveState::Mounting);
        }

        let opened = Archive::open(uri, mount_point, self.use_mmap);
        let result = match opened {
            Ok(archive) => {
                let archive = Arc::new(archive);
                self.archives.write().insert(0, Arc::clone(&archive));
                info!(
                    "Mounted archive {} at {} ({} files)",
                    key,
                    archive.mount_point(),
                    archive.len()
                );
                Ok(archive)
            }
            Err(e) => {
                warn!("Failed to mount archive {}: {}", key, e);
                Err(e)
            }
        };

        self.transitions.lock().remove(&key);
        result
    }

    /// Unmount the archive at `uri` and release its index.
    ///
    /// Fails with [`IoError::NotMounted`] if it is not currently mounted.
    /// Streams still reading from the archive keep its data alive until they
    /// are dropped.
    pub fn unmount(&self, uri: &Uri) -> Result<()> {
        let key = uri.as_string();
        {
            let mut transitions = self.transitions.lock();
            if transitions.contains_key(&key) || self.find_archive(uri).is_none() {
                return Err(IoError::NotMounted(key));
            }
            transitions.insert(key.clone(), ArchiveState::Unmounting);
        }

        self.archives.write().retain(|archive| archive.uri() != uri);
        self.transitions.lock().remove(&key);
        info!("Unmounted archive {}", key);
        Ok(())
    }

    /// Returns true if the archive at `uri` is mounted.
    pub fn is_mounted(&self, uri: &Uri) -> bool {
        self.find_archive(uri).is_some()
    }

    /// Mount state of the archive at `uri`.
    pub fn state(&self, uri: &Uri) -> ArchiveState {
        if let Some(state) = self.transitions.lock().get(&uri.as_string()) {
            return *state;
        }
        if self.is_mounted(uri) {
            ArchiveState::Mounted
        } else {
            ArchiveState::Unmounted
        }
    }

    /// Mounted archives, most recent first.
    pub fn mounted_archives(&self) -> Vec<Arc<Archive>> {
        self.archives.read().clone()
    }

    /// The mounted archive whose file is at `uri`.
    pub fn find_archive(&self, uri: &Uri) -> Option<Arc<Archive>> {
        self.archives
            .read()
            .iter()
            .find(|archive| archive.uri() == uri)
            .cloned()
    }

    /// The mounted archive at `uri`, or the archive opened on the spot when
    /// it is not mounted. A transient archive is indexed below its own
    /// directory and released with the last reference.
    pub fn find_or_open_archive(&self, uri: &Uri) -> Result<Arc<Archive>> {
        if let Some(archive) = self.find_archive(uri) {
            return Ok(archive);
        }
        debug!("Archive {} not mounted, opening it transiently", uri);
        let mount_point = uri.parent().unwrap_or_else(|| uri.clone());
        Archive::open(uri, &mount_point, self.use_mmap).map(Arc::new)
    }

    /// The most recently mounted archive containing the file at `uri`,
    /// along with the path of that file inside the archive.
    pub fn find_archive_with_file(&self, uri: &Uri) -> Option<(Arc<Archive>, String)> {
        if uri.scheme() != "file" {
            return None;
        }
        self.archives.read().iter().find_map(|archive| {
            let path = archive.archive_path(uri.local_path())?;
            archive
                .find_file(&path)
                .is_some()
                .then(|| (Arc::clone(archive), path))
        })
    }

    /// The most recently mounted archive containing the directory at `uri`,
    /// along with the path of that directory inside the archive.
    pub fn find_archive_with_dir(&self, uri: &Uri) -> Option<(Arc<Archive>, String)> {
        if uri.scheme() != "file" {
            return None;
        }
        self.archives.read().iter().find_map(|archive| {
            let path = archive.archive_path(uri.local_path())?;
            archive.has_dir(&path).then(|| (Arc::clone(archive), path))
        })
    }

    /// Rewrite a `file:` URI into a `zip:` entry URI when a mounted archive
    /// holds the file. Any other URI is returned unchanged.
    pub fn convert_file_to_archive_uri_if_exists(&self, uri: &Uri) -> Uri {
        match self.find_archive_with_file(uri) {
            Some((archive, path)) => {
                let converted = archive.entry_uri(&path);
                debug!("Resolved {} into archive as {}", uri, converted);
                converted
            }
            None => uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{Read, Write};
    use std::path::Path;
    use zip::write::SimpleFileOptions;

    fn write_archive(path: &Path, files: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, contents) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(contents).unwrap();
        }
        zip.finish().unwrap();
    }

    fn read_via(afs: &ArchiveFileSystem, uri: &Uri) -> Vec<u8> {
        let converted = afs.convert_file_to_archive_uri_if_exists(uri);
        let archive_uri = Uri::new("file", converted.host(), converted.local_path());
        let archive = afs.find_archive(&archive_uri).unwrap();
        let mut reader = archive
            .open_entry(converted.query_value("file").unwrap(), None)
            .unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_mount_and_unmount() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.zip");
        write_archive(&path, &[("data/a.txt", &b"hello"[..])]);

        let afs = ArchiveFileSystem::new(true);
        let uri = Uri::from_native_path(&path);
        let mount = Uri::from_native_path(dir.path());

        assert_eq!(afs.state(&uri), ArchiveState::Unmounted);
        afs.mount(&uri, &mount).unwrap();
        assert_eq!(afs.state(&uri), ArchiveState::Mounted);
        assert!(matches!(afs.mount(&uri, &mount), Err(IoError::AlreadyMounted(_))));

        let file = mount.append_local_path("data/a.txt");
        assert!(afs.find_archive_with_file(&file).is_some());
        assert!(afs.find_archive_with_dir(&mount.append_local_path("data")).is_some());

        afs.unmount(&uri).unwrap();
        assert_eq!(afs.state(&uri), ArchiveState::Unmounted);
        assert!(afs.find_archive_with_file(&file).is_none());
        assert!(matches!(afs.unmount(&uri), Err(IoError::NotMounted(_))));
    }

    #[test]
    fn test_failed_mount_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let afs = ArchiveFileSystem::new(true);
        let uri = Uri::from_native_path(&dir.path().join("missing.zip"));

        assert!(matches!(
            afs.mount(&uri, &Uri::from_native_path(dir.path())),
            Err(IoError::ArchiveOpen { .. })
        ));
        assert!(afs.mounted_archives().is_empty());
        assert_eq!(afs.state(&uri), ArchiveState::Unmounted);
    }

    #[test]
    fn test_most_recent_mount_shadows() {
        let dir = tempfile::tempdir().unwrap();
        let generic = dir.path().join("generic.zip");
        let specific = dir.path().join("specific.zip");
        write_archive(&generic, &[("p.txt", &b"generic"[..]), ("only_generic.txt", &b"g"[..])]);
        write_archive(&specific, &[("p.txt", &b"specific"[..])]);

        let afs = ArchiveFileSystem::new(false);
        let mount = Uri::from_native_path(dir.path());
        afs.mount(&Uri::from_native_path(&generic), &mount).unwrap();
        afs.mount(&Uri::from_native_path(&specific), &mount).unwrap();

        let p = mount.append_local_path("p.txt");
        let converted = afs.convert_file_to_archive_uri_if_exists(&p);
        assert_eq!(converted.scheme(), "zip");
        assert_eq!(converted.local_path(), Uri::from_native_path(&specific).local_path());
        assert_eq!(read_via(&afs, &p), b"specific");

        // Files only in the earlier archive are still visible
        assert_eq!(read_via(&afs, &mount.append_local_path("only_generic.txt")), b"g");

        afs.unmount(&Uri::from_native_path(&specific)).unwrap();
        assert_eq!(read_via(&afs, &p), b"generic");
    }

    #[test]
    fn test_convert_leaves_unknown_uris() {
        let afs = ArchiveFileSystem::default();
        let uri = Uri::parse("file:///nowhere/x.txt").unwrap();
        assert_eq!(afs.convert_file_to_archive_uri_if_exists(&uri), uri);
        let http = Uri::parse("http://host/x.txt").unwrap();
        assert_eq!(afs.convert_file_to_archive_uri_if_exists(&http), http);
    }

    #[test]
    fn test_concurrent_lookups_during_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let mount = Uri::from_native_path(dir.path());
        let afs = Arc::new(ArchiveFileSystem::new(true));

        let paths: Vec<_> = (0..4)
            .map(|i| {
                let path = dir.path().join(format!("part{i}.zip"));
                let name = format!("file{i}.txt");
                write_archive(&path, &[(name.as_str(), &b"x"[..])]);
                path
            })
            .collect();

        std::thread::scope(|scope| {
            for path in &paths {
                let afs = Arc::clone(&afs);
                let mount = mount.clone();
                scope.spawn(move || afs.mount(&Uri::from_native_path(path), &mount).unwrap());
            }
            let afs = Arc::clone(&afs);
            let probe = mount.append_local_path("file0.txt");
            scope.spawn(move || {
                for _ in 0..100 {
                    let _ = afs.find_archive_with_file(&probe);
                }
            });
        });

        assert_eq!(afs.mounted_archives().len(), 4);
        for i in 0..4 {
            assert!(afs
                .find_archive_with_file(&mount.append_local_path(&format!("file{i}.txt")))
                .is_some());
        }
    }
}
