//! Mounted zip archives
//!
//! An [`Archive`] is one zip container indexed at mount time. Its entries
//! appear below a mount point, a directory in the real filesystem's
//! namespace, and shadow real files at the same location while mounted.
//! [`ArchiveFileSystem`] owns the list of mounted archives.

mod entry;
mod filesystem;

pub use entry::EntryReader;
pub use filesystem::{ArchiveFileSystem, ArchiveState};

use crate::fs::matches_pattern;
use crate::uri::Uri;
use crate::{IoError, Result};
use byteorder::{ByteOrder as _, LittleEndian};
use entry::{ArchiveData, EntrySlice};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tracing::{debug, trace};
use zip::CompressionMethod;

/// URI scheme of archive entry references.
pub const ARCHIVE_SCHEME: &str = "zip";

/// File extension of archive containers.
pub const ARCHIVE_EXTENSION: &str = "zip";

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const LOCAL_HEADER_SIZE: usize = 30;

/// `file:` URI of the archive a `zip:` entry URI points into.
pub fn archive_file_uri(entry_uri: &Uri) -> Uri {
    Uri::new("file", entry_uri.host(), entry_uri.local_path()).with_port(entry_uri.port())
}

/// How an entry's bytes are stored in the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compression {
    /// Stored without compression.
    Stored,
    /// Raw deflate.
    Deflated,
    /// Any other zip method, by name.
    Unsupported(String),
}

/// Index record for one file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive, `/`-separated, no leading slash.
    pub path: String,
    /// Offset of the entry data within the archive file.
    pub data_offset: u64,
    /// Stored size.
    pub compressed_size: u64,
    /// Decoded size.
    pub size: u64,
    /// Storage method.
    pub compression: Compression,
    /// CRC-32 of the decoded data.
    pub crc32: u32,
    /// True for password-protected entries.
    pub encrypted: bool,
}

#[derive(Debug, Default)]
struct DirNode {
    files: BTreeSet<String>,
    dirs: BTreeSet<String>,
}

/// Directory tree plus file lookup table built at mount time.
#[derive(Debug, Default)]
struct ArchiveIndex {
    files: HashMap<String, ArchiveEntry>,
    dirs: BTreeMap<String, DirNode>,
}

impl ArchiveIndex {
    fn new() -> Self {
        let mut index = Self::default();
        index.dirs.insert(String::new(), DirNode::default());
        index
    }

    fn add_dir(&mut self, path: &str) {
        if path.is_empty() || self.dirs.contains_key(path) {
            return;
        }
        let (parent, name) = split_parent(path);
        self.add_dir(parent);
        if let Some(node) = self.dirs.get_mut(parent) {
            node.dirs.insert(name.to_string());
        }
        self.dirs.insert(path.to_string(), DirNode::default());
    }

    fn add_file(&mut self, entry: ArchiveEntry) {
        let (parent, name) = split_parent(&entry.path);
        self.add_dir(parent);
        if let Some(node) = self.dirs.get_mut(parent) {
            node.files.insert(name.to_string());
        }
        self.files.insert(entry.path.clone(), entry);
    }
}

fn split_parent(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

/// Normalise an entry name to `a/b/c` form.
pub(crate) fn normalize_entry_path(name: &str) -> String {
    let name = name.replace('\\', "/");
    name.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// A mounted, read-only zip container.
pub struct Archive {
    uri: Uri,
    mount_point: String,
    data: Arc<ArchiveData>,
    index: ArchiveIndex,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("uri", &self.uri.as_string())
            .field("mount_point", &self.mount_point)
            .field("files", &self.index.files.len())
            .field("memory_mapped", &self.data.is_mapped())
            .finish()
    }
}

impl Archive {
    /// Open the archive file at `uri` and index it below `mount_point`.
    ///
    /// `uri` must be a `file:` URI with assigns already resolved. Fails with
    /// [`IoError::ArchiveOpen`] if the file cannot be read or is not a valid
    /// zip container.
    pub fn open(uri: &Uri, mount_point: &Uri, use_mmap: bool) -> Result<Self> {
        let open_error = |reason: String| IoError::ArchiveOpen {
            uri: uri.as_string(),
            reason,
        };

        let path = uri.to_native_path();
        let file = File::open(&path).map_err(|e| open_error(e.to_string()))?;
        let size = file
            .metadata()
            .map_err(|e| open_error(e.to_string()))?
            .len();

        debug!("Opening archive: {} (size: {} bytes)", path.display(), size);

        let data = ArchiveData::load(file, size, use_mmap).map_err(|e| open_error(e.to_string()))?;
        let index = build_index(&data).map_err(|e| open_error(e.to_string()))?;

        debug!(
            "Indexed archive {}: {} files, {} directories",
            uri,
            index.files.len(),
            index.dirs.len() - 1
        );

        Ok(Self {
            uri: uri.clone(),
            mount_point: mount_point.local_path().trim_end_matches('/').to_string(),
            data: Arc::new(data),
            index,
        })
    }

    /// Location of the archive file.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Local path under which the archive's contents appear.
    pub fn mount_point(&self) -> &str {
        if self.mount_point.is_empty() {
            "/"
        } else {
            &self.mount_point
        }
    }

    /// Number of file entries.
    pub fn len(&self) -> usize {
        self.index.files.len()
    }

    /// Returns true if the archive holds no files.
    pub fn is_empty(&self) -> bool {
        self.index.files.is_empty()
    }

    /// Returns true if the archive bytes are memory-mapped.
    pub fn is_memory_mapped(&self) -> bool {
        self.data.is_mapped()
    }

    /// All file entries, in no particular order.
    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.index.files.values()
    }

    /// Map a local path to a path inside this archive.
    ///
    /// Returns `None` when the path does not lie below the mount point. The
    /// mount point itself maps to the empty string, the archive root.
    pub fn archive_path(&self, local_path: &str) -> Option<String> {
        let local = local_path.trim_end_matches('/');
        if local == self.mount_point {
            return Some(String::new());
        }
        let rest = local.strip_prefix(&self.mount_point)?.strip_prefix('/')?;
        Some(normalize_entry_path(rest))
    }

    /// Look up a file entry by archive path.
    pub fn find_file(&self, path: &str) -> Option<&ArchiveEntry> {
        self.index.files.get(path)
    }

    /// Returns true if the archive contains a directory at `path`.
    pub fn has_dir(&self, path: &str) -> bool {
        self.index.dirs.contains_key(path)
    }

    /// Names of the files directly inside `dir` that match `pattern`.
    pub fn list_files(&self, dir: &str, pattern: &str) -> Vec<String> {
        self.index
            .dirs
            .get(dir)
            .map(|node| {
                node.files
                    .iter()
                    .filter(|name| matches_pattern(name, pattern))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of the directories directly inside `dir` that match `pattern`.
    pub fn list_dirs(&self, dir: &str, pattern: &str) -> Vec<String> {
        self.index
            .dirs
            .get(dir)
            .map(|node| {
                node.dirs
                    .iter()
                    .filter(|name| matches_pattern(name, pattern))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `zip:` URI addressing an entry of this archive.
    pub fn entry_uri(&self, path: &str) -> Uri {
        Uri::new(ARCHIVE_SCHEME, self.uri.host(), self.uri.local_path())
            .with_port(self.uri.port())
            .with_query("file", path)
    }

    /// Open an entry for sequential reading.
    ///
    /// Password-protected entries need `password`; they are decrypted into
    /// memory before the reader is returned.
    pub fn open_entry(&self, path: &str, password: Option<&str>) -> Result<EntryReader> {
        let entry = self
            .find_file(path)
            .ok_or_else(|| IoError::NotFound(self.entry_uri(path).as_string()))?;

        trace!("Opening archive entry {} ({:?}, {} bytes)", path, entry.compression, entry.size);

        if entry.encrypted {
            let password = password.ok_or_else(|| {
                IoError::InvalidData(format!("archive entry '{path}' requires a password"))
            })?;
            let mut zip = zip::ZipArchive::new(Cursor::new(&self.data[..]))?;
            let mut file = zip.by_name_decrypt(&entry.path, password.as_bytes())?;
            let mut buffer = Vec::with_capacity(usize::try_from(entry.size).unwrap_or(0));
            file.read_to_end(&mut buffer)?;
            return Ok(EntryReader::buffered(buffer));
        }

        let start = usize::try_from(entry.data_offset)
            .map_err(|_| IoError::InvalidData(format!("entry '{path}' offset out of range")))?;
        let end = usize::try_from(entry.compressed_size)
            .ok()
            .and_then(|len| start.checked_add(len))
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| IoError::InvalidData(format!("entry '{path}' exceeds archive bounds")))?;
        let slice = EntrySlice::new(Arc::clone(&self.data), start, end);

        match &entry.compression {
            Compression::Stored => Ok(EntryReader::stored(slice, entry.size, entry.crc32)),
            Compression::Deflated => Ok(EntryReader::deflated(slice, entry.size, entry.crc32)),
            Compression::Unsupported(method) => Err(IoError::InvalidData(format!(
                "entry '{path}' uses unsupported compression method {method}"
            ))),
        }
    }
}

/// Scan the central directory and locate each entry's data.
fn build_index(data: &[u8]) -> Result<ArchiveIndex> {
    let mut zip = zip::ZipArchive::new(Cursor::new(data))?;
    let mut index = ArchiveIndex::new();

    for i in 0..zip.len() {
        let file = zip.by_index_raw(i)?;
        let path = normalize_entry_path(file.name());
        if path.is_empty() {
            continue;
        }
        if file.is_dir() {
            index.add_dir(&path);
            continue;
        }

        let compression = match file.compression() {
            CompressionMethod::Stored => Compression::Stored,
            CompressionMethod::Deflated => Compression::Deflated,
            other => Compression::Unsupported(format!("{other:?}")),
        };

        let entry = ArchiveEntry {
            data_offset: local_data_offset(data, file.header_start())?,
            compressed_size: file.compressed_size(),
            size: file.size(),
            compression,
            crc32: file.crc32(),
            encrypted: file.encrypted(),
            path,
        };
        index.add_file(entry);
    }

    Ok(index)
}

/// Offset of entry data: local header, file name and extra field skipped.
fn local_data_offset(data: &[u8], header_start: u64) -> Result<u64> {
    let start = usize::try_from(header_start)
        .map_err(|_| IoError::InvalidData("local header offset out of range".into()))?;
    let header = start
        .checked_add(LOCAL_HEADER_SIZE)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| IoError::InvalidData(format!("truncated local header at {start}")))?;

    if LittleEndian::read_u32(&header[0..4]) != LOCAL_HEADER_SIGNATURE {
        return Err(IoError::InvalidData(format!("bad local header signature at {start}")));
    }
    let name_len = u64::from(LittleEndian::read_u16(&header[26..28]));
    let extra_len = u64::from(LittleEndian::read_u16(&header[28..30]));
    Ok(header_start + LOCAL_HEADER_SIZE as u64 + name_len + extra_len)
}
