//! Read-only stream over one archive entry

use super::{AccessMode, SeekOrigin, Stream, ensure_access, ensure_open, seek_target};
use crate::archive::{ArchiveFileSystem, EntryReader, archive_file_uri, normalize_entry_path};
use crate::uri::Uri;
use crate::{IoError, Result};
use std::fmt;
use std::io::{self, Read};
use std::sync::Arc;
use tracing::trace;

/// A `zip:` stream.
///
/// The URI names the archive file and carries the entry path in its `file`
/// query parameter, plus an optional `pwd` for encrypted entries:
/// `zip:///data/export_win32.zip?file=textures/a.dds`.
///
/// Entries are decompressed on the fly, so the stream only reads and only
/// seeks forward. Entries of archives that are not mounted can still be read;
/// the archive is opened for the lifetime of the stream.
pub struct ZipStream {
    uri: Uri,
    access_mode: AccessMode,
    archives: Arc<ArchiveFileSystem>,
    reader: Option<EntryReader>,
    size: u64,
}

impl fmt::Debug for ZipStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZipStream")
            .field("uri", &self.uri.as_string())
            .field("access_mode", &self.access_mode)
            .field("open", &self.reader.is_some())
            .field("size", &self.size)
            .field("position", &self.position())
            .finish()
    }
}

impl ZipStream {
    /// Create an unopened stream for a `zip:` URI.
    pub fn new(uri: Uri, archives: Arc<ArchiveFileSystem>) -> Self {
        Self {
            uri,
            access_mode: AccessMode::Read,
            archives,
            reader: None,
            size: 0,
        }
    }

    /// URI of the archive file this entry lives in.
    pub fn archive_uri(&self) -> Uri {
        archive_file_uri(&self.uri)
    }
}

impl Stream for ZipStream {
    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    fn set_access_mode(&mut self, mode: AccessMode) {
        debug_assert!(self.reader.is_none(), "access mode changed on an open stream");
        self.access_mode = mode;
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        false
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn can_be_mapped(&self) -> bool {
        false
    }

    fn open(&mut self) -> Result<()> {
        if self.reader.is_some() {
            return Err(IoError::AlreadyOpen(self.uri.as_string()));
        }
        ensure_access(self.access_mode == AccessMode::Read, &self.uri, self.access_mode, "open")?;

        let path = self
            .uri
            .query_value("file")
            .map(normalize_entry_path)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| IoError::InvalidUri(format!("{} has no 'file' query parameter", self.uri)))?;

        let archive = self.archives.find_or_open_archive(&self.archive_uri())?;
        let reader = archive.open_entry(&path, self.uri.query_value("pwd"))?;

        trace!("Opened archive entry {} ({} bytes)", self.uri, reader.size());
        self.size = reader.size();
        self.reader = Some(reader);
        Ok(())
    }

    fn close(&mut self) {
        self.reader = None;
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn position(&self) -> u64 {
        self.reader.as_ref().map_or(0, EntryReader::position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        ensure_open(self.reader.is_some(), &self.uri)?;
        let Some(reader) = self.reader.as_mut() else {
            return Err(IoError::NotOpen(self.uri.as_string()));
        };

        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<()> {
        ensure_open(self.reader.is_some(), &self.uri)?;
        Err(IoError::UnsupportedAccess {
            uri: self.uri.as_string(),
            mode: self.access_mode,
            op: "write",
        })
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<()> {
        ensure_open(self.reader.is_some(), &self.uri)?;
        let position = self.position();
        let target = seek_target(position, self.size, offset, origin)?;
        if target < position {
            return Err(IoError::BackwardSeek {
                uri: self.uri.as_string(),
                position,
                target,
            });
        }

        if let Some(reader) = self.reader.as_mut() {
            let skipped = io::copy(&mut reader.by_ref().take(target - position), &mut io::sink())?;
            if skipped != target - position {
                return Err(IoError::InvalidData(format!(
                    "archive entry {} ended at {} while seeking to {}",
                    self.uri,
                    position + skipped,
                    target
                )));
            }
        }
        Ok(())
    }
}
