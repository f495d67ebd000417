//! Stream over a file in the real filesystem

use super::{AccessMode, SeekOrigin, Stream, ensure_access, ensure_open, seek_target};
use crate::uri::Uri;
use crate::{IoError, Result};
use memmap2::{Mmap, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{debug, trace};

#[derive(Debug)]
enum Mapping {
    Mapped(Mmap),
    // Zero-length files cannot be mapped on every platform
    Empty,
}

/// A `file:` stream.
///
/// Supports every access mode and arbitrary seeking. A stream opened for
/// reading can be memory-mapped.
#[derive(Debug)]
pub struct FileStream {
    uri: Uri,
    access_mode: AccessMode,
    file: Option<File>,
    size: u64,
    position: u64,
    mapping: Option<Mapping>,
}

impl FileStream {
    /// Create an unopened stream for a `file:` URI.
    pub fn new(uri: Uri) -> Self {
        Self {
            uri,
            access_mode: AccessMode::Read,
            file: None,
            size: 0,
            position: 0,
            mapping: None,
        }
    }

    fn open_options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self.access_mode {
            AccessMode::Read => options.read(true),
            AccessMode::Write => options.write(true).create(true).truncate(true),
            AccessMode::Append => options.append(true).create(true),
            AccessMode::ReadWrite => options.read(true).write(true).create(true),
        };
        options
    }

    fn io_error(&self, op: &'static str) -> impl FnOnce(io::Error) -> IoError + '_ {
        move |source| IoError::Filesystem {
            op,
            path: self.uri.to_native_path(),
            source,
        }
    }
}

impl Stream for FileStream {
    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    fn set_access_mode(&mut self, mode: AccessMode) {
        debug_assert!(!self.is_open(), "access mode changed on an open stream");
        self.access_mode = mode;
    }

    fn can_read(&self) -> bool {
        true
    }

    fn can_write(&self) -> bool {
        true
    }

    fn can_seek(&self) -> bool {
        true
    }

    fn can_be_mapped(&self) -> bool {
        // Mapped views are read-only
        self.access_mode == AccessMode::Read
    }

    fn open(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(IoError::AlreadyOpen(self.uri.as_string()));
        }

        let path = self.uri.to_native_path();
        let file = match self.open_options().open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(IoError::NotFound(self.uri.as_string()));
            }
            Err(e) => return Err(self.io_error("open")(e)),
        };
        let size = file.metadata().map_err(self.io_error("stat"))?.len();

        trace!("Opened {} ({:?}, {} bytes)", path.display(), self.access_mode, size);
        self.size = size;
        self.position = if self.access_mode == AccessMode::Append {
            size
        } else {
            0
        };
        self.file = Some(file);
        Ok(())
    }

    fn close(&mut self) {
        self.mapping = None;
        if self.file.take().is_some() {
            trace!("Closed {}", self.uri);
        }
        self.position = 0;
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        ensure_open(self.is_open(), &self.uri)?;
        ensure_access(self.access_mode.can_read(), &self.uri, self.access_mode, "read")?;

        let Some(file) = self.file.as_mut() else {
            return Err(IoError::NotOpen(self.uri.as_string()));
        };
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.position += filled as u64;
        Ok(filled)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        ensure_open(self.is_open(), &self.uri)?;
        ensure_access(self.access_mode.can_write(), &self.uri, self.access_mode, "write")?;

        let Some(file) = self.file.as_mut() else {
            return Err(IoError::NotOpen(self.uri.as_string()));
        };
        file.write_all(buf)?;
        if self.access_mode == AccessMode::Append {
            self.position = self.size;
        }
        self.position += buf.len() as u64;
        self.size = self.size.max(self.position);
        Ok(())
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<()> {
        ensure_open(self.is_open(), &self.uri)?;
        let target = seek_target(self.position, self.size, offset, origin)?;
        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(target))?;
        }
        self.position = target;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    fn map(&mut self) -> Result<()> {
        ensure_open(self.is_open(), &self.uri)?;
        ensure_access(self.access_mode == AccessMode::Read, &self.uri, self.access_mode, "map")?;
        if self.mapping.is_some() {
            return Ok(());
        }
        let Some(file) = self.file.as_ref() else {
            return Err(IoError::NotOpen(self.uri.as_string()));
        };

        if self.size == 0 {
            self.mapping = Some(Mapping::Empty);
            return Ok(());
        }

        #[allow(unsafe_code)]
        let mmap = unsafe { MmapOptions::new().map(file) }.map_err(self.io_error("map"))?;
        debug!("Memory-mapped {} ({} bytes)", self.uri, mmap.len());
        self.mapping = Some(Mapping::Mapped(mmap));
        Ok(())
    }

    fn unmap(&mut self) {
        self.mapping = None;
    }

    fn mapped(&self) -> Option<&[u8]> {
        match self.mapping.as_ref()? {
            Mapping::Mapped(mmap) => Some(&mmap[..]),
            Mapping::Empty => Some(&[]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stream_at(path: &std::path::Path, mode: AccessMode) -> FileStream {
        let mut stream = FileStream::new(Uri::from_native_path(path));
        stream.set_access_mode(mode);
        stream
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut writer = stream_at(&path, AccessMode::Write);
        writer.open().unwrap();
        writer.write(b"hello world").unwrap();
        assert_eq!(writer.size(), 11);
        writer.close();

        let mut reader = stream_at(&path, AccessMode::Read);
        reader.open().unwrap();
        assert_eq!(reader.size(), 11);
        let mut buf = [0u8; 5];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert!(!reader.eof());

        let mut rest = [0u8; 16];
        assert_eq!(reader.read(&mut rest).unwrap(), 6);
        assert_eq!(&rest[..6], b" world");
        assert!(reader.eof());
    }

    #[test]
    fn test_seek_anywhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seek.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut stream = stream_at(&path, AccessMode::Read);
        stream.open().unwrap();
        let mut byte = [0u8; 1];

        stream.seek(7, SeekOrigin::Begin).unwrap();
        stream.read(&mut byte).unwrap();
        assert_eq!(byte[0], b'7');

        stream.seek(-6, SeekOrigin::Current).unwrap();
        stream.read(&mut byte).unwrap();
        assert_eq!(byte[0], b'2');

        stream.seek(-1, SeekOrigin::End).unwrap();
        stream.read(&mut byte).unwrap();
        assert_eq!(byte[0], b'9');

        assert!(matches!(
            stream.seek(1, SeekOrigin::End),
            Err(IoError::SeekOutOfRange { .. })
        ));
    }

    #[test]
    fn test_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        std::fs::write(&path, b"one").unwrap();

        let mut stream = stream_at(&path, AccessMode::Append);
        stream.open().unwrap();
        assert_eq!(stream.position(), 3);
        stream.write(b"two").unwrap();
        stream.close();

        assert_eq!(std::fs::read(&path).unwrap(), b"onetwo");
    }

    #[test]
    fn test_state_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        std::fs::write(&path, b"abc").unwrap();

        let mut stream = stream_at(&path, AccessMode::Read);
        let mut buf = [0u8; 1];
        assert!(matches!(stream.read(&mut buf), Err(IoError::NotOpen(_))));

        stream.open().unwrap();
        assert!(matches!(stream.open(), Err(IoError::AlreadyOpen(_))));
        assert!(matches!(
            stream.write(b"x"),
            Err(IoError::UnsupportedAccess { op: "write", .. })
        ));

        stream.close();
        assert!(!stream.is_open());
        assert!(matches!(stream.seek(0, SeekOrigin::Begin), Err(IoError::NotOpen(_))));
    }

    #[test]
    fn test_open_missing_file_stays_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = stream_at(&dir.path().join("missing"), AccessMode::Read);
        assert!(matches!(stream.open(), Err(IoError::NotFound(_))));
        assert!(!stream.is_open());
    }

    #[test]
    fn test_reopen_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("again.bin");
        std::fs::write(&path, b"abcdef").unwrap();

        let mut stream = stream_at(&path, AccessMode::Read);
        stream.open().unwrap();
        stream.seek(4, SeekOrigin::Begin).unwrap();
        stream.close();
        stream.open().unwrap();
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapped.bin");
        std::fs::write(&path, b"mapped bytes").unwrap();

        let mut stream = stream_at(&path, AccessMode::Read);
        assert!(stream.map().is_err());
        stream.open().unwrap();
        stream.map().unwrap();
        assert_eq!(stream.mapped(), Some(&b"mapped bytes"[..]));
        stream.unmap();
        assert!(!stream.is_mapped());

        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();
        let mut stream = stream_at(&empty, AccessMode::Read);
        stream.open().unwrap();
        stream.map().unwrap();
        assert_eq!(stream.mapped(), Some(&[][..]));
    }

    #[test]
    fn test_map_requires_read_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = stream_at(&dir.path().join("w.bin"), AccessMode::ReadWrite);
        stream.open().unwrap();
        assert!(matches!(stream.map(), Err(IoError::UnsupportedAccess { op: "map", .. })));
    }
}
