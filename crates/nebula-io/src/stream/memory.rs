//! Stream over an in-memory buffer

use super::{AccessMode, SeekOrigin, Stream, ensure_access, ensure_open, seek_target};
use crate::uri::Uri;
use crate::{IoError, Result};

/// A growable in-memory stream.
///
/// The buffer survives `close`, so a stream can be written, closed and
/// reopened for reading. Opening in [`AccessMode::Write`] truncates it.
#[derive(Debug, Default)]
pub struct MemoryStream {
    uri: Uri,
    access_mode: AccessMode,
    data: Vec<u8>,
    position: usize,
    open: bool,
    mapped: bool,
}

impl MemoryStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::with_uri(Uri::new("mem", "", ""))
    }

    /// Create an empty stream reporting `uri` as its location.
    pub fn with_uri(uri: Uri) -> Self {
        Self {
            uri,
            ..Self::default()
        }
    }

    /// Create a stream over existing bytes.
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::new()
        }
    }

    /// The current contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the stream and return its buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Stream for MemoryStream {
    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    fn set_access_mode(&mut self, mode: AccessMode) {
        debug_assert!(!self.open, "access mode changed on an open stream");
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
        true
    }

    fn open(&mut self) -> Result<()> {
        if self.open {
            return Err(IoError::AlreadyOpen(self.uri.as_string()));
        }
        match self.access_mode {
            AccessMode::Write => {
                self.data.clear();
                self.position = 0;
            }
            AccessMode::Append => self.position = self.data.len(),
            AccessMode::Read | AccessMode::ReadWrite => self.position = 0,
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.mapped = false;
        self.position = 0;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        ensure_open(self.open, &self.uri)?;
        ensure_access(self.access_mode.can_read(), &self.uri, self.access_mode, "read")?;

        let available = &self.data[self.position.min(self.data.len())..];
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        ensure_open(self.open, &self.uri)?;
        ensure_access(self.access_mode.can_write(), &self.uri, self.access_mode, "write")?;
        // The mapped view must stay valid until unmap
        ensure_access(!self.mapped, &self.uri, self.access_mode, "write while mapped")?;

        if self.access_mode == AccessMode::Append {
            self.position = self.data.len();
        }
        let end = self.position + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(buf);
        self.position = end;
        Ok(())
    }

    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<()> {
        ensure_open(self.open, &self.uri)?;
        let target = seek_target(self.position(), self.size(), offset, origin)?;
        self.position = usize::try_from(target).map_err(|_| IoError::SeekOutOfRange {
            target: offset,
            size: self.size(),
        })?;
        Ok(())
    }

    fn map(&mut self) -> Result<()> {
        ensure_open(self.open, &self.uri)?;
        self.mapped = true;
        Ok(())
    }

    fn unmap(&mut self) {
        self.mapped = false;
    }

    fn mapped(&self) -> Option<&[u8]> {
        self.mapped.then_some(self.data.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_write_close_read() {
        let mut stream = MemoryStream::new();
        stream.set_access_mode(AccessMode::Write);
        stream.open().unwrap();
        stream.write(b"abc").unwrap();
        stream.write(b"def").unwrap();
        stream.close();

        stream.set_access_mode(AccessMode::Read);
        stream.open().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"abcdef");
        assert!(stream.eof());
    }

    #[test]
    fn test_overwrite_in_read_write_mode() {
        let mut stream = MemoryStream::with_data(b"hello".to_vec());
        stream.set_access_mode(AccessMode::ReadWrite);
        stream.open().unwrap();
        stream.seek(1, SeekOrigin::Begin).unwrap();
        stream.write(b"EL").unwrap();
        stream.seek(0, SeekOrigin::End).unwrap();
        stream.write(b"!").unwrap();
        assert_eq!(stream.into_inner(), b"hELlo!");
    }

    #[test]
    fn test_write_mode_truncates() {
        let mut stream = MemoryStream::with_data(b"old contents".to_vec());
        stream.set_access_mode(AccessMode::Write);
        stream.open().unwrap();
        assert_eq!(stream.size(), 0);
    }

    #[test]
    fn test_map_blocks_writes() {
        let mut stream = MemoryStream::with_data(b"xyz".to_vec());
        stream.set_access_mode(AccessMode::ReadWrite);
        stream.open().unwrap();
        stream.map().unwrap();
        assert_eq!(stream.mapped(), Some(&b"xyz"[..]));
        assert!(stream.write(b"a").is_err());
        stream.unmap();
        stream.write(b"a").unwrap();
        assert_eq!(stream.data(), b"ayz");
    }

    #[test]
    fn test_closed_stream_rejects_io() {
        let mut stream = MemoryStream::with_data(vec![1, 2, 3]);
        let mut buf = [0u8; 1];
        assert!(matches!(stream.read(&mut buf), Err(IoError::NotOpen(_))));
        assert!(matches!(stream.map(), Err(IoError::NotOpen(_))));
    }
}
