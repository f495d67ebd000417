//! Byte streams
//!
//! A [`Stream`] is a readable and/or writable byte range addressed by a URI.
//! Every stream follows the same lifecycle: set the access mode, `open`,
//! any number of `read`/`write`/`seek` calls, then `close`. A closed stream
//! may be opened again and starts over at position 0.

mod file;
mod memory;
mod zip_file;

pub use file::FileStream;
pub use memory::MemoryStream;
pub use zip_file::ZipStream;

use crate::uri::Uri;
use crate::{IoError, Result};
use std::fmt;

/// How a stream is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read existing content.
    #[default]
    Read,
    /// Create or truncate, then write.
    Write,
    /// Create if missing, then write at the end.
    Append,
    /// Read and write existing or new content.
    ReadWrite,
}

impl AccessMode {
    /// Returns true if reading is permitted.
    pub const fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    /// Returns true if writing is permitted.
    pub const fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::Append | Self::ReadWrite)
    }
}

/// Reference point for [`Stream::seek`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// From the start of the stream.
    Begin,
    /// From the current position.
    Current,
    /// From the end of the stream.
    End,
}

/// A seekable byte range.
///
/// Capabilities differ per implementation: archive entry streams only read
/// and only seek forward, file and memory streams do everything and can be
/// mapped for zero-copy reads.
pub trait Stream: Send + fmt::Debug {
    /// Location of the stream.
    fn uri(&self) -> &Uri;

    /// Access mode used by the next `open`.
    fn access_mode(&self) -> AccessMode;

    /// Set the access mode. Only allowed while closed.
    fn set_access_mode(&mut self, mode: AccessMode);

    /// Returns true if the stream supports reading.
    fn can_read(&self) -> bool;

    /// Returns true if the stream supports writing.
    fn can_write(&self) -> bool;

    /// Returns true if the stream supports seeking.
    fn can_seek(&self) -> bool;

    /// Returns true if the stream supports [`Stream::map`].
    fn can_be_mapped(&self) -> bool;

    /// Open the stream. On failure the stream stays closed.
    fn open(&mut self) -> Result<()>;

    /// Close the stream, releasing any mapping.
    fn close(&mut self);

    /// Returns true between a successful `open` and `close`.
    fn is_open(&self) -> bool;

    /// Size of the stream in bytes.
    fn size(&self) -> u64;

    /// Current read/write position.
    fn position(&self) -> u64;

    /// Read up to `buf.len()` bytes. Returns fewer only at end-of-stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf` at the current position.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Move the position.
    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<()>;

    /// Flush buffered writes.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Returns true when the position has reached the end.
    fn eof(&self) -> bool {
        self.position() >= self.size()
    }

    /// Establish a zero-copy view of the whole stream.
    fn map(&mut self) -> Result<()> {
        Err(IoError::NotMappable(self.uri().as_string()))
    }

    /// Release the view established by [`Stream::map`].
    fn unmap(&mut self) {}

    /// The mapped view, if [`Stream::map`] succeeded.
    fn mapped(&self) -> Option<&[u8]> {
        None
    }

    /// Returns true while a mapped view exists.
    fn is_mapped(&self) -> bool {
        self.mapped().is_some()
    }
}

/// Compute an absolute seek target, rejecting targets outside `[0, size]`.
pub(crate) fn seek_target(position: u64, size: u64, offset: i64, origin: SeekOrigin) -> Result<u64> {
    let base = match origin {
        SeekOrigin::Begin => 0i128,
        SeekOrigin::Current => i128::from(position),
        SeekOrigin::End => i128::from(size),
    };
    let target = base + i128::from(offset);
    if target < 0 || target > i128::from(size) {
        return Err(IoError::SeekOutOfRange {
            target: i64::try_from(target).unwrap_or(i64::MAX),
            size,
        });
    }
    Ok(target as u64)
}

/// Error helpers shared by the stream implementations.
pub(crate) fn ensure_open(open: bool, uri: &Uri) -> Result<()> {
    if open {
        Ok(())
    } else {
        Err(IoError::NotOpen(uri.as_string()))
    }
}

pub(crate) fn ensure_access(
    allowed: bool,
    uri: &Uri,
    mode: AccessMode,
    op: &'static str,
) -> Result<()> {
    if allowed {
        Ok(())
    } else {
        Err(IoError::UnsupportedAccess {
            uri: uri.as_string(),
            mode,
            op,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode_capabilities() {
        assert!(AccessMode::Read.can_read());
        assert!(!AccessMode::Read.can_write());
        assert!(AccessMode::Write.can_write());
        assert!(!AccessMode::Write.can_read());
        assert!(AccessMode::Append.can_write());
        assert!(AccessMode::ReadWrite.can_read() && AccessMode::ReadWrite.can_write());
    }

    #[test]
    fn test_seek_target() {
        assert_eq!(seek_target(5, 10, 2, SeekOrigin::Begin).unwrap(), 2);
        assert_eq!(seek_target(5, 10, 2, SeekOrigin::Current).unwrap(), 7);
        assert_eq!(seek_target(5, 10, -3, SeekOrigin::End).unwrap(), 7);
        assert_eq!(seek_target(5, 10, 0, SeekOrigin::End).unwrap(), 10);
        assert!(seek_target(5, 10, -6, SeekOrigin::Current).is_err());
        assert!(seek_target(5, 10, 1, SeekOrigin::End).is_err());
    }
}
