//! Archive bytes and per-entry readers

use crc32fast::Hasher;
use flate2::read::DeflateDecoder;
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

/// Archives above this size are read into memory instead of mapped.
const MAX_MAPPED_ARCHIVE_SIZE: u64 = 4 * 1024 * 1024 * 1024;

/// Raw bytes of an archive file, memory-mapped when possible.
pub(crate) enum ArchiveData {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl ArchiveData {
    /// Load an opened archive file, preferring a memory map.
    pub(crate) fn load(mut file: File, size: u64, use_mmap: bool) -> io::Result<Self> {
        if use_mmap && size > 0 && size <= MAX_MAPPED_ARCHIVE_SIZE {
            #[allow(unsafe_code)]
            let mapped = unsafe { MmapOptions::new().map(&file) };
            match mapped {
                Ok(mmap) => return Ok(Self::Mapped(mmap)),
                Err(e) => debug!("Failed to memory-map archive, using buffered read: {}", e),
            }
        }

        let mut buffer = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        file.read_to_end(&mut buffer)?;
        Ok(Self::Buffered(buffer))
    }

    pub(crate) fn is_mapped(&self) -> bool {
        matches!(self, Self::Mapped(_))
    }
}

impl Deref for ArchiveData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => mmap,
            Self::Buffered(buffer) => buffer,
        }
    }
}

/// A window of archive bytes that owns a handle on the archive data.
pub(crate) struct EntrySlice {
    data: Arc<ArchiveData>,
    pos: usize,
    end: usize,
}

impl EntrySlice {
    pub(crate) fn new(data: Arc<ArchiveData>, start: usize, end: usize) -> Self {
        Self {
            data,
            pos: start,
            end,
        }
    }
}

impl Read for EntrySlice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.end - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

enum Decoder {
    Stored(EntrySlice),
    Deflated(DeflateDecoder<EntrySlice>),
    Buffered(Cursor<Vec<u8>>),
}

/// Sequential reader over one decoded archive entry.
///
/// Stored and deflated entries are decoded straight from the shared archive
/// bytes and their CRC-32 is checked once the last byte has been read.
/// Encrypted entries are decrypted up front into a buffer.
pub struct EntryReader {
    decoder: Decoder,
    size: u64,
    read: u64,
    expected_crc: Option<u32>,
    hasher: Hasher,
}

impl EntryReader {
    pub(crate) fn stored(slice: EntrySlice, size: u64, crc: u32) -> Self {
        Self::with_decoder(Decoder::Stored(slice), size, Some(crc))
    }

    pub(crate) fn deflated(slice: EntrySlice, size: u64, crc: u32) -> Self {
        Self::with_decoder(Decoder::Deflated(DeflateDecoder::new(slice)), size, Some(crc))
    }

    pub(crate) fn buffered(data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self::with_decoder(Decoder::Buffered(Cursor::new(data)), size, None)
    }

    fn with_decoder(decoder: Decoder, size: u64, expected_crc: Option<u32>) -> Self {
        Self {
            decoder,
            size,
            read: 0,
            expected_crc,
            hasher: Hasher::new(),
        }
    }

    /// Uncompressed size of the entry.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes returned so far.
    pub fn position(&self) -> u64 {
        self.read
    }
}

impl Read for EntryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.size - self.read;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let buf = &mut buf[..want];

        let n = match &mut self.decoder {
            Decoder::Stored(slice) => slice.read(buf)?,
            Decoder::Deflated(inflate) => inflate.read(buf)?,
            Decoder::Buffered(cursor) => cursor.read(buf)?,
        };
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("archive entry truncated at {} of {} bytes", self.read, self.size),
            ));
        }

        self.hasher.update(&buf[..n]);
        self.read += n as u64;

        if self.read == self.size
            && let Some(expected) = self.expected_crc
        {
            let actual = std::mem::take(&mut self.hasher).finalize();
            if actual != expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("archive entry checksum mismatch: expected {expected:08x}, got {actual:08x}"),
                ));
            }
        }
        Ok(n)
    }
}
