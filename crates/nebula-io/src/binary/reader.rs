//! Typed reads from a stream

use super::{ByteOrder, decode_normalized, decode_unsigned_normalized};
use crate::stream::{AccessMode, SeekOrigin, Stream};
use crate::{IoError, Result};
use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use tracing::{trace, warn};
use uuid::Uuid;

macro_rules! read_scalar {
    ($(#[$doc:meta] $name:ident -> $ty:ty, $width:literal, $decode:ident;)*) => {
        $(
            #[$doc]
            pub fn $name(&mut self) -> Result<$ty> {
                let bytes = self.read_array::<$width>()?;
                Ok(match self.byte_order {
                    ByteOrder::Little => LittleEndian::$decode(&bytes),
                    ByteOrder::Big => BigEndian::$decode(&bytes),
                })
            }
        )*
    };
}

/// Reads typed values from a borrowed stream.
///
/// If the stream is closed, [`BinaryReader::open`] opens it for reading and
/// [`BinaryReader::close`] closes it again. When memory mapping is enabled
/// and the stream supports it, reads copy from the mapped view through a
/// bounds-checked cursor instead of calling into the stream.
#[derive(Debug)]
pub struct BinaryReader<'s> {
    stream: &'s mut dyn Stream,
    byte_order: ByteOrder,
    memory_mapping_enabled: bool,
    is_mapped: bool,
    map_cursor: usize,
    map_end: usize,
    opened_stream: bool,
    open: bool,
}

impl<'s> BinaryReader<'s> {
    /// Wrap a stream. Values are read in host byte order until
    /// [`BinaryReader::set_stream_byte_order`] says otherwise.
    pub fn new(stream: &'s mut dyn Stream) -> Self {
        Self {
            stream,
            byte_order: ByteOrder::host(),
            memory_mapping_enabled: false,
            is_mapped: false,
            map_cursor: 0,
            map_end: 0,
            opened_stream: false,
            open: false,
        }
    }

    /// Declare the byte order the stream's values are stored in.
    pub fn set_stream_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    /// Byte order of the stream's values.
    pub fn stream_byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Request the mapped fast path. Must be set before `open`.
    pub fn set_memory_mapping_enabled(&mut self, enabled: bool) {
        self.memory_mapping_enabled = enabled;
    }

    /// Returns true if reads go through a mapped view.
    pub fn is_mapped(&self) -> bool {
        self.is_mapped
    }

    /// Start reading, opening the stream if needed.
    pub fn open(&mut self) -> Result<()> {
        if self.open {
            return Err(IoError::AlreadyOpen(self.stream.uri().as_string()));
        }
        if !self.stream.is_open() {
            self.stream.set_access_mode(AccessMode::Read);
            self.stream.open()?;
            self.opened_stream = true;
        }

        if self.memory_mapping_enabled && self.stream.can_be_mapped() {
            match self.stream.map() {
                Ok(()) => {
                    let view_len = self.stream.mapped().map_or(0, <[u8]>::len);
                    self.map_cursor =
                        usize::try_from(self.stream.position()).unwrap_or(view_len).min(view_len);
                    self.map_end = view_len;
                    self.is_mapped = true;
                    trace!("Reading {} through a {} byte mapping", self.stream.uri(), view_len);
                }
                Err(IoError::UnsupportedAccess { .. } | IoError::NotMappable(_)) => {
                    trace!("Reading {} without a mapping", self.stream.uri());
                }
                Err(e) => {
                    self.release_stream();
                    return Err(e);
                }
            }
        }
        self.open = true;
        Ok(())
    }

    /// Stop reading. Closes the stream only if `open` opened it.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        if self.is_mapped {
            if !self.opened_stream {
                // Leave the caller's stream positioned after the bytes consumed
                let cursor = i64::try_from(self.map_cursor).unwrap_or(i64::MAX);
                if let Err(e) = self.stream.seek(cursor, SeekOrigin::Begin) {
                    warn!("Cannot reposition {} after mapped reads: {}", self.stream.uri(), e);
                }
            }
            self.stream.unmap();
            self.is_mapped = false;
            self.map_cursor = 0;
            self.map_end = 0;
        }
        self.release_stream();
        self.open = false;
    }

    fn release_stream(&mut self) {
        if self.opened_stream {
            self.stream.close();
            self.opened_stream = false;
        }
    }

    /// Returns true if the reader is open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns true when no bytes are left.
    pub fn eof(&self) -> bool {
        if self.is_mapped {
            self.map_cursor >= self.map_end
        } else {
            self.stream.eof()
        }
    }

    /// Fill `buf` completely from the stream.
    pub fn read_raw_data(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.open {
            return Err(IoError::NotOpen(self.stream.uri().as_string()));
        }

        if self.is_mapped {
            let view = self
                .stream
                .mapped()
                .ok_or_else(|| IoError::NotMappable(self.stream.uri().as_string()))?;
            let end = self.map_cursor + buf.len();
            if end > self.map_end {
                return Err(IoError::OutOfBounds {
                    requested: buf.len(),
                    available: self.map_end - self.map_cursor,
                });
            }
            buf.copy_from_slice(&view[self.map_cursor..end]);
            self.map_cursor = end;
            return Ok(());
        }

        let n = self.stream.read(buf)?;
        if n < buf.len() {
            return Err(IoError::OutOfBounds {
                requested: buf.len(),
                available: n,
            });
        }
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut bytes = [0u8; N];
        self.read_raw_data(&mut bytes)?;
        Ok(bytes)
    }

    fn remaining(&self) -> usize {
        if self.is_mapped {
            self.map_end - self.map_cursor
        } else {
            usize::try_from(self.stream.size().saturating_sub(self.stream.position()))
                .unwrap_or(usize::MAX)
        }
    }

    fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let available = self.remaining();
        if len > available {
            return Err(IoError::OutOfBounds {
                requested: len,
                available,
            });
        }
        let mut data = vec![0u8; len];
        self.read_raw_data(&mut data)?;
        Ok(data)
    }

    /// Read a signed byte.
    pub fn read_char(&mut self) -> Result<i8> {
        Ok(i8::from_ne_bytes(self.read_array::<1>()?))
    }

    /// Read an unsigned byte.
    pub fn read_uchar(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    read_scalar! {
        /// Read an `i16`.
        read_short -> i16, 2, read_i16;
        /// Read a `u16`.
        read_ushort -> u16, 2, read_u16;
        /// Read an `i32`.
        read_int -> i32, 4, read_i32;
        /// Read a `u32`.
        read_uint -> u32, 4, read_u32;
        /// Read an `i64`.
        read_int64 -> i64, 8, read_i64;
        /// Read a `u64`.
        read_uint64 -> u64, 8, read_u64;
        /// Read an `f32`.
        read_float -> f32, 4, read_f32;
        /// Read an `f64`.
        read_double -> f64, 8, read_f64;
    }

    /// Read a one-byte boolean.
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_uchar()? != 0)
    }

    /// Read a `u16` length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = usize::from(self.read_ushort()?);
        let bytes = self.read_vec(len)?;
        String::from_utf8(bytes).map_err(|e| IoError::InvalidData(format!("string is not UTF-8: {e}")))
    }

    /// Read a `u32` length-prefixed blob.
    pub fn read_blob(&mut self) -> Result<Vec<u8>> {
        let len = usize::try_from(self.read_uint()?).unwrap_or(usize::MAX);
        self.read_vec(len)
    }

    /// Read a 16-byte guid.
    pub fn read_guid(&mut self) -> Result<Uuid> {
        Ok(Uuid::from_bytes(self.read_array::<16>()?))
    }

    /// Read a float in `[-1, 1]` packed into a `u16`.
    pub fn read_float_from_normalized_ubyte2(&mut self) -> Result<f32> {
        Ok(decode_normalized(self.read_ushort()?))
    }

    /// Read a float in `[0, 1]` packed into a `u16`.
    pub fn read_float_from_unsigned_normalized_ubyte2(&mut self) -> Result<f32> {
        Ok(decode_unsigned_normalized(self.read_ushort()?))
    }
}
