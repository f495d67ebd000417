//! Typed writes to a stream

use super::{ByteOrder, encode_normalized, encode_unsigned_normalized};
use crate::stream::{AccessMode, Stream};
use crate::{IoError, Result};
use byteorder::{BigEndian, ByteOrder as _, LittleEndian};
use tracing::warn;
use uuid::Uuid;

macro_rules! write_scalar {
    ($(#[$doc:meta] $name:ident($ty:ty), $width:literal, $encode:ident;)*) => {
        $(
            #[$doc]
            pub fn $name(&mut self, value: $ty) -> Result<()> {
                let mut bytes = [0u8; $width];
                match self.byte_order {
                    ByteOrder::Little => LittleEndian::$encode(&mut bytes, value),
                    ByteOrder::Big => BigEndian::$encode(&mut bytes, value),
                }
                self.write_raw_data(&bytes)
            }
        )*
    };
}

/// Writes typed values to a borrowed stream.
///
/// Mirrors [`BinaryReader`](super::BinaryReader): a closed stream is opened
/// for writing by `open` and closed again by `close`.
#[derive(Debug)]
pub struct BinaryWriter<'s> {
    stream: &'s mut dyn Stream,
    byte_order: ByteOrder,
    opened_stream: bool,
    open: bool,
}

impl<'s> BinaryWriter<'s> {
    /// Wrap a stream. Values are written in host byte order by default.
    pub fn new(stream: &'s mut dyn Stream) -> Self {
        Self {
            stream,
            byte_order: ByteOrder::host(),
            opened_stream: false,
            open: false,
        }
    }

    /// Declare the byte order values are stored in.
    pub fn set_stream_byte_order(&mut self, order: ByteOrder) {
        self.byte_order = order;
    }

    /// Byte order values are stored in.
    pub fn stream_byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Start writing, opening the stream if needed.
    pub fn open(&mut self) -> Result<()> {
        if self.open {
            return Err(IoError::AlreadyOpen(self.stream.uri().as_string()));
        }
        if !self.stream.is_open() {
            self.stream.set_access_mode(AccessMode::Write);
            self.stream.open()?;
            self.opened_stream = true;
        }
        self.open = true;
        Ok(())
    }

    /// Stop writing. Closes the stream only if `open` opened it.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        if self.opened_stream {
            if let Err(e) = self.stream.flush() {
                warn!("Failed to flush {}: {}", self.stream.uri(), e);
            }
            self.stream.close();
            self.opened_stream = false;
        }
        self.open = false;
    }

    /// Returns true if the writer is open.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Write `data` verbatim.
    pub fn write_raw_data(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(IoError::NotOpen(self.stream.uri().as_string()));
        }
        self.stream.write(data)
    }

    /// Write a signed byte.
    pub fn write_char(&mut self, value: i8) -> Result<()> {
        self.write_raw_data(&value.to_ne_bytes())
    }

    /// Write an unsigned byte.
    pub fn write_uchar(&mut self, value: u8) -> Result<()> {
        self.write_raw_data(&[value])
    }

    write_scalar! {
        /// Write an `i16`.
        write_short(i16), 2, write_i16;
        /// Write a `u16`.
        write_ushort(u16), 2, write_u16;
        /// Write an `i32`.
        write_int(i32), 4, write_i32;
        /// Write a `u32`.
        write_uint(u32), 4, write_u32;
        /// Write an `i64`.
        write_int64(i64), 8, write_i64;
        /// Write a `u64`.
        write_uint64(u64), 8, write_u64;
        /// Write an `f32`.
        write_float(f32), 4, write_f32;
        /// Write an `f64`.
        write_double(f64), 8, write_f64;
    }

    /// Write a one-byte boolean.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_uchar(u8::from(value))
    }

    /// Write a `u16` length-prefixed string.
    ///
    /// Fails with [`IoError::StringTooLong`] above 65535 bytes.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| IoError::StringTooLong(value.len()))?;
        self.write_ushort(len)?;
        self.write_raw_data(value.as_bytes())
    }

    /// Write a `u32` length-prefixed blob.
    pub fn write_blob(&mut self, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len())
            .map_err(|_| IoError::InvalidData(format!("blob of {} bytes exceeds u32 length", data.len())))?;
        self.write_uint(len)?;
        self.write_raw_data(data)
    }

    /// Write a guid as 16 raw bytes.
    pub fn write_guid(&mut self, guid: &Uuid) -> Result<()> {
        self.write_raw_data(guid.as_bytes())
    }

    /// Pack a float in `[-1, 1]` into a `u16`. Values outside are clamped.
    pub fn write_float_as_normalized_ubyte2(&mut self, value: f32) -> Result<()> {
        self.write_ushort(encode_normalized(value))
    }

    /// Pack a float in `[0, 1]` into a `u16`. Values outside are clamped.
    pub fn write_float_as_unsigned_normalized_ubyte2(&mut self, value: f32) -> Result<()> {
        self.write_ushort(encode_unsigned_normalized(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    #[test]
    fn test_string_too_long() {
        let mut stream = MemoryStream::new();
        let mut writer = BinaryWriter::new(&mut stream);
        writer.open().unwrap();
        let long = "x".repeat(usize::from(u16::MAX) + 1);
        assert!(matches!(writer.write_string(&long), Err(IoError::StringTooLong(65536))));
        writer.write_string(&long[..usize::from(u16::MAX)]).unwrap();
        writer.close();
        assert_eq!(stream.size(), 2 + u64::from(u16::MAX));
    }

    #[test]
    fn test_write_before_open() {
        let mut stream = MemoryStream::new();
        let mut writer = BinaryWriter::new(&mut stream);
        assert!(matches!(writer.write_int(1), Err(IoError::NotOpen(_))));
    }

    #[test]
    fn test_appends_to_caller_opened_stream() {
        let mut stream = MemoryStream::with_data(vec![9]);
        stream.set_access_mode(AccessMode::Append);
        stream.open().unwrap();

        let mut writer = BinaryWriter::new(&mut stream);
        writer.open().unwrap();
        writer.write_bool(true).unwrap();
        writer.close();

        assert!(stream.is_open());
        assert_eq!(stream.data(), &[9, 1]);
    }
}
