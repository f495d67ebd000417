//! Typed binary codec over streams
//!
//! [`BinaryReader`] and [`BinaryWriter`] layer fixed-size scalars, strings,
//! blobs and guids on top of a [`Stream`](crate::Stream). Values are stored
//! in the declared stream byte order and converted to host order per call.
//!
//! Wire format:
//! - scalars: native width, stream byte order
//! - `bool`: one byte, non-zero is true
//! - strings: `u16` length followed by the UTF-8 bytes, no terminator
//! - blobs: `u32` length followed by the raw bytes
//! - guids: 16 raw bytes
//! - normalized floats: one `u16` each

mod reader;
mod writer;

pub use reader::BinaryReader;
pub use writer::BinaryWriter;

/// Byte order of values in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl ByteOrder {
    /// Byte order of the machine running this code.
    pub const fn host() -> Self {
        if cfg!(target_endian = "big") {
            Self::Big
        } else {
            Self::Little
        }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        Self::host()
    }
}

/// Scale of the `[-1, 1]` to `u16` mapping.
const NORMALIZED_SCALE: f32 = 32767.5;

/// Scale of the `[0, 1]` to `u16` mapping.
const UNSIGNED_NORMALIZED_SCALE: f32 = 65535.0;

fn decode_normalized(compressed: u16) -> f32 {
    f32::from(compressed) / NORMALIZED_SCALE - 1.0
}

fn encode_normalized(value: f32) -> u16 {
    ((value.clamp(-1.0, 1.0) + 1.0) * NORMALIZED_SCALE).round() as u16
}

fn decode_unsigned_normalized(compressed: u16) -> f32 {
    f32::from(compressed) / UNSIGNED_NORMALIZED_SCALE
}

fn encode_unsigned_normalized(value: f32) -> u16 {
    (value.clamp(0.0, 1.0) * UNSIGNED_NORMALIZED_SCALE).round() as u16
}
