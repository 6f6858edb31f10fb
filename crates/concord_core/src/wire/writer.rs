//! # Stream Writer
//!
//! Growable, append-only encoder. Reused across actions via `clear()` to
//! avoid reallocating in steady state.

use bytemuck::{bytes_of, Pod};

use super::SMALL_UINT_WIDE;
use crate::math::{Quat, Vec3};

/// Position of a block length prefix awaiting its final value.
#[derive(Debug)]
#[must_use = "a block must be closed with `StreamWriter::end_block`"]
pub struct BlockMarker {
    offset: usize,
}

/// Stream writer - appends encoded values to an owned buffer.
#[derive(Clone, Debug, Default)]
pub struct StreamWriter {
    buffer: Vec<u8>,
}

impl StreamWriter {
    /// Creates an empty writer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates an empty writer with reserved capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Clears the writer for reuse, keeping its allocation.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer, returning the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a boolean as one byte.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u64 in little-endian format.
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a f32 in little-endian format.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an unsigned integer in 1 to 5 bytes.
    ///
    /// ```text
    /// 0xxxxxxx                              < 2^7
    /// 10xxxxxx xxxxxxxx                     < 2^14
    /// 110xxxxx xxxxxxxx xxxxxxxx            < 2^21
    /// 1110xxxx xxxxxxxx xxxxxxxx xxxxxxxx   < 2^28
    /// 11110000 + 4 bytes big-endian         anything else
    /// ```
    ///
    /// The lead byte is at most `0xF0`, so `0xFF` stays free as a sentinel.
    pub fn write_small_uint(&mut self, value: u32) {
        let bytes = value.to_be_bytes();
        if value < 0x80 {
            self.buffer.push(bytes[3]);
        } else if value < 0x4000 {
            self.buffer.extend_from_slice(&[0x80 | bytes[2], bytes[3]]);
        } else if value < 0x20_0000 {
            self.buffer
                .extend_from_slice(&[0xC0 | bytes[1], bytes[2], bytes[3]]);
        } else if value < 0x1000_0000 {
            self.buffer
                .extend_from_slice(&[0xE0 | bytes[0], bytes[1], bytes[2], bytes[3]]);
        } else {
            self.buffer.push(SMALL_UINT_WIDE);
            self.buffer.extend_from_slice(&bytes);
        }
    }

    /// Writes a Pod type directly.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.buffer.extend_from_slice(bytes_of(value));
    }

    /// Writes a vector as three f32.
    #[inline]
    pub fn write_vec3(&mut self, value: Vec3) {
        self.write_pod(&value);
    }

    /// Writes a quaternion as four f32.
    #[inline]
    pub fn write_quat(&mut self, value: Quat) {
        self.write_pod(&value);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_small_uint(value.len() as u32);
        self.buffer.extend_from_slice(value.as_bytes());
    }

    /// Appends raw bytes without a length prefix.
    #[inline]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Opens a self-delimited block. Everything written until the matching
    /// [`end_block`](Self::end_block) can later be skipped unread.
    pub fn begin_block(&mut self) -> BlockMarker {
        let offset = self.buffer.len();
        self.buffer.extend_from_slice(&[0; 4]);
        BlockMarker { offset }
    }

    /// Closes a block, back-patching its length prefix.
    pub fn end_block(&mut self, marker: BlockMarker) {
        let length = (self.buffer.len() - marker.offset - 4) as u32;
        self.buffer[marker.offset..marker.offset + 4].copy_from_slice(&length.to_le_bytes());
    }
}
