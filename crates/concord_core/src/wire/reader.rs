//! # Stream Reader
//!
//! Borrowing decoder over a byte slice. Resumable operations keep the owned
//! buffer plus a saved [`position`](StreamReader::position) and rebuild the
//! reader every frame with [`StreamReader::at`].

use bytemuck::Pod;

use super::error::{WireError, WireResult};
use super::SMALL_UINT_WIDE;
use crate::math::{Quat, Vec3};

/// Stream reader - reads values from a buffer.
#[derive(Clone, Debug)]
pub struct StreamReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> StreamReader<'a> {
    /// Creates a reader positioned at the start of `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Creates a reader resuming at `position`.
    #[must_use]
    pub fn at(buffer: &'a [u8], position: usize) -> Self {
        Self {
            buffer,
            position: position.min(buffer.len()),
        }
    }

    /// Returns the current read offset.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Returns the number of bytes remaining.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Returns true when every byte has been consumed.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, needed: usize) -> WireResult<&'a [u8]> {
        if needed > self.remaining() {
            return Err(WireError::UnexpectedEnd {
                offset: self.position,
                needed,
                available: self.remaining(),
            });
        }
        let slice = &self.buffer[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> WireResult<[u8; N]> {
        let mut bytes = [0_u8; N];
        bytes.copy_from_slice(self.take(N)?);
        Ok(bytes)
    }

    /// Returns the next byte without consuming it.
    #[inline]
    #[must_use]
    pub fn peek_u8(&self) -> Option<u8> {
        self.buffer.get(self.position).copied()
    }

    /// Reads a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> WireResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a boolean byte; any non-zero value is `true`.
    #[inline]
    pub fn read_bool(&mut self) -> WireResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a u16 in little-endian format.
    #[inline]
    pub fn read_u16(&mut self) -> WireResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Reads a u32 in little-endian format.
    #[inline]
    pub fn read_u32(&mut self) -> WireResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Reads a u64 in little-endian format.
    #[inline]
    pub fn read_u64(&mut self) -> WireResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Reads a f32 in little-endian format.
    #[inline]
    pub fn read_f32(&mut self) -> WireResult<f32> {
        self.read_u32().map(f32::from_bits)
    }

    /// Reads a prefix-length encoded unsigned integer.
    pub fn read_small_uint(&mut self) -> WireResult<u32> {
        let lead = self.read_u8()?;
        let value = match lead {
            0x00..=0x7F => u32::from(lead),
            0x80..=0xBF => {
                let [b1] = self.take_array::<1>()?;
                u32::from_be_bytes([0, 0, lead & 0x3F, b1])
            }
            0xC0..=0xDF => {
                let [b1, b2] = self.take_array::<2>()?;
                u32::from_be_bytes([0, lead & 0x1F, b1, b2])
            }
            0xE0..=0xEF => {
                let [b1, b2, b3] = self.take_array::<3>()?;
                u32::from_be_bytes([lead & 0x0F, b1, b2, b3])
            }
            SMALL_UINT_WIDE => u32::from_be_bytes(self.take_array()?),
            _ => return Err(WireError::InvalidSmallUint(lead)),
        };
        Ok(value)
    }

    /// Reads a Pod type directly.
    #[inline]
    pub fn read_pod<T: Pod>(&mut self) -> WireResult<T> {
        let slice = self.take(std::mem::size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(slice))
    }

    /// Reads a vector of three f32.
    #[inline]
    pub fn read_vec3(&mut self) -> WireResult<Vec3> {
        self.read_pod()
    }

    /// Reads a quaternion of four f32.
    #[inline]
    pub fn read_quat(&mut self) -> WireResult<Quat> {
        self.read_pod()
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> WireResult<String> {
        let offset = self.position;
        let length = self.read_small_uint()? as usize;
        let bytes = self.take(length)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidString(offset))
    }

    /// Reads `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> WireResult<&'a [u8]> {
        self.take(count)
    }

    /// Returns every unread byte and moves to the end.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buffer[self.position..];
        self.position = self.buffer.len();
        rest
    }

    /// Reads a block written by `StreamWriter::begin_block`.
    ///
    /// Returns a reader over the block payload; `self` is already positioned
    /// after the block, whether or not the payload is ever decoded.
    pub fn read_block(&mut self) -> WireResult<StreamReader<'a>> {
        let length = self.read_u32()? as usize;
        let payload = self.take(length)?;
        Ok(StreamReader::new(payload))
    }

    /// Skips a block without decoding it.
    pub fn skip_block(&mut self) -> WireResult<()> {
        self.read_block().map(|_| ())
    }
}
