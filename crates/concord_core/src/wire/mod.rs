//! # Wire Codec
//!
//! Byte-oriented encoding for input actions and state snapshots.
//!
//! ## Stream Layout Rules
//!
//! ```text
//! small-uint   1-5 bytes, prefix-length encoded, lead byte never 0xFF
//! u16/u32/u64  fixed little-endian
//! f32          fixed little-endian IEEE-754
//! vec3 / quat  3 / 4 consecutive f32 (Pod copy)
//! string       small-uint length + UTF-8 bytes
//! block        u32 length + payload (skippable without decoding)
//! ```
//!
//! ## Design Philosophy
//!
//! - Readers never panic on hostile input; every read returns `WireResult`
//! - Blocks make any payload skippable byte-exact, so unknown data never
//!   misaligns the stream

mod error;
mod reader;
mod writer;

pub use error::{WireError, WireResult};
pub use reader::StreamReader;
pub use writer::{BlockMarker, StreamWriter};

/// Byte that the small-uint encoding never emits as its first byte.
///
/// Protocol fields use it to flag an alternative encoding in the same slot.
pub const SMALL_UINT_SENTINEL: u8 = 0xFF;

/// Lead byte announcing a full 4-byte value.
pub(crate) const SMALL_UINT_WIDE: u8 = 0xF0;
