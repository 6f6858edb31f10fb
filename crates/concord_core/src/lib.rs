//! # Concord Core
//!
//! Leaf types shared by every Concord replica:
//! - Math types with a fixed binary layout (`Vec3`, `Quat`, `Transform`)
//! - A byte-oriented stream codec with self-delimited blocks
//! - Generational arenas, so cross references are handles and never pointers
//! - A wall-clock frame budget for time-sliced bulk work
//!
//! ## Example
//!
//! ```rust,ignore
//! use concord_core::{StreamWriter, StreamReader, Vec3};
//!
//! let mut writer = StreamWriter::new();
//! writer.write_small_uint(42);
//! writer.write_vec3(Vec3::new(1.0, 2.0, 3.0));
//!
//! let mut reader = StreamReader::new(writer.as_slice());
//! assert_eq!(reader.read_small_uint()?, 42);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod budget;
pub mod math;
pub mod memory;
pub mod wire;

pub use budget::{FrameBudget, Progress};
pub use math::{Quat, Transform, Vec3};
pub use memory::{Arena, Handle};
pub use wire::{BlockMarker, StreamReader, StreamWriter, WireError, WireResult, SMALL_UINT_SENTINEL};
