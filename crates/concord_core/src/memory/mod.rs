//! # Memory Management
//!
//! Generational storage for objects that reference each other.
//!
//! ## Design Philosophy
//!
//! Records never hold pointers to each other. They hold [`Handle`]s, and a
//! destroyed record simply invalidates every handle to it:
//! - No reference counting
//! - No lifetime cycles between mutually referencing objects
//! - O(1) insert, remove and lookup

mod arena;

pub use arena::{Arena, Handle};
