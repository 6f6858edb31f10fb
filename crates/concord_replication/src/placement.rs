//! Scene placements registered before the session starts.
//!
//! Placements occupy a reserved id range: runtime ids are always allocated
//! above the highest placement id.

use concord_core::Transform;

/// Initial value of one extension slot, in its own payload format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionPayload {
    /// Extension slot.
    pub slot: usize,
    /// Payload format version.
    pub version: u16,
    /// Encoded data.
    pub bytes: Vec<u8>,
}

/// One pre-instantiated entity of the scene.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    /// Fixed id, never reassigned to runtime entities.
    pub id: u32,
    /// Prototype id.
    pub prototype_id: u32,
    /// Initial transform.
    pub transform: Transform,
    /// Initial extension values; slots not listed keep their defaults.
    pub extensions: Vec<ExtensionPayload>,
    /// Id of the parent placement, 0 for none.
    pub parent: u32,
    /// Initial hidden flag.
    pub hidden: bool,
    /// Whether the scene already holds an instantiated object for it.
    pub has_placeholder: bool,
}

impl Placement {
    /// Creates a placement without extension values, parent or placeholder.
    #[must_use]
    pub fn new(id: u32, prototype_id: u32, transform: Transform) -> Self {
        Self {
            id,
            prototype_id,
            transform,
            extensions: Vec::new(),
            parent: 0,
            hidden: false,
            has_placeholder: false,
        }
    }

    /// Adds an initial extension value.
    #[must_use]
    pub fn with_extension(mut self, slot: usize, version: u16, bytes: Vec<u8>) -> Self {
        self.extensions.push(ExtensionPayload {
            slot,
            version,
            bytes,
        });
        self
    }

    /// Sets the parent placement.
    #[must_use]
    pub fn with_parent(mut self, parent: u32) -> Self {
        self.parent = parent;
        self
    }

    /// Marks the placement hidden.
    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Marks that a scene object already exists for this placement.
    #[must_use]
    pub fn with_placeholder(mut self) -> Self {
        self.has_placeholder = true;
        self
    }
}
