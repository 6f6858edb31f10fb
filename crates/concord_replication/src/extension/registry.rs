//! Static extension registration table.

use std::any::Any;
use std::collections::HashMap;

use concord_core::{StreamReader, StreamWriter, WireResult};

use super::{Extension, ExtensionData, ExtensionKind, PhysicsExtension};

struct ExtensionEntry {
    methods: &'static [&'static str],
    make_data: fn() -> Box<dyn ExtensionData>,
    make_behavior: fn() -> Box<dyn Extension>,
}

fn make_data<K: ExtensionKind>() -> Box<dyn ExtensionData> {
    Box::new(K::Data::default())
}

fn make_behavior<K: ExtensionKind>() -> Box<dyn Extension> {
    Box::new(K::Behavior::default())
}

/// Type name → constructor and method table.
#[derive(Default)]
pub struct ExtensionRegistry {
    entries: HashMap<&'static str, ExtensionEntry>,
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in extensions.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register::<PhysicsExtension>();
        registry
    }

    /// Registers `K`, replacing any previous registration of its name.
    pub fn register<K: ExtensionKind>(&mut self) -> &mut Self {
        self.entries.insert(
            K::TYPE_NAME,
            ExtensionEntry {
                methods: K::METHODS,
                make_data: make_data::<K>,
                make_behavior: make_behavior::<K>,
            },
        );
        self
    }

    /// Returns true if `type_name` is registered.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    /// Fresh default data. Unregistered types get an opaque record.
    #[must_use]
    pub fn create_data(&self, type_name: &str) -> Box<dyn ExtensionData> {
        match self.entries.get(type_name) {
            Some(entry) => (entry.make_data)(),
            None => Box::new(OpaqueExtensionData::default()),
        }
    }

    /// Fresh behavior. Unregistered types get a no-op behavior.
    #[must_use]
    pub fn create_behavior(&self, type_name: &str) -> Box<dyn Extension> {
        match self.entries.get(type_name) {
            Some(entry) => (entry.make_behavior)(),
            None => Box::new(NullBehavior),
        }
    }

    /// Declared method names of a type.
    #[must_use]
    pub fn methods(&self, type_name: &str) -> Option<&'static [&'static str]> {
        self.entries.get(type_name).map(|entry| entry.methods)
    }

    /// Wire index of a method.
    #[must_use]
    pub fn method_index(&self, type_name: &str, method: &str) -> Option<u16> {
        self.methods(type_name)?
            .iter()
            .position(|&name| name == method)
            .map(|index| index as u16)
    }

    /// Method name of a wire index.
    #[must_use]
    pub fn method_name(&self, type_name: &str, index: u16) -> Option<&'static str> {
        self.methods(type_name)?.get(usize::from(index)).copied()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().copied().collect();
        names.sort_unstable();
        f.debug_struct("ExtensionRegistry").field("types", &names).finish()
    }
}

/// Data of an extension type missing at runtime.
///
/// Keeps the last decoded payload verbatim so it survives serialization,
/// and ignores every method.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpaqueExtensionData {
    version: u16,
    bytes: Vec<u8>,
}

impl OpaqueExtensionData {
    /// Stored raw payload.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ExtensionData for OpaqueExtensionData {
    fn version(&self) -> u16 {
        self.version
    }

    fn write(&self, writer: &mut StreamWriter) {
        writer.write_bytes(&self.bytes);
    }

    fn read(&mut self, reader: &mut StreamReader<'_>, version: u16) -> WireResult<()> {
        self.version = version;
        self.bytes = reader.read_rest().to_vec();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Behavior that does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBehavior;

impl Extension for NullBehavior {
    fn refresh(&mut self, _data: &dyn ExtensionData) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::{PhysicsData, PhysicsExtension};

    #[test]
    fn test_builtin_method_table() {
        let registry = ExtensionRegistry::with_builtin();
        assert!(registry.contains(<PhysicsExtension as ExtensionKind>::TYPE_NAME));
        assert_eq!(registry.method_index("physics", "sleep"), Some(2));
        assert_eq!(registry.method_name("physics", 0), Some("wake"));
        assert_eq!(registry.method_name("physics", 9), None);
        assert_eq!(registry.method_index("missing", "wake"), None);
    }

    #[test]
    fn test_create_data_typed_and_opaque() {
        let registry = ExtensionRegistry::with_builtin();
        let data = registry.create_data("physics");
        assert!(data.as_any().downcast_ref::<PhysicsData>().is_some());

        let opaque = registry.create_data("gone");
        assert!(opaque.as_any().downcast_ref::<OpaqueExtensionData>().is_some());
    }

    #[test]
    fn test_opaque_keeps_bytes() {
        let mut opaque = OpaqueExtensionData::default();
        let payload = [1_u8, 2, 3];
        opaque.read(&mut StreamReader::new(&payload), 4).unwrap();

        let mut writer = StreamWriter::new();
        opaque.write(&mut writer);
        assert_eq!(writer.as_slice(), &payload);
        assert_eq!(opaque.version(), 4);
    }
}
