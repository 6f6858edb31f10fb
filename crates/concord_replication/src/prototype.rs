//! # Prototype Registry
//!
//! The fixed catalog of entity types, built once at startup and read-only
//! afterwards. A missing prototype is a failed lookup, never a panic.
//!
//! ```toml
//! [[prototypes]]
//! id = 1
//! name = "crate"
//! display_name = "Wooden Crate"
//! default_scale = [1.0, 1.0, 1.0]
//!
//! [[prototypes.extensions]]
//! type_name = "physics"
//! local_id = 1
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;

use concord_core::{Quat, Transform, Vec3};
use serde::Deserialize;

use crate::error::{ReplicationError, ReplicationResult};

/// One extension declared by a prototype.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PrototypeExtension {
    /// Registered extension data type name.
    pub type_name: String,
    /// Id unique within the prototype, stable across renames and reorders.
    pub local_id: u32,
}

/// Immutable template for one entity type.
#[derive(Clone, Debug, PartialEq)]
pub struct Prototype {
    /// Numeric id used on the wire. Never 0.
    pub id: u32,
    /// Stable name used to match prototypes across sessions.
    pub name: String,
    /// Human readable name.
    pub display_name: String,
    /// Scale of a freshly created entity.
    pub default_scale: Vec3,
    /// Ordered extension list; entity extension arrays follow this order.
    pub extensions: Vec<PrototypeExtension>,
}

impl Prototype {
    /// Creates a prototype without extensions.
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id,
            display_name: name.clone(),
            name,
            default_scale: Vec3::ONE,
            extensions: Vec::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Sets the default scale.
    #[must_use]
    pub fn with_default_scale(mut self, scale: Vec3) -> Self {
        self.default_scale = scale;
        self
    }

    /// Appends an extension to the prototype's list.
    #[must_use]
    pub fn with_extension(mut self, type_name: impl Into<String>, local_id: u32) -> Self {
        self.extensions.push(PrototypeExtension {
            type_name: type_name.into(),
            local_id,
        });
        self
    }

    /// Number of extension slots every entity of this prototype carries.
    #[inline]
    #[must_use]
    pub fn extension_count(&self) -> usize {
        self.extensions.len()
    }

    /// Finds the slot declared with `local_id`.
    #[must_use]
    pub fn slot_of_local_id(&self, local_id: u32) -> Option<usize> {
        self.extensions.iter().position(|ext| ext.local_id == local_id)
    }

    /// Transform of a freshly created entity at the given pose.
    #[must_use]
    pub fn default_transform(&self, position: Vec3, rotation: Quat) -> Transform {
        Transform::new(position, rotation, self.default_scale)
    }

    fn validate(&self) -> ReplicationResult<()> {
        if self.id == 0 {
            return Err(ReplicationError::ReservedPrototypeId(self.name.clone()));
        }
        let mut seen = HashSet::new();
        for ext in &self.extensions {
            if !seen.insert(ext.local_id) {
                return Err(ReplicationError::DuplicateLocalExtensionId {
                    prototype: self.name.clone(),
                    local_id: ext.local_id,
                });
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct PrototypeDef {
    id: u32,
    name: String,
    display_name: Option<String>,
    default_scale: Option<[f32; 3]>,
    #[serde(default)]
    extensions: Vec<PrototypeExtension>,
}

#[derive(Deserialize)]
struct CatalogDef {
    #[serde(default)]
    prototypes: Vec<PrototypeDef>,
}

/// Lookup tables from id and name to [`Prototype`].
#[derive(Clone, Debug, Default)]
pub struct PrototypeRegistry {
    /// Sorted by id.
    prototypes: Vec<Prototype>,
    by_id: HashMap<u32, usize>,
    by_name: HashMap<String, usize>,
}

impl PrototypeRegistry {
    /// Builds and validates a registry.
    ///
    /// # Errors
    ///
    /// Fails on id 0, duplicate ids or names, or duplicate local extension ids.
    pub fn new(mut prototypes: Vec<Prototype>) -> ReplicationResult<Self> {
        prototypes.sort_by_key(|proto| proto.id);

        let mut by_id = HashMap::with_capacity(prototypes.len());
        let mut by_name = HashMap::with_capacity(prototypes.len());
        for (index, proto) in prototypes.iter().enumerate() {
            proto.validate()?;
            if by_id.insert(proto.id, index).is_some() {
                return Err(ReplicationError::DuplicatePrototypeId(proto.id));
            }
            if by_name.insert(proto.name.clone(), index).is_some() {
                return Err(ReplicationError::DuplicatePrototypeName(proto.name.clone()));
            }
        }

        Ok(Self {
            prototypes,
            by_id,
            by_name,
        })
    }

    /// Parses a `[[prototypes]]` catalog.
    ///
    /// # Errors
    ///
    /// Fails on malformed TOML or any validation error of [`Self::new`].
    pub fn from_toml_str(source: &str) -> ReplicationResult<Self> {
        let catalog: CatalogDef = toml::from_str(source)?;
        let prototypes = catalog
            .prototypes
            .into_iter()
            .map(|def| Prototype {
                id: def.id,
                display_name: def.display_name.unwrap_or_else(|| def.name.clone()),
                name: def.name,
                default_scale: def.default_scale.map_or(Vec3::ONE, Vec3::from_array),
                extensions: def.extensions,
            })
            .collect();
        Self::new(prototypes)
    }

    /// Reads and parses a catalog file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not validate.
    pub fn load(path: impl AsRef<Path>) -> ReplicationResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ReplicationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Looks up a prototype by id.
    #[inline]
    #[must_use]
    pub fn get(&self, id: u32) -> Option<&Prototype> {
        self.by_id.get(&id).map(|&index| &self.prototypes[index])
    }

    /// Looks up a prototype by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Prototype> {
        self.by_name.get(name).map(|&index| &self.prototypes[index])
    }

    /// Iterates prototypes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Prototype> {
        self.prototypes.iter()
    }

    /// Number of prototypes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    /// Returns true if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
        [[prototypes]]
        id = 2
        name = "barrel"
        default_scale = [2.0, 2.0, 2.0]

        [[prototypes]]
        id = 1
        name = "crate"
        display_name = "Wooden Crate"

        [[prototypes.extensions]]
        type_name = "physics"
        local_id = 7
    "#;

    #[test]
    fn test_catalog_from_toml() {
        let registry = PrototypeRegistry::from_toml_str(CATALOG).unwrap();
        assert_eq!(registry.len(), 2);

        let crate_proto = registry.get(1).unwrap();
        assert_eq!(crate_proto.display_name, "Wooden Crate");
        assert_eq!(crate_proto.default_scale, Vec3::ONE);
        assert_eq!(crate_proto.slot_of_local_id(7), Some(0));

        let barrel = registry.by_name("barrel").unwrap();
        assert_eq!(barrel.display_name, "barrel");
        assert_eq!(barrel.default_scale, Vec3::new(2.0, 2.0, 2.0));

        let ids: Vec<u32> = registry.iter().map(|proto| proto.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_missing_prototype_is_none() {
        let registry = PrototypeRegistry::new(vec![Prototype::new(1, "a")]).unwrap();
        assert!(registry.get(99).is_none());
        assert!(registry.by_name("b").is_none());
    }

    #[test]
    fn test_validation_errors() {
        let dup_id = PrototypeRegistry::new(vec![Prototype::new(1, "a"), Prototype::new(1, "b")]);
        assert!(matches!(dup_id, Err(ReplicationError::DuplicatePrototypeId(1))));

        let dup_name = PrototypeRegistry::new(vec![Prototype::new(1, "a"), Prototype::new(2, "a")]);
        assert!(matches!(dup_name, Err(ReplicationError::DuplicatePrototypeName(_))));

        let reserved = PrototypeRegistry::new(vec![Prototype::new(0, "zero")]);
        assert!(matches!(reserved, Err(ReplicationError::ReservedPrototypeId(_))));

        let dup_local = PrototypeRegistry::new(vec![Prototype::new(1, "a")
            .with_extension("x", 1)
            .with_extension("y", 1)]);
        assert!(matches!(
            dup_local,
            Err(ReplicationError::DuplicateLocalExtensionId { local_id: 1, .. })
        ));
    }
}
