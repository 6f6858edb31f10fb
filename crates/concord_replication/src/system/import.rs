//! # Import
//!
//! Reads an export back, translating it against the local build:
//!
//! - Prototypes are matched by name, never by numeric id.
//! - Extensions are matched by local id, and only if the type name agrees.
//!   Anything unmatched is skipped byte-exact via its block.
//! - Runtime entities get fresh ids; placements keep theirs when the local
//!   scene still has a placement with that id and prototype.
//!
//! Import rewrites replicated state outside the action stream, so every
//! replica must run it at the same point of the action order.

use std::collections::{BTreeMap, HashMap, HashSet};

use concord_core::{FrameBudget, Handle, Progress, StreamReader, WireError, WireResult};

use super::export::EXPORT_FORMAT_VERSION;
use super::EntitySystem;
use crate::entity_data::{EntityData, ImportedMetadata, PendingLinks};

/// One extension entry of an imported prototype.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedExtension {
    /// Local id in the exporting build.
    pub local_id: u32,
    /// Type name in the exporting build.
    pub type_name: String,
    /// Matching local slot, if any.
    pub slot: Option<usize>,
}

/// One prototype of the imported table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportedPrototype {
    /// Id in the exporting build.
    pub source_id: u32,
    /// Stable name.
    pub name: String,
    /// Display name in the exporting build.
    pub display_name: String,
    /// Local prototype with the same name, if any.
    pub local_id: Option<u32>,
    /// Extension table with local matches.
    pub extensions: Vec<ImportedExtension>,
}

/// What an import did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Format version of the stream.
    pub format_version: u16,
    /// Highest placement id of the exporting session.
    pub highest_pre_instantiated_id: u32,
    /// Prototype table of the stream.
    pub prototypes: Vec<ImportedPrototype>,
    /// Stream id → local id of every imported entity.
    pub id_remap: BTreeMap<u32, u32>,
    /// Entities restored.
    pub entities_imported: usize,
    /// Entities dropped: unknown prototype or vanished during export.
    pub skipped_entities: usize,
    /// Extension payloads dropped: unmatched or undecodable.
    pub skipped_extensions: usize,
    /// Fatal error that ended the import early.
    pub error: Option<WireError>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Header,
    ClearRuntime,
    Prototypes,
    EntityIds,
    DestroyUnclaimed,
    Bodies,
    Links,
    Done,
}

#[derive(Clone, Debug)]
struct PrototypeMapping {
    local_id: u32,
    remap: Vec<Option<usize>>,
}

/// Resumable importer.
#[derive(Debug)]
pub struct ImportOperation {
    bytes: Vec<u8>,
    position: usize,
    stage: Stage,
    remaining: usize,
    cursor: usize,
    doomed: Vec<Handle<EntityData>>,
    mappings: HashMap<u32, PrototypeMapping>,
    /// Stream order; `None` for entities of unmatched prototypes.
    entries: Vec<Option<Handle<EntityData>>>,
    claimed: HashSet<Handle<EntityData>>,
    links: Vec<(Handle<EntityData>, PendingLinks)>,
    report: ImportReport,
}

impl ImportOperation {
    /// Prepares to import `bytes`.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            position: 0,
            stage: Stage::Header,
            remaining: 0,
            cursor: 0,
            doomed: Vec::new(),
            mappings: HashMap::new(),
            entries: Vec::new(),
            claimed: HashSet::new(),
            links: Vec::new(),
            report: ImportReport::default(),
        }
    }

    /// Returns true once finished, successfully or not.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Report so far; complete once [`is_done`](Self::is_done).
    #[must_use]
    pub const fn report(&self) -> &ImportReport {
        &self.report
    }

    /// Consumes the operation, returning its report.
    #[must_use]
    pub fn into_report(self) -> ImportReport {
        self.report
    }

    /// Imports until done or out of budget.
    pub fn step(&mut self, system: &mut EntitySystem, budget: &mut FrameBudget) -> Progress {
        while self.stage != Stage::Done {
            if budget.exhausted() {
                return Progress::Continue;
            }
            if let Err(error) = self.advance(system) {
                tracing::error!(%error, position = self.position, "import aborted");
                self.abort(system);
                self.report.error = Some(error);
                self.stage = Stage::Done;
                break;
            }
            budget.record_item();
        }
        Progress::Done
    }

    /// Imports a whole stream in one call.
    #[must_use]
    pub fn run(system: &mut EntitySystem, bytes: Vec<u8>) -> ImportReport {
        let mut operation = Self::new(bytes);
        let _ = operation.step(system, &mut FrameBudget::unbounded());
        operation.into_report()
    }

    fn advance(&mut self, system: &mut EntitySystem) -> WireResult<()> {
        match self.stage {
            Stage::Header => {
                let mut reader = StreamReader::new(&self.bytes);
                let version = reader.read_u16()?;
                if version == 0 || version > EXPORT_FORMAT_VERSION {
                    return Err(WireError::InvalidValue {
                        field: "export format version",
                        value: u64::from(version),
                    });
                }
                self.report.format_version = version;
                self.report.highest_pre_instantiated_id = reader.read_small_uint()?;
                self.remaining = reader.read_small_uint()? as usize;
                self.position = reader.position();
                self.doomed = system.runtime_records();
                self.cursor = 0;
                self.stage = Stage::ClearRuntime;
            }
            Stage::ClearRuntime => match self.doomed.get(self.cursor) {
                Some(&handle) => {
                    self.cursor += 1;
                    system.destroy_record(handle);
                }
                None => {
                    system.set_next_id(system.highest_pre_instantiated_id() + 1);
                    self.stage = Stage::Prototypes;
                }
            },
            Stage::Prototypes => {
                if self.remaining == 0 {
                    let mut reader = StreamReader::at(&self.bytes, self.position);
                    self.remaining = reader.read_small_uint()? as usize;
                    self.position = reader.position();
                    self.stage = Stage::EntityIds;
                    return Ok(());
                }
                self.remaining -= 1;
                self.read_prototype(system)?;
            }
            Stage::EntityIds => {
                if self.remaining == 0 {
                    self.doomed = system
                        .pre_instantiated_records()
                        .into_iter()
                        .filter(|handle| !self.claimed.contains(handle))
                        .collect();
                    self.cursor = 0;
                    self.stage = Stage::DestroyUnclaimed;
                    return Ok(());
                }
                self.remaining -= 1;
                self.read_entity_id(system)?;
            }
            Stage::DestroyUnclaimed => match self.doomed.get(self.cursor) {
                Some(&handle) => {
                    self.cursor += 1;
                    system.destroy_record(handle);
                }
                None => {
                    self.cursor = 0;
                    self.stage = Stage::Bodies;
                }
            },
            Stage::Bodies => match self.entries.get(self.cursor).copied() {
                Some(entry) => {
                    self.cursor += 1;
                    self.read_body(system, entry)?;
                }
                None => {
                    self.cursor = 0;
                    self.stage = Stage::Links;
                }
            },
            Stage::Links => match self.links.get(self.cursor) {
                Some((handle, links)) => {
                    self.cursor += 1;
                    let id_remap = &self.report.id_remap;
                    system.resolve_links(*handle, links, |id| id_remap.get(&id).copied());
                    if let Some(data) = system.records_mut().get_mut(*handle) {
                        data.imported_metadata = None;
                    }
                    system.rebind(*handle);
                }
                None => {
                    let order: Vec<Handle<EntityData>> =
                        self.links.iter().map(|(handle, _)| *handle).collect();
                    system.reorder_live(&order);
                    tracing::info!(
                        format_version = self.report.format_version,
                        imported = self.report.entities_imported,
                        skipped_entities = self.report.skipped_entities,
                        skipped_extensions = self.report.skipped_extensions,
                        "import complete"
                    );
                    self.stage = Stage::Done;
                }
            },
            Stage::Done => {}
        }
        Ok(())
    }

    /// Settles the records touched before a fatal error. Runtime records
    /// whose body was never read are destroyed; everything else keeps what
    /// it has and is linked and rebound as in a complete import.
    fn abort(&mut self, system: &mut EntitySystem) {
        let read: HashSet<Handle<EntityData>> = self.links.iter().map(|(handle, _)| *handle).collect();
        for &handle in self.entries.iter().flatten() {
            if read.contains(&handle) || self.claimed.contains(&handle) {
                continue;
            }
            if let Some(source_id) = system
                .get(handle)
                .and_then(|data| data.imported_metadata().map(|meta| meta.source_id))
            {
                let _ = self.report.id_remap.remove(&source_id);
            }
            system.destroy_record(handle);
        }

        let id_remap = &self.report.id_remap;
        for (handle, links) in &self.links {
            system.resolve_links(*handle, links, |id| id_remap.get(&id).copied());
        }
        for handle in self.claimed.iter().chain(read.iter()) {
            if let Some(data) = system.records_mut().get_mut(*handle) {
                data.imported_metadata = None;
            }
        }
        let order: Vec<Handle<EntityData>> = self.links.iter().map(|(handle, _)| *handle).collect();
        system.reorder_live(&order);
        for &handle in self.entries.iter().flatten() {
            system.rebind(handle);
        }
    }

    fn read_prototype(&mut self, system: &EntitySystem) -> WireResult<()> {
        let mut reader = StreamReader::at(&self.bytes, self.position);
        let source_id = reader.read_small_uint()?;
        let name = reader.read_string()?;
        let display_name = reader.read_string()?;
        let extension_count = reader.read_small_uint()? as usize;

        let local = system.prototypes().by_name(&name);
        // Every entry takes at least two bytes
        let mut extensions = Vec::with_capacity(extension_count.min(reader.remaining() / 2));
        for _ in 0..extension_count {
            let local_id = reader.read_small_uint()?;
            let type_name = reader.read_string()?;
            let slot = local.and_then(|proto| {
                proto
                    .slot_of_local_id(local_id)
                    .filter(|&slot| proto.extensions[slot].type_name == type_name)
            });
            if local.is_some() && slot.is_none() {
                tracing::warn!(
                    prototype = name.as_str(),
                    local_id,
                    type_name = type_name.as_str(),
                    "imported extension has no local match; its data will be skipped"
                );
            }
            extensions.push(ImportedExtension {
                local_id,
                type_name,
                slot,
            });
        }
        self.position = reader.position();

        match local {
            Some(proto) => {
                self.mappings.insert(
                    source_id,
                    PrototypeMapping {
                        local_id: proto.id,
                        remap: extensions.iter().map(|ext| ext.slot).collect(),
                    },
                );
            }
            None => tracing::warn!(
                prototype = name.as_str(),
                source_id,
                "imported prototype unknown locally; its entities will be skipped"
            ),
        }
        self.report.prototypes.push(ImportedPrototype {
            source_id,
            name,
            display_name,
            local_id: local.map(|proto| proto.id),
            extensions,
        });
        Ok(())
    }

    fn read_entity_id(&mut self, system: &mut EntitySystem) -> WireResult<()> {
        let mut reader = StreamReader::at(&self.bytes, self.position);
        let source_id = reader.read_small_uint()?;
        let source_prototype = reader.read_small_uint()?;
        self.position = reader.position();

        let Some(mapping) = self.mappings.get(&source_prototype) else {
            self.entries.push(None);
            return Ok(());
        };

        let placement = (source_id <= self.report.highest_pre_instantiated_id)
            .then(|| system.find_by_id(source_id))
            .flatten()
            .filter(|handle| {
                !self.claimed.contains(handle)
                    && system.get(*handle).is_some_and(|data| {
                        data.is_pre_instantiated() && data.prototype_id() == mapping.local_id
                    })
            });
        let handle = match placement {
            Some(handle) => {
                let _ = self.claimed.insert(handle);
                handle
            }
            None => {
                let id = system.allocate_id();
                system
                    .insert_with_id(id, mapping.local_id)
                    .ok_or(WireError::InvalidValue {
                        field: "prototype id",
                        value: u64::from(mapping.local_id),
                    })?
            }
        };

        let local_id = system.link_id(handle);
        if let Some(data) = system.records_mut().get_mut(handle) {
            data.imported_metadata = Some(ImportedMetadata {
                source_id,
                extension_remap: mapping.remap.clone(),
            });
        }
        self.report.id_remap.insert(source_id, local_id);
        self.entries.push(Some(handle));
        Ok(())
    }

    fn read_body(
        &mut self,
        system: &mut EntitySystem,
        entry: Option<Handle<EntityData>>,
    ) -> WireResult<()> {
        let mut reader = StreamReader::at(&self.bytes, self.position);
        let mut body = reader.read_block()?;
        self.position = reader.position();

        let Some(handle) = entry else {
            self.report.skipped_entities += 1;
            return Ok(());
        };
        if body.is_empty() {
            if let Some(source_id) = system
                .get(handle)
                .and_then(|data| data.imported_metadata().map(|meta| meta.source_id))
            {
                let _ = self.report.id_remap.remove(&source_id);
            }
            system.destroy_record(handle);
            self.report.skipped_entities += 1;
            return Ok(());
        }

        let Some(data) = system.records.get_mut(handle) else {
            return Ok(());
        };
        let Some(proto) = system.prototypes.get(data.prototype_id) else {
            return Ok(());
        };
        let remap = data
            .imported_metadata
            .as_ref()
            .map(|meta| meta.extension_remap.clone())
            .unwrap_or_default();
        data.parent = None;
        data.children.clear();
        match data.read_body(&mut body, proto, &system.extensions, Some(&remap)) {
            Ok(outcome) => {
                self.report.skipped_extensions += outcome.skipped_extensions;
                self.links.push((handle, outcome.links));
            }
            Err(error) => {
                tracing::warn!(entity_id = data.id, %error, "imported body truncated");
                self.links.push((handle, PendingLinks::default()));
            }
        }
        self.report.entities_imported += 1;
        Ok(())
    }
}
