//! # Export
//!
//! Self-describing, versioned save format. Unlike a snapshot, an export
//! carries the prototype table it was written against, so it can be read
//! back by a build whose prototypes or extensions have since changed.
//!
//! ```text
//! u16   format version
//! small highest pre-instantiated id
//! small prototype count
//! { small id, str name, str display name,
//!   small extension count, { small local id, str type name }* }*
//! small entity count
//! { small id, small prototype id }*
//! block body*                                  same order as the ids
//! ```

use concord_core::{FrameBudget, Handle, Progress, StreamWriter};

use super::EntitySystem;
use crate::entity_data::EntityData;

/// Version written at the start of every export.
pub const EXPORT_FORMAT_VERSION: u16 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Header,
    EntityHeaders,
    Bodies,
    Done,
}

/// Resumable exporter.
#[derive(Debug)]
pub struct ExportOperation {
    writer: StreamWriter,
    entities: Vec<(Handle<EntityData>, u32, u32)>,
    stage: Stage,
    cursor: usize,
}

impl ExportOperation {
    /// Captures the live set; records created afterwards are not exported.
    #[must_use]
    pub fn new(system: &EntitySystem) -> Self {
        let entities: Vec<_> = system
            .live()
            .iter()
            .filter_map(|&handle| {
                let data = system.get(handle)?;
                Some((handle, data.id, data.prototype_id))
            })
            .collect();
        Self {
            writer: StreamWriter::with_capacity(256 + entities.len() * 64),
            entities,
            stage: Stage::Header,
            cursor: 0,
        }
    }

    /// Returns true once the export is complete.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Writes until done or out of budget.
    pub fn step(&mut self, system: &EntitySystem, budget: &mut FrameBudget) -> Progress {
        while self.stage != Stage::Done {
            if budget.exhausted() {
                return Progress::Continue;
            }
            self.advance(system);
            budget.record_item();
        }
        Progress::Done
    }

    fn advance(&mut self, system: &EntitySystem) {
        match self.stage {
            Stage::Header => {
                self.writer.write_u16(EXPORT_FORMAT_VERSION);
                self.writer
                    .write_small_uint(system.highest_pre_instantiated_id());
                self.writer.write_small_uint(system.prototypes().len() as u32);
                for proto in system.prototypes().iter() {
                    self.writer.write_small_uint(proto.id);
                    self.writer.write_str(&proto.name);
                    self.writer.write_str(&proto.display_name);
                    self.writer.write_small_uint(proto.extensions.len() as u32);
                    for ext in &proto.extensions {
                        self.writer.write_small_uint(ext.local_id);
                        self.writer.write_str(&ext.type_name);
                    }
                }
                self.writer.write_small_uint(self.entities.len() as u32);
                self.stage = Stage::EntityHeaders;
            }
            Stage::EntityHeaders => match self.entities.get(self.cursor) {
                Some(&(_, id, prototype_id)) => {
                    self.cursor += 1;
                    self.writer.write_small_uint(id);
                    self.writer.write_small_uint(prototype_id);
                }
                None => {
                    self.cursor = 0;
                    self.stage = Stage::Bodies;
                }
            },
            Stage::Bodies => match self.entities.get(self.cursor) {
                Some(&(handle, _, _)) => {
                    self.cursor += 1;
                    match system.get(handle) {
                        Some(data) => data.write_body(&mut self.writer, |link| system.link_id(link)),
                        None => {
                            let marker = self.writer.begin_block();
                            self.writer.end_block(marker);
                        }
                    }
                }
                None => {
                    tracing::info!(
                        entities = self.entities.len(),
                        prototypes = system.prototypes().len(),
                        bytes = self.writer.len(),
                        "export complete"
                    );
                    self.stage = Stage::Done;
                }
            },
            Stage::Done => {}
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.writer.as_slice()
    }

    /// Consumes the operation, returning the export.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_bytes()
    }

    /// Exports the whole system in one call.
    #[must_use]
    pub fn run(system: &EntitySystem) -> Vec<u8> {
        let mut operation = Self::new(system);
        let _ = operation.step(system, &mut FrameBudget::unbounded());
        operation.into_bytes()
    }
}
