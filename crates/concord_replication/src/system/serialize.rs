//! # Snapshot Serialization
//!
//! Full-state snapshot of live records for late join and resync. Both
//! directions are resumable: each [`step`](SerializeOperation::step) does as
//! much work as the frame budget allows and reports whether it finished.
//!
//! ```text
//! small next_id
//! small highest pre-instantiated id
//! small count
//! { small id, small prototype id, block body }*     live order
//! ```
//!
//! A record that vanished while a serialization was in progress is written
//! as id 0 with an empty body and skipped on read.

use std::collections::HashSet;

use concord_core::{FrameBudget, Handle, Progress, StreamReader, StreamWriter, WireError, WireResult};

use super::EntitySystem;
use crate::entity_data::{EntityData, PendingLinks};

/// Resumable snapshot writer.
#[derive(Debug)]
pub struct SerializeOperation {
    writer: StreamWriter,
    handles: Vec<Handle<EntityData>>,
    cursor: usize,
}

impl SerializeOperation {
    /// Captures the header and the live set. Records created afterwards
    /// are not part of this snapshot.
    #[must_use]
    pub fn new(system: &EntitySystem) -> Self {
        let handles = system.live().to_vec();
        let mut writer = StreamWriter::with_capacity(64 + handles.len() * 64);
        writer.write_small_uint(system.next_id());
        writer.write_small_uint(system.highest_pre_instantiated_id());
        writer.write_small_uint(handles.len() as u32);
        Self {
            writer,
            handles,
            cursor: 0,
        }
    }

    /// Writes records until done or out of budget.
    pub fn step(&mut self, system: &EntitySystem, budget: &mut FrameBudget) -> Progress {
        while self.cursor < self.handles.len() {
            if budget.exhausted() {
                return Progress::Continue;
            }
            let handle = self.handles[self.cursor];
            self.cursor += 1;

            match system.get(handle) {
                Some(data) => {
                    self.writer.write_small_uint(data.id);
                    self.writer.write_small_uint(data.prototype_id);
                    data.write_body(&mut self.writer, |link| system.link_id(link));
                }
                None => {
                    self.writer.write_small_uint(0);
                    self.writer.write_small_uint(0);
                    let marker = self.writer.begin_block();
                    self.writer.end_block(marker);
                }
            }
            budget.record_item();
        }
        Progress::Done
    }

    /// Returns true once every record was written.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cursor >= self.handles.len()
    }

    /// Bytes written so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.writer.as_slice()
    }

    /// Consumes the operation, returning the snapshot.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.writer.into_bytes()
    }

    /// Serializes the whole system in one call.
    #[must_use]
    pub fn run(system: &EntitySystem) -> Vec<u8> {
        let mut operation = Self::new(system);
        let _ = operation.step(system, &mut FrameBudget::unbounded());
        operation.into_bytes()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Header,
    ClearRuntime,
    Entities,
    DestroyMissing,
    Links,
    Rebind,
    Done,
}

/// Resumable snapshot reader.
///
/// Replaces every non-placement record with the snapshot's content.
/// Placement records present in the snapshot are updated in place; the
/// rest are destroyed.
#[derive(Debug)]
pub struct DeserializeOperation {
    bytes: Vec<u8>,
    position: usize,
    stage: Stage,
    next_id: u32,
    highest_pre_instantiated_id: u32,
    remaining: usize,
    doomed: Vec<Handle<EntityData>>,
    cursor: usize,
    read: Vec<(Handle<EntityData>, PendingLinks)>,
    skipped_extensions: usize,
    error: Option<WireError>,
}

impl DeserializeOperation {
    /// Prepares to apply `bytes`.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            position: 0,
            stage: Stage::Header,
            next_id: 1,
            highest_pre_instantiated_id: 0,
            remaining: 0,
            doomed: Vec::new(),
            cursor: 0,
            read: Vec::new(),
            skipped_extensions: 0,
            error: None,
        }
    }

    /// Fatal error that ended the operation early.
    #[must_use]
    pub const fn error(&self) -> Option<&WireError> {
        self.error.as_ref()
    }

    /// Returns true once finished, successfully or not.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Extension payloads dropped while decoding bodies.
    #[must_use]
    pub const fn skipped_extensions(&self) -> usize {
        self.skipped_extensions
    }

    /// Applies the snapshot until done or out of budget.
    pub fn step(&mut self, system: &mut EntitySystem, budget: &mut FrameBudget) -> Progress {
        while self.stage != Stage::Done {
            if budget.exhausted() {
                return Progress::Continue;
            }
            if let Err(error) = self.advance(system) {
                tracing::error!(%error, position = self.position, "snapshot rejected");
                self.abort(system);
                self.error = Some(error);
                self.stage = Stage::Done;
                break;
            }
            budget.record_item();
        }
        Progress::Done
    }

    /// Applies a whole snapshot in one call.
    ///
    /// # Errors
    ///
    /// Returns the wire error that stopped the snapshot, if any.
    pub fn run(system: &mut EntitySystem, bytes: Vec<u8>) -> WireResult<()> {
        let mut operation = Self::new(bytes);
        let _ = operation.step(system, &mut FrameBudget::unbounded());
        operation.error.map_or(Ok(()), Err)
    }

    /// Performs one unit of work.
    fn advance(&mut self, system: &mut EntitySystem) -> WireResult<()> {
        match self.stage {
            Stage::Header => {
                let mut reader = StreamReader::new(&self.bytes);
                self.next_id = reader.read_small_uint()?;
                self.highest_pre_instantiated_id = reader.read_small_uint()?;
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
                None => self.stage = Stage::Entities,
            },
            Stage::Entities => {
                if self.remaining == 0 {
                    let kept: HashSet<Handle<EntityData>> =
                        self.read.iter().map(|(handle, _)| *handle).collect();
                    self.doomed = system
                        .pre_instantiated_records()
                        .into_iter()
                        .filter(|handle| !kept.contains(handle))
                        .collect();
                    self.cursor = 0;
                    self.stage = Stage::DestroyMissing;
                    return Ok(());
                }
                self.remaining -= 1;
                self.read_entity(system)?;
            }
            Stage::DestroyMissing => match self.doomed.get(self.cursor) {
                Some(&handle) => {
                    self.cursor += 1;
                    system.destroy_record(handle);
                }
                None => {
                    self.cursor = 0;
                    self.stage = Stage::Links;
                }
            },
            Stage::Links => match self.read.get(self.cursor) {
                Some((handle, links)) => {
                    self.cursor += 1;
                    system.resolve_links(*handle, links, Some);
                }
                None => {
                    self.apply_order(system);
                    self.cursor = 0;
                    self.stage = Stage::Rebind;
                }
            },
            Stage::Rebind => match self.read.get(self.cursor) {
                Some(&(handle, _)) => {
                    self.cursor += 1;
                    system.rebind(handle);
                }
                None => {
                    tracing::info!(
                        entities = self.read.len(),
                        skipped_extensions = self.skipped_extensions,
                        "snapshot applied"
                    );
                    self.stage = Stage::Done;
                }
            },
            Stage::Done => {}
        }
        Ok(())
    }

    fn apply_order(&self, system: &mut EntitySystem) {
        let order: Vec<Handle<EntityData>> = self.read.iter().map(|(handle, _)| *handle).collect();
        system.reorder_live(&order);
        system.set_highest_pre_instantiated_id(self.highest_pre_instantiated_id);
        system.set_next_id(self.next_id);
    }

    /// Keeps what was read before a fatal error, linked and rebound.
    fn abort(&mut self, system: &mut EntitySystem) {
        if self.stage == Stage::Header {
            return;
        }
        for (handle, links) in &self.read {
            system.resolve_links(*handle, links, Some);
        }
        self.apply_order(system);
        for &(handle, _) in &self.read {
            system.rebind(handle);
        }
    }

    fn read_entity(&mut self, system: &mut EntitySystem) -> WireResult<()> {
        let mut reader = StreamReader::at(&self.bytes, self.position);
        let id = reader.read_small_uint()?;
        let prototype_id = reader.read_small_uint()?;
        let mut body = reader.read_block()?;
        self.position = reader.position();

        if id == 0 {
            return Ok(());
        }
        if system.prototypes.get(prototype_id).is_none() {
            tracing::warn!(entity_id = id, prototype_id, "snapshot entity of unknown prototype skipped");
            return Ok(());
        }

        let existing = system.find_by_id(id).filter(|&handle| {
            system
                .get(handle)
                .is_some_and(|data| data.prototype_id == prototype_id)
        });
        let handle = match existing {
            Some(handle) => handle,
            None => {
                if let Some(stale) = system.find_by_id(id) {
                    system.destroy_record(stale);
                }
                system
                    .insert_with_id(id, prototype_id)
                    .ok_or(WireError::InvalidValue {
                        field: "prototype id",
                        value: u64::from(prototype_id),
                    })?
            }
        };

        let (Some(data), Some(proto)) = (
            system.records.get_mut(handle),
            system.prototypes.get(prototype_id),
        ) else {
            return Ok(());
        };
        data.parent = None;
        data.children.clear();
        match data.read_body(&mut body, proto, &system.extensions, None) {
            Ok(outcome) => {
                self.skipped_extensions += outcome.skipped_extensions;
                self.read.push((handle, outcome.links));
            }
            Err(error) => {
                tracing::warn!(entity_id = id, %error, "snapshot body truncated");
                self.read.push((handle, PendingLinks::default()));
            }
        }
        Ok(())
    }
}
