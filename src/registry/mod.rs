//! Compiled Artifact Registry
//!
//! Owns the (entry point, specialization key) → loop mapping and the bridges
//! attached to each loop. At most one loop per key is live at a time;
//! installing a new one retires the old one. Artifacts are never repaired:
//! a failed guard or a field invalidation retires the loop together with
//! every bridge attached to it. A retired artifact is dropped from the
//! registry and unregistered from every field version it depended on.

use crate::jit::{ArtifactHandle, EntryPoint, EntryPointId, SpecializationKey, TraceOp};
use crate::quasi_immut::{FieldRef, GuardSet, Invalidation, VersionTable};
use rustc_hash::FxHashMap as HashMap;
use tracing::debug;

/// What an artifact is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Loop,
    Bridge { parent: ArtifactHandle, fail_index: u32 },
}

/// Everything the registry knows about one artifact
#[derive(Debug, Clone)]
pub struct ArtifactRecord {
    pub handle: ArtifactHandle,
    pub kind: ArtifactKind,
    pub entry: EntryPointId,
    pub key: SpecializationKey,
    pub guards: GuardSet,
    pub operations: Vec<TraceOp>,
    /// Bridges by the guard index they hang off (loops only)
    bridges: HashMap<u32, ArtifactHandle>,
    entries: u64,
}

impl ArtifactRecord {
    pub fn is_loop(&self) -> bool {
        self.kind == ArtifactKind::Loop
    }

    /// How many times the artifact was entered successfully
    pub fn entry_count(&self) -> u64 {
        self.entries
    }
}

/// A captured field version went stale before the artifact was installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleCapture {
    pub field: FieldRef,
}

/// Result of installing a loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopInstall {
    pub handle: ArtifactHandle,
    /// Artifacts retired because the new loop replaced them
    pub replaced: Vec<ArtifactHandle>,
}

/// Result of entering an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryCheck {
    /// All guards hold
    Entered,
    /// A quasi-immutable guard failed; the listed artifacts were retired
    GuardFailed { field: FieldRef, retired: Vec<ArtifactHandle> },
    /// The artifact is unknown or was already retired
    Dead,
}

/// Registry of compiled loops and bridges
#[derive(Debug)]
pub struct ArtifactRegistry {
    next_token: u64,
    live_loops: HashMap<(EntryPointId, SpecializationKey), ArtifactHandle>,
    /// Live artifacts only
    artifacts: HashMap<ArtifactHandle, ArtifactRecord>,
    retired_total: u64,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self {
            next_token: 1,
            live_loops: HashMap::default(),
            artifacts: HashMap::default(),
            retired_total: 0,
        }
    }

    fn allocate(&mut self) -> ArtifactHandle {
        let handle = ArtifactHandle::new(self.next_token);
        self.next_token += 1;
        handle
    }

    fn register_guards(
        &self,
        table: &VersionTable,
        guards: &GuardSet,
        handle: ArtifactHandle,
    ) -> Result<(), StaleCapture> {
        for guard in guards.iter() {
            if !table.register_dependent(guard.version(), handle) {
                return Err(StaleCapture {
                    field: guard.field().clone(),
                });
            }
        }
        Ok(())
    }

    /// Install a freshly compiled loop for `key`.
    ///
    /// Every guard is registered as a dependent of its field version first;
    /// if one has gone stale the loop is not installed.
    pub fn install_loop(
        &mut self,
        table: &VersionTable,
        entry: &EntryPoint,
        key: &SpecializationKey,
        guards: GuardSet,
        operations: Vec<TraceOp>,
    ) -> Result<LoopInstall, StaleCapture> {
        entry.check_key(key);
        let handle = self.allocate();
        self.register_guards(table, &guards, handle)?;

        let replaced = match self.live_loops.get(&(entry.id(), key.clone())).copied() {
            Some(old) => self.retire(table, old),
            None => Vec::new(),
        };
        self.live_loops.insert((entry.id(), key.clone()), handle);
        self.artifacts.insert(
            handle,
            ArtifactRecord {
                handle,
                kind: ArtifactKind::Loop,
                entry: entry.id(),
                key: key.clone(),
                guards,
                operations,
                bridges: HashMap::default(),
                entries: 0,
            },
        );
        debug!(target: "jitportal::registry", %handle, entry = %entry, key = %key, replaced = replaced.len(), "installed loop");
        Ok(LoopInstall { handle, replaced })
    }

    /// Attach a bridge to guard `fail_index` of the live loop `parent`.
    ///
    /// # Panics
    /// If `parent` is not a live loop.
    pub fn install_bridge(
        &mut self,
        table: &VersionTable,
        parent: ArtifactHandle,
        fail_index: u32,
        guards: GuardSet,
        operations: Vec<TraceOp>,
    ) -> Result<ArtifactHandle, StaleCapture> {
        let (entry, key) = match self.artifacts.get(&parent) {
            Some(record) if record.is_loop() => (record.entry, record.key.clone()),
            _ => panic!("bridge attached to {} which is not a live loop", parent),
        };
        let handle = self.allocate();
        self.register_guards(table, &guards, handle)?;

        if let Some(record) = self.artifacts.get_mut(&parent) {
            record.bridges.insert(fail_index, handle);
        }
        self.artifacts.insert(
            handle,
            ArtifactRecord {
                handle,
                kind: ArtifactKind::Bridge { parent, fail_index },
                entry,
                key,
                guards,
                operations,
                bridges: HashMap::default(),
                entries: 0,
            },
        );
        debug!(target: "jitportal::registry", %handle, %parent, fail_index, "installed bridge");
        Ok(handle)
    }

    /// The live loop for `key`, if any
    pub fn live_loop(&self, entry: &EntryPoint, key: &SpecializationKey) -> Option<ArtifactHandle> {
        self.live_loops.get(&(entry.id(), key.clone())).copied()
    }

    /// The live bridge attached to guard `fail_index` of `parent`
    pub fn bridge_for(&self, parent: ArtifactHandle, fail_index: u32) -> Option<ArtifactHandle> {
        self.artifacts
            .get(&parent)
            .and_then(|record| record.bridges.get(&fail_index).copied())
            .filter(|bridge| self.is_live(*bridge))
    }

    pub fn get(&self, handle: ArtifactHandle) -> Option<&ArtifactRecord> {
        self.artifacts.get(&handle)
    }

    pub fn is_live(&self, handle: ArtifactHandle) -> bool {
        self.artifacts.contains_key(&handle)
    }

    pub fn live_count(&self) -> usize {
        self.artifacts.len()
    }

    /// Artifacts retired so far
    pub fn retired_count(&self) -> u64 {
        self.retired_total
    }

    /// Check the quasi-immutable guards of `handle` on entry.
    ///
    /// A failing guard retires the artifact (with its bridges, for a loop).
    pub fn enter(&mut self, table: &VersionTable, handle: ArtifactHandle) -> EntryCheck {
        let failed = match self.artifacts.get_mut(&handle) {
            Some(record) => match record.guards.check_all() {
                Ok(()) => {
                    record.entries += 1;
                    return EntryCheck::Entered;
                }
                Err(guard) => guard.field().clone(),
            },
            None => return EntryCheck::Dead,
        };
        debug!(target: "jitportal::registry", %handle, field = %failed, "guard_not_invalidated failed on entry");
        let retired = self.retire(table, handle);
        EntryCheck::GuardFailed { field: failed, retired }
    }

    /// Retire `handle`. A loop takes its bridges with it. Returns every
    /// artifact that went from live to retired.
    pub fn retire(&mut self, table: &VersionTable, handle: ArtifactHandle) -> Vec<ArtifactHandle> {
        let record = match self.artifacts.remove(&handle) {
            Some(record) => record,
            None => return Vec::new(),
        };
        record.guards.release(table, handle);
        let mut retired = vec![handle];

        match record.kind {
            ArtifactKind::Loop => {
                let slot = (record.entry, record.key);
                if self.live_loops.get(&slot) == Some(&handle) {
                    self.live_loops.remove(&slot);
                }
                for bridge in record.bridges.into_values() {
                    if let Some(bridge_record) = self.artifacts.remove(&bridge) {
                        bridge_record.guards.release(table, bridge);
                        retired.push(bridge);
                    }
                }
            }
            ArtifactKind::Bridge { parent, fail_index } => {
                if let Some(parent_record) = self.artifacts.get_mut(&parent) {
                    if parent_record.bridges.get(&fail_index) == Some(&handle) {
                        parent_record.bridges.remove(&fail_index);
                    }
                }
            }
        }
        self.retired_total += retired.len() as u64;
        debug!(target: "jitportal::registry", %handle, count = retired.len(), "retired");
        retired
    }

    /// Retire every artifact named by an invalidation
    pub fn apply_invalidation(&mut self, table: &VersionTable, invalidation: &Invalidation) -> Vec<ArtifactHandle> {
        let mut retired = Vec::new();
        for handle in &invalidation.dependents {
            retired.extend(self.retire(table, *handle));
        }
        retired
    }
}

impl Default for ArtifactRegistry {
    fn default() -> Self {
        Self::new()
    }
}
