//! Quasi-Immutable Field Versioning
//!
//! A quasi-immutable field is mutable, but compiled code may fold its value
//! into a constant as long as it guards on the field's current
//! [`FieldVersion`]. Every write to such a field replaces the version with a
//! fresh one, so every guard that captured the old version fails from then
//! on and the artifacts that depend on it are retired.
//!
//! ```text
//!   read_guarded(obj, a) ──▶ FieldVersion #5 ──▶ captured by loop L1
//!   obj.a = 7            ──▶ invalidate(obj, a): slot #5 → #6,
//!                            dependents [L1] handed to the registry
//!   check(guard #5)      ──▶ false (staleness is permanent)
//! ```
//!
//! Versions are identified by numbers drawn from a per-table counter and are
//! never reused. The current number lives in an atomic word: `invalidate`
//! swaps it with release ordering and `check` loads it with acquire
//! ordering, so a guard can never observe a pre-write value as trusted once
//! the write has completed.

pub mod fields;
pub mod guard;

pub use fields::{FieldFlags, FieldSpec, ImmutableFields};
pub use guard::{GuardSet, QuasiImmutGuard};

use crate::jit::ArtifactHandle;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, trace};

/// Identity of a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One field of one object instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FieldRef {
    pub object: ObjectId,
    pub field: Arc<str>,
}

impl FieldRef {
    pub fn new(object: ObjectId, field: &str) -> Self {
        Self {
            object,
            field: Arc::from(field),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object, self.field)
    }
}

/// Per-field state shared by the table and every version handed out for it
#[derive(Debug)]
struct VersionSlot {
    owner: FieldRef,
    current: AtomicU64,
    /// Artifacts compiled against the current version. Also serializes
    /// registration against invalidation.
    dependents: Mutex<Vec<ArtifactHandle>>,
}

impl VersionSlot {
    fn lock_dependents(&self) -> std::sync::MutexGuard<'_, Vec<ArtifactHandle>> {
        self.dependents.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A revocable token stating that a field's value is trusted until the next
/// write. Cloning does not create a new version.
#[derive(Debug, Clone)]
pub struct FieldVersion {
    id: u64,
    slot: Arc<VersionSlot>,
}

impl FieldVersion {
    /// Version number, unique within its table
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The field this version belongs to (diagnostics only)
    pub fn owner(&self) -> &FieldRef {
        &self.slot.owner
    }

    /// Whether this is still the field's current version
    #[inline]
    pub fn is_current(&self) -> bool {
        self.slot.current.load(Ordering::Acquire) == self.id
    }
}

impl PartialEq for FieldVersion {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Eq for FieldVersion {}

impl fmt::Display for FieldVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.slot.owner, self.id)
    }
}

/// Outcome of invalidating a field that compiled code had read
#[derive(Debug, Clone)]
pub struct Invalidation {
    /// The version that just became stale
    pub stale: FieldVersion,
    /// Number of the version that replaced it
    pub fresh_id: u64,
    /// Artifacts that were registered against the stale version and must be
    /// retired
    pub dependents: Vec<ArtifactHandle>,
}

impl Invalidation {
    pub fn field(&self) -> &FieldRef {
        self.stale.owner()
    }
}

/// Version table statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionStats {
    /// Fields that currently have a version slot
    pub tracked_fields: usize,
    /// Versions allocated so far (lazy creation and replacement)
    pub versions_allocated: u64,
    /// Writes that replaced an existing version
    pub invalidations: u64,
}

/// The (object, field) → current version association.
///
/// Slots are created lazily by [`read_guarded`](Self::read_guarded) and only
/// ever changed by [`invalidate`](Self::invalidate).
#[derive(Debug)]
pub struct VersionTable {
    slots: RwLock<HashMap<FieldRef, Arc<VersionSlot>>>,
    next_id: AtomicU64,
    invalidations: AtomicU64,
}

impl VersionTable {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::default()),
            next_id: AtomicU64::new(1),
            invalidations: AtomicU64::new(0),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn slot(&self, field: &FieldRef) -> Option<Arc<VersionSlot>> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.get(field).cloned()
    }

    /// Current version of `object.field`, allocating one on first use.
    ///
    /// Repeated calls return equal versions until the next write.
    pub fn read_guarded(&self, object: ObjectId, field: &str) -> FieldVersion {
        let key = FieldRef::new(object, field);
        let slot = match self.slot(&key) {
            Some(slot) => slot,
            None => {
                let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
                slots
                    .entry(key.clone())
                    .or_insert_with(|| {
                        let id = self.allocate_id();
                        debug!(target: "jitportal::quasi_immut", field = %key, version = id, "allocated field version");
                        Arc::new(VersionSlot {
                            owner: key.clone(),
                            current: AtomicU64::new(id),
                            dependents: Mutex::new(Vec::new()),
                        })
                    })
                    .clone()
            }
        };
        let id = slot.current.load(Ordering::Acquire);
        FieldVersion { id, slot }
    }

    /// Revoke the current version of `object.field`.
    ///
    /// Must be called on every write to a quasi-immutable field before the
    /// write is visible. Returns `None` when compiled code never read the
    /// field, in which case there is nothing to revoke.
    pub fn invalidate(&self, object: ObjectId, field: &str) -> Option<Invalidation> {
        let slot = self.slot(&FieldRef::new(object, field))?;
        let fresh_id = self.allocate_id();
        let (old_id, dependents) = {
            let mut dependents = slot.lock_dependents();
            let old_id = slot.current.swap(fresh_id, Ordering::AcqRel);
            (old_id, std::mem::take(&mut *dependents))
        };
        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "jitportal::quasi_immut",
            field = %slot.owner,
            stale = old_id,
            fresh = fresh_id,
            dependents = dependents.len(),
            "invalidated field version"
        );
        Some(Invalidation {
            stale: FieldVersion { id: old_id, slot },
            fresh_id,
            dependents,
        })
    }

    /// Record that `artifact` was compiled against `version`.
    ///
    /// Returns false if the version went stale in the meantime; the caller
    /// must then discard the artifact instead of installing it.
    pub fn register_dependent(&self, version: &FieldVersion, artifact: ArtifactHandle) -> bool {
        let mut dependents = version.slot.lock_dependents();
        if !version.is_current() {
            trace!(target: "jitportal::quasi_immut", version = %version, %artifact, "refused stale dependent");
            return false;
        }
        if !dependents.contains(&artifact) {
            dependents.push(artifact);
        }
        true
    }

    /// Forget that `artifact` depends on `version`, once the artifact is
    /// retired. Returns false if it was not registered (or the version was
    /// already invalidated, which drains the list).
    pub fn unregister_dependent(&self, version: &FieldVersion, artifact: ArtifactHandle) -> bool {
        let mut dependents = version.slot.lock_dependents();
        match dependents.iter().position(|handle| *handle == artifact) {
            Some(index) => {
                dependents.swap_remove(index);
                trace!(target: "jitportal::quasi_immut", version = %version, %artifact, "dropped dependent");
                true
            }
            None => false,
        }
    }

    /// Artifacts currently registered against `object.field`
    pub fn dependents(&self, object: ObjectId, field: &str) -> Vec<ArtifactHandle> {
        self.slot(&FieldRef::new(object, field))
            .map(|slot| slot.lock_dependents().clone())
            .unwrap_or_default()
    }

    /// Current version of `object.field` without allocating
    pub fn current(&self, object: ObjectId, field: &str) -> Option<FieldVersion> {
        self.slot(&FieldRef::new(object, field)).map(|slot| {
            let id = slot.current.load(Ordering::Acquire);
            FieldVersion { id, slot }
        })
    }

    pub fn stats(&self) -> VersionStats {
        let tracked_fields = self.slots.read().unwrap_or_else(PoisonError::into_inner).len();
        VersionStats {
            tracked_fields,
            versions_allocated: self.next_id.load(Ordering::Relaxed) - 1,
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

impl Default for VersionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_guarded_is_stable() {
        let table = VersionTable::new();
        let v1 = table.read_guarded(ObjectId(1), "a");
        let v2 = table.read_guarded(ObjectId(1), "a");
        assert_eq!(v1, v2);
        assert!(v1.is_current());
        assert_eq!(v1.owner(), &FieldRef::new(ObjectId(1), "a"));
    }

    #[test]
    fn test_fields_are_independent() {
        let table = VersionTable::new();
        let a = table.read_guarded(ObjectId(1), "a");
        let b = table.read_guarded(ObjectId(1), "b");
        let other = table.read_guarded(ObjectId(2), "a");
        assert_ne!(a, b);
        assert_ne!(a, other);

        table.invalidate(ObjectId(1), "a");
        assert!(!a.is_current());
        assert!(b.is_current());
        assert!(other.is_current());
    }

    #[test]
    fn test_invalidate_replaces_version() {
        let table = VersionTable::new();
        let before = table.read_guarded(ObjectId(1), "a");
        let inv = table.invalidate(ObjectId(1), "a").unwrap();
        assert_eq!(inv.stale, before);
        assert_eq!(inv.field(), &FieldRef::new(ObjectId(1), "a"));

        let after = table.read_guarded(ObjectId(1), "a");
        assert_ne!(before, after);
        assert_eq!(after.id(), inv.fresh_id);
        assert!(!before.is_current());
    }

    #[test]
    fn test_invalidate_untracked_field() {
        let table = VersionTable::new();
        assert!(table.invalidate(ObjectId(1), "a").is_none());
        assert_eq!(table.stats().tracked_fields, 0);
    }

    #[test]
    fn test_dependents_drained_on_invalidate() {
        let table = VersionTable::new();
        let v = table.read_guarded(ObjectId(1), "a");
        assert!(table.register_dependent(&v, ArtifactHandle::new(1)));
        assert!(table.register_dependent(&v, ArtifactHandle::new(2)));
        assert!(table.register_dependent(&v, ArtifactHandle::new(2)));
        assert_eq!(table.dependents(ObjectId(1), "a").len(), 2);

        let inv = table.invalidate(ObjectId(1), "a").unwrap();
        assert_eq!(inv.dependents, vec![ArtifactHandle::new(1), ArtifactHandle::new(2)]);
        assert!(table.dependents(ObjectId(1), "a").is_empty());
    }

    #[test]
    fn test_unregister_dependent() {
        let table = VersionTable::new();
        let v = table.read_guarded(ObjectId(1), "a");
        assert!(table.register_dependent(&v, ArtifactHandle::new(1)));
        assert!(table.register_dependent(&v, ArtifactHandle::new(2)));

        assert!(table.unregister_dependent(&v, ArtifactHandle::new(1)));
        assert!(!table.unregister_dependent(&v, ArtifactHandle::new(1)));
        assert_eq!(table.dependents(ObjectId(1), "a"), vec![ArtifactHandle::new(2)]);

        let inv = table.invalidate(ObjectId(1), "a").unwrap();
        assert_eq!(inv.dependents, vec![ArtifactHandle::new(2)]);
        assert!(!table.unregister_dependent(&v, ArtifactHandle::new(2)));
    }

    #[test]
    fn test_register_stale_version_refused() {
        let table = VersionTable::new();
        let v = table.read_guarded(ObjectId(1), "a");
        table.invalidate(ObjectId(1), "a");
        assert!(!table.register_dependent(&v, ArtifactHandle::new(1)));
        assert!(table.dependents(ObjectId(1), "a").is_empty());
    }

    #[test]
    fn test_stats() {
        let table = VersionTable::new();
        table.read_guarded(ObjectId(1), "a");
        table.read_guarded(ObjectId(1), "b");
        table.invalidate(ObjectId(1), "a");
        table.invalidate(ObjectId(1), "a");
        let stats = table.stats();
        assert_eq!(stats.tracked_fields, 2);
        assert_eq!(stats.versions_allocated, 4);
        assert_eq!(stats.invalidations, 2);
    }

    #[test]
    fn test_current_does_not_allocate() {
        let table = VersionTable::new();
        assert!(table.current(ObjectId(1), "a").is_none());
        let v = table.read_guarded(ObjectId(1), "a");
        assert_eq!(table.current(ObjectId(1), "a"), Some(v));
    }
}
