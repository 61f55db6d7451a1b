//! Guards on captured field versions

use super::{FieldRef, FieldVersion, ObjectId, VersionTable};
use crate::jit::ArtifactHandle;
use tracing::trace;

/// Guard embedded in a compiled artifact for one quasi-immutable read.
///
/// Checked at artifact entry, before the folded value is used. Once it fails
/// it never passes again; the artifact is retired rather than repaired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuasiImmutGuard {
    version: FieldVersion,
}

impl QuasiImmutGuard {
    /// Trust the current value of `object.field` and return a guard on it
    pub fn capture(table: &VersionTable, object: ObjectId, field: &str) -> Self {
        let version = table.read_guarded(object, field);
        trace!(target: "jitportal::quasi_immut", version = %version, "captured guard");
        Self { version }
    }

    /// True iff the captured version is still current
    #[inline]
    pub fn check(&self) -> bool {
        self.version.is_current()
    }

    pub fn field(&self) -> &FieldRef {
        self.version.owner()
    }

    pub fn version(&self) -> &FieldVersion {
        &self.version
    }
}

/// The quasi-immutable guards of one artifact, at most one per field
#[derive(Debug, Clone, Default)]
pub struct GuardSet {
    guards: Vec<QuasiImmutGuard>,
}

impl GuardSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a guard. Returns false if the field is already guarded; the
    /// earlier capture is kept since it was taken before any use.
    pub fn push(&mut self, guard: QuasiImmutGuard) -> bool {
        if self.guards.iter().any(|g| g.field() == guard.field()) {
            return false;
        }
        self.guards.push(guard);
        true
    }

    /// Check every guard, returning the first failing one
    pub fn check_all(&self) -> Result<(), &QuasiImmutGuard> {
        match self.guards.iter().find(|g| !g.check()) {
            Some(failed) => Err(failed),
            None => Ok(()),
        }
    }

    pub fn all_valid(&self) -> bool {
        self.check_all().is_ok()
    }

    pub fn guards_field(&self, field: &FieldRef) -> bool {
        self.guards.iter().any(|g| g.field() == field)
    }

    /// Unregister `artifact` from every captured version
    pub fn release(&self, table: &VersionTable, artifact: ArtifactHandle) {
        for guard in &self.guards {
            table.unregister_dependent(guard.version(), artifact);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &QuasiImmutGuard> {
        self.guards.iter()
    }

    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}
