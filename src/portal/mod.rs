//! Compilation Portal
//!
//! The observer contract through which the compiler reports its lifecycle:
//! trace aborts, freshly compiled loops and bridges attached to existing
//! loops. Observers implement [`JitPortal`]; every hook defaults to a no-op
//! so an observer only overrides what it cares about.
//!
//! [`PortalDispatcher`] sits between the compiler and the observers. It
//! tracks the lifecycle of every (entry point, specialization key):
//!
//! ```text
//!   NoArtifact ──▶ Compiling ──▶ Compiled ──▶ Bridged* ──▶ Retired
//!                      │   ▲          │                      │
//!                      ▼   └──────────┴──── recompile ◀──────┘
//!                   Aborted ──▶ Compiling (next attempt)
//! ```
//!
//! and asserts the ordering rules: one attempt per key at a time, a loop
//! notification before any bridge referencing it. Observers only receive
//! shared references and return nothing, so they cannot influence
//! compilation. A panicking observer propagates to the compiler.

pub mod observers;
pub mod stats;

pub use observers::{LoggingPortal, PortalEvent, RecordingPortal};
pub use stats::PortalStats;

use crate::jit::{
    AbortReason, ArtifactHandle, CompileKind, EntryPoint, EntryPointId, SpecializationKey, TraceOp,
};
use rustc_hash::FxHashMap as HashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Extra data delivered with a bridge notification
#[derive(Debug, Clone, Copy)]
pub struct BridgeData<'a> {
    /// Handle of the new bridge
    pub bridge: ArtifactHandle,
    /// Index of the guard in the original loop the bridge is attached to
    pub fail_index: u32,
    /// Operations recorded for the bridge
    pub operations: &'a [TraceOp],
    /// Start of the generated code, 0 when no code buffer exists
    pub address: usize,
    /// Length of the generated code, 0 when no code buffer exists
    pub length: usize,
}

/// Observer of compilation lifecycle events
pub trait JitPortal: Send + Sync {
    /// A trace attempt under `key` was discarded. Called once per attempt.
    fn on_abort(&self, _reason: AbortReason, _entry: &EntryPoint, _key: &SpecializationKey) {}

    /// A trace under `key` became a standalone compiled artifact
    fn on_compile(
        &self,
        _entry: &EntryPoint,
        _key: &SpecializationKey,
        _artifact: ArtifactHandle,
        _operations: &[TraceOp],
        _kind: CompileKind,
        _address: usize,
        _length: usize,
    ) {
    }

    /// A trace became a bridge attached to the already compiled loop `orig`
    fn on_compile_bridge(&self, _entry: &EntryPoint, _orig: ArtifactHandle, _bridge: &BridgeData<'_>) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPortal;

impl JitPortal for NoopPortal {}

/// Lifecycle of one (entry point, specialization key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum KeyState {
    NoArtifact,
    Compiling,
    Aborted,
    Compiled { artifact: ArtifactHandle },
    Bridged { artifact: ArtifactHandle, bridges: u32 },
    Retired { artifact: ArtifactHandle },
}

impl KeyState {
    /// The live loop for this key, if any
    pub fn live_loop(&self) -> Option<ArtifactHandle> {
        match self {
            KeyState::Compiled { artifact } | KeyState::Bridged { artifact, .. } => Some(*artifact),
            _ => None,
        }
    }
}

type SlotKey = (EntryPointId, SpecializationKey);

#[derive(Debug, Default)]
struct DispatchState {
    keys: HashMap<SlotKey, KeyState>,
    /// Announced loops that are not retired yet
    loops: HashMap<ArtifactHandle, SlotKey>,
    /// Bridge → the loop it extends
    bridges: HashMap<ArtifactHandle, ArtifactHandle>,
    stats: PortalStats,
}

impl DispatchState {
    fn key_state(&self, slot: &SlotKey) -> KeyState {
        self.keys.get(slot).copied().unwrap_or(KeyState::NoArtifact)
    }
}

/// Fans lifecycle events out to the registered observers and enforces the
/// notification ordering contract.
///
/// Each notification first updates the lifecycle state under the state lock,
/// then releases it and delivers under a separate delivery lock. Observers
/// may therefore query the dispatcher from inside a hook, and notifications
/// stay totally ordered even across keys. A hook must not report a new
/// event to the same dispatcher.
#[derive(Default)]
pub struct PortalDispatcher {
    portals: Vec<Arc<dyn JitPortal>>,
    state: Mutex<DispatchState>,
    delivery: Mutex<()>,
}

impl PortalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_portal(portal: Arc<dyn JitPortal>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.add_portal(portal);
        dispatcher
    }

    /// Register another observer. Observers are notified in registration order.
    pub fn add_portal(&mut self, portal: Arc<dyn JitPortal>) {
        self.portals.push(portal);
    }

    pub fn portal_count(&self) -> usize {
        self.portals.len()
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializes delivery. A panicking observer poisons this lock; the
    /// poison is ignored so later events are still delivered.
    fn deliver(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lifecycle state of `key` under `entry`
    pub fn key_state(&self, entry: &EntryPoint, key: &SpecializationKey) -> KeyState {
        self.lock().key_state(&(entry.id(), key.clone()))
    }

    /// The loop a bridge extends
    pub fn bridge_parent(&self, bridge: ArtifactHandle) -> Option<ArtifactHandle> {
        self.lock().bridges.get(&bridge).copied()
    }

    /// A trace attempt for `key` starts.
    ///
    /// # Panics
    /// If an attempt for the same key is already in progress.
    pub fn begin_compile(&self, entry: &EntryPoint, key: &SpecializationKey) {
        entry.check_key(key);
        let mut state = self.lock();
        let slot = (entry.id(), key.clone());
        let current = state.key_state(&slot);
        assert!(
            current != KeyState::Compiling,
            "trace for {} {} started while another attempt for the same key is in progress",
            entry,
            key
        );
        debug!(target: "jitportal::portal", entry = %entry, key = %key, from = ?current, "compiling");
        state.keys.insert(slot, KeyState::Compiling);
    }

    /// Report a discarded trace attempt.
    ///
    /// Loop attempts move the key to `Aborted`; bridge attempts (made while
    /// the key has a live or retired loop) leave the state alone.
    ///
    /// # Panics
    /// If nothing was being traced for `key`.
    pub fn abort(&self, reason: AbortReason, entry: &EntryPoint, key: &SpecializationKey) {
        entry.check_key(key);
        let _delivery = self.deliver();
        {
            let mut state = self.lock();
            let slot = (entry.id(), key.clone());
            match state.key_state(&slot) {
                KeyState::Compiling => {
                    state.keys.insert(slot, KeyState::Aborted);
                }
                KeyState::Compiled { .. } | KeyState::Bridged { .. } | KeyState::Retired { .. } => {}
                other => panic!(
                    "abort reported for {} {} with no trace attempt (state {:?})",
                    entry, key, other
                ),
            }
            state.stats.record_abort(reason);
        }
        debug!(target: "jitportal::portal", entry = %entry, key = %key, %reason, "trace aborted");
        for portal in &self.portals {
            portal.on_abort(reason, entry, key);
        }
    }

    /// Report a trace that became a standalone compiled loop.
    ///
    /// A previous loop for the same key is replaced.
    ///
    /// # Panics
    /// If no attempt for `key` was in progress, or `artifact` was announced
    /// before.
    #[allow(clippy::too_many_arguments)]
    pub fn loop_compiled(
        &self,
        entry: &EntryPoint,
        key: &SpecializationKey,
        artifact: ArtifactHandle,
        operations: &[TraceOp],
        kind: CompileKind,
        address: usize,
        length: usize,
    ) {
        entry.check_key(key);
        let _delivery = self.deliver();
        {
            let mut state = self.lock();
            let slot = (entry.id(), key.clone());
            let current = state.key_state(&slot);
            assert!(
                current == KeyState::Compiling,
                "loop {} for {} {} compiled without a trace attempt (state {:?})",
                artifact,
                entry,
                key,
                current
            );
            assert!(
                !state.loops.contains_key(&artifact),
                "artifact {} announced twice",
                artifact
            );
            state.keys.insert(slot.clone(), KeyState::Compiled { artifact });
            state.loops.insert(artifact, slot);
            state.stats.loops_compiled += 1;
        }
        debug!(target: "jitportal::portal", entry = %entry, key = %key, %artifact, %kind, ops = operations.len(), "loop compiled");
        for portal in &self.portals {
            portal.on_compile(entry, key, artifact, operations, kind, address, length);
        }
    }

    /// Report a trace that became a bridge attached to loop `orig`.
    ///
    /// # Panics
    /// If `orig` was never announced through [`loop_compiled`](Self::loop_compiled),
    /// is no longer the live loop of its key, or belongs to another entry point.
    pub fn bridge_compiled(&self, entry: &EntryPoint, orig: ArtifactHandle, data: &BridgeData<'_>) {
        let _delivery = self.deliver();
        let slot = {
            let mut state = self.lock();
            let slot = match state.loops.get(&orig) {
                Some(slot) => slot.clone(),
                None => panic!(
                    "bridge {} attached to {} before that loop was compiled or after it was retired",
                    data.bridge, orig
                ),
            };
            assert_eq!(slot.0, entry.id(), "bridge {} attached to a loop of another entry point", data.bridge);
            let bridges = match state.key_state(&slot) {
                KeyState::Compiled { artifact } if artifact == orig => 1,
                KeyState::Bridged { artifact, bridges } if artifact == orig => bridges + 1,
                other => panic!("bridge {} attached to {} which is not live (state {:?})", data.bridge, orig, other),
            };
            state.keys.insert(slot.clone(), KeyState::Bridged { artifact: orig, bridges });
            state.bridges.insert(data.bridge, orig);
            state.stats.bridges_compiled += 1;
            slot
        };
        debug!(
            target: "jitportal::portal",
            entry = %entry,
            key = %slot.1,
            %orig,
            bridge = %data.bridge,
            fail_index = data.fail_index,
            "bridge compiled"
        );
        for portal in &self.portals {
            portal.on_compile_bridge(entry, orig, data);
        }
    }

    /// Record that an artifact was retired after a guard failure or
    /// invalidation, and forget it. No observer is notified. Returns false
    /// for handles this dispatcher does not know or already retired.
    pub fn retire(&self, artifact: ArtifactHandle) -> bool {
        let mut state = self.lock();
        if state.bridges.remove(&artifact).is_some() {
            state.stats.bridges_retired += 1;
            return true;
        }
        let slot = match state.loops.remove(&artifact) {
            Some(slot) => slot,
            None => return false,
        };
        if state.key_state(&slot).live_loop() == Some(artifact) {
            state.keys.insert(slot, KeyState::Retired { artifact });
        }
        state.stats.loops_retired += 1;
        debug!(target: "jitportal::portal", %artifact, "loop retired");
        true
    }

    pub fn stats(&self) -> PortalStats {
        self.lock().stats.clone()
    }
}
