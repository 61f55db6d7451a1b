//! Tracing Meta-Interpreter Harness
//!
//! A small, non-executing stand-in for a tracing JIT, enough to drive the
//! versioning core and the compilation portal end to end:
//!
//! - every loop iteration starts at a merge point keyed by the program's
//!   green values; hot keys (`threshold` hits) get one iteration traced
//! - when the trace reaches the same key again it closes into a loop that is
//!   installed in the [`ArtifactRegistry`] and announced with `on_compile`
//! - later iterations enter the loop, checking its quasi-immutable guards;
//!   a branch that goes the other way than while tracing is a guard failure,
//!   and after `trace_eagerness` failures of one guard a bridge is traced
//!   from there and announced with `on_compile_bridge`
//! - a write to a quasi-immutable field captured by the trace in progress
//!   aborts it with [`AbortReason::ForcedQuasiImmutable`]
//!
//! No machine code is produced: the loop body always computes the real
//! values, so results do not depend on what was compiled, and code
//! addresses are reported as 0.

pub mod heap;
pub mod programs;

pub use heap::{ClassDescr, Heap};

use crate::config::JitConfig;
use crate::error::Result;
use crate::jit::{
    AbortReason, ArtifactHandle, CompileKind, EntryPoint, EntryPointId, SpecializationKey, TraceOp,
};
use crate::portal::{BridgeData, JitPortal, PortalDispatcher, PortalStats};
use crate::quasi_immut::{FieldRef, GuardSet, ObjectId, QuasiImmutGuard, VersionTable};
use crate::registry::{ArtifactRegistry, EntryCheck};
use rustc_hash::FxHashMap as HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A loop program the harness can run
pub trait JitLoop {
    type State;

    fn entry_point(&self) -> &EntryPoint;

    /// Green values at the merge point for `state`
    fn greens(&self, state: &Self::State) -> SpecializationKey;

    /// Loop condition, evaluated before each merge point
    fn should_continue(&self, state: &Self::State) -> bool;

    /// One iteration of the loop body
    fn body(&mut self, frame: &mut Frame<'_>, state: &mut Self::State) -> Result<()>;
}

/// Operations and guards collected while tracing
#[derive(Debug)]
struct Recorder {
    key: SpecializationKey,
    ops: Vec<TraceOp>,
    guards: GuardSet,
    next_guard: u32,
}

impl Recorder {
    fn new(key: SpecializationKey, ops: Vec<TraceOp>) -> Self {
        Self {
            key,
            ops,
            guards: GuardSet::new(),
            next_guard: 0,
        }
    }
}

/// Compiled loop being executed, with the branch directions it was traced with
#[derive(Debug)]
struct Running {
    artifact: ArtifactHandle,
    expected: Vec<bool>,
    next_guard: u32,
}

#[derive(Debug)]
enum Mode {
    Interpreting,
    TracingLoop(Recorder),
    TracingBridge {
        parent: ArtifactHandle,
        fail_index: u32,
        recorder: Recorder,
    },
    Running(Running),
    RunningBridge(ArtifactHandle),
}

impl Mode {
    fn recorder(&mut self) -> Option<&mut Recorder> {
        match self {
            Mode::TracingLoop(recorder) | Mode::TracingBridge { recorder, .. } => Some(recorder),
            _ => None,
        }
    }

    fn current_artifact(&self) -> Option<ArtifactHandle> {
        match self {
            Mode::Running(running) => Some(running.artifact),
            Mode::RunningBridge(bridge) => Some(*bridge),
            _ => None,
        }
    }
}

/// The harness: heap, artifact registry, portal dispatcher and hotness counters
pub struct MetaInterp {
    config: JitConfig,
    heap: Heap,
    registry: ArtifactRegistry,
    dispatcher: PortalDispatcher,
    counters: HashMap<(EntryPointId, SpecializationKey), u32>,
    guard_failures: HashMap<(ArtifactHandle, u32), u32>,
}

impl MetaInterp {
    pub fn new(config: JitConfig) -> Self {
        Self {
            config,
            heap: Heap::new(Arc::new(VersionTable::new())),
            registry: ArtifactRegistry::new(),
            dispatcher: PortalDispatcher::new(),
            counters: HashMap::default(),
            guard_failures: HashMap::default(),
        }
    }

    pub fn with_portal(config: JitConfig, portal: Arc<dyn JitPortal>) -> Self {
        let mut interp = Self::new(config);
        interp.add_portal(portal);
        interp
    }

    pub fn add_portal(&mut self, portal: Arc<dyn JitPortal>) {
        self.dispatcher.add_portal(portal);
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn versions(&self) -> &Arc<VersionTable> {
        self.heap.versions()
    }

    pub fn registry(&self) -> &ArtifactRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &PortalDispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> PortalStats {
        self.dispatcher.stats()
    }

    /// Write a field from outside any loop, retiring dependent artifacts
    pub fn setfield(&mut self, object: ObjectId, field: &str, value: i64) -> Result<()> {
        if let Some(invalidation) = self.heap.set(object, field, value)? {
            let retired = self.registry.apply_invalidation(self.heap.versions(), &invalidation);
            self.retire_all(retired);
        }
        Ok(())
    }

    fn retire_all(&mut self, retired: Vec<ArtifactHandle>) {
        if retired.is_empty() {
            return;
        }
        self.guard_failures.retain(|(handle, _), _| !retired.contains(handle));
        for handle in retired {
            self.dispatcher.retire(handle);
        }
    }

    /// Run `program` from `state` until its loop condition fails
    pub fn run<P: JitLoop>(&mut self, program: &mut P, mut state: P::State) -> Result<P::State> {
        let entry = program.entry_point().clone();
        let mut mode = Mode::Interpreting;
        while program.should_continue(&state) {
            let key = program.greens(&state);
            entry.check_key(&key);
            mode = self.merge_point(&entry, &key, mode);

            let mut frame = Frame {
                jit: self,
                mode: &mut mode,
                entry: &entry,
            };
            if let Err(err) = program.body(&mut frame, &mut state) {
                self.leave_loop(&entry, mode);
                return Err(err);
            }
        }
        self.leave_loop(&entry, mode);
        Ok(state)
    }

    fn merge_point(&mut self, entry: &EntryPoint, key: &SpecializationKey, mode: Mode) -> Mode {
        match mode {
            Mode::TracingLoop(recorder) if recorder.key == *key => {
                self.close_loop(entry, recorder);
            }
            Mode::TracingBridge {
                parent,
                fail_index,
                recorder,
            } if recorder.key == *key => {
                self.close_bridge(entry, parent, fail_index, recorder);
            }
            tracing @ (Mode::TracingLoop(_) | Mode::TracingBridge { .. }) => return tracing,
            _ => {}
        }
        self.enter_or_count(entry, key)
    }

    fn enter_or_count(&mut self, entry: &EntryPoint, key: &SpecializationKey) -> Mode {
        if !self.config.enabled {
            return Mode::Interpreting;
        }
        if let Some(handle) = self.registry.live_loop(entry, key) {
            match self.registry.enter(self.heap.versions(), handle) {
                EntryCheck::Entered => {
                    let expected = self
                        .registry
                        .get(handle)
                        .map(|record| branch_directions(&record.operations))
                        .unwrap_or_default();
                    return Mode::Running(Running {
                        artifact: handle,
                        expected,
                        next_guard: 0,
                    });
                }
                EntryCheck::GuardFailed { field, retired } => {
                    debug!(target: "jitportal::metainterp", %handle, %field, "loop entry guard failed");
                    self.retire_all(retired);
                }
                EntryCheck::Dead => {}
            }
        }

        let threshold = self.config.threshold;
        let counter = self.counters.entry((entry.id(), key.clone())).or_insert(0);
        *counter += 1;
        if *counter < threshold {
            return Mode::Interpreting;
        }
        *counter = 0;
        debug!(target: "jitportal::metainterp", entry = %entry, key = %key, "tracing loop");
        self.dispatcher.begin_compile(entry, key);
        Mode::TracingLoop(Recorder::new(key.clone(), vec![TraceOp::Label]))
    }

    fn close_loop(&mut self, entry: &EntryPoint, recorder: Recorder) {
        let Recorder { key, mut ops, guards, .. } = recorder;
        ops.push(TraceOp::Jump);
        match self
            .registry
            .install_loop(self.heap.versions(), entry, &key, guards, ops.clone())
        {
            Ok(install) => {
                self.retire_all(install.replaced);
                self.dispatcher
                    .loop_compiled(entry, &key, install.handle, &ops, CompileKind::Loop, 0, 0);
            }
            Err(stale) => {
                debug!(target: "jitportal::metainterp", field = %stale.field, "captured version went stale before install");
                self.dispatcher.abort(AbortReason::ForcedQuasiImmutable, entry, &key);
            }
        }
    }

    fn close_bridge(&mut self, entry: &EntryPoint, parent: ArtifactHandle, fail_index: u32, recorder: Recorder) {
        let Recorder { key, mut ops, guards, .. } = recorder;
        if !self.registry.is_live(parent) {
            self.dispatcher.abort(AbortReason::Bridge, entry, &key);
            return;
        }
        ops.push(TraceOp::Jump);
        match self
            .registry
            .install_bridge(self.heap.versions(), parent, fail_index, guards, ops.clone())
        {
            Ok(bridge) => {
                let data = BridgeData {
                    bridge,
                    fail_index,
                    operations: &ops,
                    address: 0,
                    length: 0,
                };
                self.dispatcher.bridge_compiled(entry, parent, &data);
            }
            Err(_) => self.dispatcher.abort(AbortReason::ForcedQuasiImmutable, entry, &key),
        }
    }

    fn leave_loop(&mut self, entry: &EntryPoint, mode: Mode) {
        match mode {
            Mode::TracingLoop(recorder) => {
                self.dispatcher.abort(AbortReason::BadLoop, entry, &recorder.key);
            }
            Mode::TracingBridge { recorder, .. } => {
                self.dispatcher.abort(AbortReason::Bridge, entry, &recorder.key);
            }
            _ => {}
        }
    }

    /// A branch guard of `artifact` failed: run its bridge, or count the
    /// failure and start tracing a bridge once the guard is hot enough.
    fn guard_failed(&mut self, artifact: ArtifactHandle, index: u32) -> Mode {
        if let Some(bridge) = self.registry.bridge_for(artifact, index) {
            match self.registry.enter(self.heap.versions(), bridge) {
                EntryCheck::Entered => return Mode::RunningBridge(bridge),
                EntryCheck::GuardFailed { retired, .. } => self.retire_all(retired),
                EntryCheck::Dead => {}
            }
        }
        if !self.registry.is_live(artifact) {
            return Mode::Interpreting;
        }
        let eagerness = self.config.trace_eagerness;
        let failures = self.guard_failures.entry((artifact, index)).or_insert(0);
        *failures += 1;
        trace!(target: "jitportal::metainterp", %artifact, index, failures = *failures, "guard failed");
        if *failures < eagerness {
            return Mode::Interpreting;
        }
        *failures = 0;
        match self.registry.get(artifact) {
            Some(record) => {
                debug!(target: "jitportal::metainterp", %artifact, index, "tracing bridge");
                Mode::TracingBridge {
                    parent: artifact,
                    fail_index: index,
                    recorder: Recorder::new(record.key.clone(), Vec::new()),
                }
            }
            None => Mode::Interpreting,
        }
    }
}

/// Branch directions recorded by the `GuardValue` operations of a trace
fn branch_directions(ops: &[TraceOp]) -> Vec<bool> {
    ops.iter()
        .filter_map(|op| match op {
            TraceOp::GuardValue { expected, .. } => Some(*expected),
            _ => None,
        })
        .collect()
}

/// The loop body's view of the harness for one iteration
pub struct Frame<'a> {
    jit: &'a mut MetaInterp,
    mode: &'a mut Mode,
    entry: &'a EntryPoint,
}

impl Frame<'_> {
    pub fn is_tracing(&self) -> bool {
        matches!(self.mode, Mode::TracingLoop(_) | Mode::TracingBridge { .. })
    }

    /// True while executing a compiled loop or bridge
    pub fn is_compiled(&self) -> bool {
        self.mode.current_artifact().is_some()
    }

    pub fn heap(&self) -> &Heap {
        &self.jit.heap
    }

    fn abort_trace(&mut self, reason: AbortReason) {
        let mode = std::mem::replace(self.mode, Mode::Interpreting);
        match mode {
            Mode::TracingLoop(recorder) | Mode::TracingBridge { recorder, .. } => {
                debug!(target: "jitportal::metainterp", entry = %self.entry, key = %recorder.key, %reason, "aborting trace");
                self.jit.dispatcher.abort(reason, self.entry, &recorder.key);
            }
            other => *self.mode = other,
        }
    }

    fn record(&mut self, op: TraceOp) {
        let limit = self.jit.config.trace_limit;
        let too_long = match self.mode.recorder() {
            Some(recorder) => {
                recorder.ops.push(op);
                recorder.ops.len() > limit
            }
            None => false,
        };
        if too_long {
            self.abort_trace(AbortReason::TooLong);
        }
    }

    /// Read a field. While tracing, a quasi-immutable field is folded into a
    /// constant guarded by its current version.
    pub fn getfield(&mut self, object: ObjectId, field: &str) -> Result<i64> {
        let value = self.jit.heap.get(object, field)?;
        if !self.is_tracing() {
            return Ok(value);
        }
        let quasi = self.jit.config.enable_quasi_immut && self.jit.heap.is_quasi_immutable(object, field)?;
        if !quasi {
            self.record(TraceOp::GetField {
                field: FieldRef::new(object, field),
            });
            return Ok(value);
        }

        let guard = QuasiImmutGuard::capture(self.jit.heap.versions(), object, field);
        let field_ref = guard.field().clone();
        let newly_guarded = match self.mode.recorder() {
            Some(recorder) => recorder.guards.push(guard),
            None => false,
        };
        self.record(TraceOp::QuasiImmutField {
            field: field_ref.clone(),
        });
        if newly_guarded {
            self.record(TraceOp::GuardNotInvalidated { field: field_ref });
        }
        Ok(value)
    }

    /// Write a field. Writing a quasi-immutable field retires every artifact
    /// compiled against it and aborts a trace that captured it.
    pub fn setfield(&mut self, object: ObjectId, field: &str, value: i64) -> Result<()> {
        if self.is_tracing() {
            self.record(TraceOp::SetField {
                field: FieldRef::new(object, field),
            });
        }
        let invalidation = match self.jit.heap.set(object, field, value)? {
            Some(invalidation) => invalidation,
            None => return Ok(()),
        };
        let retired = self.jit.registry.apply_invalidation(self.jit.heap.versions(), &invalidation);
        if let Some(current) = self.mode.current_artifact() {
            if retired.contains(&current) {
                *self.mode = Mode::Interpreting;
            }
        }
        self.jit.retire_all(retired);

        let captured = self
            .mode
            .recorder()
            .is_some_and(|recorder| recorder.guards.guards_field(invalidation.field()));
        if captured {
            self.abort_trace(AbortReason::ForcedQuasiImmutable);
        }
        Ok(())
    }

    /// Take a branch on `cond` and return it.
    ///
    /// Traced as a guard on the direction taken; in compiled code a different
    /// direction is a guard failure.
    pub fn branch(&mut self, cond: bool) -> bool {
        if let Some(recorder) = self.mode.recorder() {
            let index = recorder.next_guard;
            recorder.next_guard += 1;
            self.record(TraceOp::GuardValue { index, expected: cond });
            return cond;
        }
        let failed = match &mut *self.mode {
            Mode::Running(running) => {
                let index = running.next_guard;
                running.next_guard += 1;
                match running.expected.get(index as usize).copied() {
                    Some(expected) if expected == cond => None,
                    Some(_) => Some((running.artifact, index)),
                    // More branches than the trace saw: leave compiled code
                    None => {
                        *self.mode = Mode::Interpreting;
                        return cond;
                    }
                }
            }
            _ => None,
        };
        if let Some((artifact, index)) = failed {
            *self.mode = self.jit.guard_failed(artifact, index);
        }
        cond
    }
}
