//! Ready-made portal observers

use super::{BridgeData, JitPortal};
use crate::error::Result;
use crate::jit::{AbortReason, ArtifactHandle, CompileKind, EntryPoint, SpecializationKey, TraceOp};
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// One recorded portal notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PortalEvent {
    Abort {
        reason: AbortReason,
        entry: String,
        key: SpecializationKey,
    },
    Compile {
        entry: String,
        key: SpecializationKey,
        artifact: ArtifactHandle,
        kind: CompileKind,
        address: usize,
        length: usize,
        operations: Vec<String>,
    },
    Bridge {
        entry: String,
        orig: ArtifactHandle,
        bridge: ArtifactHandle,
        fail_index: u32,
        address: usize,
        length: usize,
        operations: Vec<String>,
    },
}

impl fmt::Display for PortalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortalEvent::Abort { reason, entry, key } => write!(f, "abort    {} {} {}", entry, key, reason),
            PortalEvent::Compile {
                entry,
                key,
                artifact,
                kind,
                operations,
                ..
            } => write!(f, "compile  {} {} {} {} [{}]", entry, key, kind, artifact, operations.join(", ")),
            PortalEvent::Bridge {
                entry,
                orig,
                bridge,
                fail_index,
                operations,
                ..
            } => write!(
                f,
                "bridge   {} {} off {} guard {} [{}]",
                entry,
                bridge,
                orig,
                fail_index,
                operations.join(", ")
            ),
        }
    }
}

fn render_ops(operations: &[TraceOp]) -> Vec<String> {
    operations.iter().map(ToString::to_string).collect()
}

/// Observer that keeps every notification in arrival order
#[derive(Debug, Default)]
pub struct RecordingPortal {
    events: Mutex<Vec<PortalEvent>>,
}

impl RecordingPortal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PortalEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<PortalEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Abort reasons in the order they were reported
    pub fn aborts(&self) -> Vec<AbortReason> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                PortalEvent::Abort { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    /// (key, kind, artifact) of every compiled loop, in order
    pub fn compiled_loops(&self) -> Vec<(SpecializationKey, CompileKind, ArtifactHandle)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                PortalEvent::Compile { key, kind, artifact, .. } => Some((key.clone(), *kind, *artifact)),
                _ => None,
            })
            .collect()
    }

    /// (orig, bridge) of every compiled bridge, in order
    pub fn bridges(&self) -> Vec<(ArtifactHandle, ArtifactHandle)> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                PortalEvent::Bridge { orig, bridge, .. } => Some((*orig, *bridge)),
                _ => None,
            })
            .collect()
    }

    /// All events as JSON, one object per line
    pub fn to_json_lines(&self) -> Result<String> {
        let mut out = String::new();
        for event in self.lock().iter() {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl JitPortal for RecordingPortal {
    fn on_abort(&self, reason: AbortReason, entry: &EntryPoint, key: &SpecializationKey) {
        self.lock().push(PortalEvent::Abort {
            reason,
            entry: entry.name().to_string(),
            key: key.clone(),
        });
    }

    fn on_compile(
        &self,
        entry: &EntryPoint,
        key: &SpecializationKey,
        artifact: ArtifactHandle,
        operations: &[TraceOp],
        kind: CompileKind,
        address: usize,
        length: usize,
    ) {
        self.lock().push(PortalEvent::Compile {
            entry: entry.name().to_string(),
            key: key.clone(),
            artifact,
            kind,
            address,
            length,
            operations: render_ops(operations),
        });
    }

    fn on_compile_bridge(&self, entry: &EntryPoint, orig: ArtifactHandle, bridge: &BridgeData<'_>) {
        self.lock().push(PortalEvent::Bridge {
            entry: entry.name().to_string(),
            orig,
            bridge: bridge.bridge,
            fail_index: bridge.fail_index,
            address: bridge.address,
            length: bridge.length,
            operations: render_ops(bridge.operations),
        });
    }
}

/// Observer that turns every notification into a `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPortal;

impl JitPortal for LoggingPortal {
    fn on_abort(&self, reason: AbortReason, entry: &EntryPoint, key: &SpecializationKey) {
        info!(target: "jitportal::portal", entry = %entry, key = %key, %reason, "ABORT");
    }

    fn on_compile(
        &self,
        entry: &EntryPoint,
        key: &SpecializationKey,
        artifact: ArtifactHandle,
        operations: &[TraceOp],
        kind: CompileKind,
        address: usize,
        length: usize,
    ) {
        info!(
            target: "jitportal::portal",
            entry = %entry,
            key = %key,
            %artifact,
            %kind,
            ops = operations.len(),
            address = %format_args!("{:#x}", address),
            length,
            "COMPILE"
        );
        for op in operations {
            tracing::trace!(target: "jitportal::portal", "  {}", op);
        }
    }

    fn on_compile_bridge(&self, entry: &EntryPoint, orig: ArtifactHandle, bridge: &BridgeData<'_>) {
        info!(
            target: "jitportal::portal",
            entry = %entry,
            %orig,
            bridge = %bridge.bridge,
            fail_index = bridge.fail_index,
            ops = bridge.operations.len(),
            "BRIDGE"
        );
    }
}
