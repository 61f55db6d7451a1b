//! JIT Vocabulary
//!
//! Types shared by the quasi-immutable versioning core, the artifact registry
//! and the compilation portal: entry points (the "jit drivers" a program
//! declares), specialization keys, compiled-artifact handles, compile kinds,
//! abort reasons and the observable summary of a recorded trace.

pub mod abort;
pub mod greenkey;

pub use abort::AbortReason;
pub use greenkey::{GreenValue, SpecializationKey};

use crate::quasi_immut::FieldRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

/// Unique identifier for an entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryPointId(pub u32);

impl EntryPointId {
    fn fresh() -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct EntryPointInner {
    id: EntryPointId,
    name: String,
    greens: Vec<String>,
    reds: Vec<String>,
    /// Variant of each green, fixed by the first key checked
    shape: OnceLock<Vec<&'static str>>,
}

/// A loop entry point declared by the interpreted program.
///
/// The green variables are the compile-time constants that make up the
/// [`SpecializationKey`] of every artifact compiled for this entry point; the
/// red variables are the ordinary loop-carried values. Clones share identity:
/// two entry points are equal only if one was cloned from the other.
#[derive(Clone)]
pub struct EntryPoint {
    inner: Arc<EntryPointInner>,
}

impl EntryPoint {
    pub fn new(name: impl Into<String>, greens: &[&str], reds: &[&str]) -> Self {
        Self {
            inner: Arc::new(EntryPointInner {
                id: EntryPointId::fresh(),
                name: name.into(),
                greens: greens.iter().map(|g| g.to_string()).collect(),
                reds: reds.iter().map(|r| r.to_string()).collect(),
                shape: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> EntryPointId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn greens(&self) -> &[String] {
        &self.inner.greens
    }

    pub fn reds(&self) -> &[String] {
        &self.inner.reds
    }

    /// Number of values in every key of this entry point
    pub fn green_arity(&self) -> usize {
        self.inner.greens.len()
    }

    /// Position of a green variable inside the key
    pub fn green_index(&self, name: &str) -> Option<usize> {
        self.inner.greens.iter().position(|g| g == name)
    }

    /// Build a key for this entry point, asserting its arity.
    pub fn make_key<I, V>(&self, values: I) -> SpecializationKey
    where
        I: IntoIterator<Item = V>,
        V: Into<GreenValue>,
    {
        let key = SpecializationKey::new(values);
        self.check_key(&key);
        key
    }

    /// Assert that `key` has the shape this entry point expects: one value
    /// per green, each of the same variant as in the first key checked.
    ///
    /// A mismatch means the tracer built the key wrongly; continuing would
    /// corrupt the artifact registry, so this panics.
    pub fn check_key(&self, key: &SpecializationKey) {
        assert_eq!(
            key.len(),
            self.green_arity(),
            "malformed specialization key {} for entry point '{}' (greens: {:?})",
            key,
            self.name(),
            self.greens()
        );
        let shape = self
            .inner
            .shape
            .get_or_init(|| key.iter().map(GreenValue::kind_name).collect());
        for ((value, expected), green) in key.iter().zip(shape).zip(self.greens()) {
            assert_eq!(
                value.kind_name(),
                *expected,
                "malformed specialization key {} for entry point '{}' (green '{}')",
                key,
                self.name(),
                green
            );
        }
    }
}

impl PartialEq for EntryPoint {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for EntryPoint {}

impl Hash for EntryPoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("id", &self.inner.id.0)
            .field("name", &self.inner.name)
            .field("greens", &self.inner.greens)
            .field("reds", &self.inner.reds)
            .finish()
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.name)
    }
}

/// Opaque identity of one compiled loop or bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactHandle(u64);

impl ArtifactHandle {
    pub const fn new(number: u64) -> Self {
        Self(number)
    }

    pub fn number(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<token #{}>", self.0)
    }
}

/// Category of a compiled artifact reported through `on_compile`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileKind {
    /// A standalone compiled loop
    Loop,
    /// The entry path from the interpreter into an existing loop
    EntryBridge,
}

impl CompileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileKind::Loop => "loop",
            CompileKind::EntryBridge => "entry bridge",
        }
    }
}

impl fmt::Display for CompileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable summary of one recorded trace operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceOp {
    /// Loop header
    Label,
    /// Plain field read
    GetField { field: FieldRef },
    /// Read of a quasi-immutable field folded to a constant
    QuasiImmutField { field: FieldRef },
    /// Entry check that the captured field version is still current
    GuardNotInvalidated { field: FieldRef },
    /// Branch taken while tracing; leaving the trace here is a guard failure
    GuardValue { index: u32, expected: bool },
    /// Field write
    SetField { field: FieldRef },
    /// Back edge to the loop header
    Jump,
}

impl TraceOp {
    pub fn is_guard(&self) -> bool {
        matches!(self, TraceOp::GuardNotInvalidated { .. } | TraceOp::GuardValue { .. })
    }
}

impl fmt::Display for TraceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceOp::Label => write!(f, "label()"),
            TraceOp::GetField { field } => write!(f, "getfield_gc({})", field),
            TraceOp::QuasiImmutField { field } => write!(f, "quasiimmut_field({})", field),
            TraceOp::GuardNotInvalidated { field } => write!(f, "guard_not_invalidated({})", field),
            TraceOp::GuardValue { index, expected: true } => write!(f, "guard_true(#{})", index),
            TraceOp::GuardValue { index, expected: false } => write!(f, "guard_false(#{})", index),
            TraceOp::SetField { field } => write!(f, "setfield_gc({})", field),
            TraceOp::Jump => write!(f, "jump()"),
        }
    }
}
