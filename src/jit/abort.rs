//! Trace abort classification

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an in-progress trace was discarded.
///
/// Consumers match on this without knowing anything about the tracer. New
/// classifications that are not worth a dedicated variant use `Custom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The trace recorded more operations than `trace_limit` allows
    TooLong,
    /// A bridge could not be attached to its loop
    Bridge,
    /// The trace did not close into a loop
    BadLoop,
    /// A virtual object escaped while tracing
    Escape,
    /// A quasi-immutable field read by the trace was written before the trace
    /// could be compiled
    ForcedQuasiImmutable,
    /// Embedder-defined classification
    Custom(u16),
}

impl AbortReason {
    /// All built-in classifications, in declaration order
    pub const BUILTIN: [AbortReason; 5] = [
        AbortReason::TooLong,
        AbortReason::Bridge,
        AbortReason::BadLoop,
        AbortReason::Escape,
        AbortReason::ForcedQuasiImmutable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::TooLong => "too_long",
            AbortReason::Bridge => "bridge",
            AbortReason::BadLoop => "bad_loop",
            AbortReason::Escape => "escape",
            AbortReason::ForcedQuasiImmutable => "force_quasiimmut",
            AbortReason::Custom(_) => "custom",
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Custom(code) => write!(f, "custom({})", code),
            other => f.write_str(other.as_str()),
        }
    }
}
