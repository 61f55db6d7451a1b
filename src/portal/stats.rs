//! Portal statistics

use crate::jit::AbortReason;
use std::collections::BTreeMap;
use std::fmt;

/// Counters kept by the dispatcher
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalStats {
    pub aborts: BTreeMap<AbortReason, u64>,
    pub loops_compiled: u64,
    pub bridges_compiled: u64,
    pub loops_retired: u64,
    pub bridges_retired: u64,
}

impl PortalStats {
    pub(crate) fn record_abort(&mut self, reason: AbortReason) {
        *self.aborts.entry(reason).or_insert(0) += 1;
    }

    pub fn aborts_for(&self, reason: AbortReason) -> u64 {
        self.aborts.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_aborts(&self) -> u64 {
        self.aborts.values().sum()
    }

    /// Add another dispatcher's counters to these
    pub fn merge(&mut self, other: &PortalStats) {
        for (reason, count) in &other.aborts {
            *self.aborts.entry(*reason).or_insert(0) += count;
        }
        self.loops_compiled += other.loops_compiled;
        self.bridges_compiled += other.bridges_compiled;
        self.loops_retired += other.loops_retired;
        self.bridges_retired += other.bridges_retired;
    }
}

impl fmt::Display for PortalStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== JIT Portal Summary ===")?;
        writeln!(f, "Loops: {} compiled, {} retired", self.loops_compiled, self.loops_retired)?;
        writeln!(f, "Bridges: {} compiled, {} retired", self.bridges_compiled, self.bridges_retired)?;
        write!(f, "Aborts: {}", self.total_aborts())?;
        if !self.aborts.is_empty() {
            let by_reason: Vec<String> = self
                .aborts
                .iter()
                .map(|(reason, count)| format!("{}={}", reason, count))
                .collect();
            write!(f, " ({})", by_reason.join(", "))?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_counts() {
        let mut stats = PortalStats::default();
        stats.record_abort(AbortReason::ForcedQuasiImmutable);
        stats.record_abort(AbortReason::ForcedQuasiImmutable);
        stats.record_abort(AbortReason::TooLong);
        assert_eq!(stats.aborts_for(AbortReason::ForcedQuasiImmutable), 2);
        assert_eq!(stats.aborts_for(AbortReason::Escape), 0);
        assert_eq!(stats.total_aborts(), 3);
    }

    #[test]
    fn test_merge() {
        let mut a = PortalStats {
            loops_compiled: 1,
            ..PortalStats::default()
        };
        a.record_abort(AbortReason::Bridge);
        let mut b = PortalStats {
            loops_compiled: 2,
            bridges_retired: 1,
            ..PortalStats::default()
        };
        b.record_abort(AbortReason::Bridge);
        b.record_abort(AbortReason::Custom(7));
        a.merge(&b);
        assert_eq!(a.loops_compiled, 3);
        assert_eq!(a.bridges_retired, 1);
        assert_eq!(a.aborts_for(AbortReason::Bridge), 2);
        assert_eq!(a.aborts_for(AbortReason::Custom(7)), 1);
    }

    #[test]
    fn test_summary_format() {
        let mut stats = PortalStats {
            loops_compiled: 2,
            bridges_compiled: 1,
            ..PortalStats::default()
        };
        stats.record_abort(AbortReason::TooLong);
        let text = stats.to_string();
        assert!(text.contains("JIT Portal Summary"));
        assert!(text.contains("Loops: 2 compiled, 0 retired"));
        assert!(text.contains("Aborts: 1 (too_long=1)"));
    }
}
