//! Hooks into the escape pass.
//!
//! The pass reports progress and decisions to an [`EscapeObserver`]
//! supplied by the caller instead of writing to global state. The
//! observer is also the cancellation channel: the completion loop polls
//! [`EscapeObserver::should_abort`] while it runs.

use rustc_hash::FxHashMap;

use crate::ir::node::NodeId;

use super::EscapeError;
use super::points_to::EscapeState;

/// Phases of one escape analysis run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscapePhase {
    /// Connection graph construction.
    Build,
    /// Escape and points-to fixed point.
    Complete,
    /// Scalar-replaceability classification.
    Classify,
    /// Unique-instance retyping and memory rewiring.
    Split,
}

/// Receives events from the escape pass. Every method defaults to a no-op.
pub trait EscapeObserver {
    /// A phase is about to start.
    fn on_phase(&mut self, _phase: EscapePhase) {}

    /// A completion iteration finished having added `new_edges` edges.
    fn on_iteration(&mut self, _iteration: usize, _new_edges: usize) {}

    /// An allocation lost scalar replaceability.
    fn on_not_scalar_replaceable(&mut self, _alloc: NodeId, _reason: &str) {}

    /// The analysis gave up; the graph keeps its original types.
    fn on_bailout(&mut self, _error: &EscapeError) {}

    /// Polled during completion; returning true cancels the run.
    fn should_abort(&mut self) -> bool {
        false
    }
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl EscapeObserver for NoopObserver {}

impl<O: EscapeObserver + ?Sized> EscapeObserver for &mut O {
    fn on_phase(&mut self, phase: EscapePhase) {
        (**self).on_phase(phase)
    }

    fn on_iteration(&mut self, iteration: usize, new_edges: usize) {
        (**self).on_iteration(iteration, new_edges)
    }

    fn on_not_scalar_replaceable(&mut self, alloc: NodeId, reason: &str) {
        (**self).on_not_scalar_replaceable(alloc, reason)
    }

    fn on_bailout(&mut self, error: &EscapeError) {
        (**self).on_bailout(error)
    }

    fn should_abort(&mut self) -> bool {
        (**self).should_abort()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters collected over one or more runs.
#[derive(Debug, Clone, Default)]
pub struct EscapeStats {
    /// Runs started.
    pub runs: usize,
    /// Completion iterations across all runs.
    pub iterations: usize,
    /// Edges added by completion iterations.
    pub edges_added: usize,
    /// Allocations seen by successful runs.
    pub allocations: usize,
    /// Allocations proven not to escape.
    pub non_escaping: usize,
    /// Allocations left scalar replaceable.
    pub scalar_replaceable: usize,
    /// Runs that bailed out.
    pub bailouts: usize,
    /// Scalar-replaceability rejections by reason.
    pub rejections: FxHashMap<String, usize>,
}

impl EscapeStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the allocation outcome of a finished run into the counters.
    pub fn record_summary(&mut self, summary: &super::EscapeSummary) {
        for info in summary.allocations() {
            self.allocations += 1;
            if info.escape_state == EscapeState::NoEscape {
                self.non_escaping += 1;
            }
            if info.scalar_replaceable {
                self.scalar_replaceable += 1;
            }
        }
    }

    /// Rejections recorded for `reason`.
    pub fn rejections_for(&self, reason: &str) -> usize {
        self.rejections.get(reason).copied().unwrap_or(0)
    }
}

impl EscapeObserver for EscapeStats {
    fn on_phase(&mut self, phase: EscapePhase) {
        if phase == EscapePhase::Build {
            self.runs += 1;
        }
    }

    fn on_iteration(&mut self, _iteration: usize, new_edges: usize) {
        self.iterations += 1;
        self.edges_added += new_edges;
    }

    fn on_not_scalar_replaceable(&mut self, _alloc: NodeId, reason: &str) {
        *self.rejections.entry(reason.to_string()).or_insert(0) += 1;
    }

    fn on_bailout(&mut self, _error: &EscapeError) {
        self.bailouts += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_count_events() {
        let mut stats = EscapeStats::new();
        stats.on_phase(EscapePhase::Build);
        stats.on_phase(EscapePhase::Complete);
        stats.on_iteration(1, 5);
        stats.on_iteration(2, 0);
        stats.on_not_scalar_replaceable(NodeId::new(4), "stored at unknown offset");
        stats.on_not_scalar_replaceable(NodeId::new(5), "stored at unknown offset");
        stats.on_bailout(&EscapeError::Cancelled);

        assert_eq!(stats.runs, 1);
        assert_eq!(stats.iterations, 2);
        assert_eq!(stats.edges_added, 5);
        assert_eq!(stats.bailouts, 1);
        assert_eq!(stats.rejections_for("stored at unknown offset"), 2);
        assert_eq!(stats.rejections_for("other"), 0);
    }

    #[test]
    fn test_observer_through_reference() {
        let mut stats = EscapeStats::new();
        {
            let mut obs: &mut EscapeStats = &mut stats;
            obs.on_iteration(1, 3);
            assert!(!obs.should_abort());
        }
        assert_eq!(stats.edges_added, 3);
        assert!(!NoopObserver.should_abort());
    }
}
