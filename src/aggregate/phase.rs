//! Per-call aggregation state machine
//!
//! ```text
//! Planning -> ExecutingCritical -+-> CriticalFailed -> Failed
//!                                +-> ExecutingOptional -> Merging -> Reporting -+-> Done
//!                                                                               +-> Failed
//! ```
//!
//! `Reporting -> Failed` covers strict-mode incompleteness.

use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationPhase {
    Planning,
    ExecutingCritical,
    CriticalFailed,
    ExecutingOptional,
    Merging,
    Reporting,
    Done,
    Failed,
}

impl AggregationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: AggregationPhase) -> bool {
        use AggregationPhase::*;
        matches!(
            (self, next),
            (Planning, ExecutingCritical)
                | (Planning, Failed)
                | (ExecutingCritical, CriticalFailed)
                | (ExecutingCritical, ExecutingOptional)
                | (CriticalFailed, Failed)
                | (ExecutingOptional, Merging)
                | (Merging, Reporting)
                | (Reporting, Done)
                | (Reporting, Failed)
        )
    }
}

impl fmt::Display for AggregationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Planning => "planning",
            Self::ExecutingCritical => "executing_critical",
            Self::CriticalFailed => "critical_failed",
            Self::ExecutingOptional => "executing_optional",
            Self::Merging => "merging",
            Self::Reporting => "reporting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tracks one call's phase. Illegal transitions are logged and ignored.
#[derive(Debug)]
pub struct PhaseTracker {
    call_id: String,
    phase: AggregationPhase,
    history: Vec<AggregationPhase>,
}

impl PhaseTracker {
    pub fn new(call_id: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            phase: AggregationPhase::Planning,
            history: vec![AggregationPhase::Planning],
        }
    }

    pub fn phase(&self) -> AggregationPhase {
        self.phase
    }

    pub fn history(&self) -> &[AggregationPhase] {
        &self.history
    }

    /// Move to `next`; returns false if the transition is not allowed
    pub fn advance(&mut self, next: AggregationPhase) -> bool {
        if !self.phase.can_transition_to(next) {
            debug!(call_id = %self.call_id, from = %self.phase, to = %next, "Ignoring illegal phase transition");
            return false;
        }
        debug!(call_id = %self.call_id, from = %self.phase, to = %next, "Aggregation phase");
        self.phase = next;
        self.history.push(next);
        true
    }

    /// Walk the failure path from any non-terminal phase
    pub fn fail(&mut self) {
        match self.phase {
            AggregationPhase::ExecutingCritical => {
                self.advance(AggregationPhase::CriticalFailed);
                self.advance(AggregationPhase::Failed);
            }
            AggregationPhase::Merging => {
                self.advance(AggregationPhase::Reporting);
                self.advance(AggregationPhase::Failed);
            }
            _ => {
                self.advance(AggregationPhase::Failed);
            }
        }
    }

    /// Walk the success path from the current phase through to `Done`
    pub fn complete(&mut self) {
        use AggregationPhase::*;
        for next in [ExecutingOptional, Merging, Reporting, Done] {
            if self.phase.can_transition_to(next) {
                self.advance(next);
            }
        }
    }
}
