//! Task status state machine.
//!
//! Every transition is monotonic except the single `Modal -> NotStart`
//! reopen, which the [`Task`](crate::task::Task) tracks itself (the pure
//! state machine permits the edge; the entity enforces the once-only rule).
//! Terminal statuses have no outgoing edges.

use crate::task::TaskStatus;

/// Returns the set of statuses reachable from `from`.
pub fn valid_transitions(from: TaskStatus) -> &'static [TaskStatus] {
    use TaskStatus::*;
    match from {
        NotStart => &[Modal, Submitted, Failure, Cancel],
        Modal => &[NotStart, Submitted, Failure, Cancel],
        Submitted => &[InProgress, Failure, Cancel],
        InProgress => &[Success, Failure, Cancel],
        Success | Failure | Cancel => &[],
    }
}

/// Check whether a transition from `from` to `to` is valid.
pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    valid_transitions(from).contains(&to)
}

/// Validate a transition, returning a descriptive message for invalid ones.
pub fn validate_transition(from: TaskStatus, to: TaskStatus) -> Result<(), String> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(format!("Invalid status transition: {from:?} -> {to:?}"))
    }
}
