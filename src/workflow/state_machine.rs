// Job transition table and conflict resolution rules

use std::collections::HashMap;

use crate::domain::JobStatus;

/// Target status -> statuses it may be entered from.
///
/// Built once and handed to the engine; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    allowed: HashMap<JobStatus, Vec<JobStatus>>,
}

impl TransitionTable {
    pub fn new(entries: impl IntoIterator<Item = (JobStatus, Vec<JobStatus>)>) -> Self {
        Self {
            allowed: entries.into_iter().collect(),
        }
    }

    /// Sources for `target`; empty when nothing may enter it
    pub fn allowed_from(&self, target: JobStatus) -> &[JobStatus] {
        self.allowed.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn permits(&self, from: JobStatus, to: JobStatus) -> bool {
        self.allowed_from(to).contains(&from)
    }

    /// Targets reachable from `from`, in status order
    pub fn targets_from(&self, from: JobStatus) -> Vec<JobStatus> {
        JobStatus::ALL
            .iter()
            .copied()
            .filter(|target| self.permits(from, *target))
            .collect()
    }
}

impl Default for TransitionTable {
    fn default() -> Self {
        use JobStatus::*;

        Self::new([
            (Assigned, vec![Draft]),
            (Accepted, vec![Assigned]),
            (PickupConfirmed, vec![Accepted]),
            (DeliverySubmitted, vec![PickupConfirmed]),
            (Releasable, vec![DeliverySubmitted]),
            (Released, vec![Releasable]),
            (
                Disputed,
                vec![Accepted, PickupConfirmed, DeliverySubmitted, Releasable, Released],
            ),
            (
                Cancelled,
                vec![
                    Draft,
                    Assigned,
                    Accepted,
                    PickupConfirmed,
                    DeliverySubmitted,
                    Releasable,
                ],
            ),
        ])
    }
}

/// How to proceed after a compare-and-swap touched no rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Another writer already reached the target
    Already,
    /// Still a valid source; try the write once more
    Retry,
    /// Report an invalid transition against the observed status
    Invalid,
}

pub fn resolve_after_conflict(
    observed: JobStatus,
    target: JobStatus,
    allowed_from: &[JobStatus],
    already_retried: bool,
) -> ConflictResolution {
    if observed == target {
        ConflictResolution::Already
    } else if !already_retried && allowed_from.contains(&observed) {
        ConflictResolution::Retry
    } else {
        ConflictResolution::Invalid
    }
}
