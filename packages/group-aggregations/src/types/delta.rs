//! Membership deltas and reconciliation reports.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::group::{GroupId, UserId};
use super::job::AggregationJob;

/// Additions and removals for exactly one group.
///
/// The only two write kinds. A delta is applied atomically by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipDelta {
    pub group_id: GroupId,
    pub additions: BTreeSet<UserId>,
    pub removals: BTreeSet<UserId>,
}

impl MembershipDelta {
    pub fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            additions: BTreeSet::new(),
            removals: BTreeSet::new(),
        }
    }

    /// Delta that moves `current` to `desired`.
    pub fn between(
        group_id: GroupId,
        current: &BTreeSet<UserId>,
        desired: &BTreeSet<UserId>,
    ) -> Self {
        Self {
            group_id,
            additions: desired.difference(current).copied().collect(),
            removals: current.difference(desired).copied().collect(),
        }
    }

    pub fn add(mut self, user_id: UserId) -> Self {
        self.removals.remove(&user_id);
        self.additions.insert(user_id);
        self
    }

    pub fn remove(mut self, user_id: UserId) -> Self {
        self.additions.remove(&user_id);
        self.removals.insert(user_id);
        self
    }

    /// Fold `other` into this delta. Removals win over additions.
    pub fn merge(mut self, other: MembershipDelta) -> Self {
        debug_assert_eq!(self.group_id, other.group_id);
        self.additions.extend(other.additions);
        self.removals.extend(other.removals);
        self.additions.retain(|user| !self.removals.contains(user));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Number of membership edges this delta writes.
    pub fn writes(&self) -> usize {
        self.additions.len() + self.removals.len()
    }
}

/// A group whose writes were aborted during a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupFailure {
    pub group_id: GroupId,
    pub error: String,
}

/// What one reconciliation invocation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Applied, non-empty deltas.
    pub deltas: Vec<MembershipDelta>,
    /// Follow-up jobs handed to the scheduler.
    pub scheduled: Vec<AggregationJob>,
    /// Follow-up jobs the scheduler refused.
    #[serde(default)]
    pub unscheduled: Vec<AggregationJob>,
    /// Groups whose writes were rolled back.
    pub failures: Vec<GroupFailure>,
}

impl ReconcileReport {
    pub fn additions(&self) -> usize {
        self.deltas.iter().map(|d| d.additions.len()).sum()
    }

    pub fn removals(&self) -> usize {
        self.deltas.iter().map(|d| d.removals.len()).sum()
    }

    pub fn writes(&self) -> usize {
        self.deltas.iter().map(MembershipDelta::writes).sum()
    }

    /// Delta applied to `group_id`, if any.
    pub fn delta_for(&self, group_id: GroupId) -> Option<&MembershipDelta> {
        self.deltas.iter().find(|d| d.group_id == group_id)
    }

    pub(crate) fn record_scheduled(&mut self, job: AggregationJob) -> bool {
        if self.scheduled.contains(&job) {
            return false;
        }
        self.scheduled.push(job);
        true
    }
}

/// Result of handling one job. Never an error: failures are reported here
/// and logged, so nothing propagates back into the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Global switch is off.
    Disabled,
    /// Configuration problem (missing group, bad settings).
    Skipped { reason: String },
    Completed(ReconcileReport),
    /// The triggering group's transaction was aborted, or follow-up jobs
    /// could not be scheduled. Safe to redeliver.
    Failed { error: String },
}

impl JobOutcome {
    pub fn report(&self) -> Option<&ReconcileReport> {
        match self {
            JobOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }

    pub fn writes(&self) -> usize {
        self.report().map(ReconcileReport::writes).unwrap_or(0)
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }
}
