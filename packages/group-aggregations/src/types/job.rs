//! Aggregation jobs: the unit of work exchanged with the job dispatcher.
//!
//! A job carries a required `group_id`, an optional `user_id` and an
//! `action`. Serialized, it is the trigger payload:
//!
//! ```json
//! { "group_id": "…", "user_id": "…", "action": "add" }
//! ```

use serde::{Deserialize, Serialize};

use super::group::{GroupId, UserId};
use crate::error::Result;

/// Action carried by a job. Absent in a payload means `Update`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    #[default]
    Update,
    Add,
    Remove,
}

impl std::fmt::Display for JobAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobAction::Update => write!(f, "update"),
            JobAction::Add => write!(f, "add"),
            JobAction::Remove => write!(f, "remove"),
        }
    }
}

/// A single user's membership change in a source group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipChange {
    Add,
    Remove,
}

impl From<MembershipChange> for JobAction {
    fn from(change: MembershipChange) -> Self {
        match change {
            MembershipChange::Add => JobAction::Add,
            MembershipChange::Remove => JobAction::Remove,
        }
    }
}

/// Which reconciliation a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// Full recomputation. `user_id` is set when a single user's change
    /// caused it, so excluding groups are re-triggered as well.
    Group { user_id: Option<UserId> },
    /// Incremental recomputation of one user's effect on the parents.
    User {
        user_id: UserId,
        change: MembershipChange,
    },
}

/// Request to reconcile a group (optionally for one user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregationJob {
    pub group_id: GroupId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub action: JobAction,
}

impl AggregationJob {
    /// Job type name used by persistent queues.
    pub const JOB_TYPE: &'static str = "aggregate_group_memberships";

    /// Full reconcile of `group_id`.
    pub fn update(group_id: GroupId) -> Self {
        Self {
            group_id,
            user_id: None,
            action: JobAction::Update,
        }
    }

    /// `user_id` joined `group_id`.
    pub fn user_added(group_id: GroupId, user_id: UserId) -> Self {
        Self::user_changed(group_id, user_id, MembershipChange::Add)
    }

    /// `user_id` left `group_id`.
    pub fn user_removed(group_id: GroupId, user_id: UserId) -> Self {
        Self::user_changed(group_id, user_id, MembershipChange::Remove)
    }

    pub fn user_changed(group_id: GroupId, user_id: UserId, change: MembershipChange) -> Self {
        Self {
            group_id,
            user_id: Some(user_id),
            action: change.into(),
        }
    }

    /// Attach the user whose change caused this job.
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn entry_point(&self) -> EntryPoint {
        match (self.user_id, self.action) {
            (Some(user_id), JobAction::Add) => EntryPoint::User {
                user_id,
                change: MembershipChange::Add,
            },
            (Some(user_id), JobAction::Remove) => EntryPoint::User {
                user_id,
                change: MembershipChange::Remove,
            },
            (user_id, _) => EntryPoint::Group { user_id },
        }
    }

    /// Key under which identical pending jobs are coalesced.
    pub fn dedupe_key(&self) -> String {
        match self.user_id {
            Some(user_id) => format!(
                "{}:{}:{}:{}",
                Self::JOB_TYPE,
                self.group_id,
                user_id,
                self.action
            ),
            None => format!("{}:{}:{}", Self::JOB_TYPE, self.group_id, self.action),
        }
    }

    pub fn to_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(payload.clone())?)
    }
}
