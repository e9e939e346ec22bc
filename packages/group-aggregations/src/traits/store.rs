//! Membership store traits.
//!
//! The store is split into focused traits:
//! - `GroupDirectory`: group records and the aggregation graph
//! - `MembershipReader`: membership edges and user records
//! - `MembershipWriter`: atomic per-group deltas and per-group locks
//! - `MembershipStore`: composite trait combining all three

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::graph::GroupGraph;
use crate::types::{Group, GroupId, MembershipDelta, User, UserId};

/// Group records and aggregation configuration.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Get a group by id.
    async fn find_group(&self, id: GroupId) -> Result<Option<Group>>;

    /// Get several groups. Missing ids are skipped.
    async fn find_groups(&self, ids: &[GroupId]) -> Result<Vec<Group>> {
        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(group) = self.find_group(*id).await? {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    /// Current aggregation graph.
    ///
    /// Implementations may cache it between settings mutations.
    async fn aggregation_graph(&self) -> Result<Arc<GroupGraph>>;
}

/// Read side of membership.
#[async_trait]
pub trait MembershipReader: Send + Sync {
    /// Members of a group. Unknown groups have no members.
    async fn group_members(&self, group_id: GroupId) -> Result<BTreeSet<UserId>>;

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        Ok(self.group_members(group_id).await?.contains(&user_id))
    }

    /// Groups a user belongs to.
    async fn groups_for_user(&self, user_id: UserId) -> Result<BTreeSet<GroupId>>;

    /// User records for the given ids. Missing ids are skipped.
    async fn find_users(&self, ids: &[UserId]) -> Result<Vec<User>>;

    async fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.find_users(&[id]).await?.into_iter().next())
    }

    /// Every user in the system.
    async fn all_users(&self) -> Result<Vec<User>>;

    /// Every user id in the system.
    async fn all_user_ids(&self) -> Result<BTreeSet<UserId>> {
        Ok(self.all_users().await?.into_iter().map(|u| u.id).collect())
    }
}

/// Store-specific hold behind a [`GroupLock`].
#[async_trait]
pub trait LockGuard: Send {
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Exclusive hold on one group's membership.
///
/// Taken before a group's membership is read for planning and released
/// after the planned delta is applied, so two reconciliations of the same
/// group never interleave read and write. Dropping the lock without
/// [`GroupLock::release`] still releases it, possibly later.
pub struct GroupLock {
    group_id: GroupId,
    guard: Box<dyn LockGuard>,
}

impl GroupLock {
    pub fn new(group_id: GroupId, guard: impl LockGuard + 'static) -> Self {
        Self {
            group_id,
            guard: Box::new(guard),
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub async fn release(self) -> Result<()> {
        self.guard.release().await
    }
}

impl std::fmt::Debug for GroupLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupLock")
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

/// Write side of membership.
#[async_trait]
pub trait MembershipWriter: Send + Sync {
    /// Apply additions and removals to one group atomically.
    ///
    /// Either every edge in the delta is written or none is.
    async fn apply_delta(&self, delta: &MembershipDelta) -> Result<()>;

    /// Wait for exclusive use of `group_id`'s membership.
    ///
    /// Holders of the lock for different groups never block each other.
    /// Callers hold at most one group lock at a time.
    async fn lock_group(&self, group_id: GroupId) -> Result<GroupLock>;

    async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        self.apply_delta(&MembershipDelta::new(group_id).add(user_id))
            .await
    }

    async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        self.apply_delta(&MembershipDelta::new(group_id).remove(user_id))
            .await
    }
}

/// Composite store trait used by the aggregator.
pub trait MembershipStore: GroupDirectory + MembershipReader + MembershipWriter {}

// Blanket implementation: anything implementing all three traits is a MembershipStore
impl<T: GroupDirectory + MembershipReader + MembershipWriter> MembershipStore for T {}
