//! In-memory membership store for testing and development.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::error::{AggregationError, Result};
use crate::graph::GroupGraph;
use crate::traits::store::{
    GroupDirectory, GroupLock, LockGuard, MembershipReader, MembershipWriter,
};
use crate::types::{AggregationSettings, Group, GroupId, MembershipDelta, User, UserId};

/// In-memory groups, users and membership edges.
///
/// Keeps the aggregation graph cached and rebuilds it whenever settings
/// change. Every applied delta holds the membership lock for its whole
/// duration, which is what makes it atomic. Group locks are one mutex per
/// group, created on first use.
#[derive(Default)]
pub struct MemoryStore {
    groups: RwLock<HashMap<GroupId, Group>>,
    users: RwLock<HashMap<UserId, User>>,
    memberships: RwLock<HashMap<GroupId, BTreeSet<UserId>>>,
    group_locks: RwLock<HashMap<GroupId, Arc<Mutex<()>>>>,
    graph: RwLock<Arc<GroupGraph>>,
    failing_groups: RwLock<HashSet<GroupId>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user record.
    pub async fn insert_user(&self, user: User) -> UserId {
        let id = user.id;
        self.users.write().await.insert(id, user);
        id
    }

    /// Delete a user record and every membership edge it has.
    pub async fn delete_user(&self, user_id: UserId) {
        self.users.write().await.remove(&user_id);
        for members in self.memberships.write().await.values_mut() {
            members.remove(&user_id);
        }
    }

    /// Insert a group as-is (fixtures). Use [`Self::save_settings`] for
    /// validated configuration changes.
    pub async fn insert_group(&self, group: Group) -> GroupId {
        let id = group.id;
        self.groups.write().await.insert(id, group);
        self.rebuild_graph().await;
        id
    }

    /// Replace a group's aggregation settings after validating them
    /// against the whole graph.
    pub async fn save_settings(
        &self,
        group_id: GroupId,
        settings: Option<AggregationSettings>,
    ) -> Result<()> {
        {
            let mut groups = self.groups.write().await;
            let group = groups
                .get_mut(&group_id)
                .ok_or(AggregationError::GroupNotFound(group_id))?;
            self.graph
                .read()
                .await
                .validate_update(group_id, settings.as_ref())?;
            group.aggregation = settings;
        }
        self.rebuild_graph().await;
        Ok(())
    }

    /// Add an edge directly, bypassing write accounting (admin action).
    pub async fn admin_add_member(&self, group_id: GroupId, user_id: UserId) -> bool {
        self.memberships
            .write()
            .await
            .entry(group_id)
            .or_default()
            .insert(user_id)
    }

    /// Remove an edge directly, bypassing write accounting (admin action).
    pub async fn admin_remove_member(&self, group_id: GroupId, user_id: UserId) -> bool {
        self.memberships
            .write()
            .await
            .get_mut(&group_id)
            .is_some_and(|members| members.remove(&user_id))
    }

    /// Make every delta for `group_id` fail until cleared.
    pub async fn fail_writes_for(&self, group_id: GroupId) {
        self.failing_groups.write().await.insert(group_id);
    }

    pub async fn clear_failures(&self) {
        self.failing_groups.write().await.clear();
    }

    /// Membership edges written through [`MembershipWriter`].
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn members_of(&self, group_id: GroupId) -> BTreeSet<UserId> {
        self.memberships
            .read()
            .await
            .get(&group_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn rebuild_graph(&self) {
        let groups = self.groups.read().await;
        let graph = GroupGraph::from_groups(groups.values());
        *self.graph.write().await = Arc::new(graph);
    }
}

#[async_trait]
impl GroupDirectory for MemoryStore {
    async fn find_group(&self, id: GroupId) -> Result<Option<Group>> {
        Ok(self.groups.read().await.get(&id).cloned())
    }

    async fn aggregation_graph(&self) -> Result<Arc<GroupGraph>> {
        Ok(self.graph.read().await.clone())
    }
}

#[async_trait]
impl MembershipReader for MemoryStore {
    async fn group_members(&self, group_id: GroupId) -> Result<BTreeSet<UserId>> {
        Ok(self.members_of(group_id).await)
    }

    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool> {
        Ok(self
            .memberships
            .read()
            .await
            .get(&group_id)
            .is_some_and(|members| members.contains(&user_id)))
    }

    async fn groups_for_user(&self, user_id: UserId) -> Result<BTreeSet<GroupId>> {
        Ok(self
            .memberships
            .read()
            .await
            .iter()
            .filter(|(_, members)| members.contains(&user_id))
            .map(|(group_id, _)| *group_id)
            .collect())
    }

    async fn find_users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let users = self.users.read().await;
        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn all_users(&self) -> Result<Vec<User>> {
        Ok(self.users.read().await.values().cloned().collect())
    }

    async fn all_user_ids(&self) -> Result<BTreeSet<UserId>> {
        Ok(self.users.read().await.keys().copied().collect())
    }
}

#[async_trait]
impl MembershipWriter for MemoryStore {
    async fn apply_delta(&self, delta: &MembershipDelta) -> Result<()> {
        if self.failing_groups.read().await.contains(&delta.group_id) {
            return Err(AggregationError::storage(format!(
                "injected write failure for group {}",
                delta.group_id
            )));
        }

        let mut memberships = self.memberships.write().await;
        let members = memberships.entry(delta.group_id).or_default();
        let mut written = 0;
        for user_id in &delta.removals {
            if members.remove(user_id) {
                written += 1;
            }
        }
        for user_id in &delta.additions {
            if members.insert(*user_id) {
                written += 1;
            }
        }
        self.writes.fetch_add(written, Ordering::SeqCst);

        debug!(group_id = %delta.group_id, written, "applied membership delta");
        Ok(())
    }

    async fn lock_group(&self, group_id: GroupId) -> Result<GroupLock> {
        let mutex = self
            .group_locks
            .write()
            .await
            .entry(group_id)
            .or_default()
            .clone();
        let guard = mutex.lock_owned().await;
        Ok(GroupLock::new(group_id, MemoryGroupGuard(guard)))
    }
}

struct MemoryGroupGuard(OwnedMutexGuard<()>);

#[async_trait]
impl LockGuard for MemoryGroupGuard {
    async fn release(self: Box<Self>) -> Result<()> {
        drop(self.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_settings_rejects_cycles_and_keeps_old_settings() {
        let store = MemoryStore::new();
        let a = store.insert_group(Group::new("a")).await;
        let b = store.insert_group(Group::new("b")).await;

        store
            .save_settings(a, Some(AggregationSettings::new().with_sources([b])))
            .await
            .unwrap();
        let err = store
            .save_settings(b, Some(AggregationSettings::new().with_sources([a])))
            .await
            .unwrap_err();

        assert!(matches!(err, AggregationError::CycleDetected { .. }));
        assert!(store.find_group(b).await.unwrap().unwrap().aggregation.is_none());
        let graph = store.aggregation_graph().await.unwrap();
        assert!(graph.parent_groups(a).is_empty());
    }

    #[tokio::test]
    async fn save_settings_refreshes_graph() {
        let store = MemoryStore::new();
        let child = store.insert_group(Group::new("child")).await;
        let parent = store.insert_group(Group::new("parent")).await;

        store
            .save_settings(parent, Some(AggregationSettings::new().with_sources([child])))
            .await
            .unwrap();

        let graph = store.aggregation_graph().await.unwrap();
        assert_eq!(graph.parent_groups(child), BTreeSet::from([parent]));
    }

    #[tokio::test]
    async fn write_count_ignores_no_op_edges() {
        let store = MemoryStore::new();
        let group = store.insert_group(Group::new("g")).await;
        let user = store.insert_user(User::new("u@example.com")).await;

        store.add_member(group, user).await.unwrap();
        store.add_member(group, user).await.unwrap();
        assert_eq!(store.write_count(), 1);

        store.remove_member(group, user).await.unwrap();
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn injected_failure_leaves_membership_untouched() {
        let store = MemoryStore::new();
        let group = store.insert_group(Group::new("g")).await;
        let user = store.insert_user(User::new("u@example.com")).await;
        store.fail_writes_for(group).await;

        assert!(store.add_member(group, user).await.is_err());
        assert!(store.members_of(group).await.is_empty());

        store.clear_failures().await;
        store.add_member(group, user).await.unwrap();
        assert_eq!(store.members_of(group).await, BTreeSet::from([user]));
    }

    #[tokio::test]
    async fn group_lock_blocks_only_the_same_group() {
        let store = Arc::new(MemoryStore::new());
        let a = store.insert_group(Group::new("a")).await;
        let b = store.insert_group(Group::new("b")).await;

        let held = store.lock_group(a).await.unwrap();
        store.lock_group(b).await.unwrap().release().await.unwrap();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.lock_group(a).await.unwrap().group_id() })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        held.release().await.unwrap();
        assert_eq!(waiter.await.unwrap(), a);
    }

    #[tokio::test]
    async fn deleting_a_user_drops_their_memberships() {
        let store = MemoryStore::new();
        let group = store.insert_group(Group::new("g")).await;
        let user = store.insert_user(User::new("u@example.com")).await;
        store.admin_add_member(group, user).await;

        store.delete_user(user).await;

        assert!(store.members_of(group).await.is_empty());
        assert!(store.groups_for_user(user).await.unwrap().is_empty());
    }
}
