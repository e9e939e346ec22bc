//! Group graph resolver: read-side queries over configuration.
//!
//! Resolves the ids in a group's settings (and the graph's reverse edges)
//! to group records and member sets. No mutation. Store errors propagate.

use std::collections::BTreeSet;

use tracing::warn;

use crate::error::Result;
use crate::exclusion;
use crate::graph::GroupGraph;
use crate::traits::store::MembershipStore;
use crate::types::{AggregationSettings, Group, GroupId, UserId, EVERYONE_GROUP_ID};

pub struct GroupResolver<'a, S: ?Sized> {
    store: &'a S,
    graph: &'a GroupGraph,
}

impl<'a, S: MembershipStore + ?Sized> GroupResolver<'a, S> {
    pub fn new(store: &'a S, graph: &'a GroupGraph) -> Self {
        Self { store, graph }
    }

    pub fn graph(&self) -> &GroupGraph {
        self.graph
    }

    /// Source group records. The everyone sentinel has no record and is
    /// left out; ids without a record are logged and skipped.
    pub async fn source_groups(&self, settings: &AggregationSettings) -> Result<Vec<Group>> {
        let ids: Vec<GroupId> = settings
            .source_groups
            .iter()
            .copied()
            .filter(|id| *id != EVERYONE_GROUP_ID)
            .collect();
        self.resolve(&ids, "source").await
    }

    /// Aggregating groups that list `group_id` as a source.
    pub async fn parent_groups(&self, group_id: GroupId) -> Result<Vec<Group>> {
        let ids: Vec<GroupId> = self.graph.parent_groups(group_id).into_iter().collect();
        self.resolve(&ids, "parent").await
    }

    /// Members of every excluded group, unioned.
    pub async fn excluded_group_users(
        &self,
        settings: &AggregationSettings,
    ) -> Result<BTreeSet<UserId>> {
        exclusion::excluded_group_users(self.store, settings).await
    }

    /// Union of the members of every source group (everyone excluded).
    pub async fn source_members(&self, settings: &AggregationSettings) -> Result<BTreeSet<UserId>> {
        let mut members = BTreeSet::new();
        for source in self.source_groups(settings).await? {
            members.extend(self.store.group_members(source.id).await?);
        }
        Ok(members)
    }

    /// True when `user_id` is a member of at least one source.
    pub async fn is_sourced(&self, settings: &AggregationSettings, user_id: UserId) -> Result<bool> {
        if settings.includes_everyone() {
            return Ok(self.store.find_user(user_id).await?.is_some());
        }
        for source in &settings.source_groups {
            if self.store.is_member(*source, user_id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn resolve(&self, ids: &[GroupId], role: &'static str) -> Result<Vec<Group>> {
        let groups = self.store.find_groups(ids).await?;
        if groups.len() != ids.len() {
            let found: BTreeSet<GroupId> = groups.iter().map(|g| g.id).collect();
            for missing in ids.iter().filter(|id| !found.contains(id)) {
                warn!(group_id = %missing, role, "configured group does not exist, skipping");
            }
        }
        Ok(groups)
    }
}
