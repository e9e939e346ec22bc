//! Mapping from application events to aggregation jobs.
//!
//! The dispatcher calls these when a group is saved or a membership edge is
//! written, and enqueues whatever comes back.

use crate::graph::GroupGraph;
use crate::types::{AggregationJob, Group, GroupId, MembershipChange, UserId};

/// A group's settings (or name) were saved. Always a full reconcile.
pub fn on_group_saved(group: &Group) -> AggregationJob {
    AggregationJob::update(group.id)
}

/// `user_id` joined `group_id`.
pub fn on_user_added(
    graph: &GroupGraph,
    group_id: GroupId,
    user_id: UserId,
) -> Option<AggregationJob> {
    on_membership_change(graph, group_id, user_id, MembershipChange::Add)
}

/// `user_id` left `group_id`.
pub fn on_user_removed(
    graph: &GroupGraph,
    group_id: GroupId,
    user_id: UserId,
) -> Option<AggregationJob> {
    on_membership_change(graph, group_id, user_id, MembershipChange::Remove)
}

fn on_membership_change(
    graph: &GroupGraph,
    group_id: GroupId,
    user_id: UserId,
    change: MembershipChange,
) -> Option<AggregationJob> {
    graph
        .participates(group_id)
        .then(|| AggregationJob::user_changed(group_id, user_id, change))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AggregationSettings, JobAction};

    #[test]
    fn saving_any_group_schedules_full_reconcile() {
        let group = Group::new("plain");
        let job = on_group_saved(&group);
        assert_eq!(job.action, JobAction::Update);
        assert_eq!(job.user_id, None);
    }

    #[test]
    fn membership_changes_in_unrelated_groups_are_ignored() {
        let graph = GroupGraph::new();
        assert!(on_user_added(&graph, GroupId::new(), UserId::new()).is_none());
    }

    #[test]
    fn source_and_excluded_groups_trigger() {
        let source = GroupId::new();
        let excluded = GroupId::new();
        let mut graph = GroupGraph::new();
        graph.insert(
            GroupId::new(),
            Some(
                &AggregationSettings::new()
                    .with_sources([source])
                    .with_excluded_groups([excluded]),
            ),
        );
        let user = UserId::new();

        let added = on_user_added(&graph, source, user).unwrap();
        assert_eq!(added.action, JobAction::Add);
        assert_eq!(added.user_id, Some(user));

        let removed = on_user_removed(&graph, excluded, user).unwrap();
        assert_eq!(removed.action, JobAction::Remove);
    }
}
