//! Reconcile-User: one user's join or leave, applied to the parents of the
//! source group it happened in.
//!
//! For that one user the outcome matches a full Reconcile-Group of each
//! parent, without recomputing the parents' full member sets.

use tracing::{debug, info, instrument};

use super::Aggregator;
use crate::error::{AggregationError, Result};
use crate::exclusion;
use crate::graph::GroupGraph;
use crate::resolver::GroupResolver;
use crate::traits::scheduler::Scheduler;
use crate::traits::store::MembershipStore;
use crate::types::{
    AggregationJob, AggregationSettings, Group, GroupId, MembershipChange, MembershipDelta,
    ReconcileReport, User, UserId,
};

impl<S, Q> Aggregator<S, Q>
where
    S: MembershipStore + ?Sized,
    Q: Scheduler + ?Sized,
{
    /// Apply `user_id`'s `change` in `group_id` to every parent of `group_id`.
    #[instrument(skip(self))]
    pub async fn reconcile_user(
        &self,
        group_id: GroupId,
        user_id: UserId,
        change: MembershipChange,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if !self.config.enabled {
            return Ok(report);
        }

        let group = self.load_group(group_id).await?;
        let user = self.store.find_user(user_id).await?;
        if user.is_none() && change == MembershipChange::Add {
            return Err(AggregationError::UserNotFound(user_id));
        }

        let graph = self.store.aggregation_graph().await?;
        let resolver = GroupResolver::new(self.store.as_ref(), &graph);

        for parent in resolver.parent_groups(group.id).await? {
            let Some(settings) = parent.settings() else {
                continue;
            };

            let applied = self
                .apply_user_change(&resolver, &parent, settings, user_id, user.as_ref(), change)
                .await;

            match applied {
                Ok(delta) if delta.is_empty() => {
                    debug!(parent_id = %parent.id, "parent already consistent for user");
                }
                Ok(delta) => {
                    info!(
                        parent_id = %parent.id,
                        added = delta.additions.len(),
                        removed = delta.removals.len(),
                        "applied user change to parent"
                    );
                    self.follow_up(&graph, &delta, user_id, &mut report).await;
                    report.deltas.push(delta);
                }
                Err(e) => self.record_failure(parent.id, e.to_string(), &mut report),
            }
        }

        self.notify_excluding_groups(&graph, group.id, Some(user_id), &mut report)
            .await;

        Ok(report)
    }

    async fn apply_user_change(
        &self,
        resolver: &GroupResolver<'_, S>,
        parent: &Group,
        settings: &AggregationSettings,
        user_id: UserId,
        user: Option<&User>,
        change: MembershipChange,
    ) -> Result<MembershipDelta> {
        let lock = self.store.lock_group(parent.id).await?;
        let mut delta = self
            .plan_user(resolver, parent, settings, user_id, user, change)
            .await?;
        if settings.retroactive_exclusion {
            delta = delta.merge(self.retroactive_sweep(parent.id, settings).await?);
        }
        if !delta.is_empty() {
            self.store.apply_delta(&delta).await?;
        }
        lock.release().await?;
        Ok(delta)
    }

    async fn plan_user(
        &self,
        resolver: &GroupResolver<'_, S>,
        parent: &Group,
        settings: &AggregationSettings,
        user_id: UserId,
        user: Option<&User>,
        change: MembershipChange,
    ) -> Result<MembershipDelta> {
        let delta = MembershipDelta::new(parent.id);
        let is_member = self.store.is_member(parent.id, user_id).await?;

        // A deleted user is neither sourced nor worth an exclusion check.
        let Some(user) = user else {
            return Ok(if is_member { delta.remove(user_id) } else { delta });
        };

        let still_sourced = resolver.is_sourced(settings, user_id).await?;
        let excluded = exclusion::excluded_users(
            self.store.as_ref(),
            settings,
            std::slice::from_ref(user),
        )
        .await?
        .contains(&user_id);

        debug!(
            parent_id = %parent.id,
            still_sourced,
            excluded,
            is_member,
            "planned user change"
        );

        Ok(match change {
            MembershipChange::Add if still_sourced && !excluded && !is_member => {
                delta.add(user_id)
            }
            MembershipChange::Remove if (excluded || !still_sourced) && is_member => {
                delta.remove(user_id)
            }
            _ => delta,
        })
    }

    /// Tell whatever depends on a changed parent. A change limited to the
    /// triggering user cascades incrementally; a sweep that touched other
    /// members cascades as a full reconcile.
    async fn follow_up(
        &self,
        graph: &GroupGraph,
        delta: &MembershipDelta,
        user_id: UserId,
        report: &mut ReconcileReport,
    ) {
        let parent_id = delta.group_id;
        if !graph.has_parents(parent_id) && graph.excluding_groups(parent_id).is_empty() {
            return;
        }

        let only_user = delta.additions.iter().chain(&delta.removals).all(|u| *u == user_id);
        let job = if only_user && delta.additions.contains(&user_id) {
            AggregationJob::user_added(parent_id, user_id)
        } else if only_user {
            AggregationJob::user_removed(parent_id, user_id)
        } else {
            AggregationJob::update(parent_id)
        };
        self.schedule(job, report).await;
    }
}
