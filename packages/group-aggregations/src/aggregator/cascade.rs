//! Cascading: scheduling dependents and sweeping retroactive parents.

use std::collections::BTreeSet;

use tracing::{debug, error, info};

use super::Aggregator;
use crate::error::Result;
use crate::exclusion;
use crate::graph::GroupGraph;
use crate::resolver::GroupResolver;
use crate::traits::scheduler::Scheduler;
use crate::traits::store::MembershipStore;
use crate::types::{
    AggregationJob, AggregationSettings, Group, GroupFailure, GroupId, MembershipDelta,
    ReconcileReport, UserId,
};

impl<S, Q> Aggregator<S, Q>
where
    S: MembershipStore + ?Sized,
    Q: Scheduler + ?Sized,
{
    /// Schedule every parent of `group` and sweep the retroactive ones.
    ///
    /// A swept parent's excluders hear about it through the parent's own
    /// scheduled reconcile, which always notifies them.
    pub(super) async fn propagate_to_parents(
        &self,
        resolver: &GroupResolver<'_, S>,
        group: &Group,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let parents = resolver.parent_groups(group.id).await?;

        for parent in &parents {
            self.schedule(AggregationJob::update(parent.id), report)
                .await;

            let Some(settings) = parent.settings() else {
                continue;
            };
            if !settings.retroactive_exclusion {
                continue;
            }

            match self.apply_sweep(parent.id, settings).await {
                Ok(delta) if delta.is_empty() => {}
                Ok(delta) => {
                    info!(
                        parent_id = %parent.id,
                        removed = delta.removals.len(),
                        "retroactively removed excluded members"
                    );
                    report.deltas.push(delta);
                }
                Err(e) => self.record_failure(parent.id, e.to_string(), report),
            }
        }
        Ok(())
    }

    /// Re-trigger every group that excludes `group_id`.
    pub(super) async fn notify_excluding_groups(
        &self,
        graph: &GroupGraph,
        group_id: GroupId,
        user_id: Option<UserId>,
        report: &mut ReconcileReport,
    ) {
        for excluder in graph.excluding_groups(group_id) {
            let job = match user_id {
                Some(user_id) => AggregationJob::update(excluder).with_user(user_id),
                None => AggregationJob::update(excluder),
            };
            self.schedule(job, report).await;
        }
    }

    /// Removals that bring every current member of `parent_id` in line
    /// with its exclusions, however long ago they were added.
    pub(super) async fn retroactive_sweep(
        &self,
        parent_id: GroupId,
        settings: &AggregationSettings,
    ) -> Result<MembershipDelta> {
        let members = self.store.group_members(parent_id).await?;
        if members.is_empty() {
            return Ok(MembershipDelta::new(parent_id));
        }

        let users = if settings.excluded_domains.is_empty() {
            Vec::new()
        } else {
            let ids: Vec<UserId> = members.iter().copied().collect();
            self.store.find_users(&ids).await?
        };
        let excluded = exclusion::excluded_users(self.store.as_ref(), settings, &users)
            .await?
            .all();

        let removals: BTreeSet<UserId> = members.intersection(&excluded).copied().collect();
        Ok(MembershipDelta {
            group_id: parent_id,
            additions: BTreeSet::new(),
            removals,
        })
    }

    async fn apply_sweep(
        &self,
        parent_id: GroupId,
        settings: &AggregationSettings,
    ) -> Result<MembershipDelta> {
        let lock = self.store.lock_group(parent_id).await?;
        let delta = self.retroactive_sweep(parent_id, settings).await?;
        if !delta.is_empty() {
            self.store.apply_delta(&delta).await?;
        }
        lock.release().await?;
        Ok(delta)
    }

    /// Hand a job to the scheduler. A refused job is kept in the report so
    /// the invocation can be failed and redelivered.
    pub(super) async fn schedule(&self, job: AggregationJob, report: &mut ReconcileReport) {
        if !report.record_scheduled(job) {
            return;
        }
        match self.scheduler.enqueue(job).await {
            Ok(()) => debug!(
                target_group = %job.group_id,
                action = %job.action,
                "scheduled follow-up aggregation"
            ),
            Err(e) => {
                error!(
                    target_group = %job.group_id,
                    action = %job.action,
                    error = %e,
                    "failed to schedule follow-up aggregation"
                );
                report.scheduled.retain(|scheduled| *scheduled != job);
                report.unscheduled.push(job);
            }
        }
    }

    pub(super) fn record_failure(
        &self,
        group_id: GroupId,
        error: String,
        report: &mut ReconcileReport,
    ) {
        error!(
            group_id = %group_id,
            error = %error,
            "group reconciliation aborted, its changes rolled back"
        );
        report.failures.push(GroupFailure { group_id, error });
    }
}
