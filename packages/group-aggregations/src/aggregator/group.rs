//! Reconcile-Group: full recomputation of one group's membership.

use std::collections::BTreeSet;

use tracing::{debug, info, instrument};

use super::Aggregator;
use crate::error::Result;
use crate::exclusion;
use crate::resolver::GroupResolver;
use crate::traits::scheduler::Scheduler;
use crate::traits::store::MembershipStore;
use crate::types::{AggregationSettings, GroupId, MembershipDelta, ReconcileReport, UserId};

impl<S, Q> Aggregator<S, Q>
where
    S: MembershipStore + ?Sized,
    Q: Scheduler + ?Sized,
{
    /// Recompute `group_id` from its sources and exclusions, then cascade.
    ///
    /// Excluding groups are always re-triggered, for `user_id` when a single
    /// user's membership change caused this run.
    #[instrument(skip(self))]
    pub async fn reconcile_group(
        &self,
        group_id: GroupId,
        user_id: Option<UserId>,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if !self.config.enabled {
            return Ok(report);
        }

        let group = self.load_group(group_id).await?;
        let graph = self.store.aggregation_graph().await?;
        let resolver = GroupResolver::new(self.store.as_ref(), &graph);

        if let Some(settings) = group.settings() {
            let lock = self.store.lock_group(group.id).await?;
            let delta = self.plan(&resolver, group.id, settings).await?;
            if delta.is_empty() {
                debug!("membership already up to date");
            } else {
                self.store.apply_delta(&delta).await?;
                info!(
                    added = delta.additions.len(),
                    removed = delta.removals.len(),
                    "reconciled aggregating group"
                );
                report.deltas.push(delta);
            }
            lock.release().await?;
        }

        self.propagate_to_parents(&resolver, &group, &mut report)
            .await?;

        // Excluders are notified even when nothing changed here.
        self.notify_excluding_groups(&graph, group.id, user_id, &mut report)
            .await;

        Ok(report)
    }

    /// Delta `reconcile_group` would apply, without applying it.
    ///
    /// `None` for plain groups, whose membership is never recomputed.
    pub async fn plan_group(&self, group_id: GroupId) -> Result<Option<MembershipDelta>> {
        let group = self.load_group(group_id).await?;
        let Some(settings) = group.settings() else {
            return Ok(None);
        };
        let graph = self.store.aggregation_graph().await?;
        let resolver = GroupResolver::new(self.store.as_ref(), &graph);
        self.plan(&resolver, group.id, settings).await.map(Some)
    }

    async fn plan(
        &self,
        resolver: &GroupResolver<'_, S>,
        group_id: GroupId,
        settings: &AggregationSettings,
    ) -> Result<MembershipDelta> {
        let current = self.store.group_members(group_id).await?;

        // Configured but without sources: nothing is computed into it.
        if !settings.is_aggregating() {
            return Ok(MembershipDelta::between(group_id, &current, &BTreeSet::new()));
        }

        if settings.includes_everyone() {
            return self.plan_everyone(group_id, settings, &current).await;
        }

        let candidates = resolver.source_members(settings).await?;
        let users = if settings.excluded_domains.is_empty() {
            Vec::new()
        } else {
            let ids: Vec<UserId> = candidates.iter().copied().collect();
            self.store.find_users(&ids).await?
        };
        let excluded = exclusion::excluded_users(self.store.as_ref(), settings, &users)
            .await?
            .all();

        let desired: BTreeSet<UserId> = candidates.difference(&excluded).copied().collect();
        debug!(
            candidates = candidates.len(),
            excluded = excluded.len(),
            desired = desired.len(),
            current = current.len(),
            "planned group membership"
        );
        Ok(MembershipDelta::between(group_id, &current, &desired))
    }

    /// Everyone path: work on id sets so the full user list is only
    /// materialized when domains have to be matched.
    async fn plan_everyone(
        &self,
        group_id: GroupId,
        settings: &AggregationSettings,
        current: &BTreeSet<UserId>,
    ) -> Result<MembershipDelta> {
        let (all_ids, users) = if settings.excluded_domains.is_empty() {
            (self.store.all_user_ids().await?, Vec::new())
        } else {
            let users = self.store.all_users().await?;
            (users.iter().map(|u| u.id).collect(), users)
        };

        let excluded = exclusion::excluded_users(self.store.as_ref(), settings, &users)
            .await?
            .all();

        let additions = all_ids
            .iter()
            .filter(|id| !excluded.contains(id) && !current.contains(id))
            .copied()
            .collect();
        let removals = current.intersection(&excluded).copied().collect();

        debug!(
            users = all_ids.len(),
            excluded = excluded.len(),
            "planned everyone membership"
        );
        Ok(MembershipDelta {
            group_id,
            additions,
            removals,
        })
    }
}
