//! Membership reconciler.
//!
//! The aggregator turns one [`AggregationJob`] into the minimal set of
//! additions and removals for the affected groups, applies them one group
//! at a time, and schedules follow-up jobs for the groups that depend on
//! what changed.
//!
//! # Entry points
//!
//! ```text
//! handle(job)
//!     │
//!     ├─► Reconcile-Group(group, user?)     full recompute of `group`
//!     │       ├─► apply delta to `group`
//!     │       ├─► schedule Reconcile-Group(parent) for every parent
//!     │       ├─► retroactive sweep of parents that ask for it
//!     │       └─► schedule excluding groups
//!     │
//!     └─► Reconcile-User(group, user, add|remove)
//!             ├─► per parent: add/remove `user` only
//!             ├─► schedule follow-up for parents that changed
//!             └─► schedule excluding groups
//! ```
//!
//! Cascades go through the scheduler, one level per invocation. A chain of
//! N nested aggregating groups converges after N jobs. Each group is
//! planned and written under its store lock. An invocation whose follow-up
//! jobs the scheduler refused ends as failed, so redelivery can schedule
//! them again.

mod cascade;
mod group;
mod user;

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::config::AggregationConfig;
use crate::error::{AggregationError, Result};
use crate::traits::scheduler::Scheduler;
use crate::traits::store::MembershipStore;
use crate::types::{AggregationJob, EntryPoint, Group, GroupId, JobOutcome};

/// The reconciliation engine.
///
/// Pure function of (job, store snapshot, config) apart from the writes it
/// applies and the jobs it schedules. Running the same job twice without an
/// intervening change writes nothing the second time.
pub struct Aggregator<S: ?Sized, Q: ?Sized> {
    store: Arc<S>,
    scheduler: Arc<Q>,
    config: AggregationConfig,
}

impl<S, Q> Aggregator<S, Q>
where
    S: MembershipStore + ?Sized,
    Q: Scheduler + ?Sized,
{
    pub fn new(store: Arc<S>, scheduler: Arc<Q>, config: AggregationConfig) -> Self {
        Self {
            store,
            scheduler,
            config,
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one job. Never fails: errors are logged and reported.
    #[instrument(skip(self), fields(group_id = %job.group_id, action = %job.action))]
    pub async fn handle(&self, job: &AggregationJob) -> JobOutcome {
        if !self.config.enabled {
            debug!("group aggregations disabled, ignoring job");
            return JobOutcome::Disabled;
        }

        let result = match job.entry_point() {
            EntryPoint::Group { user_id } => self.reconcile_group(job.group_id, user_id).await,
            EntryPoint::User { user_id, change } => {
                self.reconcile_user(job.group_id, user_id, change).await
            }
        };

        match result {
            Ok(report) if !report.unscheduled.is_empty() => {
                error!(
                    unscheduled = report.unscheduled.len(),
                    added = report.additions(),
                    removed = report.removals(),
                    "aggregation applied but follow-up jobs were not scheduled"
                );
                JobOutcome::Failed {
                    error: format!(
                        "{} follow-up job(s) could not be scheduled",
                        report.unscheduled.len()
                    ),
                }
            }
            Ok(report) => {
                info!(
                    added = report.additions(),
                    removed = report.removals(),
                    scheduled = report.scheduled.len(),
                    failures = report.failures.len(),
                    "aggregation job completed"
                );
                JobOutcome::Completed(report)
            }
            Err(e) if e.is_configuration() => {
                warn!(error = %e, "skipping aggregation job");
                JobOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                error!(error = %e, "aggregation job failed");
                JobOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn load_group(&self, group_id: GroupId) -> Result<Group> {
        self.store
            .find_group(group_id)
            .await?
            .ok_or(AggregationError::GroupNotFound(group_id))
    }
}
