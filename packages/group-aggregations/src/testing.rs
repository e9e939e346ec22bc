//! Testing utilities.
//!
//! [`Harness`] wires an in-memory store, an in-memory queue, an aggregator
//! and a worker together and plays the dispatcher's part: admin edits go
//! straight to the store and enqueue the jobs their triggers map to.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::aggregator::Aggregator;
use crate::config::{AggregationConfig, JobWorkerConfig};
use crate::error::Result;
use crate::jobs::{DrainReport, JobWorker, MemoryJobQueue};
use crate::stores::MemoryStore;
use crate::traits::scheduler::Scheduler;
use crate::traits::store::GroupDirectory;
use crate::triggers;
use crate::types::{AggregationJob, AggregationSettings, Group, GroupId, JobOutcome, User, UserId};

/// In-memory aggregation stack for tests.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub aggregator: Arc<Aggregator<MemoryStore, MemoryJobQueue>>,
    pub worker: JobWorker<MemoryStore, MemoryJobQueue>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AggregationConfig::enabled())
    }

    pub fn with_config(config: AggregationConfig) -> Self {
        Self::with_configs(config, JobWorkerConfig::builder().worker_id("harness").build())
    }

    pub fn with_configs(config: AggregationConfig, worker_config: JobWorkerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let aggregator = Arc::new(Aggregator::new(store.clone(), queue.clone(), config));
        let worker = JobWorker::with_config(aggregator.clone(), queue.clone(), worker_config);
        Self {
            store,
            queue,
            aggregator,
            worker,
        }
    }

    /// Create a plain group. Nothing is enqueued.
    pub async fn group(&self, name: &str) -> GroupId {
        self.store.insert_group(Group::new(name)).await
    }

    pub async fn user(&self, email: &str) -> UserId {
        self.store.insert_user(User::new(email)).await
    }

    /// Save settings for `group_id` and enqueue its full reconcile.
    pub async fn configure(&self, group_id: GroupId, settings: AggregationSettings) -> Result<()> {
        self.save(group_id, Some(settings)).await
    }

    /// Save (or clear) settings and enqueue the group-saved trigger.
    pub async fn save(
        &self,
        group_id: GroupId,
        settings: Option<AggregationSettings>,
    ) -> Result<()> {
        self.store.save_settings(group_id, settings).await?;
        if let Some(group) = self.store.find_group(group_id).await? {
            self.queue.enqueue(triggers::on_group_saved(&group)).await?;
        }
        Ok(())
    }

    /// Admin adds `user_id` to `group_id`; enqueues the trigger if the
    /// group participates in aggregation.
    pub async fn add_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        if self.store.admin_add_member(group_id, user_id).await {
            let graph = self.store.aggregation_graph().await?;
            if let Some(job) = triggers::on_user_added(&graph, group_id, user_id) {
                self.queue.enqueue(job).await?;
            }
        }
        Ok(())
    }

    /// Admin removes `user_id` from `group_id`; enqueues the trigger if the
    /// group participates in aggregation.
    pub async fn remove_member(&self, group_id: GroupId, user_id: UserId) -> Result<()> {
        if self.store.admin_remove_member(group_id, user_id).await {
            let graph = self.store.aggregation_graph().await?;
            if let Some(job) = triggers::on_user_removed(&graph, group_id, user_id) {
                self.queue.enqueue(job).await?;
            }
        }
        Ok(())
    }

    /// Run one job directly, bypassing the queue. Follow-ups are queued.
    pub async fn run(&self, job: AggregationJob) -> JobOutcome {
        self.aggregator.handle(&job).await
    }

    /// Run every pending job, including cascaded follow-ups.
    pub async fn drain(&self) -> Result<DrainReport> {
        self.worker.run_until_idle().await
    }

    pub async fn members(&self, group_id: GroupId) -> BTreeSet<UserId> {
        self.store.members_of(group_id).await
    }
}
