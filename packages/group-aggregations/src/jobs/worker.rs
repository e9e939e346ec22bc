//! Job worker for draining aggregation jobs.
//!
//! The worker claims one job at a time from a [`JobSource`], runs it through
//! [`Aggregator::handle`] and tallies the outcome. Follow-up jobs the
//! aggregator schedules land back on the same queue, so a drain keeps going
//! until every cascade has settled.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::JobWorkerConfig;
use crate::error::Result;
use crate::traits::scheduler::{JobSource, Scheduler};
use crate::traits::store::MembershipStore;
use crate::types::JobOutcome;

/// What one drain did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub disabled: usize,
    /// Membership edges added or removed
    pub writes: usize,
    /// Budget ran out with jobs still pending
    pub exhausted: bool,
}

impl DrainReport {
    fn record(&mut self, outcome: &JobOutcome) {
        self.processed += 1;
        self.writes += outcome.writes();
        match outcome {
            JobOutcome::Disabled => self.disabled += 1,
            JobOutcome::Skipped { .. } => self.skipped += 1,
            JobOutcome::Completed(_) => self.completed += 1,
            JobOutcome::Failed { .. } => self.failed += 1,
        }
    }
}

/// Runs aggregation jobs from a queue.
pub struct JobWorker<S: ?Sized, Q: ?Sized> {
    aggregator: Arc<Aggregator<S, Q>>,
    source: Arc<Q>,
    config: JobWorkerConfig,
}

impl<S, Q> JobWorker<S, Q>
where
    S: MembershipStore + ?Sized,
    Q: Scheduler + JobSource + ?Sized,
{
    pub fn new(aggregator: Arc<Aggregator<S, Q>>, source: Arc<Q>) -> Self {
        Self::with_config(aggregator, source, JobWorkerConfig::default())
    }

    pub fn with_config(
        aggregator: Arc<Aggregator<S, Q>>,
        source: Arc<Q>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            aggregator,
            source,
            config,
        }
    }

    pub fn config(&self) -> &JobWorkerConfig {
        &self.config
    }

    /// Claim and run one job. `None` when the source is empty.
    pub async fn process_next(&self) -> Result<Option<JobOutcome>> {
        let Some(job) = self.source.claim().await? else {
            return Ok(None);
        };
        debug!(
            worker_id = %self.config.worker_id,
            group_id = %job.group_id,
            action = %job.action,
            "claimed aggregation job"
        );
        Ok(Some(self.aggregator.handle(&job).await))
    }

    /// Run jobs until the source is empty or the budget is spent.
    ///
    /// An exhausted budget with work still pending usually means two groups
    /// keep re-triggering each other.
    pub async fn run_until_idle(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        while report.processed < self.config.max_jobs_per_drain {
            match self.process_next().await? {
                Some(outcome) => report.record(&outcome),
                None => break,
            }
        }

        if report.processed >= self.config.max_jobs_per_drain && !self.source.is_idle().await? {
            report.exhausted = true;
            warn!(
                worker_id = %self.config.worker_id,
                budget = self.config.max_jobs_per_drain,
                "job budget exhausted with work pending; check for oscillating groups"
            );
        }

        info!(
            worker_id = %self.config.worker_id,
            processed = report.processed,
            failed = report.failed,
            writes = report.writes,
            "drained aggregation jobs"
        );
        Ok(report)
    }

    /// Poll until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "aggregation worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(error = %e, "failed to claim aggregation job"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(worker_id = %self.config.worker_id, "aggregation worker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::AggregationConfig;
    use crate::jobs::MemoryJobQueue;
    use crate::stores::MemoryStore;
    use crate::types::{AggregationJob, AggregationSettings, Group, GroupId, User};

    fn worker(
        store: Arc<MemoryStore>,
        queue: Arc<MemoryJobQueue>,
        budget: usize,
    ) -> JobWorker<MemoryStore, MemoryJobQueue> {
        let aggregator = Arc::new(Aggregator::new(
            store,
            queue.clone(),
            AggregationConfig::enabled(),
        ));
        let config = JobWorkerConfig::builder()
            .max_jobs_per_drain(budget)
            .poll_interval(Duration::from_millis(10))
            .build();
        JobWorker::with_config(aggregator, queue, config)
    }

    #[tokio::test]
    async fn drains_cascade_to_completion() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let child = store.insert_group(Group::new("child")).await;
        let parent = store
            .insert_group(Group::new("parent").with_settings(AggregationSettings::new().with_sources([child])))
            .await;
        let user = store.insert_user(User::new("a@example.com")).await;
        store.admin_add_member(child, user).await;

        queue.enqueue(AggregationJob::update(child)).await.unwrap();
        let report = worker(store.clone(), queue.clone(), 100)
            .run_until_idle()
            .await
            .unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.completed, 2);
        assert_eq!(report.writes, 1);
        assert!(!report.exhausted);
        assert!(store.members_of(parent).await.contains(&user));
    }

    #[tokio::test]
    async fn reports_exhausted_budget() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        for _ in 0..3 {
            queue.enqueue(AggregationJob::update(GroupId::new())).await.unwrap();
        }

        let report = worker(store, queue.clone(), 2).run_until_idle().await.unwrap();

        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 2);
        assert!(report.exhausted);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let worker = worker(store, queue, 10);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), worker.run(shutdown))
            .await
            .unwrap()
            .unwrap();
    }
}
