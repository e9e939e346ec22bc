//! Scheduling traits for follow-up reconciliation.
//!
//! The engine never recurses into dependent groups. It enqueues a job and
//! returns; whoever owns the queue decides when (and how concurrently) the
//! job runs, and retries it on failure.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::AggregationJob;

/// Fire-and-forget sink for follow-up jobs.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Enqueue a job. Returns once the job is accepted, not once it ran.
    async fn enqueue(&self, job: AggregationJob) -> Result<()>;
}

/// Source of jobs for a worker.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Take the next ready job, if any.
    async fn claim(&self) -> Result<Option<AggregationJob>>;

    /// True when no job is waiting to be claimed.
    async fn is_idle(&self) -> Result<bool>;
}
