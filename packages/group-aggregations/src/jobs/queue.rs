//! In-process job queue.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AggregationError, Result};
use crate::traits::scheduler::{JobSource, Scheduler};
use crate::types::AggregationJob;

/// Result of pushing a job, handling coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Job was queued
    Created,
    /// An identical job is already pending; nothing was queued
    Duplicate,
}

impl EnqueueResult {
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created)
    }
}

/// Counters for a queue's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: usize,
    pub coalesced: usize,
    pub claimed: usize,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<AggregationJob>,
    keys: HashSet<String>,
    stats: QueueStats,
    closed: bool,
}

/// FIFO queue of aggregation jobs.
///
/// A job identical to one still pending is dropped, so a burst of triggers
/// for the same group runs once. Once claimed, a job no longer blocks an
/// identical one from being queued.
#[derive(Default)]
pub struct MemoryJobQueue {
    state: Mutex<QueueState>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, job: AggregationJob) -> Result<EnqueueResult> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(AggregationError::Scheduling("job queue is closed".into()));
        }
        if !state.keys.insert(job.dedupe_key()) {
            state.stats.coalesced += 1;
            debug!(group_id = %job.group_id, action = %job.action, "coalesced pending job");
            return Ok(EnqueueResult::Duplicate);
        }
        state.pending.push_back(job);
        state.stats.enqueued += 1;
        Ok(EnqueueResult::Created)
    }

    pub async fn pop(&self) -> Option<AggregationJob> {
        let mut state = self.state.lock().await;
        let job = state.pending.pop_front()?;
        state.keys.remove(&job.dedupe_key());
        state.stats.claimed += 1;
        Some(job)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }

    /// Snapshot of pending jobs, in claim order.
    pub async fn pending(&self) -> Vec<AggregationJob> {
        self.state.lock().await.pending.iter().copied().collect()
    }

    pub async fn stats(&self) -> QueueStats {
        self.state.lock().await.stats
    }

    /// Reject every further enqueue. Pending jobs stay claimable.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    pub async fn reopen(&self) {
        self.state.lock().await.closed = false;
    }

    /// Drop every pending job.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.pending.clear();
        state.keys.clear();
    }
}

#[async_trait]
impl Scheduler for MemoryJobQueue {
    async fn enqueue(&self, job: AggregationJob) -> Result<()> {
        self.push(job).await.map(|_| ())
    }
}

#[async_trait]
impl JobSource for MemoryJobQueue {
    async fn claim(&self) -> Result<Option<AggregationJob>> {
        Ok(self.pop().await)
    }

    async fn is_idle(&self) -> Result<bool> {
        Ok(self.is_empty().await)
    }
}
