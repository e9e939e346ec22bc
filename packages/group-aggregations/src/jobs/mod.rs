//! Job infrastructure for running aggregations outside the caller's request.
//!
//! - [`MemoryJobQueue`] - In-process FIFO queue that coalesces pending duplicates
//! - [`JobWorker`] - Drains a job source through the [`crate::Aggregator`]
//!
//! # Architecture
//!
//! ```text
//! trigger (group saved / user added / user removed)
//!     │
//!     └─► Scheduler.enqueue(job)
//!
//! JobWorker
//!     │
//!     ├─► JobSource.claim()
//!     ├─► Aggregator.handle(job)
//!     │       └─► follow-up jobs go back through Scheduler.enqueue
//!     └─► tally outcome
//! ```

mod queue;
mod worker;

pub use queue::{EnqueueResult, MemoryJobQueue, QueueStats};
pub use worker::{DrainReport, JobWorker};
