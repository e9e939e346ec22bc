//! Group Membership Aggregation
//!
//! Keeps the membership of aggregating groups in sync with their source
//! groups. An aggregating group's members are the union of its sources'
//! members, minus anyone in an excluded group or with an email at an
//! excluded domain. Aggregating groups can be sources of other aggregating
//! groups; changes cascade upward one level per job.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use group_aggregations::{
//!     AggregationConfig, AggregationJob, Aggregator, JobWorker, MemoryJobQueue, MemoryStore,
//! };
//!
//! let store = Arc::new(MemoryStore::new());
//! let queue = Arc::new(MemoryJobQueue::new());
//! let aggregator = Arc::new(Aggregator::new(store, queue.clone(), AggregationConfig::from_env()?));
//!
//! queue.push(AggregationJob::update(group_id)).await?;
//! JobWorker::new(aggregator, queue).run_until_idle().await?;
//! ```
//!
//! # Modules
//!
//! - [`aggregator`] - Reconcile-Group / Reconcile-User entry points
//! - [`graph`] - Forward and reverse aggregation edges, cycle checks
//! - [`resolver`] - Source and parent resolution against a store
//! - [`exclusion`] - Group and domain exclusion sets
//! - [`traits`] - Store and scheduler seams
//! - [`stores`] - Storage implementations (MemoryStore, PostgresStore)
//! - [`jobs`] - In-process queue and worker
//! - [`triggers`] - Application events to jobs
//! - [`testing`] - In-memory harness

pub mod aggregator;
pub mod config;
pub mod error;
pub mod exclusion;
pub mod graph;
pub mod id;
pub mod jobs;
pub mod resolver;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod triggers;
pub mod types;

// Re-export core types at crate root
pub use aggregator::Aggregator;
pub use config::{AggregationConfig, JobWorkerConfig};
pub use error::{AggregationError, Result};
pub use graph::GroupGraph;
pub use id::Id;
pub use jobs::{DrainReport, EnqueueResult, JobWorker, MemoryJobQueue, QueueStats};
pub use resolver::GroupResolver;
pub use traits::{
    scheduler::{JobSource, Scheduler},
    store::{
        GroupDirectory, GroupLock, LockGuard, MembershipReader, MembershipStore, MembershipWriter,
    },
};
pub use types::{
    AggregationJob, AggregationSettings, EntryPoint, Group, GroupFailure, GroupId, JobAction,
    JobOutcome, MembershipChange, MembershipDelta, ReconcileReport, User, UserId,
    EVERYONE_GROUP_ID,
};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "postgres")]
pub use stores::PostgresStore;
