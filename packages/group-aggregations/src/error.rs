//! Typed errors for the aggregation engine.
//!
//! Uses `thiserror` for library errors (not `anyhow`). Binaries wrap these
//! with `anyhow::Context`.

use thiserror::Error;

use crate::types::{GroupId, UserId};

/// Errors that can occur while reading configuration or reconciling membership.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// Group referenced by a job or a configuration no longer exists
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    /// User referenced by a job no longer exists
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    /// Delimited id list could not be parsed
    #[error("invalid id list entry {entry:?}: {reason}")]
    InvalidIdList { entry: String, reason: String },

    /// Excluded domain is empty or not a bare domain
    #[error("invalid excluded domain: {0:?}")]
    InvalidDomain(String),

    /// Group lists itself as a source or as an excluded group
    #[error("group {0} cannot reference itself")]
    SelfReference(GroupId),

    /// Settings update would close a dependency cycle
    #[error("aggregation cycle detected: {}", format_path(.path))]
    CycleDetected { path: Vec<GroupId> },

    /// Store read or write failed
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Follow-up job could not be enqueued
    #[error("scheduling error: {0}")]
    Scheduling(String),

    /// Environment configuration could not be loaded
    #[error("config error: {0}")]
    Config(String),

    /// Job payload could not be (de)serialized
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl AggregationError {
    /// Wrap any store-level error.
    pub fn storage(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        AggregationError::Storage(err.into())
    }

    /// Configuration errors skip the group instead of failing it.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AggregationError::GroupNotFound(_)
                | AggregationError::UserNotFound(_)
                | AggregationError::InvalidIdList { .. }
                | AggregationError::InvalidDomain(_)
                | AggregationError::SelfReference(_)
                | AggregationError::CycleDetected { .. }
        )
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for AggregationError {
    fn from(err: sqlx::Error) -> Self {
        AggregationError::Storage(Box::new(err))
    }
}

fn format_path(path: &[GroupId]) -> String {
    path.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Result type alias for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregationError>;
