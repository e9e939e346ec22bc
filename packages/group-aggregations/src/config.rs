//! Runtime configuration for the aggregation engine and its worker.

use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::{AggregationError, Result};

/// Global switch for the engine.
///
/// Passed into the aggregator explicitly. When `enabled` is false every
/// entry point is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub enabled: bool,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AggregationConfig {
    pub fn enabled() -> Self {
        Self { enabled: true }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    /// Load from `GROUP_AGGREGATIONS_ENABLED` (default: enabled).
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let enabled = match env::var("GROUP_AGGREGATIONS_ENABLED") {
            Ok(raw) => parse_flag("GROUP_AGGREGATIONS_ENABLED", &raw)?,
            Err(_) => true,
        };
        Ok(Self { enabled })
    }
}

/// Configuration for the in-process job worker.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobWorkerConfig {
    /// Worker ID for this instance
    #[builder(default = format!("aggregation-worker-{}", Uuid::new_v4()))]
    pub worker_id: String,
    /// Jobs processed by one drain before it gives up
    #[builder(default = 10_000)]
    pub max_jobs_per_drain: usize,
    /// How long to wait when no jobs are available
    #[builder(default = Duration::from_millis(500))]
    pub poll_interval: Duration,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl JobWorkerConfig {
    /// Load from `GROUP_AGGREGATIONS_MAX_JOBS` and `GROUP_AGGREGATIONS_POLL_MS`.
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();
        let mut config = Self::default();

        if let Ok(raw) = env::var("GROUP_AGGREGATIONS_MAX_JOBS") {
            config.max_jobs_per_drain = raw.trim().parse().map_err(|_| {
                AggregationError::Config(format!(
                    "GROUP_AGGREGATIONS_MAX_JOBS must be a positive number, got {:?}",
                    raw
                ))
            })?;
        }
        if let Ok(raw) = env::var("GROUP_AGGREGATIONS_POLL_MS") {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                AggregationError::Config(format!(
                    "GROUP_AGGREGATIONS_POLL_MS must be a number of milliseconds, got {:?}",
                    raw
                ))
            })?;
            config.poll_interval = Duration::from_millis(millis);
        }
        Ok(config)
    }
}

pub(crate) fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "off" => Ok(false),
        other => Err(AggregationError::Config(format!(
            "{} must be a boolean, got {:?}",
            name, other
        ))),
    }
}
