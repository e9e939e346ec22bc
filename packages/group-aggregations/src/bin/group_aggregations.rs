//! Operator CLI for group aggregations
//!
//! Reconciles groups against a PostgreSQL database and checks the
//! aggregation graph. Prints JSON on stdout; logs go to stderr.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

use group_aggregations::{
    AggregationConfig, AggregationJob, Aggregator, DrainReport, GroupDirectory, GroupId,
    JobWorker, JobWorkerConfig, MemoryJobQueue, MembershipDelta, PostgresStore,
};

#[derive(Parser)]
#[command(name = "group-aggregations")]
#[command(about = "Reconcile aggregating groups and inspect the aggregation graph")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute one group, or every configured group
    Reconcile {
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        group: Option<Uuid>,
        #[arg(long)]
        all: bool,
        /// Print the deltas without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the graph and print cascade depth per group
    Check,
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize)]
struct PlanResponse {
    dry_run: bool,
    groups: Vec<PlannedGroup>,
}

#[derive(Serialize)]
struct PlannedGroup {
    group_id: GroupId,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<MembershipDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ReconcileResponse {
    dry_run: bool,
    enqueued: usize,
    drain: DrainReport,
}

#[derive(Serialize)]
struct CheckResponse {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    groups: Vec<GroupDepth>,
}

#[derive(Serialize)]
struct GroupDepth {
    group_id: GroupId,
    sources: usize,
    parents: usize,
    cascade_depth: usize,
}

fn output<T: Serialize>(resp: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(resp)?);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,group_aggregations=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reconcile {
            group,
            all,
            dry_run,
        } => cmd_reconcile(group.map(GroupId::from), all, dry_run).await,
        Commands::Check => cmd_check().await,
    }
}

async fn get_store() -> Result<Arc<PostgresStore>> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let store = PostgresStore::new(&database_url)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(store))
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_reconcile(group: Option<GroupId>, all: bool, dry_run: bool) -> Result<()> {
    let store = get_store().await?;
    let queue = Arc::new(MemoryJobQueue::new());
    let config = AggregationConfig::from_env()?;
    if !config.enabled {
        bail!("group aggregations are disabled (GROUP_AGGREGATIONS_ENABLED)");
    }
    let aggregator = Arc::new(Aggregator::new(store.clone(), queue.clone(), config));

    let targets: Vec<GroupId> = match group {
        Some(group_id) => vec![group_id],
        None if all => {
            let graph = store.aggregation_graph().await?;
            graph.configured_groups().collect()
        }
        None => bail!("either --group or --all is required"),
    };

    if dry_run {
        let mut groups = Vec::with_capacity(targets.len());
        for group_id in targets {
            let planned = match aggregator.plan_group(group_id).await {
                Ok(delta) => PlannedGroup {
                    group_id,
                    delta,
                    error: None,
                },
                Err(e) => PlannedGroup {
                    group_id,
                    delta: None,
                    error: Some(e.to_string()),
                },
            };
            groups.push(planned);
        }
        return output(&PlanResponse {
            dry_run: true,
            groups,
        });
    }

    let enqueued = targets.len();
    for group_id in targets {
        queue.push(AggregationJob::update(group_id)).await?;
    }

    let worker = JobWorker::with_config(aggregator, queue, JobWorkerConfig::from_env()?);
    let drain = worker.run_until_idle().await?;

    output(&ReconcileResponse {
        dry_run: false,
        enqueued,
        drain,
    })
}

async fn cmd_check() -> Result<()> {
    let store = get_store().await?;
    let graph = store.aggregation_graph().await?;

    let error = graph.check_acyclic().err().map(|e| e.to_string());
    let groups = if error.is_none() {
        graph
            .configured_groups()
            .map(|group_id| GroupDepth {
                group_id,
                sources: graph.source_groups(group_id).len(),
                parents: graph.parent_groups(group_id).len(),
                cascade_depth: graph.cascade_depth(group_id),
            })
            .collect()
    } else {
        Vec::new()
    };

    output(&CheckResponse {
        valid: error.is_none(),
        error,
        groups,
    })
}
