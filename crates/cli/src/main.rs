//! `rusty-automation-tool` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`     — start the API server.
//! - `worker`    — start a queue worker that executes dispatched nodes.
//! - `scheduler` — start the tick loop (cron, delay wakeups, reapers).
//! - `migrate`   — run pending database migrations.
//! - `validate`  — validate a workflow graph JSON file, optionally
//!   cross-checking a live run's event log for drift.

mod config;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use db::DbPool;
use engine::orchestrator;
use nodes::traits::NullSink;
use nodes::{default_registry, NodeRegistry};
use queue::{DispatchQueue, NodeTask, RedisQueue};

const WORKER_VISIBILITY_TIMEOUT: StdDuration = StdDuration::from_secs(300);
const WORKER_IDLE_BACKOFF: StdDuration = StdDuration::from_millis(500);

#[derive(Parser)]
#[command(
    name = "rusty-automation-tool",
    about = "High-performance workflow automation engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    /// Start a background worker that pops dispatched nodes off the queue
    /// and executes them.
    Worker,
    /// Start the scheduler tick loop (cron fires, delay wakeups, webhook
    /// and map timeouts, stale-run reaping).
    Scheduler,
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow graph JSON file.
    Validate {
        /// Path to the workflow graph JSON file.
        path: std::path::PathBuf,
        /// Also reconcile a live run's event log against this graph,
        /// reporting any detected drift.
        #[arg(long)]
        reconcile: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind } => {
            let settings = config::Settings::load().expect("failed to load configuration");
            let bind = bind.unwrap_or(settings.bind_addr.clone());
            info!("Starting API server on {bind}");

            let pool = db::pool::create_pool(&settings.database_url, 10)
                .await
                .expect("failed to connect to database");
            let queue: Arc<dyn DispatchQueue> = Arc::new(
                RedisQueue::connect(&settings.redis_url, "nodes")
                    .await
                    .expect("failed to connect to redis"),
            );

            api::serve(&bind, pool, queue).await.unwrap();
        }
        Command::Worker => {
            let settings = config::Settings::load().expect("failed to load configuration");
            info!("Starting background worker");

            let pool = db::pool::create_pool(&settings.database_url, 10)
                .await
                .expect("failed to connect to database");
            let queue = RedisQueue::connect(&settings.redis_url, "nodes")
                .await
                .expect("failed to connect to redis");

            run_worker(&pool, &queue).await;
        }
        Command::Scheduler => {
            let settings = config::Settings::load().expect("failed to load configuration");
            info!("Starting scheduler tick loop");

            let pool = db::pool::create_pool(&settings.database_url, 5)
                .await
                .expect("failed to connect to database");
            let queue: Arc<dyn DispatchQueue> = Arc::new(
                RedisQueue::connect(&settings.redis_url, "nodes")
                    .await
                    .expect("failed to connect to redis"),
            );
            let tick_config = scheduler::tick::TickConfig {
                max_run_wall_time: chrono::Duration::seconds(settings.max_wall_time_secs),
            };

            let mut interval = tokio::time::interval(StdDuration::from_millis(settings.scheduler_tick_interval_ms));
            loop {
                interval.tick().await;
                if let Err(err) = scheduler::tick::run_tick(&pool, queue.as_ref(), &tick_config).await {
                    warn!(error = %err, "scheduler tick failed");
                }
            }
        }
        Command::Migrate { database_url } => {
            info!("Running migrations against {database_url}");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .expect("failed to connect to database");
            db::pool::run_migrations(&pool)
                .await
                .expect("migration failed");
            info!("Migrations applied successfully");
        }
        Command::Validate { path, reconcile } => {
            let content = std::fs::read_to_string(&path)
                .unwrap_or_else(|e| panic!("cannot read file {}: {e}", path.display()));

            let graph: engine::Graph = serde_json::from_str(&content)
                .unwrap_or_else(|e| panic!("invalid JSON: {e}"));

            match engine::validate_dag(&graph) {
                Ok(order) => println!("Workflow graph is valid. Topological order: {order:?}"),
                Err(e) => {
                    eprintln!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }

            if let Some(run_id) = reconcile {
                let settings = config::Settings::load().expect("failed to load configuration");
                let pool = db::pool::create_pool(&settings.database_url, 2)
                    .await
                    .expect("failed to connect to database");

                match engine::reconcile::reconcile_run(&pool, run_id).await {
                    Ok(report) if report.consistent => {
                        println!("Run {run_id} is consistent with its event log.");
                    }
                    Ok(report) => {
                        eprintln!("Run {run_id} has {} inconsistency(ies):", report.issues.len());
                        for issue in &report.issues {
                            eprintln!("  - {issue}");
                        }
                        std::process::exit(1);
                    }
                    Err(e) => {
                        eprintln!("Reconcile failed: {e}");
                        std::process::exit(1);
                    }
                }
            }
        }
    }
}

/// Pop tasks off the queue forever, dispatching each to its node executor
/// and feeding the result back through the Orchestrator. Runs until the
/// process is killed — there is no graceful-drain path because a popped
/// task's visibility timeout already bounds how long an interrupted
/// delivery stays invisible before another worker reclaims it.
async fn run_worker(pool: &DbPool, queue: &RedisQueue) {
    let registry = default_registry();
    let env: HashMap<String, String> = std::env::vars().collect();
    let sink: Arc<dyn nodes::StreamSink> = Arc::new(NullSink);

    loop {
        match queue.pop(WORKER_VISIBILITY_TIMEOUT).await {
            Ok(Some((handle, task))) => {
                if let Err(err) = process_task(pool, queue, &registry, &env, sink.clone(), &task).await {
                    warn!(run_id = %task.run_id, node_id = %task.node_id, error = %err, "failed to process task");
                }
                if let Err(err) = queue.ack(handle).await {
                    warn!(error = %err, "failed to ack delivery");
                }
            }
            Ok(None) => tokio::time::sleep(WORKER_IDLE_BACKOFF).await,
            Err(err) => {
                warn!(error = %err, "queue pop failed");
                tokio::time::sleep(StdDuration::from_secs(1)).await;
            }
        }
    }
}

async fn process_task(
    pool: &DbPool,
    queue: &RedisQueue,
    registry: &NodeRegistry,
    env: &HashMap<String, String>,
    sink: Arc<dyn nodes::StreamSink>,
    task: &NodeTask,
) -> Result<(), engine::EngineError> {
    let run = db::repository::runs::get_run(pool, task.run_id).await?;
    if run.status != "running" {
        return Ok(()); // run already finished by the time this was delivered
    }

    let graph: engine::Graph = serde_json::from_value(run.snapshot_graph.clone())?;
    let events = db::repository::events::list_for_run(pool, task.run_id).await?;
    let folded = engine::run::FoldedRun::fold(&events);

    orchestrator::mark_started(pool, task.run_id, &task.node_id, task.attempt as i32).await?;

    let execute_task = orchestrator::build_execute_task(
        &run,
        &graph,
        &folded,
        &task.node_id,
        task.attempt,
        task.deadline,
        env,
        sink,
    )?;

    let Some(executor) = registry.get(&task.node_type) else {
        return Err(engine::EngineError::NodeNotFound(format!("no executor registered for node type '{}'", task.node_type)));
    };

    let outcome = executor.execute(&execute_task).await;
    let task_timeout = task.deadline - task.enqueued_at;

    orchestrator::handle_outcome(pool, queue, env, task.run_id, &task.node_id, &task.node_type, task.attempt, task_timeout, outcome).await
}
