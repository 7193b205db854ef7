//! standd - stand orchestration daemon
//!
//! ## Commands
//!
//! - `run`: recover interrupted stands, then dispatch both lanes until Ctrl-C
//! - `stand create|list|show`: request and inspect stands
//! - `notifications list|ack`: read and acknowledge step notifications

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use gitlab_provider::{GitlabClient, GitlabConfig};
use serde::Serialize;
use stand_core::{EngineConfig, Scheduler};
use stand_state::{
    Job, NewStand, Pipeline, Stand, StandStore, Step, StepState, StoreConfig, SurrealStandStore,
};
use tokio::sync::watch;
use tracing::{info, warn, Level};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "standd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision and drive ephemeral stands through GitLab pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON command output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatch loop until interrupted
    Run(RunArgs),

    /// Request and inspect stands
    Stand {
        #[command(subcommand)]
        action: StandAction,
    },

    /// Step notifications awaiting delivery
    Notifications {
        #[command(subcommand)]
        action: NotificationAction,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
struct RunArgs {
    /// Seconds between ticks of the lane executing pending stands
    #[arg(long, env = "STAND_PENDING_PERIOD_SECS", default_value_t = 10)]
    pending_period_secs: u64,

    /// Seconds between ticks of the lane provisioning created stands
    #[arg(long, env = "STAND_CREATED_PERIOD_SECS", default_value_t = 15)]
    created_period_secs: u64,

    /// Stands executed concurrently per pending tick
    #[arg(long, env = "STAND_PENDING_CONCURRENCY", default_value_t = 1)]
    pending_concurrency: usize,

    /// Stands provisioned concurrently per created tick
    #[arg(long, env = "STAND_CREATED_CONCURRENCY", default_value_t = 1)]
    created_concurrency: usize,

    /// Seconds between two status polls of a job
    #[arg(long, env = "STAND_POLL_INTERVAL_SECS", default_value_t = 10)]
    poll_interval_secs: u64,

    /// Allow an in-memory store; all stands are lost on exit
    #[arg(long)]
    ephemeral: bool,
}

impl RunArgs {
    /// Refuse a store that would not survive a restart unless asked for one.
    fn check_store(&self, config: &StoreConfig) -> Result<()> {
        if config.is_ephemeral() && !self.ephemeral {
            bail!(
                "Refusing to run on the in-memory store {}; set SURREALDB_URL or \
                 SURREALDB_ENDPOINT, or pass --ephemeral",
                config.describe()
            );
        }
        Ok(())
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_periods(
                Duration::from_secs(self.pending_period_secs),
                Duration::from_secs(self.created_period_secs),
            )
            .with_concurrency(self.pending_concurrency, self.created_concurrency)
            .with_poll_interval(Duration::from_secs(self.poll_interval_secs))
    }
}

#[derive(Subcommand)]
enum StandAction {
    /// Request a new stand; it is provisioned on the next created tick
    Create {
        /// Stand name, also used as branch and environment name
        #[arg(long)]
        name: String,

        /// Owning user id
        #[arg(long)]
        user: i64,

        /// Product to deploy (repeatable or comma-separated)
        #[arg(long = "product", value_delimiter = ',')]
        products: Vec<String>,

        /// Git ref the stand branch is cut from
        #[arg(long = "ref", default_value = "master")]
        git_ref: String,
    },

    /// List all stands
    List,

    /// Show a stand with its pipelines, steps and jobs
    Show {
        /// Stand name
        name: String,
    },
}

#[derive(Subcommand)]
enum NotificationAction {
    /// List undelivered step notifications
    List,

    /// Mark a notification as delivered
    Ack {
        /// Notification id
        id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env must be loaded before clap reads env fallbacks
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    stand_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::Stand { action } => {
            let store = connect_store(&store_config()?).await?;
            let mut out = std::io::stdout().lock();
            match action {
                StandAction::Create {
                    name,
                    user,
                    products,
                    git_ref,
                } => {
                    let request = NewStand::new(name, user, products, git_ref);
                    cmd_stand_create(store.as_ref(), request, cli.json, &mut out).await
                }
                StandAction::List => cmd_stand_list(store.as_ref(), cli.json, &mut out).await,
                StandAction::Show { name } => {
                    cmd_stand_show(store.as_ref(), &name, cli.json, &mut out).await
                }
            }
        }
        Commands::Notifications { action } => {
            let store = connect_store(&store_config()?).await?;
            let mut out = std::io::stdout().lock();
            match action {
                NotificationAction::List => {
                    cmd_notifications_list(store.as_ref(), cli.json, &mut out).await
                }
                NotificationAction::Ack { id } => {
                    cmd_notifications_ack(store.as_ref(), id, cli.json, &mut out).await
                }
            }
        }
    }
}

fn store_config() -> Result<StoreConfig> {
    let config = StoreConfig::from_env().context("Failed to read store configuration")?;
    if config.is_ephemeral() {
        warn!(backend = %config.describe(), "stand store is in-memory, nothing is kept after exit");
    }
    Ok(config)
}

async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn StandStore>> {
    info!(backend = %config.describe(), "connecting to stand store");
    let store = SurrealStandStore::connect(config)
        .await
        .context("Failed to connect to stand store")?;
    Ok(Arc::new(store))
}

/// Recover, dispatch until Ctrl-C, then drain. A second Ctrl-C abandons
/// in-flight work; those stands are recovered on the next start.
async fn cmd_run(args: &RunArgs) -> Result<()> {
    let store_config = store_config()?;
    args.check_store(&store_config)?;
    let gitlab = GitlabConfig::from_env().context("Failed to read GitLab configuration")?;
    let provider = GitlabClient::new(&gitlab).context("Invalid GitLab configuration")?;
    let engine = args.engine_config();
    engine.validate().context("Invalid engine configuration")?;

    let store = connect_store(&store_config).await?;
    let scheduler = Scheduler::new(store, Arc::new(provider), engine)
        .context("Failed to build scheduler")?;

    let report = scheduler.recover().await.context("Recovery pass failed")?;
    if !report.is_clean() {
        warn!(stands = ?report.failed, "some stands could not be recovered");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();
    runner.await.context("Scheduler task failed")?;

    tokio::select! {
        _ = scheduler.drain() => info!("in-flight work finished"),
        _ = tokio::signal::ctrl_c() => warn!("second interrupt, abandoning in-flight work"),
    }
    info!("standd stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Operator commands
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StepDetail {
    #[serde(flatten)]
    step: Step,
    jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
struct PipelineDetail {
    #[serde(flatten)]
    pipeline: Pipeline,
    steps: Vec<StepDetail>,
}

#[derive(Debug, Serialize)]
struct StandDetail {
    #[serde(flatten)]
    stand: Stand,
    pipelines: Vec<PipelineDetail>,
}

fn write_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn write_stand_line(out: &mut dyn Write, stand: &Stand) -> Result<()> {
    writeln!(
        out,
        "{:<24} {:<8} user={} ref={} products={}",
        stand.name,
        stand.status,
        stand.user_id,
        stand.git_ref,
        stand.products.join(",")
    )?;
    Ok(())
}

async fn cmd_stand_create(
    store: &dyn StandStore,
    request: NewStand,
    json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    if request.name.trim().is_empty() {
        bail!("Stand name must not be empty");
    }
    let stand = store
        .create_stand(request)
        .await
        .context("Failed to create stand")?;
    info!(stand = %stand.name, "stand requested");

    if json {
        return write_json(out, &stand);
    }
    writeln!(out, "Created stand {} ({})", stand.name, stand.id)?;
    Ok(())
}

async fn cmd_stand_list(store: &dyn StandStore, json: bool, out: &mut dyn Write) -> Result<()> {
    let stands = store.list_stands().await.context("Failed to list stands")?;
    if json {
        return write_json(out, &stands);
    }
    if stands.is_empty() {
        writeln!(out, "No stands")?;
        return Ok(());
    }
    for stand in &stands {
        write_stand_line(out, stand)?;
    }
    Ok(())
}

async fn stand_detail(store: &dyn StandStore, name: &str) -> Result<StandDetail> {
    let stand = store
        .stand_by_name(name)
        .await?
        .with_context(|| format!("Stand not found: {name}"))?;

    let mut pipelines = Vec::new();
    for pipeline in store.pipelines_for_stand(stand.id).await? {
        let mut steps = Vec::new();
        for step in store.steps_for_pipeline(pipeline.id).await? {
            let jobs = store.jobs_for_step(step.id).await?;
            steps.push(StepDetail { step, jobs });
        }
        pipelines.push(PipelineDetail { pipeline, steps });
    }
    Ok(StandDetail { stand, pipelines })
}

async fn cmd_stand_show(
    store: &dyn StandStore,
    name: &str,
    json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let detail = stand_detail(store, name).await?;
    if json {
        return write_json(out, &detail);
    }

    write_stand_line(out, &detail.stand)?;
    if detail.pipelines.is_empty() {
        writeln!(out, "  not provisioned yet")?;
    }
    for p in &detail.pipelines {
        writeln!(out, "  pipeline #{} {}", p.pipeline.external_id, p.pipeline.status)?;
        for s in &p.steps {
            writeln!(out, "    {}. {} [{}]", s.step.ordinal, s.step.name, s.step.status)?;
            for job in &s.jobs {
                writeln!(out, "       job #{} {} [{}]", job.external_id, job.name, job.status)?;
            }
        }
    }
    Ok(())
}

fn write_notification_line(out: &mut dyn Write, state: &StepState) -> Result<()> {
    writeln!(
        out,
        "{} {} step {} \"{}\" {} (user {})",
        state.id, state.stand_name, state.ordinal, state.step_name, state.status, state.user_id
    )?;
    Ok(())
}

async fn cmd_notifications_list(
    store: &dyn StandStore,
    json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let states = store
        .undelivered_step_states()
        .await
        .context("Failed to read notifications")?;
    if json {
        return write_json(out, &states);
    }
    if states.is_empty() {
        writeln!(out, "No pending notifications")?;
        return Ok(());
    }
    for state in &states {
        write_notification_line(out, state)?;
    }
    Ok(())
}

async fn cmd_notifications_ack(
    store: &dyn StandStore,
    id: Uuid,
    json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    store
        .mark_step_state_delivered(id)
        .await
        .with_context(|| format!("Failed to acknowledge notification {id}"))?;
    if json {
        return write_json(out, &serde_json::json!({ "id": id, "delivered": true }));
    }
    writeln!(out, "Acknowledged {id}")?;
    Ok(())
}
