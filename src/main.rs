use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use haulgate::{
    init_telemetry, shutdown_telemetry, Actor, ApprovalMode, EngineSettings, EscrowEngine,
    EscrowError, GateOverrides, HaulgateConfig, JobIntake, NoopProvider, PaymentProvider,
    PaymentRail, Store, SystemClock,
};

const CLI_ACTOR: &str = "cli";

#[derive(Parser)]
#[command(name = "haulgate")]
#[command(about = "Escrow workflow engine for vehicle transport jobs")]
#[command(long_about = "Haulgate gates payment release for vehicle transport jobs on submitted \
                       evidence, keeps an append-only decision log, and queues carrier \
                       notifications. These operator commands act as system:cli and print JSON.")]
struct Cli {
    /// Explicit configuration file layered over defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Create a draft job with its evidence gate and payment hold
    Intake {
        #[arg(long)]
        vin: String,
        #[arg(long)]
        pickup: String,
        #[arg(long)]
        dropoff: String,
        /// Price in minor currency units
        #[arg(long)]
        price_cents: i64,
        #[arg(long, value_enum, default_value = "stripe")]
        rail: RailArg,
        /// RFC 3339 delivery deadline
        #[arg(long)]
        deadline: Option<DateTime<Utc>>,
        /// Advance to releasable as soon as delivery passes the full gate
        #[arg(long)]
        auto_approve: bool,
        /// Require a proof-of-delivery item
        #[arg(long)]
        require_pod: bool,
    },
    /// Evaluate the evidence gate for a job and log the result
    Evaluate { job_id: String },
    /// Show the review summary for a job
    Review { job_id: String },
    /// Mark queued notifications as sent and print them for delivery
    Drain {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Re-drive payment releases left in flight
    Reconcile {
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Issue a fresh carrier link for an assigned job
    IssueLink { job_id: String },
    /// Revoke the carrier link for a job
    RevokeLink { job_id: String },
    /// Print the decision log for a job, oldest first
    Log {
        job_id: String,
        /// Only the most recent N entries
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum RailArg {
    Stripe,
    Ach,
    Balance,
}

impl From<RailArg> for PaymentRail {
    fn from(rail: RailArg) -> Self {
        match rail {
            RailArg::Stripe => PaymentRail::Stripe,
            RailArg::Ach => PaymentRail::Ach,
            RailArg::Balance => PaymentRail::Balance,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => HaulgateConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => HaulgateConfig::load().context("failed to load configuration")?,
    };

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_telemetry(&config.observability)?;

    let result = tokio::runtime::Runtime::new()?.block_on(async { run(cli.command, &config).await });
    shutdown_telemetry();

    match result {
        Ok(()) => Ok(()),
        Err(err) => match err.downcast_ref::<EscrowError>() {
            // Business outcomes are answers, not crashes
            Some(escrow) if !escrow.is_fault() => {
                print_json(&escrow.report())?;
                std::process::exit(2);
            }
            _ => Err(err),
        },
    }
}

async fn run(command: Commands, config: &HaulgateConfig) -> Result<()> {
    let store = Store::connect(&config.database)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;

    if let Commands::Migrate = command {
        store.migrate().await?;
        print_json(&serde_json::json!({ "ok": true, "migrated": true }))?;
        store.close().await;
        return Ok(());
    }

    let engine = build_engine(store.clone(), config)?;
    let actor = Actor::system(CLI_ACTOR);

    match command {
        Commands::Intake {
            vin,
            pickup,
            dropoff,
            price_cents,
            rail,
            deadline,
            auto_approve,
            require_pod,
        } => {
            let intake = JobIntake {
                vin,
                pickup_address: pickup,
                dropoff_address: dropoff,
                price_cents,
                delivery_deadline: deadline,
                rail: rail.into(),
                gate: GateOverrides {
                    require_pod: require_pod.then_some(true),
                    approval_mode: auto_approve.then_some(ApprovalMode::Auto),
                    ..GateOverrides::default()
                },
            };
            let job = engine.jobs().intake(&actor, intake).await?;
            print_json(&job)?;
        }
        Commands::Evaluate { job_id } => {
            print_json(&engine.evaluate(&job_id, &actor).await?)?;
        }
        Commands::Review { job_id } => {
            print_json(&engine.jobs().review(&job_id, &actor).await?)?;
        }
        Commands::Drain { limit } => {
            print_json(&engine.outbox().drain(limit, &actor).await?)?;
        }
        Commands::Reconcile { limit } => {
            let entries = engine.reconcile_releases(&actor, limit).await?;
            engine.metrics().log_stats();
            print_json(&entries)?;
        }
        Commands::IssueLink { job_id } => {
            print_json(&engine.invites().reissue_link(&job_id, &actor).await?)?;
        }
        Commands::RevokeLink { job_id } => {
            let revoked = engine.invites().revoke(&job_id, &actor).await?;
            print_json(&serde_json::json!({ "ok": true, "job_id": job_id, "revoked": revoked }))?;
        }
        Commands::Log { job_id, tail } => {
            let entries = engine.decisions().entries(&job_id).await?;
            let skip = tail.map(|n| entries.len().saturating_sub(n)).unwrap_or(0);
            print_json(&entries[skip..])?;
        }
        Commands::Migrate | Commands::Config => {}
    }

    store.close().await;
    Ok(())
}

fn build_engine(store: Store, config: &HaulgateConfig) -> Result<EscrowEngine> {
    let clock = Arc::new(SystemClock);
    let provider: Arc<dyn PaymentProvider> = match config.payments.provider.as_str() {
        "noop" => Arc::new(NoopProvider::new(clock.clone())),
        other => bail!("unsupported payment provider '{}'", other),
    };

    Ok(EscrowEngine::new(
        store,
        EngineSettings::from_config(config),
        provider,
        clock,
    ))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
