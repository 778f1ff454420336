//! World P.A.M.: geopolitical risk scoring engine.
//!
//! Single binary: one-shot CLI evaluation modes plus `--serve`, which runs
//! the HTTP/stream API with scheduled re-ingestion, backups, and retention
//! cleanup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use clap::Parser;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pam_backend::alerts::AlertEngine;
use pam_backend::api::{self, AppState};
use pam_backend::audit::AuditLog;
use pam_backend::config::{Config, ConfigLoader};
use pam_backend::error::PamError;
use pam_backend::events::{ChangeDetector, ConnectionManager, EventBus, StreamFanout};
use pam_backend::fetcher::SecureFetcher;
use pam_backend::metrics::{health_report, MetricsRegistry};
use pam_backend::middleware::{PrincipalRateLimiter, RateLimitConfig};
use pam_backend::models::EventKind;
use pam_backend::pipeline;
use pam_backend::scheduler::{
    schedule_backups, schedule_retention, BackupManager, JobScheduler,
};
use pam_backend::signals::{HypothesisEvaluator, SignalComputer};
use pam_backend::store::async_store::AsyncStore;
use pam_backend::store::Store;

#[derive(Parser, Debug)]
#[command(name = "pam")]
#[command(about = "World P.A.M. - geopolitical risk scoring over public news feeds")]
struct Args {
    /// Path to the config JSON document
    #[arg(long, default_value = "world_config.json")]
    config: PathBuf,

    /// Write a default config and exit
    #[arg(long)]
    init: bool,

    /// List available scenarios
    #[arg(long)]
    list: bool,

    /// Scenario (hypothesis) to evaluate
    #[arg(long)]
    scenario: Option<String>,

    /// Optional country context (adds one keyword to every signal)
    #[arg(long)]
    country: Option<String>,

    /// Monte Carlo runs (0 = deterministic only)
    #[arg(long, default_value_t = 0)]
    simulate: usize,

    /// Show the signal contribution breakdown
    #[arg(long)]
    explain: bool,

    /// Evaluate every scenario
    #[arg(long)]
    run_all: bool,

    /// Print the health JSON
    #[arg(long)]
    health: bool,

    /// Path to the embedded database file
    #[arg(long, default_value = "pam_data.db", env = "PAM_DB_PATH")]
    db_path: PathBuf,

    /// Export feed items and source status to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Show stored evaluation history for a scenario
    #[arg(long)]
    history: Option<String>,

    /// Show database statistics
    #[arg(long)]
    stats: bool,

    /// Delete stored data older than DAYS
    #[arg(long, value_name = "DAYS")]
    cleanup: Option<u32>,

    /// Serve the HTTP API and run the scheduled pipeline
    #[arg(long)]
    serve: bool,

    /// Listen port for --serve
    #[arg(long, default_value_t = 8000, env = "PORT")]
    port: u16,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q')]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(args: &Args) {
    let default_directive = if args.verbose {
        "pam_backend=debug,pam=debug,tower_http=debug"
    } else if args.quiet {
        "pam_backend=error,pam=error"
    } else {
        "pam_backend=info,pam=info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into());
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    match &args.log_file {
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => {
                registry
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_ansi(false)
                            .with_writer(Arc::new(file)),
                    )
                    .init();
            }
            Err(e) => {
                registry.init();
                error!(path = %path.display(), error = %e, "could not open log file");
            }
        },
        None => registry.init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let args = Args::parse();
    init_tracing(&args);

    if args.init {
        return match Config::write_default(&args.config) {
            Ok(()) => {
                println!(
                    "Wrote {}. Edit weights/feeds/keywords there.",
                    args.config.display()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e}");
                ExitCode::from(1)
            }
        };
    }

    if args.health {
        let metrics = MetricsRegistry::new();
        let report = health_report(&metrics);
        println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
        return ExitCode::SUCCESS;
    }

    let loader = ConfigLoader::default();
    let config = match loader.load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(1);
        }
    };

    if args.list {
        println!("Available scenarios:");
        for hypothesis in &config.hypotheses {
            println!(" - {}", hypothesis.name);
        }
        return ExitCode::SUCCESS;
    }

    match run(args, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args, config: Arc<Config>) -> Result<ExitCode> {
    let store = Store::open(&args.db_path).context("failed to open database")?;
    let async_store = AsyncStore::new(store.clone());

    if let Some(path) = &args.export {
        async_store.export_to_json(path.clone(), 30).await?;
        println!("Exported data to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(scenario) = &args.history {
        if config.hypothesis(scenario).is_none() {
            eprintln!("Unknown scenario: {scenario}");
            return Ok(ExitCode::from(1));
        }
        let history = async_store
            .get_hypothesis_history(scenario.clone(), 30, args.country.clone())
            .await?;
        println!("History for '{scenario}' ({} evaluations):", history.len());
        for row in history {
            let mc = match (row.monte_carlo_low, row.monte_carlo_high) {
                (Some(low), Some(high)) => {
                    format!("  mc=[{:.1}%-{:.1}%]", low * 100.0, high * 100.0)
                }
                _ => String::new(),
            };
            println!(
                "  {}  p={:.1}%{}",
                row.evaluated_at,
                row.probability * 100.0,
                mc
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    if args.stats {
        let stats = async_store.stats().await?;
        println!("Database statistics:");
        println!("  feed items:   {}", stats.feed_items);
        println!("  signals:      {}", stats.signal_values);
        println!("  evaluations:  {}", stats.evaluations);
        println!("  audit events: {}", stats.audit_events);
        for (source, count) in &stats.items_by_source {
            println!("    {source:24} {count}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(days) = args.cleanup {
        let counts = async_store.cleanup_old_data(days).await?;
        println!(
            "Removed {} feed items, {} signal values, {} evaluations older than {days} days.",
            counts.feed_items, counts.signals, counts.evaluations
        );
        return Ok(ExitCode::SUCCESS);
    }

    if args.serve {
        return serve(args, config, store).await;
    }

    // One-shot evaluation modes.
    let metrics = Arc::new(MetricsRegistry::new());
    let fetcher = Arc::new(SecureFetcher::new(
        Some(config.allowed_hosts()),
        metrics.clone(),
    )?);
    let computer =
        SignalComputer::new(config.clone(), fetcher.clone()).with_store(async_store.clone());
    let evaluator =
        HypothesisEvaluator::new(config.clone(), computer).with_store(async_store.clone());

    if args.run_all {
        let results =
            pipeline::evaluate_all(&evaluator, &config, args.country.as_deref(), args.simulate)
                .await;
        for (name, result) in results {
            match result {
                Ok(evaluation) => {
                    println!("{:28} {:.1}%", name, evaluation.probability * 100.0)
                }
                Err(e) => println!("{name:28} failed: {e}"),
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let Some(scenario) = &args.scenario else {
        eprintln!("No --scenario provided. Use --list to see options.");
        return Ok(ExitCode::from(2));
    };

    let evaluation = match evaluator
        .evaluate(scenario, args.country.as_deref(), args.simulate)
        .await
    {
        Ok(evaluation) => evaluation,
        Err(PamError::NotFound { .. }) => {
            eprintln!("Unknown scenario: {scenario}. Use --list to see options.");
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "Analyzing. Probability of hypothesis '{}': {:.1}%.",
        scenario,
        evaluation.probability * 100.0
    );
    if let Some(mc) = &evaluation.monte_carlo {
        println!(
            "Processing. Monte Carlo estimate: mean={:.1}%, credible-interval[5-95%]={:.1}%-{:.1}%.",
            mc.mean * 100.0,
            mc.low * 100.0,
            mc.high * 100.0
        );
    }
    if args.explain {
        println!("\nContribution breakdown:");
        for c in &evaluation.contributions {
            println!(
                "  {:24} value={:4.2}  weight={:+.2}  contributes={:+.3} logits",
                c.signal, c.value, c.weight, c.contribution
            );
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}

async fn serve(args: Args, config: Arc<Config>, store: Arc<Store>) -> Result<ExitCode> {
    let metrics = Arc::new(MetricsRegistry::new());
    let fetcher = Arc::new(SecureFetcher::new(
        Some(config.allowed_hosts()),
        metrics.clone(),
    )?);
    let bus = Arc::new(EventBus::new());
    let connections = Arc::new(ConnectionManager::new());
    let detector = Arc::new(ChangeDetector::new(bus.clone()));
    let audit = Arc::new(AuditLog::new(store.clone()));
    let limiter = Arc::new(PrincipalRateLimiter::new(RateLimitConfig::default()));
    let scheduler = Arc::new(JobScheduler::new());

    let alerts = Arc::new(AlertEngine::new());
    alerts.attach_bus(&bus);
    bus.subscribe_many(
        &[EventKind::SignalUpdate, EventKind::EvaluationUpdate],
        alerts.clone(),
    );
    bus.subscribe_many(
        &[EventKind::SignalUpdate, EventKind::EvaluationUpdate],
        Arc::new(StreamFanout::new(connections.clone())),
    );

    let state = AppState {
        config: Arc::new(ArcSwap::from(config)),
        store: AsyncStore::new(store.clone()),
        fetcher: fetcher.clone(),
        metrics,
        bus,
        connections,
        alerts,
        audit,
        limiter: limiter.clone(),
        scheduler: scheduler.clone(),
    };

    // Periodic re-ingestion of every configured source.
    {
        let state = state.clone();
        let detector = detector.clone();
        scheduler.schedule_every(
            "feed_ingestion",
            env_secs("FEED_POLL_SECS", 300),
            move || {
                let state = state.clone();
                let detector = detector.clone();
                async move {
                    let config = state.config_snapshot();
                    pipeline::run_ingestion_cycle(
                        &config,
                        &state.fetcher,
                        Some(&state.store),
                        Some(detector.as_ref()),
                    )
                    .await;
                    Ok(())
                }
            },
            true,
        );
    }

    // Periodic full-graph evaluation; feeds the alert engine and stream.
    {
        let state = state.clone();
        scheduler.schedule_every(
            "scenario_evaluation",
            env_secs("EVAL_POLL_SECS", 900),
            move || {
                let state = state.clone();
                async move {
                    let config = state.config_snapshot();
                    let evaluator = state.evaluator();
                    pipeline::evaluate_all(&evaluator, &config, None, 0).await;
                    Ok(())
                }
            },
            false,
        );
    }

    // Housekeeping: expired cache entries, idle throttle hosts, idle
    // rate-limit principals.
    {
        let fetcher = fetcher.clone();
        let limiter = limiter.clone();
        scheduler.schedule_every(
            "housekeeping",
            env_secs("HOUSEKEEPING_SECS", 600),
            move || {
                let fetcher = fetcher.clone();
                let limiter = limiter.clone();
                async move {
                    fetcher.cache().cleanup_expired();
                    fetcher.throttle().cleanup();
                    limiter.cleanup();
                    Ok(())
                }
            },
            false,
        );
    }

    let backup_dir = std::env::var("PAM_BACKUP_DIR").unwrap_or_else(|_| "backups".into());
    schedule_backups(
        &scheduler,
        Arc::new(BackupManager::new(backup_dir, BackupManager::DEFAULT_KEEP)),
        args.db_path.clone(),
        env_secs("BACKUP_INTERVAL_SECS", 24 * 3600),
    );

    let retention_days = std::env::var("PAM_RETENTION_DAYS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(90);
    schedule_retention(
        &scheduler,
        store,
        retention_days,
        env_secs("RETENTION_INTERVAL_SECS", 24 * 3600),
    );

    // SIGHUP reloads the config document. The snapshot pointer is swapped
    // atomically; in-flight evaluations keep the snapshot they started with.
    #[cfg(unix)]
    {
        let state = state.clone();
        let config_path = args.config.clone();
        tokio::spawn(async move {
            let Ok(mut hangup) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            else {
                return;
            };
            while hangup.recv().await.is_some() {
                match Config::load(&config_path) {
                    Ok(new_config) => {
                        state.config.store(Arc::new(new_config));
                        info!(path = %config_path.display(), "config reloaded");
                        state.audit.record(
                            "config_change",
                            "reload",
                            "config",
                            pam_backend::models::AuditResult::Success,
                            &pam_backend::audit::AuditContext::default(),
                            serde_json::json!({ "path": config_path.display().to_string() }),
                        );
                    }
                    Err(e) => {
                        error!(path = %config_path.display(), error = %e, "config reload rejected");
                        state.audit.record(
                            "config_change",
                            "reload",
                            "config",
                            pam_backend::models::AuditResult::Failure,
                            &pam_backend::audit::AuditContext::default(),
                            serde_json::json!({ "error": e.to_string() }),
                        );
                    }
                }
            }
        });
    }

    let app = api::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "serving API");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    scheduler.shutdown();
    Ok(ExitCode::SUCCESS)
}
