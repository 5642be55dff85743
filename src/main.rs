//! Portfolio Allocator - Main Entry Point

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use portfolio_allocator::config::Config;
use portfolio_allocator::effects::{EffectSink, LogSink};
use portfolio_allocator::engine::{AllocationRequest, CycleOutcome, PortfolioAllocator};
use portfolio_allocator::error::AllocatorError;
use portfolio_allocator::persistence::SnapshotStore;
use portfolio_allocator::risk::{HighWaterMark, ThresholdCapsGuard, ThresholdSkewGuard};
use portfolio_allocator::utils::fmt6;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Portfolio Allocator CLI
#[derive(Parser)]
#[command(name = "portfolio-allocator")]
#[command(version, about = "Budget and order-level allocation for market making")]
struct Cli {
    /// Configuration file (stem or path)
    #[arg(short, long, global = true, default_value = "allocator")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single allocation cycle and print the targets as JSON
    Allocate {
        /// Path to the JSON request (stats + cycle inputs)
        #[arg(short, long)]
        inputs: String,
    },

    /// Re-read the request file and allocate on a fixed interval
    Run {
        /// Path to the JSON request (stats + cycle inputs)
        #[arg(short, long)]
        inputs: String,

        /// Seconds between cycles
        #[arg(long, default_value = "60")]
        interval_secs: u64,
    },

    /// Inspect or reset the high-water-mark snapshot
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Print the stored snapshot
    Show,
    /// Reset the high-water mark to zero or to a given equity
    Reset {
        #[arg(long)]
        equity: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load_from(&cli.config)?;
    config.validate()?;

    match cli.command {
        Commands::Allocate { inputs } => allocate_once(config, &inputs),
        Commands::Run {
            inputs,
            interval_secs,
        } => run_loop(config, &inputs, interval_secs).await,
        Commands::Snapshot { action } => snapshot_command(&config, action),
    }
}

/// Initialize logging to stderr and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "portfolio-allocator.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    // stdout carries only the JSON targets
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("portfolio_allocator=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stderr.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .init();

    Ok(())
}

fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Mode: {}", config.portfolio.mode);
    info!("   Budget: ${}", fmt6(config.portfolio.budget_usd));
    info!(
        "   Weight bounds: [{}, {}]",
        config.portfolio.min_weight, config.portfolio.max_weight
    );
    info!(
        "   Drawdown soft cap: {:.1}% (sensitivity {})",
        config.budget.drawdown_soft_cap * 100.0,
        config.budget.pnl_sensitivity
    );
    info!(
        "   Max delta ratio: {} / backoff steps {:?}",
        config.smoothing.max_delta_ratio, config.smoothing.backoff_steps
    );
    info!("   Snapshot: {}", config.snapshot.path);
}

/// Allocator wired to the threshold guards. The caps guard handle is
/// returned so request readings can be pushed into it.
fn build_allocator(config: Config) -> Result<(PortfolioAllocator, Arc<ThresholdCapsGuard>)> {
    let caps = Arc::new(ThresholdCapsGuard::new(config.guards.intraday_caps.clone()));
    let skew = ThresholdSkewGuard::new(config.guards.pos_skew.clone());
    let allocator = PortfolioAllocator::new(config)?
        .with_caps_guard(Box::new(caps.clone()))
        .with_skew_guard(Box::new(skew));
    Ok((allocator, caps))
}

fn read_request(path: &str) -> Result<AllocationRequest> {
    let data = std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    serde_json::from_str(&data).with_context(|| format!("Failed to parse {path}"))
}

/// Restore the HWM; a missing snapshot is a fresh start.
fn restore_snapshot(allocator: &PortfolioAllocator, sink: &mut dyn EffectSink) -> Result<()> {
    let path = allocator.config().snapshot.path.clone();
    match allocator.safe_load_snapshot(&path, sink) {
        Ok(()) => info!("📂 [SNAPSHOT] Restored HWM ${}", fmt6(allocator.hwm().get())),
        Err(AllocatorError::SnapshotNotFound(_)) => {
            info!("📂 [SNAPSHOT] No snapshot at {}, starting fresh", path)
        }
        Err(e) => return Err(e).with_context(|| format!("Unusable snapshot at {path}")),
    }
    Ok(())
}

fn persist_snapshot(allocator: &PortfolioAllocator, sink: &mut dyn EffectSink) {
    let path = allocator.config().snapshot.path.clone();
    if let Err(e) = allocator.save_snapshot(&path, sink) {
        error!("❌ [SNAPSHOT] Failed to save {}: {}", path, e);
    }
}

fn run_cycle(
    allocator: &mut PortfolioAllocator,
    caps: &ThresholdCapsGuard,
    request: &AllocationRequest,
) -> Result<CycleOutcome> {
    if let Some(readings) = request.caps {
        caps.set_readings(readings);
    }
    let outcome = allocator.allocate(&request.stats, request.mode.as_deref(), &request.inputs)?;
    LogSink.apply_all(&outcome.effects);
    if outcome.blocked {
        warn!("🛑 [CAPS] Intraday caps breached, no targets this cycle");
    }
    Ok(outcome)
}

fn allocate_once(config: Config, inputs: &str) -> Result<()> {
    log_config(&config);
    let mut sink = LogSink;
    let (mut allocator, caps) = build_allocator(config)?;
    restore_snapshot(&allocator, &mut sink)?;

    let request = read_request(inputs)?;
    let outcome = run_cycle(&mut allocator, &caps, &request)?;
    println!("{}", serde_json::to_string_pretty(&outcome.targets)?);

    persist_snapshot(&allocator, &mut sink);
    Ok(())
}

async fn run_loop(config: Config, inputs: &str, interval_secs: u64) -> Result<()> {
    info!(
        "Portfolio Allocator v{} - interval {}s",
        env!("CARGO_PKG_VERSION"),
        interval_secs
    );
    log_config(&config);

    let save_every = config.snapshot.save_every_cycles;
    let mut sink = LogSink;
    let (mut allocator, caps) = build_allocator(config)?;
    restore_snapshot(&allocator, &mut sink)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown_clone.store(true, Ordering::SeqCst);
    });

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let mut cycles: u64 = 0;

    while !shutdown.load(Ordering::SeqCst) {
        interval.tick().await;
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        let loop_start = Utc::now();

        let request = match read_request(inputs) {
            Ok(r) => r,
            Err(e) => {
                warn!("⚠️  [INPUTS] {:#}", e);
                continue;
            }
        };

        match run_cycle(&mut allocator, &caps, &request) {
            Ok(outcome) => {
                cycles += 1;
                info!(
                    "📊 [CYCLE #{}] {} symbols, total ${}, soft {}",
                    cycles,
                    outcome.targets.len(),
                    fmt6(outcome.total_usd()),
                    outcome.soft.factor()
                );
                for (symbol, target) in &outcome.targets {
                    debug!(
                        "   {} → ${} ({} levels)",
                        symbol,
                        fmt6(target.target_usd),
                        target.max_levels
                    );
                }
            }
            Err(e) => error!("❌ [CYCLE] Allocation failed: {}", e),
        }

        if save_every > 0 && cycles > 0 && cycles % save_every == 0 {
            persist_snapshot(&allocator, &mut sink);
        }

        debug!(
            "⏱️  Cycle completed in {}ms",
            (Utc::now() - loop_start).num_milliseconds()
        );
    }

    info!("💾 [SNAPSHOT] Saving final state before shutdown...");
    persist_snapshot(&allocator, &mut sink);
    info!("👋 Portfolio Allocator shutdown complete");
    Ok(())
}

fn snapshot_command(config: &Config, action: SnapshotAction) -> Result<()> {
    let store = SnapshotStore::new(&config.snapshot.path);
    match action {
        SnapshotAction::Show => {
            if !Path::new(&config.snapshot.path).exists() {
                println!("No snapshot at {}", config.snapshot.path);
                return Ok(());
            }
            let snapshot = store.read()?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        SnapshotAction::Reset { equity } => {
            let hwm = HighWaterMark::default();
            match equity {
                Some(e) => hwm.reset_to(e),
                None => hwm.reset_zero(),
            }
            store.save(&hwm, &mut LogSink)?;
            info!("HWM reset to ${}", fmt6(hwm.get()));
        }
    }
    Ok(())
}
