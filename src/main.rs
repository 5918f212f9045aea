//! Assembly Line Simulator
//!
//! Receives machine orders, runs them through the four-station line and
//! publishes one manufacturing report per finished order.
//!
//! # Usage
//!
//! ```bash
//! # Orders from a local feed, reports on stdout, 20x speed
//! ./order-feed --count 10 --interval-ms 500 | ./assembly-line-sim --stdin --speed 20
//!
//! # Orders and reports through a message broker
//! ./assembly-line-sim --host localhost:5672
//! ```
//!
//! # Environment Variables
//!
//! - `ASSEMBLY_LINE_CONFIG`: Path to a TOML config file
//! - `ASSEMBLY_LINE_HOST`: Broker endpoint, same as `--host`
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use assembly_line_sim::intake::{log_final_stats, IntakeEnd, IntakeLoop};
use assembly_line_sim::line::{LineController, StageSchedule};
use assembly_line_sim::transport::{
    BrokerClient, OrderSource, ReportSink, StdinOrderSource, StdoutReportSink, TcpOrderSource,
    TcpReportSink,
};
use assembly_line_sim::LineConfig;

const BANNER_RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "assembly-line-sim")]
#[command(about = "Assembly line simulator: machine orders in, manufacturing reports out")]
#[command(version)]
struct CliArgs {
    /// Read orders from stdin (XML or JSON, one per line) and write reports to stdout
    /// Use with the feed: ./order-feed | ./assembly-line-sim --stdin
    #[arg(long)]
    stdin: bool,

    /// Message broker endpoint, overrides transport.host from the config
    #[arg(long, value_name = "HOST:PORT", env = "ASSEMBLY_LINE_HOST")]
    host: Option<String>,

    /// Speed-up factor (1 = real-world timing, 10 = ten times faster)
    #[arg(long)]
    speed: Option<f64>,

    /// Config file, instead of $ASSEMBLY_LINE_CONFIG / ./assembly_line.toml
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Intake,
    StatsReporter,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Intake => write!(f, "Intake"),
            TaskName::StatsReporter => write!(f, "StatsReporter"),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

fn load_config(args: &CliArgs) -> Result<LineConfig> {
    let mut config = match &args.config {
        Some(path) => LineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LineConfig::load(),
    };

    if let Some(host) = &args.host {
        config.transport.host = host.clone();
    }
    if let Some(speed) = args.speed {
        config.speed_up_factor = speed;
    }
    if args.log_json {
        config.log_json = true;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ============================================================================
// Supervisor
// ============================================================================

/// Spawn the intake loop. On end of stream it waits for the line to drain
/// and then stops the process.
fn spawn_intake(
    task_set: &mut JoinSet<Result<TaskName>>,
    line: LineController,
    mut source: Box<dyn OrderSource>,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[Intake] Task starting");
        let summary = IntakeLoop::new(line.clone(), cancel_token.clone())
            .run(source.as_mut())
            .await;

        match summary.end {
            IntakeEnd::Eof => {
                info!("[Intake] Waiting for orders on the line to finish...");
                tokio::select! {
                    _ = cancel_token.cancelled() => {}
                    _ = line.wait_idle() => {
                        info!("[Intake] Line idle, stopping");
                        cancel_token.cancel();
                    }
                }
                Ok(TaskName::Intake)
            }
            IntakeEnd::Cancelled => Ok(TaskName::Intake),
            IntakeEnd::SourceError(e) => Err(anyhow::anyhow!("Order source failed: {}", e)),
        }
    });
}

/// Spawn a periodic progress logger.
fn spawn_stats_reporter(
    task_set: &mut JoinSet<Result<TaskName>>,
    line: LineController,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = interval.tick() => {
                    let stats = line.stats();
                    info!(
                        "📈 Progress: {} received | {} completed | {} queued | gate {}",
                        stats.orders_received, stats.orders_completed, stats.queue_depth, stats.gate
                    );
                }
            }
        }
        Ok(TaskName::StatsReporter)
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let the remaining tasks observe the cancellation
    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => info!("🔒 Supervisor: Task {} stopped", task_name),
            Ok(Err(e)) => warn!("🔒 Supervisor: Task ended with error during shutdown: {}", e),
            Err(e) => warn!("🔒 Supervisor: Task panicked during shutdown: {}", e),
        }
    }

    Ok(())
}

// ============================================================================
// Line Runner
// ============================================================================

async fn connect_transport(
    args: &CliArgs,
    config: &LineConfig,
) -> Result<(Box<dyn OrderSource>, Arc<dyn ReportSink>)> {
    if args.stdin {
        info!("📥 Input: stdin (machine orders, one per line)");
        info!("📤 Output: stdout (XML reports, one per line)");
        let source: Box<dyn OrderSource> = Box::new(StdinOrderSource::new());
        let sink: Arc<dyn ReportSink> = Arc::new(StdoutReportSink::new());
        return Ok((source, sink));
    }

    let t = &config.transport;
    info!("📥 Input: broker {} exchange {}", t.host, t.order_exchange);
    info!("📤 Output: broker {} exchange {}", t.host, t.report_exchange);

    let source = TcpOrderSource::connect(BrokerClient::from_config(t)?, &t.order_exchange)
        .await
        .with_context(|| format!("Failed to subscribe to {} at {}", t.order_exchange, t.host))?;
    let sink = TcpReportSink::connect(BrokerClient::from_config(t)?, &t.report_exchange)
        .await
        .with_context(|| format!("Failed to connect report publisher to {}", t.host))?;
    let source: Box<dyn OrderSource> = Box::new(source);
    let sink: Arc<dyn ReportSink> = Arc::new(sink);
    Ok((source, sink))
}

async fn run_line(args: &CliArgs, config: &LineConfig, cancel_token: CancellationToken) -> Result<()> {
    let (source, sink) = connect_transport(args, config).await?;

    let schedule = StageSchedule::from_config(config);
    info!(
        "⏱️  Speed: {}x (nominal cycle {:.1}s per order)",
        config.speed_up_factor,
        schedule.nominal_cycle().as_secs_f64()
    );
    let line = LineController::with_schedule(schedule, sink);
    info!("✓ Assembly line ready, gate {}", line.gate_state());
    info!("");

    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_intake(&mut task_set, line.clone(), source, cancel_token.clone());
    spawn_stats_reporter(&mut task_set, line.clone(), cancel_token.clone());

    let outcome = run_supervisor(&mut task_set, cancel_token).await;

    let leftover = line.shutdown().await;
    for order in &leftover {
        warn!(order_id = %order.id, "Order was never started");
    }

    let stats = line.stats();
    log_final_stats(&stats);
    if config.log_json {
        match serde_json::to_string(&stats) {
            Ok(json) => info!(stats = %json, "Final line statistics"),
            Err(e) => warn!("Failed to serialize statistics: {}", e),
        }
    }

    outcome
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Config lookup logs through a temporary stderr subscriber; the real one
    // depends on log_json from the config.
    let bootstrap = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, || load_config(&args))?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_logging(config.log_json);

    info!("{}", BANNER_RULE);
    info!("  Assembly Line Simulator");
    info!("  Light barriers: 4 | Gated section: stages 1-3");
    info!("{}", BANNER_RULE);
    info!("");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    if let Err(e) = run_line(&args, &config, cancel_token).await {
        error!("Assembly line stopped with error: {:#}", e);
        return Err(e);
    }

    info!("");
    info!("✓ Assembly line shutdown complete");
    Ok(())
}
