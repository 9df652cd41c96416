use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use udprobe::config::Config;
use udprobe::engine::stats::ProbeStats;
use udprobe::engine::Engine;
use udprobe::responder;
use udprobe::sink::TracingSink;

/// Active UDP network-latency prober.
#[derive(Parser)]
#[command(name = "udprobe", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,

    /// Run the companion echo responder instead of the prober.
    Echo {
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:9000")]
        bind: String,
    },
}

/// Build-time version info.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("udprobe {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // The engine is single-threaded and cooperative: one thread services
    // every timer and every socket, so shared state needs no locks.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    if let Some(Command::Echo { bind }) = cli.command {
        return rt.block_on(async {
            let cancel = CancellationToken::new();
            spawn_signal_watcher(cancel.clone());
            let socket = responder::bind(&bind).await?;
            responder::run(socket, cancel).await
        });
    }

    // Config is required for the main probe run.
    let config_path = cli
        .config
        .context("--config is required (use --help for usage)")?;

    let cfg = Config::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        targets = cfg.targets.len(),
        "starting udprobe",
    );

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    // Setup failures (resolution, bind, connect) abort startup here; the
    // steady-state loop below never terminates the process on its own.
    let engine = Engine::new(&cfg, Box::new(TracingSink)).await?;

    spawn_stats_reporter(engine.stats(), cfg.stats_interval, cancel.clone());

    engine.run(cancel).await?;

    info!("udprobe stopped");

    Ok(())
}

/// Cancel the token on SIGINT or SIGTERM.
fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
            }
        }

        cancel.cancel();
    });
}

/// Periodically log aggregate probe outcome counters.
fn spawn_stats_reporter(stats: Arc<ProbeStats>, period: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let snap = stats.snapshot();
                    if snap.total() == 0 {
                        continue;
                    }

                    info!(
                        sent = snap.sent,
                        matched = snap.matched,
                        lost = snap.lost,
                        malformed = snap.malformed,
                        period_secs = period.as_secs(),
                        "probe stats",
                    );
                }
            }
        }
    });
}
