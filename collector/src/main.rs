//! SQL 探针采集服务
//!
//! 按计划执行 SQL 探针并把结果分发到指标存储，包括：
//! - InfluxDB 1.x / 2.x / 3.x
//! - 通过 insert_sql 模板写入的目标数据库

mod dispatcher;
mod fetcher;
mod loader;
mod resolver;
mod runner;
mod scheduler;
mod sinks;
mod source;
mod state;
mod validation;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgGroup, Parser, Subcommand};
use common::config::AppConfig;
use loader::ProbeFile;
use scheduler::{Schedule, Scheduler};
use state::AppState;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "collector";

#[derive(Debug, Parser)]
#[command(name = SERVICE_NAME, version, about = "Runs SQL probes and publishes the results to metric sinks")]
#[command(group(ArgGroup::new("verbosity").args(["silent", "verbose", "debug"])))]
struct Cli {
    /// Configuration file (repeatable).
    #[arg(short = 'c', long = "config")]
    config: Vec<PathBuf>,

    /// Directory of *.yml / *.yaml configuration files (repeatable).
    #[arg(long = "config-dir")]
    config_dir: Vec<PathBuf>,

    /// Number of passes, -1 to run until stopped.
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    count: i64,

    /// Interval between the starts of two passes.
    #[arg(short, long, default_value = "10s", value_parser = humantime::parse_duration)]
    wait: Duration,

    /// Only log errors.
    #[arg(short, long)]
    silent: bool,

    /// Log progress.
    #[arg(short, long)]
    verbose: bool,

    /// Log everything.
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the version.
    Version,
    /// Print an example configuration.
    Example,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Some(Command::Version) => {
            println!("{} {}", SERVICE_NAME, env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(Command::Example) => {
            print!("{}", loader::EXAMPLE_CONFIG);
            return Ok(());
        }
        None => {}
    }

    load_dotenv();
    init_tracing(&cli);

    // 加载探针配置
    let paths = loader::collect_paths(&cli.config, &cli.config_dir)?;
    let files = paths
        .into_iter()
        .map(|path| {
            let shown = path.display().to_string();
            ProbeFile::load(path).with_context(|| format!("error loading config {}", shown))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let config = AppConfig::load_with_service(SERVICE_NAME);
    let state = AppState::new(config);
    info!(
        service = %state.config.service_name,
        files = files.len(),
        count = cli.count,
        wait = ?cli.wait,
        "启动采集"
    );

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let schedule = Schedule {
        count: cli.count,
        wait: cli.wait,
    };
    let completed = Scheduler::new(state.runner(), files, schedule, shutdown).run().await;
    info!(passes = completed, "采集结束");
    Ok(())
}

/// `RUST_LOG` wins over the verbosity flags.
fn init_tracing(cli: &Cli) {
    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.silent {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| level.into()))
        .init();
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("stop requested, finishing the current pass");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "could not install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Load .env file from the working directory (best-effort, no error if missing).
fn load_dotenv() {
    let Ok(content) = std::fs::read_to_string(".env") else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            // Only set if not already set by the environment
            if std::env::var(key).is_err() {
                std::env::set_var(key, value.trim());
            }
        }
    }
}
