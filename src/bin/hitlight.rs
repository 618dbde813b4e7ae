//! CLI wrapper: run the pipeline against the configured loopback device
//! for a bounded time, then write the pooled frame series as a YAML
//! snapshot.
//!
//! Exit codes: 0 on normal termination, 1 on bad arguments, 2 when audio
//! capture cannot start (device missing, stream open or format failure).

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use hitlight::config::AppConfig;
use hitlight::engine::Engine;
use hitlight::error::AudioError;
use hitlight::snapshot::write_snapshot;

#[derive(Parser, Debug)]
#[command(name = "hitlight", about = "Percussive hit detection and predictive lighting")]
struct Cli {
    /// Where to write the YAML snapshot of pooled frame series.
    output_snapshot_path: PathBuf,

    /// How long to run before stopping, in seconds.
    #[arg(default_value_t = 20)]
    timeout_seconds: u64,

    /// Optional JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::from(1);
        }
    };
    if cli.timeout_seconds == 0 {
        eprintln!("error: timeout must be a positive integer");
        return ExitCode::from(1);
    }

    let config = match &cli.config {
        Some(path) => AppConfig::load_from_file(path),
        None => AppConfig::default(),
    };

    // Any capture startup failure exits 2; the device-missing case gets
    // an extra hint since it is the common misconfiguration.
    let engine = match Engine::start(config) {
        Ok(engine) => engine,
        Err(err @ AudioError::DeviceNotFound { .. }) => {
            eprintln!("error: {}", err);
            eprintln!("Is the loopback device installed and enabled?");
            return ExitCode::from(2);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::from(2);
        }
    };

    log::info!("[Main] running for {} seconds", cli.timeout_seconds);
    thread::sleep(Duration::from_secs(cli.timeout_seconds));

    let pool = engine.stop();
    if let Err(err) = write_snapshot(&cli.output_snapshot_path, &pool)
        .with_context(|| format!("writing snapshot to {:?}", cli.output_snapshot_path))
    {
        eprintln!("error: {:#}", err);
        return ExitCode::from(1);
    }

    log::info!("[Main] wrote {:?}", cli.output_snapshot_path);
    ExitCode::SUCCESS
}
