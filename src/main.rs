use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::config::AgentConfig;
use crate::engine::ReconciliationEngine;
use crate::events::EventLog;
use crate::scheduler::{Scheduler, StopSignal};

mod config;
mod engine;
mod env;
mod error;
mod events;
mod integrity;
mod networking;
mod policy;
mod scheduler;
mod storage;
mod util;

#[derive(Parser, Debug)]
#[command(
    name = "preload-sync",
    author,
    version,
    about = "Keeps preload resource files in step with a published manifest"
)]
struct Cli {
    /// Config file to use instead of config.json next to the executable.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single sync cycle and exit with its outcome.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match AgentConfig::load_for_executable(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load config: {err}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        "service running: {} every {:?}, resources in {}",
        config.server_url,
        config.poll_interval,
        config.resources_dir.display()
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let writer = EventLog::new(&config.log_file).spawn_writer(events_rx);

    let scheduler = Scheduler::new(config.poll_interval);
    let engine = ReconciliationEngine::new(config);
    for path in engine.sweep_staging().await {
        warn!("removed leftover staging file {}", path.display());
    }

    let code = if cli.once {
        match scheduler.run_once(|| engine.run_cycle(&events_tx)).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        }
    } else {
        let stop = StopSignal::new();
        let on_signal = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested; finishing current cycle");
                on_signal.trigger();
            }
        });
        scheduler
            .run(|| engine.run_cycle(&events_tx), &stop)
            .await;
        ExitCode::SUCCESS
    };

    drop(events_tx);
    let _ = writer.await;
    info!("service stopped");
    code
}
