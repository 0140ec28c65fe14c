//! failwatch - unattended failing-log triage
//!
//! Watches one or more directories for result archives, waits for each to
//! finish being written, and copies the log members that mention a failure
//! into an output tree.
//!
//! - **Graceful Shutdown**: SIGINT/SIGTERM stop intake, drain running tasks
//!   within the grace period, then release the watches
//! - **Exit codes**: 0 clean shutdown, 1 startup failure or incomplete
//!   shutdown, 2 usage error

use anyhow::{Context, Result};
use clap::Parser;
use failwatch_logging::{init_logging, LogConfig};
use failwatch_pipeline::{Orchestrator, ShutdownHandle, ShutdownReport};
use std::process::ExitCode;
use tracing::{error, info, warn};

mod cli;

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(LogConfig {
        app_name: "failwatch",
        verbose: cli.verbose,
        log_file: !cli.no_log_file,
    }) {
        eprintln!("Warning: {:#}", e);
    }

    match run(&cli) {
        Ok(report) if report.is_clean() => ExitCode::SUCCESS,
        Ok(report) => {
            warn!(
                abandoned = report.abandoned,
                "Exiting with tasks still incomplete"
            );
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<ShutdownReport> {
    let config = cli.to_config()?;
    let orchestrator =
        Orchestrator::from_config(config).context("Failed to set up the pipeline")?;

    install_signal_handlers(orchestrator.shutdown_handle())
        .context("Failed to install signal handlers")?;

    let roots = orchestrator.start().context("Failed to start watching")?;
    info!(
        roots = roots.len(),
        output_root = ?orchestrator.config().output_root,
        "failwatch started, press Ctrl+C to stop"
    );

    orchestrator
        .run_until_shutdown()
        .context("Pipeline stopped unexpectedly")
}

/// Forward termination signals to the orchestrator's control channel.
///
/// Only the first signal triggers shutdown; later ones are logged and do not
/// cut the drain short.
fn install_signal_handlers(handle: ShutdownHandle) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        std::thread::Builder::new()
            .name("failwatch-signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    let name = match signal {
                        SIGINT => "SIGINT",
                        SIGTERM => "SIGTERM",
                        _ => "signal",
                    };
                    if handle.request(name) {
                        info!("Received {}, initiating shutdown...", name);
                    } else {
                        info!("Received {}, shutdown already in progress", name);
                    }
                }
            })?;
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            if handle.request("Ctrl+C") {
                info!("Received Ctrl+C, initiating shutdown...");
            } else {
                info!("Received Ctrl+C, shutdown already in progress");
            }
        })?;
    }

    Ok(())
}
