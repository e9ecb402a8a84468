mod config;
mod daemon;
mod hypr_client;
mod hypr_events;
mod ipc;
mod keyboard_monitor;
mod socket_client;
mod socket_server;
mod ui;
mod window_manager;
mod window_switcher;

use anyhow::{Context, Result};
use config::{Cli, OverlayConfig};
use daemon::{SessionIo, SessionOutcome, SwitcherSession};
use hypr_client::HyprCtl;
use hypr_events::EventStreamReader;
use ipc::{Command, SocketPaths};
use keyboard_monitor::{KeyboardMonitor, KeyboardSignals};
use socket_server::CommandListener;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use ui::TerminalOverlay;

/// Environment variable holding a log filter that overrides `--verbose`
const LOG_ENV: &str = "HYPRSWITCHER_LOG";

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{}", e))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    let command = cli.command();
    let paths = SocketPaths::from_env();

    // Helper mode: hand the command to the running instance
    if let Ok(paths) = &paths {
        match socket_client::send_command(paths, command) {
            Ok(true) => return ExitCode::SUCCESS,
            Ok(false) => {}
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    if command.is_terminal() {
        debug!("No running switcher, nothing to {}", command);
        return ExitCode::SUCCESS;
    }

    match run_session(&cli, paths, command) {
        Ok(outcome) => {
            debug!("Exiting after {:?}", outcome);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Become the main instance and run one switching session
fn run_session(cli: &Cli, paths: Result<SocketPaths>, command: Command) -> Result<SessionOutcome> {
    let listener = CommandListener::bind(paths?).context("Failed to become the main switcher")?;

    info!("Starting hyprswitcher session");
    let config = OverlayConfig::load(cli.config.as_deref());
    debug!("Overlay config: {:?}", config);

    let directory = HyprCtl::from_env().context("Cannot talk to Hyprland")?;

    let (keys, signals) = if cli.keyboard {
        let monitor = KeyboardMonitor::open(cli.device.as_deref())?;
        let signals = monitor.initial_signals();
        (Some(monitor.spawn()?), signals)
    } else {
        (None, KeyboardSignals::new())
    };

    let events = match EventStreamReader::connect_from_env() {
        Ok(reader) => Some(reader),
        Err(e) => {
            warn!(
                "Hyprland events unavailable, polling every {:?} instead: {:#}",
                config.refresh_interval, e
            );
            None
        }
    };

    let overlay = TerminalOverlay::stderr(&config);
    let session = SwitcherSession::new(directory, overlay, config, command);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(session.run(SessionIo {
        listener,
        events,
        keys,
        signals,
    }))
}
