#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod commands;
mod config;

use std::process;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Cli;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "tabflow_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "tabflow_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "tabflow_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "tabflow_cli::command";

fn main() {
    let Err(error) = run() else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "command completed successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = format!("{error:#}"),
            "command failed"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    init_tracing();
    log_startup_info();
    cli.log();

    commands::execute(&cli)
}

/// Initializes tracing with environment-based filtering.
///
/// Logs go to stderr so that command output on stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Logs startup information.
fn log_startup_info() {
    tracing::info!(
        target: TRACING_TARGET_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        "starting tabflow"
    );

    tracing::debug!(
        target: TRACING_TARGET_STARTUP,
        pid = process::id(),
        arch = std::env::consts::ARCH,
        os = std::env::consts::OS,
        features = ?enabled_features(),
        "build information"
    );
}

/// Returns a list of enabled compile-time features.
fn enabled_features() -> Vec<&'static str> {
    [cfg!(feature = "dotenv").then_some("dotenv")]
        .into_iter()
        .flatten()
        .collect()
}
