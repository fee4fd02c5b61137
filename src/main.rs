//! RecordVault CLI entry point
//!
//! Installs JSON logging on stderr (filter from `RECORDVAULT_LOG`,
//! default `info`) and delegates everything else to the CLI module,
//! which prints the JSON response on stdout.

use recordvault::cli;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_env("RECORDVAULT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run() {
        tracing::error!(event = "COMMAND_FAILED", code = e.code(), error = %e, "Command failed");
        std::process::exit(e.exit_code());
    }
}
