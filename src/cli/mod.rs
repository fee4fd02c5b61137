//! CLI module for RecordVault
//!
//! One command per invocation over the file-backed store. Input records
//! come from a file or stdin; every command prints exactly one JSON
//! object on stdout. Logs go to stderr.

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{init, run, run_command};
pub use errors::{CliError, CliResult, EXIT_CONFIG, EXIT_DATA, EXIT_FAILURE, EXIT_RETRY};
pub use io::{read_records, write_error, write_response};
