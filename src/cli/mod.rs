//! CLI argument parsing for gslock.
//!
//! Uses clap derive macros for declarative argument definitions. Everything
//! from the command name onwards belongs to the guarded command, including
//! arguments that look like gslock options.

use crate::error::{GslockError, Result};
use crate::logging::LogFormat;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::ffi::OsString;
use std::time::Duration;

/// Gslock: run a command while holding a lock object in Google Cloud Storage.
///
/// The lock is an empty object created only if absent and deleted only if it
/// is still the one this run created. While another process holds the lock,
/// gslock retries at a fixed interval. The command's exit code becomes
/// gslock's exit code.
#[derive(Parser, Debug)]
#[command(name = "gslock")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Delay between attempts while the lock is held elsewhere.
    #[arg(
        long,
        value_name = "MS",
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_ms: u64,

    /// Format of gslock's own log lines on stderr.
    #[arg(long, value_enum, default_value = "human")]
    pub log_format: LogFormat,

    /// Lock object location (gs://<bucket>/<key>).
    #[arg(value_name = "LOCATION")]
    pub location: String,

    /// Command to run while holding the lock, followed by its arguments.
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub command: Vec<String>,
}

impl Cli {
    /// Parse the process arguments.
    ///
    /// `--help` and `--version` print and exit 0; any other parse failure
    /// becomes a [`GslockError::Usage`] carrying clap's rendered message.
    pub fn parse_args() -> Result<Self> {
        Self::parse_args_from(std::env::args_os())
    }

    /// Parse an explicit argument list (first item is the program name).
    pub fn parse_args_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Cli::try_parse_from(args).map_err(|err| match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => GslockError::Usage(err.render().to_string()),
        })
    }

    /// Retry cadence for contended locks.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// One-line usage string, printed alongside location errors.
pub fn usage() -> String {
    Cli::command().render_usage().to_string()
}
