//! Gslock: run a command while holding a lock object in Google Cloud Storage.
//!
//! This is the main entry point for the `gslock` CLI. It parses arguments,
//! starts a single-threaded runtime, runs the guarded command under its lock,
//! and exits with the command's own exit code.

mod app;
mod cli;
pub mod config;
pub mod error;
pub mod exit_codes;
pub mod location;
pub mod locks;
pub mod logging;
pub mod runner;
pub mod store;

use app::Invocation;
use cli::Cli;
use config::Config;
use error::GslockError;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = match Cli::parse_args() {
        Ok(cli) => cli,
        Err(err) => {
            eprint!("{}", err);
            return exit_code(err.exit_code());
        }
    };

    logging::init_logging(cli.log_format);
    let config = Config::from_env(cli.poll_interval());
    let invocation = Invocation::from(cli);

    // The whole run stays on this one OS thread: storage calls, the retry
    // sleep and the child wait are all driven by a current-thread runtime.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {}", err);
            return exit_code(exit_codes::FAILURE);
        }
    };

    let result = runtime.block_on(app::run(&invocation, &config, || store::connect(&config)));

    match result {
        Ok(code) => exit_code(code),
        Err(err) => {
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);
            if matches!(err, GslockError::MalformedLocation(_)) {
                eprintln!("{}", cli::usage());
            }
            exit_code(err.exit_code())
        }
    }
}

/// Codes outside 0..=255 (possible on Windows) collapse to a plain failure.
fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code)
        .map(ExitCode::from)
        .unwrap_or_else(|_| ExitCode::from(exit_codes::FAILURE as u8))
}
