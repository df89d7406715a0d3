//! Guarded command execution.
//!
//! The child inherits stdin, stdout and stderr from gslock; nothing is
//! captured or rewritten.

use crate::error::{GslockError, Result};
use crate::exit_codes;
use std::process::ExitStatus;
use tokio::process::Command;
use tracing::debug;

/// Run `command` with `args` and wait for it to exit.
///
/// # Returns
///
/// * `Ok(code)` - The child's exit code, or `128 + signal` if a signal killed it
/// * `Err(GslockError::ChildProcess)` - The command could not be spawned or waited on
pub async fn run(command: &str, args: &[String]) -> Result<i32> {
    debug!(command, ?args, "spawning guarded command");

    let status = Command::new(command)
        .args(args)
        .status()
        .await
        .map_err(|source| GslockError::ChildProcess {
            command: command.to_string(),
            source,
        })?;

    let code = exit_code(status);
    debug!(command, code, %status, "guarded command finished");
    Ok(code)
}

/// Derive a process exit code from a wait status.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return exit_codes::SIGNAL_BASE + signal;
        }
    }

    exit_codes::FAILURE
}
