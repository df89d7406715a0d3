//! Top-level flow of a gslock run.
//!
//! parse location → connect to the store → acquire → run the command →
//! release → exit code. The store is built through a caller-supplied
//! connector so nothing touches storage before the location is known to be
//! valid.

use crate::cli::Cli;
use crate::config::Config;
use crate::error::Result;
use crate::location::Location;
use crate::locks::LockManager;
use crate::runner;
use crate::store::ObjectStore;
use std::future::Future;
use std::sync::Arc;

/// What to lock and what to run under it.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Raw lock location as given on the command line.
    pub location: String,
    /// Program to run.
    pub command: String,
    /// Arguments for the program.
    pub args: Vec<String>,
}

impl From<Cli> for Invocation {
    fn from(cli: Cli) -> Self {
        let mut command = cli.command.into_iter();
        Self {
            location: cli.location,
            command: command.next().unwrap_or_default(),
            args: command.collect(),
        }
    }
}

/// Run `invocation` under its lock.
///
/// # Returns
///
/// * `Ok(code)` - The guarded command ran; `code` is its exit code. Release
///   problems are logged, never returned.
/// * `Err(_)` - Malformed location, client construction, fatal acquire, or
///   spawn failure. Nothing is held when this returns.
pub async fn run<C, Fut>(invocation: &Invocation, config: &Config, connect: C) -> Result<i32>
where
    C: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<dyn ObjectStore>>>,
{
    let location = Location::parse(&invocation.location)?;
    let store = connect().await?;

    let manager = LockManager::new(store, config.poll_interval);
    manager
        .with_lock(
            &location,
            runner::run(&invocation.command, &invocation.args),
        )
        .await?
}
