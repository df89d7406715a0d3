//! Runtime configuration for gslock.
//!
//! Configuration comes from two places:
//! - command-line options (poll interval, log format)
//! - environment variables that select and authenticate the storage backend
//!
//! Environment lookups go through a caller-supplied function so the
//! resolution rules can be tested without touching the process environment.
//! Empty variables are treated as unset.

use std::path::PathBuf;
use std::time::Duration;

/// Path to a Google credentials JSON file.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Host (and optional scheme) of a Cloud Storage emulator.
pub const EMULATOR_HOST_ENV: &str = "STORAGE_EMULATOR_HOST";

/// Root directory for the local filesystem backend.
pub const LOCAL_ROOT_ENV: &str = "GSLOCK_LOCAL_ROOT";

/// Directory holding gcloud's application-default credentials.
pub const CLOUDSDK_CONFIG_ENV: &str = "CLOUDSDK_CONFIG";

/// Default delay between lock acquisition attempts.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Which storage backend holds the lock objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Google Cloud Storage, authenticated.
    Gcs,
    /// A Cloud Storage emulator, unauthenticated.
    Emulator(String),
    /// Local directory with exclusive-create semantics.
    Local(PathBuf),
}

/// Resolved gslock configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit credentials file, if one was configured.
    pub credentials_file: Option<PathBuf>,

    /// Directory of gcloud's application-default credentials, if known.
    pub gcloud_config_dir: Option<PathBuf>,

    /// Storage backend to use.
    pub backend: Backend,

    /// Fixed delay between acquisition attempts while the lock is held elsewhere.
    pub poll_interval: Duration,
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env(poll_interval: Duration) -> Self {
        Self::from_lookup(|name| std::env::var(name).ok(), poll_interval)
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F, poll_interval: Duration) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        // The local backend wins over the emulator so tests can't accidentally
        // reach a real endpoint.
        let backend = if let Some(root) = get(LOCAL_ROOT_ENV) {
            Backend::Local(PathBuf::from(root))
        } else if let Some(host) = get(EMULATOR_HOST_ENV) {
            Backend::Emulator(host)
        } else {
            Backend::Gcs
        };

        let gcloud_config_dir = get(CLOUDSDK_CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(|| default_gcloud_config_dir(&get));

        Self {
            credentials_file: get(CREDENTIALS_ENV).map(PathBuf::from),
            gcloud_config_dir,
            backend,
            poll_interval,
        }
    }

    /// Location of the application-default credentials file, if any.
    pub fn application_default_credentials(&self) -> Option<PathBuf> {
        self.gcloud_config_dir
            .as_ref()
            .map(|dir| dir.join("application_default_credentials.json"))
    }
}

#[cfg(windows)]
fn default_gcloud_config_dir(get: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    get("APPDATA").map(|appdata| PathBuf::from(appdata).join("gcloud"))
}

#[cfg(not(windows))]
fn default_gcloud_config_dir(get: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
    get("HOME").map(|home| PathBuf::from(home).join(".config").join("gcloud"))
}
