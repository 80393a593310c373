use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use directories::BaseDirs;

use crate::paths::LaunchPolicy;

pub const APP_NAME: &str = "GameDock";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DATA_DIR_ENV: &str = "GAMEDOCK_DATA_DIR";
pub const DEFAULT_BIND: &str = "127.0.0.1:47615";
pub const DEFAULT_POLL_SECONDS: u64 = 5;
const MIN_POLL_SECONDS: u64 = 1;
const MAX_POLL_SECONDS: u64 = 60;
pub const NETWORK_TIMEOUT: Duration = Duration::from_secs(12);
pub const ARTWORK_TIMEOUT: Duration = Duration::from_secs(15);

/// Platform data directory, e.g. `%LOCALAPPDATA%\GameDock`.
pub fn default_data_dir() -> Result<PathBuf> {
    let base_dirs = BaseDirs::new().context("Unable to determine platform data directory")?;
    Ok(base_dirs.data_local_dir().join(APP_NAME))
}

pub fn clamp_poll_seconds(seconds: u64) -> u64 {
    seconds.clamp(MIN_POLL_SECONDS, MAX_POLL_SECONDS)
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
    pub bind: SocketAddr,
    pub launch_policy: LaunchPolicy,
    pub network_timeout: Duration,
    pub artwork_timeout: Duration,
}

impl ServiceConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECONDS),
            bind: SocketAddr::from(([127, 0, 0, 1], 47615)),
            launch_policy: LaunchPolicy::default(),
            network_timeout: NETWORK_TIMEOUT,
            artwork_timeout: ARTWORK_TIMEOUT,
        }
    }

    pub fn with_poll_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(clamp_poll_seconds(seconds));
        self
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_launch_policy(mut self, policy: LaunchPolicy) -> Self {
        self.launch_policy = policy;
        self
    }
}
