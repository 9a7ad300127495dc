use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use nix::unistd::{Uid, User};
use serde::{Deserialize, Serialize};

use crate::core::exclusion::DEFAULT_EXCLUDED_SUBSTRINGS;

pub const DEFAULT_CONFIG_FILE: &str = "homesync.toml";
pub const ENV_PREFIX: &str = "HOMESYNC_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Seconds between mount-table polls.
    pub poll_interval_secs: u64,
    /// Regex matched against the device path of each mount.
    pub device_pattern: String,
    pub exclude_substrings: Vec<String>,
    /// Directory created on the target device to hold the copy.
    pub backup_dir_name: String,
    /// Tree to migrate; the invoking user's home directory when unset.
    pub source: Option<PathBuf>,
    pub mounts_path: PathBuf,
    pub sync_files: bool,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            device_pattern: "^/dev/sd".to_string(),
            exclude_substrings: DEFAULT_EXCLUDED_SUBSTRINGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            backup_dir_name: "home_backup".to_string(),
            source: None,
            mounts_path: PathBuf::from("/proc/self/mounts"),
            sync_files: true,
            simulation: false,
            verbose: false,
            json_logs: false,
        }
    }
}

impl AppConfig {
    /// Layer defaults, the TOML file, `HOMESYNC_*` variables and CLI overrides,
    /// later layers winning.
    pub fn new<T: Serialize>(config_file: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let file = config_file.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment.extract().context("Failed to load configuration")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// The tree to migrate: `source` if configured, otherwise the home
    /// directory of the current user.
    pub fn source_root(&self) -> Option<PathBuf> {
        if let Some(source) = &self.source {
            return Some(source.clone());
        }

        if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
            return Some(PathBuf::from(home));
        }

        User::from_uid(Uid::current()).ok()?.map(|user| user.dir)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}
