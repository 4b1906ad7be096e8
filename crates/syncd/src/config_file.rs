//! Configuration file support for netsyncd
//!
//! Loads and validates netsyncd configuration from TOML files.
//! Default location: /etc/netsync/netsyncd.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::command::{HostTarget, COMMAND_PLACEHOLDER, HOST_PLACEHOLDER};
use crate::error::{JobError, Result};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/netsync/netsyncd.toml";

/// Host dispatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of hosts processed in parallel
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Per-command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Shell template used to run one command on one device
    #[serde(default = "default_connect_command")]
    pub connect_command: String,

    /// Answer commands from captured outputs instead of live devices
    #[serde(default)]
    pub replay_dir: Option<PathBuf>,
}

/// Mapping table configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingsConfig {
    /// Directory of `<platform>.yml` files layered over the built-in tables
    #[serde(default)]
    pub override_dir: Option<PathBuf>,
}

/// Reconciliation flags and per-type toggles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Keep applying after a per-record failure
    #[serde(default)]
    pub continue_on_failure: bool,

    /// Never delete records that only exist in the datastore
    #[serde(default)]
    pub skip_unmatched_destination: bool,

    /// Types excluded from `skip_unmatched_destination`
    #[serde(default)]
    pub unmatched_opt_out: Vec<String>,

    #[serde(default = "default_true")]
    pub include_vlans: bool,

    #[serde(default = "default_true")]
    pub include_vrfs: bool,

    #[serde(default = "default_true")]
    pub include_software_version: bool,

    #[serde(default = "default_true")]
    pub include_lags: bool,
}

/// Datastore configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatastoreConfig {
    /// JSON snapshot loaded before and saved after a run
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

/// Complete netsyncd configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetsyncConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub mappings: MappingsConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub datastore: DatastoreConfig,

    /// Devices to collect facts from
    #[serde(default)]
    pub inventory: Vec<HostTarget>,
}

// Default functions
fn default_max_workers() -> usize {
    8
}

fn default_command_timeout() -> u64 {
    30
}

fn default_connect_command() -> String {
    "ssh -o BatchMode=yes -o ConnectTimeout=10 {host} {command}".to_string()
}

fn default_true() -> bool {
    true
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("/var/lib/netsync/datastore.json")
}

// Default implementations
impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            command_timeout_secs: default_command_timeout(),
            connect_command: default_connect_command(),
            replay_dir: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            continue_on_failure: false,
            skip_unmatched_destination: false,
            unmatched_opt_out: Vec::new(),
            include_vlans: default_true(),
            include_vrfs: default_true(),
            include_software_version: default_true(),
            include_lags: default_true(),
        }
    }
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

impl NetsyncConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    JobError::Config(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(JobError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| JobError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Get command timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatcher.command_timeout_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.max_workers == 0 {
            return Err(JobError::Config("max_workers must be > 0".to_string()));
        }

        if self.dispatcher.command_timeout_secs == 0 {
            return Err(JobError::Config(
                "command_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.dispatcher.replay_dir.is_none() {
            for placeholder in [HOST_PLACEHOLDER, COMMAND_PLACEHOLDER] {
                if !self.dispatcher.connect_command.contains(placeholder) {
                    return Err(JobError::Config(format!(
                        "connect_command must contain {}",
                        placeholder
                    )));
                }
            }
        }

        for host in &self.inventory {
            if host.address.trim().is_empty() || host.platform.trim().is_empty() {
                return Err(JobError::Config(
                    "inventory entries need an address and a platform".to_string(),
                ));
            }
        }

        Ok(())
    }
}
