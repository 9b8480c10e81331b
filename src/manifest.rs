//! Configuration file parsing for Keelhaul
//!
//! Parses `keelhaul.toml` using serde. Every field has a default so an
//! absent file still yields a usable configuration.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "keelhaul.toml";

/// Load configuration from a file
///
/// When `explicit` is false and the file does not exist, defaults are used.
pub fn load(path: &Path, explicit: bool) -> Result<KeelhaulConfig> {
    if !explicit && !path.exists() {
        let config = KeelhaulConfig::default();
        config.validate()?;
        return Ok(config);
    }

    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: KeelhaulConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct KeelhaulConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    #[serde(default)]
    pub quorum: QuorumConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub restart: RestartConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub inventory: InventoryConfig,

    #[serde(default)]
    pub logbook: LogbookConfig,
}

impl KeelhaulConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !is_unit_name(&self.service.name) {
            return Err(Error::ConfigValidation(format!(
                "Service name '{}' is not a valid systemd unit name",
                self.service.name
            )));
        }

        let threshold = self.service.threshold_percent;
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(Error::ConfigValidation(format!(
                "threshold_percent must be in (0, 100], got {}",
                threshold
            )));
        }

        if self.probe.timeout_secs == 0 {
            return Err(Error::ConfigValidation(
                "probe.timeout_secs must be greater than zero".into(),
            ));
        }

        if self.restart.command_timeout_secs == 0 || self.restart.verify_wait_secs == 0 {
            return Err(Error::ConfigValidation(
                "restart timeouts must be greater than zero".into(),
            ));
        }

        if self.ssh.user.trim().is_empty() {
            return Err(Error::ConfigValidation("ssh.user must not be empty".into()));
        }

        Ok(())
    }
}

/// Only characters systemd accepts in unit names; keeps remote commands shell-safe
fn is_unit_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | ':' | '-'))
}

/// The monitored service
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// systemd unit on the target hosts
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Resident memory percentage at or above which a restart is wanted
    #[serde(default = "default_threshold")]
    pub threshold_percent: f64,
}

fn default_service_name() -> String {
    "memhog".to_string()
}

fn default_threshold() -> f64 {
    60.0
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            threshold_percent: default_threshold(),
        }
    }
}

/// Quorum floor settings
#[derive(Debug, Clone, Deserialize)]
pub struct QuorumConfig {
    /// Healthy nodes, besides the one acted on, that must remain (N)
    #[serde(default = "default_min_other_healthy")]
    pub min_other_healthy: usize,
}

fn default_min_other_healthy() -> usize {
    1
}

impl Default for QuorumConfig {
    fn default() -> Self {
        Self {
            min_other_healthy: default_min_other_healthy(),
        }
    }
}

/// Probe settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Bound on probing one target, in seconds
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,

    /// Max age of a snapshot the orchestrator may reuse, in seconds
    #[serde(default = "default_fresh_for")]
    pub fresh_for_secs: u64,
}

fn default_probe_timeout() -> u64 {
    8
}

fn default_fresh_for() -> u64 {
    5
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn fresh_for(&self) -> Duration {
        Duration::from_secs(self.fresh_for_secs)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout(),
            fresh_for_secs: default_fresh_for(),
        }
    }
}

/// Restart execution settings
#[derive(Debug, Clone, Deserialize)]
pub struct RestartConfig {
    /// Bound on the privileged restart command itself
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Bound on waiting for the service to come back with a new PID
    #[serde(default = "default_verify_wait")]
    pub verify_wait_secs: u64,

    /// Base delay between verification polls, in milliseconds
    #[serde(default = "default_verify_poll")]
    pub verify_poll_ms: u64,
}

fn default_command_timeout() -> u64 {
    60
}

fn default_verify_wait() -> u64 {
    30
}

fn default_verify_poll() -> u64 {
    500
}

impl RestartConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn verify_wait(&self) -> Duration {
        Duration::from_secs(self.verify_wait_secs)
    }
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
            verify_wait_secs: default_verify_wait(),
            verify_poll_ms: default_verify_poll(),
        }
    }
}

/// Authenticated remote channel settings
#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// ssh client binary
    #[serde(default = "default_ssh_binary")]
    pub binary: String,

    #[serde(default = "default_ssh_user")]
    pub user: String,

    /// Dedicated private key provisioned for this job
    #[serde(default = "default_identity")]
    pub identity: PathBuf,

    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_ssh_user() -> String {
    "vagrant".to_string()
}

fn default_identity() -> PathBuf {
    PathBuf::from("/home/vagrant/.ssh/highmem_ed25519")
}

fn default_ssh_port() -> u16 {
    22
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            binary: default_ssh_binary(),
            user: default_ssh_user(),
            identity: default_identity(),
            port: default_ssh_port(),
        }
    }
}

/// Inventory source settings
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    /// One host per line; used when present
    #[serde(default = "default_inventory_file")]
    pub file: PathBuf,

    /// Built-in hosts used when the file is absent
    #[serde(default = "default_inventory")]
    pub defaults: Vec<String>,
}

fn default_inventory_file() -> PathBuf {
    PathBuf::from("/opt/keelhaul/inventory.txt")
}

fn default_inventory() -> Vec<String> {
    vec!["192.168.56.11".to_string(), "192.168.56.12".to_string()]
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            file: default_inventory_file(),
            defaults: default_inventory(),
        }
    }
}

/// Audit trail location
#[derive(Debug, Clone, Deserialize)]
pub struct LogbookConfig {
    /// Base directory; `runs/` and `triggers/` are created below it
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/keelhaul")
}

impl Default for LogbookConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}
