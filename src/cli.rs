//! Command-line interface for Keelhaul
//!
//! Uses clap with derive for type-safe CLI parsing

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::manifest::{DEFAULT_CONFIG_FILE, KeelhaulConfig};

/// Keelhaul - quorum-safe memory remediation for a service fleet
#[derive(Parser)]
#[command(name = "keelhaul")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (defaults apply if the default file is absent)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Commands,
}

/// Per-invocation overrides of config file values
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// systemd unit to monitor
    #[arg(long, global = true)]
    pub service: Option<String>,

    /// Memory percentage at or above which a restart is wanted
    #[arg(long, global = true)]
    pub threshold: Option<f64>,

    /// Healthy nodes besides the restarted one that must remain
    #[arg(long, global = true)]
    pub quorum_floor: Option<usize>,

    /// Per-target probe timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Inventory file (one host per line)
    #[arg(long, global = true)]
    pub inventory: Option<PathBuf>,

    /// Directory for run records and trigger markers
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

impl Overrides {
    /// Apply overrides on top of a loaded configuration
    pub fn apply(&self, config: &mut KeelhaulConfig) {
        if let Some(service) = &self.service {
            config.service.name = service.clone();
        }
        if let Some(threshold) = self.threshold {
            config.service.threshold_percent = threshold;
        }
        if let Some(floor) = self.quorum_floor {
            config.quorum.min_other_healthy = floor;
        }
        if let Some(timeout) = self.timeout {
            config.probe.timeout_secs = timeout;
        }
        if let Some(inventory) = &self.inventory {
            config.inventory.file = inventory.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.logbook.dir = dir.clone();
        }
    }
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Probe the fleet, decide, and restart at most what quorum allows
    Run {
        /// Decide and record, but do not restart anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Probe the fleet and show decisions without acting or recording
    Probe {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration and inventory
    Check,

    /// List trigger markers of past restarts
    Triggers {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Config path and whether it was given explicitly
    pub fn config_path(&self) -> (PathBuf, bool) {
        match &self.config {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        }
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "keelhaul", &mut std::io::stdout());
    }
}
