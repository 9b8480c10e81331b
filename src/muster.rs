//! Inventory resolution
//!
//! Turns an inventory file (one host per line) or the built-in default
//! list into ordered [`Target`]s.

use crate::error::{Error, Result};
use crate::manifest::KeelhaulConfig;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A remote host running the monitored service
///
/// Equality is by address only.
#[derive(Debug, Clone, Serialize)]
pub struct Target {
    address: String,
    port: u16,
    identity: PathBuf,
}

impl Target {
    pub fn new(address: impl Into<String>, port: u16, identity: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            port,
            identity: identity.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn identity(&self) -> &Path {
        &self.identity
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Target {}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Where the target list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InventorySource {
    File,
    Defaults,
}

impl fmt::Display for InventorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventorySource::File => write!(f, "file"),
            InventorySource::Defaults => write!(f, "defaults"),
        }
    }
}

/// An inventory line that was ignored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedLine {
    pub line: usize,
    pub content: String,
    pub note: String,
}

/// The resolved fleet, in inventory order
#[derive(Debug, Clone)]
pub struct Muster {
    pub targets: Vec<Target>,
    pub source: InventorySource,
    pub skipped: Vec<SkippedLine>,
}

/// Resolve the fleet from the configured inventory file or defaults
pub fn resolve(config: &KeelhaulConfig) -> Result<Muster> {
    let path = &config.inventory.file;
    let port = config.ssh.port;
    let identity = &config.ssh.identity;

    if path.exists() {
        let content = fs::read_to_string(path).map_err(|e| Error::InventoryRead {
            path: path.clone(),
            source: e,
        })?;
        let muster = parse_inventory(&content, InventorySource::File, port, identity);
        if !muster.targets.is_empty() {
            return Ok(muster);
        }
        // Only malformed lines: the operator listed hosts we cannot use
        if !muster.skipped.is_empty() {
            return Err(Error::EmptyInventory(path.display().to_string()));
        }
        debug!(path = %path.display(), "Inventory lists no hosts; using defaults");
    }

    let content = config.inventory.defaults.join("\n");
    let muster = parse_inventory(&content, InventorySource::Defaults, port, identity);
    if muster.targets.is_empty() {
        return Err(Error::EmptyInventory("built-in defaults".to_string()));
    }
    Ok(muster)
}

/// Parse inventory text; comments, blank and malformed lines are skipped
pub fn parse_inventory(
    content: &str,
    source: InventorySource,
    default_port: u16,
    identity: &Path,
) -> Muster {
    let mut targets: Vec<Target> = Vec::new();
    let mut skipped = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Trailing comments
        let entry = line.split('#').next().unwrap_or("").trim();

        match parse_entry(entry, default_port) {
            Ok((address, port)) => {
                let target = Target::new(address, port, identity);
                if targets.contains(&target) {
                    skipped.push(SkippedLine {
                        line: idx + 1,
                        content: raw.to_string(),
                        note: "duplicate address".to_string(),
                    });
                } else {
                    targets.push(target);
                }
            }
            Err(note) => skipped.push(SkippedLine {
                line: idx + 1,
                content: raw.to_string(),
                note,
            }),
        }
    }

    Muster {
        targets,
        source,
        skipped,
    }
}

/// Accepts `address` or `address:port`; bare IPv6 addresses are taken whole
fn parse_entry(entry: &str, default_port: u16) -> std::result::Result<(String, u16), String> {
    if entry.split_whitespace().count() != 1 {
        return Err("expected exactly one address".to_string());
    }

    if entry.parse::<IpAddr>().is_ok() {
        return Ok((entry.to_string(), default_port));
    }

    let (host, port) = match entry.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| format!("invalid port '{}'", port))?;
            (host, port)
        }
        None => (entry, default_port),
    };

    if host.parse::<IpAddr>().is_ok() || is_hostname(host) {
        Ok((host.to_string(), port))
    } else {
        Err(format!("invalid host '{}'", host))
    }
}

fn is_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
