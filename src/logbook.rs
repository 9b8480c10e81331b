//! Audit trail
//!
//! One JSON run record per invocation under `runs/`, plus one TOML
//! trigger marker per executed restart under `triggers/`. Files are
//! created exclusively and never rewritten.

use crate::error::{Error, Result};
use crate::muster::{InventorySource, SkippedLine};
use crate::sickbay::triage::Decision;
use crate::sickbay::FleetSnapshot;
use crate::warden::{Remediation, RestartOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Everything that happened in one run
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub threshold_percent: f64,
    pub min_other_healthy: usize,
    pub inventory_source: InventorySource,
    pub skipped_lines: Vec<SkippedLine>,
    pub dry_run: bool,
    /// Probing was cut short by shutdown
    pub interrupted: bool,
    pub snapshot: FleetSnapshot,
    pub decisions: Vec<Decision>,
    pub remediation: Remediation,
}

impl RunRecord {
    pub fn restarts_failed(&self) -> bool {
        self.remediation
            .outcomes
            .iter()
            .any(|o| !o.status.is_success())
            || self.remediation.error.is_some()
    }
}

/// Durable evidence that a restart was issued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerMarker {
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub service: String,
    pub threshold_percent: f64,
    pub status: String,
    pub healthy_before: usize,
    pub pre_pid: Option<u32>,
    pub pre_memory_pct: Option<f64>,
    pub post_pid: Option<u32>,
    pub post_memory_pct: Option<f64>,
    pub note: String,
}

impl TriggerMarker {
    pub fn from_outcome(outcome: &RestartOutcome, service: &str, threshold_percent: f64) -> Self {
        Self {
            timestamp: outcome.started_at,
            host: outcome.target.address().to_string(),
            service: service.to_string(),
            threshold_percent,
            status: outcome.status.to_string(),
            healthy_before: outcome.healthy_before,
            pre_pid: outcome.pre.pid,
            pre_memory_pct: outcome.pre.memory_pct,
            post_pid: outcome.post.and_then(|p| p.pid),
            post_memory_pct: outcome.post.and_then(|p| p.memory_pct),
            note: outcome.message.clone(),
        }
    }

    fn file_stem(&self) -> String {
        let mem = self
            .pre_memory_pct
            .map(|m| format!("mem{}", m.round() as u32))
            .unwrap_or_else(|| "mem_unknown".to_string());
        format!("{}_{}_{}", host_safe(&self.host), stamp(self.timestamp), mem)
    }
}

/// Compact UTC stamp used in file names and run ids
pub fn stamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

fn host_safe(host: &str) -> String {
    host.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Append-only store rooted at the configured log directory
#[derive(Debug, Clone)]
pub struct Logbook {
    dir: PathBuf,
}

impl Logbook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.dir.join("runs")
    }

    pub fn triggers_dir(&self) -> PathBuf {
        self.dir.join("triggers")
    }

    /// Write the run record; returns its path
    pub fn write_run(&self, record: &RunRecord) -> Result<PathBuf> {
        let body = serde_json::to_string_pretty(record)?;
        create_unique(
            &self.runs_dir(),
            &format!("run_{}", record.run_id),
            "json",
            &body,
        )
    }

    /// Write a trigger marker; returns its path
    pub fn write_trigger(&self, marker: &TriggerMarker) -> Result<PathBuf> {
        let body = toml::to_string(marker)?;
        create_unique(&self.triggers_dir(), &marker.file_stem(), "toml", &body)
    }

    /// All trigger markers, oldest first
    pub fn list_triggers(&self) -> Result<Vec<(PathBuf, TriggerMarker)>> {
        let dir = self.triggers_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut markers = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match toml::from_str::<TriggerMarker>(&content) {
                Ok(marker) => markers.push((path, marker)),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Unreadable trigger marker"),
            }
        }

        markers.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then_with(|| a.0.cmp(&b.0)));
        Ok(markers)
    }
}

const MAX_COLLISIONS: u32 = 1000;

/// Create `dir/stem.ext`, adding `-N` on collision; never overwrites
fn create_unique(dir: &Path, stem: &str, ext: &str, body: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| Error::LogWrite {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for n in 0..MAX_COLLISIONS {
        let name = if n == 0 {
            format!("{}.{}", stem, ext)
        } else {
            format!("{}-{}.{}", stem, n, ext)
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(body.as_bytes())
                    .and_then(|_| file.write_all(b"\n"))
                    .map_err(|e| Error::LogWrite {
                        path: path.clone(),
                        source: e,
                    })?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Error::LogWrite { path, source: e }),
        }
    }

    Err(Error::LogWrite {
        path: dir.join(format!("{}.{}", stem, ext)),
        source: std::io::Error::new(ErrorKind::AlreadyExists, "too many name collisions"),
    })
}
