//! Threshold and quorum triage
//!
//! Decides, per target, whether its service should be restarted. A target
//! qualifies only when it is over the memory threshold and at least
//! `quorum_floor` other healthy nodes would remain without it.

use crate::manifest::KeelhaulConfig;
use crate::muster::Target;
use crate::sickbay::prober::ProbeResult;
use crate::sickbay::snapshot::FleetSnapshot;
use serde::{Serialize, Serializer};
use std::fmt;

/// Threshold and quorum floor applied to a snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyPolicy {
    /// Over-threshold when memory_pct >= this
    pub threshold_pct: f64,
    /// N: healthy nodes besides the one acted on that must remain
    pub quorum_floor: usize,
}

impl SafetyPolicy {
    pub fn from_config(config: &KeelhaulConfig) -> Self {
        Self {
            threshold_pct: config.service.threshold_percent,
            quorum_floor: config.quorum.min_other_healthy,
        }
    }

    /// Running and at or above the threshold
    pub fn is_over_threshold(&self, probe: &ProbeResult) -> bool {
        probe.service_running()
            && probe
                .memory_pct()
                .is_some_and(|mem| mem >= self.threshold_pct)
    }

    /// Whether a healthy node may be taken out of a fleet of `healthy`
    pub fn quorum_allows(&self, healthy: usize) -> bool {
        healthy.saturating_sub(1) >= self.quorum_floor && healthy > 0
    }
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self {
            threshold_pct: 60.0,
            quorum_floor: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Restart,
    Skip,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Restart => write!(f, "restart"),
            Action::Skip => write!(f, "skip"),
        }
    }
}

/// Why a decision came out the way it did
#[derive(Debug, Clone, PartialEq)]
pub enum Reason {
    Unreachable {
        error: String,
    },
    NotRunning,
    MemoryUnknown,
    WithinThreshold {
        mem: f64,
        threshold: f64,
    },
    OverThreshold {
        mem: f64,
        threshold: f64,
        others: usize,
        floor: usize,
    },
    QuorumShortfall {
        mem: f64,
        threshold: f64,
        others: usize,
        healthy: usize,
        floor: usize,
    },
    /// Live re-check right before acting found too few healthy nodes
    LiveQuorumShortfall {
        healthy: usize,
        floor: usize,
    },
    /// Live re-check found the target no longer over threshold
    NoLongerOverThreshold {
        status: String,
    },
    /// An earlier remediation this run was not confirmed
    Halted {
        after: String,
    },
    /// Shutdown arrived before the fleet was fully probed
    Interrupted,
    /// The remediation cycle stopped on an internal error
    Aborted {
        error: String,
    },
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Unreachable { error } => {
                write!(f, "unreachable, not counted healthy: {}", error)
            }
            Reason::NotRunning => write!(f, "service not running; nothing to restart"),
            Reason::MemoryUnknown => write!(f, "service running but memory unknown"),
            Reason::WithinThreshold { mem, threshold } => {
                write!(f, "within threshold: mem={:.1}% < {:.1}%", mem, threshold)
            }
            Reason::OverThreshold {
                mem,
                threshold,
                others,
                floor,
            } => write!(
                f,
                "over threshold: mem={:.1}% >= {:.1}% with {} other healthy node(s), floor {}",
                mem, threshold, others, floor
            ),
            Reason::QuorumShortfall {
                mem,
                threshold,
                others,
                healthy,
                floor,
            } => write!(
                f,
                "quorum shortfall: mem={:.1}% >= {:.1}% but only {} other healthy node(s) (H={}), floor {}",
                mem, threshold, others, healthy, floor
            ),
            Reason::LiveQuorumShortfall { healthy, floor } => write!(
                f,
                "quorum shortfall at execution: live H={} not counting nodes restarted this run, floor {}",
                healthy, floor
            ),
            Reason::NoLongerOverThreshold { status } => {
                write!(f, "no longer over threshold at execution: {}", status)
            }
            Reason::Halted { after } => write!(
                f,
                "halted: restart of {} this run was not confirmed",
                after
            ),
            Reason::Interrupted => write!(f, "run interrupted during probing; nothing executed"),
            Reason::Aborted { error } => write!(f, "remediation aborted before this target: {}", error),
        }
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// What to do with one target this run
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub target: Target,
    pub action: Action,
    pub reason: Reason,
    /// Healthy nodes other than this target when the decision was made
    pub healthy_peer_count: usize,
}

impl Decision {
    pub fn is_restart(&self) -> bool {
        self.action == Action::Restart
    }

    /// Withdraw an approved restart
    pub fn convert_to_skip(&mut self, reason: Reason, healthy_peer_count: usize) {
        self.action = Action::Skip;
        self.reason = reason;
        self.healthy_peer_count = healthy_peer_count;
    }
}

/// Evaluate every target in the snapshot, in inventory order
///
/// Uses the snapshot's healthy count as is; pending restarts in the same
/// run are not subtracted here. The warden re-checks before acting.
pub fn evaluate(snapshot: &FleetSnapshot, policy: &SafetyPolicy) -> Vec<Decision> {
    let healthy = snapshot.healthy_count();

    snapshot
        .results()
        .iter()
        .map(|probe| assess(probe, healthy, policy))
        .collect()
}

/// Healthy nodes besides `probe` in a fleet of `healthy`
pub fn healthy_peers(probe: &ProbeResult, healthy: usize) -> usize {
    if probe.service_running() {
        healthy.saturating_sub(1)
    } else {
        healthy
    }
}

fn assess(probe: &ProbeResult, healthy: usize, policy: &SafetyPolicy) -> Decision {
    let peers = healthy_peers(probe, healthy);
    let skip = |reason| Decision {
        target: probe.target().clone(),
        action: Action::Skip,
        reason,
        healthy_peer_count: peers,
    };

    if !probe.reachable() {
        return skip(Reason::Unreachable {
            error: probe.error().unwrap_or("no detail").to_string(),
        });
    }
    if !probe.service_running() {
        return skip(Reason::NotRunning);
    }
    let Some(mem) = probe.memory_pct() else {
        return skip(Reason::MemoryUnknown);
    };

    let threshold = policy.threshold_pct;
    if !policy.is_over_threshold(probe) {
        return skip(Reason::WithinThreshold { mem, threshold });
    }

    if !policy.quorum_allows(healthy) {
        return skip(Reason::QuorumShortfall {
            mem,
            threshold,
            others: peers,
            healthy,
            floor: policy.quorum_floor,
        });
    }

    Decision {
        target: probe.target().clone(),
        action: Action::Restart,
        reason: Reason::OverThreshold {
            mem,
            threshold,
            others: peers,
            floor: policy.quorum_floor,
        },
        healthy_peer_count: peers,
    }
}
