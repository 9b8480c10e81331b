//! The Warden - restart orchestrator
//!
//! Acts on approved restarts strictly one at a time, in inventory order:
//! - Re-checks live quorum right before each restart
//! - Issues the scoped restart over the remote channel
//! - Waits for the service to come back with a new PID
//! - Stops escalating after the first unconfirmed remediation

pub mod state;

use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use rand::rng;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::channel::RemoteChannel;
use crate::error::{Error, ErrorKind, Result};
use crate::manifest::KeelhaulConfig;
use crate::muster::Target;
use crate::sickbay::triage::{self, Decision, Reason, SafetyPolicy};
use crate::sickbay::{FleetSnapshot, ProbeResult, Prober};
use state::{Phase, RemediationCycle};

/// Service state on a node at one moment
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeState {
    pub pid: Option<u32>,
    pub memory_pct: Option<f64>,
}

impl From<&ProbeResult> for NodeState {
    fn from(probe: &ProbeResult) -> Self {
        Self {
            pid: probe.pid(),
            memory_pct: probe.memory_pct(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Service came back under a new PID
    Succeeded,
    /// sudo refused the scoped restart
    PermissionDenied,
    /// Restart command failed or the host dropped
    Failed,
    /// Command accepted but no new PID within the wait bound
    Unverified,
}

impl OutcomeStatus {
    pub fn is_success(&self) -> bool {
        *self == OutcomeStatus::Succeeded
    }

    /// Whether the restart command reached the service manager
    pub fn was_issued(&self) -> bool {
        matches!(self, OutcomeStatus::Succeeded | OutcomeStatus::Unverified)
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Succeeded => write!(f, "succeeded"),
            OutcomeStatus::PermissionDenied => write!(f, "permission_denied"),
            OutcomeStatus::Failed => write!(f, "failed"),
            OutcomeStatus::Unverified => write!(f, "unverified"),
        }
    }
}

/// Result of one executed restart
#[derive(Debug, Clone, Serialize)]
pub struct RestartOutcome {
    pub target: Target,
    pub status: OutcomeStatus,
    /// Live healthy count right before the restart was issued
    pub healthy_before: usize,
    pub pre: NodeState,
    pub post: Option<NodeState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub message: String,
}

/// Everything the warden did this run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Remediation {
    pub outcomes: Vec<RestartOutcome>,
    #[serde(serialize_with = "serialize_phases")]
    pub phases: Vec<Phase>,
    /// Set if the cycle hit an illegal transition
    pub error: Option<String>,
}

fn serialize_phases<S: serde::Serializer>(
    phases: &[Phase],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(phases.iter().map(|p| format!("{:?}", p)))
}

/// Turn approved restarts that never ran into skips naming `error`
fn withdraw_unexecuted(decisions: &mut [Decision], outcomes: &[RestartOutcome], error: &str) {
    for decision in decisions.iter_mut().filter(|d| d.is_restart()) {
        if outcomes.iter().any(|o| o.target == decision.target) {
            continue;
        }
        let peers = decision.healthy_peer_count;
        decision.convert_to_skip(
            Reason::Aborted {
                error: error.to_string(),
            },
            peers,
        );
    }
}

/// Sequential restart orchestrator
pub struct Warden<C> {
    prober: Prober<C>,
    policy: SafetyPolicy,
    fresh_for: Duration,
    verify_wait: Duration,
    verify_poll: Duration,
}

impl<C: RemoteChannel> Warden<C> {
    pub fn new(prober: Prober<C>, config: &KeelhaulConfig) -> Self {
        Self {
            prober,
            policy: SafetyPolicy::from_config(config),
            fresh_for: config.probe.fresh_for(),
            verify_wait: config.restart.verify_wait(),
            verify_poll: Duration::from_millis(config.restart.verify_poll_ms.max(1)),
        }
    }

    /// Override timing
    #[cfg(test)]
    pub fn with_timing(mut self, fresh_for: Duration, verify_wait: Duration, verify_poll: Duration) -> Self {
        self.fresh_for = fresh_for;
        self.verify_wait = verify_wait;
        self.verify_poll = verify_poll;
        self
    }

    /// Act on the restart-marked decisions
    ///
    /// Decisions that end up not executed are converted to skips with the
    /// reason that stopped them.
    pub async fn execute(
        &self,
        targets: &[Target],
        snapshot: &FleetSnapshot,
        decisions: &mut [Decision],
    ) -> Remediation {
        let mut cycle = RemediationCycle::new();
        let mut outcomes = Vec::new();

        let error = self
            .drive(&mut cycle, targets, snapshot, decisions, &mut outcomes)
            .await
            .err()
            .map(|e| {
                warn!(error = %e, "Remediation cycle aborted");
                e.to_string()
            });

        if let Some(message) = &error {
            withdraw_unexecuted(decisions, &outcomes, message);
        }

        Remediation {
            outcomes,
            phases: cycle.history().to_vec(),
            error,
        }
    }

    async fn drive(
        &self,
        cycle: &mut RemediationCycle,
        targets: &[Target],
        snapshot: &FleetSnapshot,
        decisions: &mut [Decision],
        outcomes: &mut Vec<RestartOutcome>,
    ) -> Result<()> {
        let mut view = snapshot.clone();
        let mut stale = false;
        let mut restarted: Vec<Target> = Vec::new();
        let mut halted_after: Option<String> = None;

        for decision in decisions.iter_mut() {
            if !decision.is_restart() {
                continue;
            }

            if let Some(host) = &halted_after {
                let peers = decision.healthy_peer_count;
                decision.convert_to_skip(Reason::Halted { after: host.clone() }, peers);
                continue;
            }

            cycle.evaluate()?;

            if stale || view.age(Utc::now()).to_std().unwrap_or_default() >= self.fresh_for {
                let results = self.prober.probe_fleet(targets).await;
                view = FleetSnapshot::aggregate(targets, results, Utc::now());
                stale = false;
            }

            let live = view
                .get(&decision.target)
                .cloned()
                .unwrap_or_else(|| ProbeResult::unreachable(decision.target.clone(), "not in live view"));
            let healthy = view.healthy_count_excluding(&restarted);
            let peers = triage::healthy_peers(&live, healthy);

            if !self.policy.is_over_threshold(&live) {
                info!(host = %decision.target, status = %live.summary(), "Restart withdrawn");
                decision.convert_to_skip(
                    Reason::NoLongerOverThreshold {
                        status: live.summary(),
                    },
                    peers,
                );
                cycle.skip()?;
                continue;
            }

            if !self.policy.quorum_allows(healthy) {
                warn!(
                    host = %decision.target,
                    healthy,
                    floor = self.policy.quorum_floor,
                    "Restart withheld: live quorum at floor"
                );
                decision.convert_to_skip(
                    Reason::LiveQuorumShortfall {
                        healthy,
                        floor: self.policy.quorum_floor,
                    },
                    peers,
                );
                cycle.skip()?;
                continue;
            }

            cycle.restart()?;
            let outcome = self.remediate(cycle, &decision.target, &live, healthy).await?;
            stale = true;

            if outcome.status.was_issued() {
                restarted.push(decision.target.clone());
            }
            if !outcome.status.is_success() {
                halted_after = Some(decision.target.address().to_string());
            }
            outcomes.push(outcome);
        }

        Ok(())
    }

    /// Issue one restart and wait for the new PID; cycle is `Restarting` on entry
    async fn remediate(
        &self,
        cycle: &mut RemediationCycle,
        target: &Target,
        live: &ProbeResult,
        healthy_before: usize,
    ) -> Result<RestartOutcome> {
        let pre = NodeState::from(live);
        let started_at = Utc::now();
        info!(
            host = %target,
            pid = ?pre.pid,
            mem = ?pre.memory_pct,
            healthy_before,
            "Restarting service"
        );

        let outcome = |status, post, message: String| RestartOutcome {
            target: target.clone(),
            status,
            healthy_before,
            pre,
            post,
            started_at,
            finished_at: Utc::now(),
            message,
        };

        if let Err(e) = self.prober.channel().execute_restart(target).await {
            cycle.halt()?;
            let status = if e.kind() == ErrorKind::Permission {
                OutcomeStatus::PermissionDenied
            } else {
                OutcomeStatus::Failed
            };
            warn!(host = %target, error = %e, "Restart rejected; halting further restarts");
            return Ok(outcome(status, None, e.to_string()));
        }

        cycle.verify()?;
        match self.await_new_pid(target, pre.pid).await {
            Ok(post) => {
                cycle.confirm()?;
                info!(host = %target, old = ?pre.pid, new = ?post.pid, "Restart confirmed");
                let message = format!(
                    "service back with pid {} (was {})",
                    post.pid.map(|p| p.to_string()).unwrap_or_default(),
                    pre.pid.map(|p| p.to_string()).unwrap_or_else(|| "none".into())
                );
                Ok(outcome(OutcomeStatus::Succeeded, Some(post), message))
            }
            Err((e, last)) => {
                cycle.halt()?;
                warn!(host = %target, error = %e, "Restart unconfirmed; halting further restarts");
                Ok(outcome(OutcomeStatus::Unverified, last, e.to_string()))
            }
        }
    }

    /// Poll until the service runs under a PID other than `old_pid`
    ///
    /// On failure returns the last state observed, if any.
    async fn await_new_pid(
        &self,
        target: &Target,
        old_pid: Option<u32>,
    ) -> std::result::Result<NodeState, (Error, Option<NodeState>)> {
        let deadline = Instant::now() + self.verify_wait;
        let backoff = ExponentialBackoff::new()
            .base_delay_ms(self.verify_poll.as_millis() as u64)
            .max_delay_ms((self.verify_poll.as_millis() as u64).max(5000))
            .multiplier(2.0)
            .max_attempts(u8::MAX)
            .jitter_factor(0.1);

        let mut attempt: u8 = 0;
        let mut last: Option<NodeState> = None;
        let mut last_status = String::from("no probe completed");

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            if let Ok(probe) = tokio::time::timeout(remaining, self.prober.probe_target(target)).await {
                last_status = probe.summary();
                if probe.reachable() {
                    last = Some(NodeState::from(&probe));
                }
                if probe.service_running() && probe.pid().is_some() && probe.pid() != old_pid {
                    return Ok(NodeState::from(&probe));
                }
            }

            let delay = {
                let mut rng = rng();
                backoff
                    .delay(attempt, &mut rng)
                    .map(Duration::from_millis)
                    .unwrap_or(self.verify_poll)
            };
            attempt = attempt.saturating_add(1);

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(delay.min(remaining)).await;
        }

        Err((
            Error::RestartUnverified {
                host: target.address().to_string(),
                waited_secs: self.verify_wait.as_secs(),
                message: format!("last seen: {}", last_status),
            },
            last,
        ))
    }
}
