//! One remediation run, end to end
//!
//! probe -> aggregate -> triage -> warden -> logbook. Nothing survives
//! between runs except what the logbook writes.

use crate::channel::RemoteChannel;
use crate::error::Result;
use crate::logbook::{self, Logbook, RunRecord, TriggerMarker};
use crate::manifest::KeelhaulConfig;
use crate::muster::{Muster, Target};
use crate::sickbay::triage::{self, Decision, SafetyPolicy};
use crate::sickbay::{FleetSnapshot, Prober};
use crate::warden::{Remediation, Warden};
use chrono::Utc;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the pipeline against one remote channel
pub struct Patrol<C> {
    config: KeelhaulConfig,
    prober: Prober<C>,
    warden: Warden<C>,
}

impl<C: RemoteChannel> Patrol<C> {
    pub fn new(config: KeelhaulConfig, channel: Arc<C>) -> Self {
        let prober = Prober::new(channel, config.probe.timeout());
        let warden = Warden::new(prober.clone(), &config);
        Self {
            config,
            prober,
            warden,
        }
    }

    /// Assemble from pre-built parts, e.g. with shortened timing
    #[cfg(test)]
    pub fn from_parts(config: KeelhaulConfig, prober: Prober<C>, warden: Warden<C>) -> Self {
        Self {
            config,
            prober,
            warden,
        }
    }

    pub fn policy(&self) -> SafetyPolicy {
        SafetyPolicy::from_config(&self.config)
    }

    /// Probe and triage without acting
    pub async fn survey(&self, targets: &[Target]) -> (FleetSnapshot, Vec<Decision>) {
        let results = self.prober.probe_fleet(targets).await;
        let snapshot = FleetSnapshot::aggregate(targets, results, Utc::now());
        let decisions = triage::evaluate(&snapshot, &self.policy());
        (snapshot, decisions)
    }

    /// Full run; always yields a record
    ///
    /// If `shutdown` resolves during probing, unreported targets count as
    /// unreachable and no restart is attempted.
    pub async fn run<F>(&self, muster: &Muster, dry_run: bool, shutdown: F) -> RunRecord
    where
        F: Future<Output = ()>,
    {
        let started = Utc::now();
        let targets = &muster.targets;

        info!(
            targets = targets.len(),
            source = %muster.source,
            service = %self.config.service.name,
            "Probing fleet"
        );
        let probe = self.prober.probe_fleet_until(targets, shutdown).await;
        let snapshot = FleetSnapshot::aggregate(targets, probe.results, Utc::now());
        let mut decisions = triage::evaluate(&snapshot, &self.policy());

        info!(
            healthy = snapshot.healthy_count(),
            approved = decisions.iter().filter(|d| d.is_restart()).count(),
            "Fleet assessed"
        );

        let remediation = if probe.interrupted {
            warn!("Run interrupted during probing; no restarts attempted");
            for decision in decisions.iter_mut().filter(|d| d.is_restart()) {
                let peers = decision.healthy_peer_count;
                decision.convert_to_skip(triage::Reason::Interrupted, peers);
            }
            Remediation::default()
        } else if dry_run {
            info!("Dry run; approved restarts not executed");
            Remediation::default()
        } else {
            self.warden.execute(targets, &snapshot, &mut decisions).await
        };

        RunRecord {
            run_id: logbook::stamp(started),
            timestamp: snapshot.timestamp(),
            service: self.config.service.name.clone(),
            threshold_percent: self.config.service.threshold_percent,
            min_other_healthy: self.config.quorum.min_other_healthy,
            inventory_source: muster.source,
            skipped_lines: muster.skipped.clone(),
            dry_run,
            interrupted: probe.interrupted,
            snapshot,
            decisions,
            remediation,
        }
    }
}

/// Resolve when `signal` fires; never, if the signal cannot be watched
///
/// A failed signal registration must not read as a shutdown request.
pub async fn shutdown_on<F, E>(signal: F)
where
    F: Future<Output = std::result::Result<(), E>>,
    E: std::fmt::Display,
{
    match signal.await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!(error = %e, "Cannot watch for shutdown; run is not interruptible");
            std::future::pending::<()>().await
        }
    }
}

/// Paths written for one run
#[derive(Debug)]
pub struct LoggedRun {
    pub record: PathBuf,
    pub triggers: Vec<PathBuf>,
}

/// Write trigger markers for issued restarts, then the run record
pub fn log_run(logbook: &Logbook, record: &RunRecord) -> Result<LoggedRun> {
    let mut triggers = Vec::new();

    for outcome in record
        .remediation
        .outcomes
        .iter()
        .filter(|o| o.status.was_issued())
    {
        let marker = TriggerMarker::from_outcome(outcome, &record.service, record.threshold_percent);
        match logbook.write_trigger(&marker) {
            Ok(path) => {
                info!(host = %outcome.target, path = %path.display(), "Trigger marker written");
                triggers.push(path);
            }
            // The run record still documents the restart
            Err(e) => warn!(host = %outcome.target, error = %e, "Failed to write trigger marker"),
        }
    }

    let path = logbook.write_run(record)?;
    info!(path = %path.display(), "Run record written");

    Ok(LoggedRun {
        record: path,
        triggers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::fake::{FakeChannel, NodeScript, RestartScript};
    use crate::muster::{parse_inventory, InventorySource};
    use crate::sickbay::triage::{Action, Reason};
    use crate::warden::OutcomeStatus;
    use std::path::Path;
    use std::time::Duration;

    fn muster(addrs: &str) -> Muster {
        parse_inventory(addrs, InventorySource::File, 22, Path::new("/k"))
    }

    fn patrol(channel: FakeChannel) -> (Patrol<FakeChannel>, Arc<FakeChannel>) {
        let mut config = KeelhaulConfig::default();
        config.probe.fresh_for_secs = 0;
        let channel = Arc::new(channel);
        let prober = Prober::new(Arc::clone(&channel), Duration::from_millis(200));
        let warden = Warden::new(prober.clone(), &config).with_timing(
            Duration::ZERO,
            Duration::from_millis(300),
            Duration::from_millis(20),
        );
        (Patrol::from_parts(config, prober, warden), channel)
    }

    #[tokio::test]
    async fn test_scenario_b_no_restarts_no_markers() {
        let (patrol, channel) = patrol(
            FakeChannel::new()
                .node("t1", NodeScript::Stopped)
                .node("t2", NodeScript::Running { pid: 20, mem: 40.0 }),
        );
        let record = patrol
            .run(&muster("t1\nt2\n"), false, std::future::pending())
            .await;

        assert_eq!(record.decisions.len(), 2);
        assert!(record.decisions.iter().all(|d| d.action == Action::Skip));
        assert_eq!(record.decisions[0].reason, Reason::NotRunning);
        assert!(matches!(record.decisions[1].reason, Reason::WithinThreshold { .. }));
        assert!(channel.restarts().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let logged = log_run(&Logbook::new(dir.path()), &record).unwrap();
        assert!(logged.triggers.is_empty());
        assert!(logged.record.exists());
        assert!(Logbook::new(dir.path()).list_triggers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_c_last_healthy_node_kept() {
        let (patrol, channel) = patrol(
            FakeChannel::new()
                .node("t1", NodeScript::Running { pid: 10, mem: 80.0 })
                .node("t2", NodeScript::Unreachable),
        );
        let record = patrol
            .run(&muster("t1\nt2\n"), false, std::future::pending())
            .await;

        assert_eq!(record.snapshot.healthy_count(), 1);
        assert!(matches!(record.decisions[0].reason, Reason::QuorumShortfall { .. }));
        assert_eq!(record.decisions[0].healthy_peer_count, 0);
        assert!(channel.restarts().is_empty());
    }

    #[tokio::test]
    async fn test_scenario_d_marker_has_differing_pids() {
        let (patrol, _channel) = patrol(
            FakeChannel::new()
                .node("t1", NodeScript::Running { pid: 10, mem: 80.0 })
                .node("t2", NodeScript::Running { pid: 20, mem: 30.0 }),
        );
        let record = patrol
            .run(&muster("t1\nt2\n"), false, std::future::pending())
            .await;
        assert_eq!(record.remediation.outcomes[0].status, OutcomeStatus::Succeeded);
        assert!(!record.restarts_failed());

        let dir = tempfile::tempdir().unwrap();
        let logbook = Logbook::new(dir.path());
        let logged = log_run(&logbook, &record).unwrap();
        assert_eq!(logged.triggers.len(), 1);

        let markers = logbook.list_triggers().unwrap();
        assert_eq!(markers[0].1.host, "t1");
        assert_eq!(markers[0].1.pre_pid, Some(10));
        assert_eq!(markers[0].1.post_pid, Some(1010));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&logged.record).unwrap()).unwrap();
        assert_eq!(json["decisions"][0]["action"], "restart");
        assert_eq!(json["remediation"]["outcomes"][0]["status"], "succeeded");
        assert_eq!(json["snapshot"]["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_all_unreachable_all_skip() {
        let (patrol, channel) = patrol(
            FakeChannel::new()
                .node("t1", NodeScript::Unreachable)
                .node("t2", NodeScript::Hang),
        );
        let record = patrol
            .run(&muster("t1\nt2\n"), false, std::future::pending())
            .await;

        assert!(record.decisions.iter().all(|d| d.action == Action::Skip));
        assert!(record.remediation.outcomes.is_empty());
        assert!(channel.restarts().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_keeps_decision_but_does_not_act() {
        let (patrol, channel) = patrol(
            FakeChannel::new()
                .node("t1", NodeScript::Running { pid: 10, mem: 80.0 })
                .node("t2", NodeScript::Running { pid: 20, mem: 30.0 }),
        );
        let record = patrol
            .run(&muster("t1\nt2\n"), true, std::future::pending())
            .await;

        assert!(record.dry_run);
        assert!(record.decisions[0].is_restart());
        assert!(record.remediation.outcomes.is_empty());
        assert!(channel.restarts().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_run_still_produces_record() {
        let (patrol, channel) = patrol(
            FakeChannel::new()
                .node("t1", NodeScript::Hang)
                .node("t2", NodeScript::Hang),
        );
        let record = patrol
            .run(&muster("t1\nt2\n"), false, std::future::ready(()))
            .await;

        assert!(record.interrupted);
        assert_eq!(record.decisions.len(), 2);
        assert!(channel.restarts().is_empty());
    }

    #[tokio::test]
    async fn test_unwatchable_signal_does_not_interrupt() {
        let (patrol, channel) = patrol(
            FakeChannel::new()
                .node("t1", NodeScript::Running { pid: 10, mem: 80.0 })
                .node("t2", NodeScript::Running { pid: 20, mem: 30.0 }),
        );
        let signal = async { Err::<(), _>(std::io::Error::other("no signal driver")) };
        let record = patrol
            .run(&muster("t1\nt2\n"), false, shutdown_on(signal))
            .await;

        assert!(!record.interrupted);
        assert!(record.snapshot.results().iter().all(|r| r.reachable()));
        assert_eq!(channel.restarts(), vec!["t1".to_string()]);
    }

    #[tokio::test]
    async fn test_delivered_signal_interrupts() {
        let (patrol, channel) = patrol(
            FakeChannel::new()
                .node("t1", NodeScript::Hang)
                .node("t2", NodeScript::Hang),
        );
        let signal = async { Ok::<(), std::io::Error>(()) };
        let record = patrol
            .run(&muster("t1\nt2\n"), false, shutdown_on(signal))
            .await;

        assert!(record.interrupted);
        assert!(channel.restarts().is_empty());
    }

    #[tokio::test]
    async fn test_failed_restart_is_surfaced() {
        let (patrol, _channel) = patrol(
            FakeChannel::new()
                .node_with_restart(
                    "t1",
                    NodeScript::Running { pid: 10, mem: 80.0 },
                    RestartScript::Deny,
                )
                .node("t2", NodeScript::Running { pid: 20, mem: 30.0 }),
        );
        let record = patrol
            .run(&muster("t1\nt2\n"), false, std::future::pending())
            .await;
        assert!(record.restarts_failed());

        // Rejected restarts leave no trigger marker
        let dir = tempfile::tempdir().unwrap();
        let logged = log_run(&Logbook::new(dir.path()), &record).unwrap();
        assert!(logged.triggers.is_empty());
    }
}
