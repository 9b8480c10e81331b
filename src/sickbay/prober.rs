//! Fleet probing
//!
//! Probes every target concurrently. A probe never fails the run: any
//! channel error or timeout degrades into an unreachable [`ProbeResult`].

use crate::channel::RemoteChannel;
use crate::error::Error;
use crate::muster::Target;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Health of the monitored service on one target, as observed once
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    target: Target,
    reachable: bool,
    service_running: bool,
    memory_pct: Option<f64>,
    pid: Option<u32>,
    error: Option<String>,
}

impl ProbeResult {
    /// Channel failed or timed out
    pub fn unreachable(target: Target, reason: impl Into<String>) -> Self {
        Self {
            target,
            reachable: false,
            service_running: false,
            memory_pct: None,
            pid: None,
            error: Some(reason.into()),
        }
    }

    /// Host answered, service has no main process
    pub fn stopped(target: Target) -> Self {
        Self {
            target,
            reachable: true,
            service_running: false,
            memory_pct: None,
            pid: None,
            error: None,
        }
    }

    pub fn running(target: Target, pid: u32, memory_pct: f64) -> Self {
        Self {
            target,
            reachable: true,
            service_running: true,
            memory_pct: Some(memory_pct),
            pid: Some(pid),
            error: None,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn reachable(&self) -> bool {
        self.reachable
    }

    pub fn service_running(&self) -> bool {
        self.service_running
    }

    pub fn memory_pct(&self) -> Option<f64> {
        self.memory_pct
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// One-line status for tables and logs
    pub fn summary(&self) -> String {
        match (self.reachable, self.pid, self.memory_pct) {
            (false, _, _) => format!(
                "unreachable ({})",
                self.error.as_deref().unwrap_or("no detail")
            ),
            (true, Some(pid), Some(mem)) => format!("running pid={} mem={:.1}%", pid, mem),
            _ => "stopped".to_string(),
        }
    }
}

/// Results of probing the whole fleet, in inventory order
#[derive(Debug)]
pub struct FleetProbe {
    pub results: Vec<ProbeResult>,
    /// Shutdown arrived before every target reported
    pub interrupted: bool,
}

/// Concurrent, bounded prober
pub struct Prober<C> {
    channel: Arc<C>,
    timeout: Duration,
}

impl<C> Clone for Prober<C> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            timeout: self.timeout,
        }
    }
}

impl<C: RemoteChannel> Prober<C> {
    pub fn new(channel: Arc<C>, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    /// Probe one target within the per-target bound
    pub async fn probe_target(&self, target: &Target) -> ProbeResult {
        probe_one(Arc::clone(&self.channel), target.clone(), self.timeout).await
    }

    /// Probe every target and wait for all of them
    pub async fn probe_fleet(&self, targets: &[Target]) -> Vec<ProbeResult> {
        self.probe_fleet_until(targets, std::future::pending()).await.results
    }

    /// Probe every target, giving up on the stragglers once `shutdown` resolves
    ///
    /// Unreported targets are recorded as unreachable.
    pub async fn probe_fleet_until<F>(&self, targets: &[Target], shutdown: F) -> FleetProbe
    where
        F: Future<Output = ()>,
    {
        let mut set = JoinSet::new();
        for (idx, target) in targets.iter().enumerate() {
            let channel = Arc::clone(&self.channel);
            let target = target.clone();
            let timeout = self.timeout;
            set.spawn(async move { (idx, probe_one(channel, target, timeout).await) });
        }

        let mut slots: Vec<Option<ProbeResult>> = vec![None; targets.len()];
        let mut interrupted = false;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!(pending = set.len(), "Probe interrupted; unreported targets marked unreachable");
                    set.abort_all();
                    interrupted = true;
                    break;
                }
                joined = set.join_next() => match joined {
                    Some(Ok((idx, result))) => slots[idx] = Some(result),
                    Some(Err(e)) => warn!(error = %e, "Probe task did not complete"),
                    None => break,
                },
            }
        }

        let reason = if interrupted {
            "probe interrupted before target reported"
        } else {
            "probe task did not report"
        };

        let results = slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| ProbeResult::unreachable(target.clone(), reason))
            })
            .collect();

        FleetProbe {
            results,
            interrupted,
        }
    }
}

async fn probe_one<C: RemoteChannel>(
    channel: Arc<C>,
    target: Target,
    timeout: Duration,
) -> ProbeResult {
    let query = async {
        let health = channel.query_service_health(&target).await?;
        let pid = match health.pid {
            Some(pid) if health.running => pid,
            _ => return Ok(None),
        };
        let mem = channel.query_memory_percent(&target, pid).await?;
        Ok::<_, Error>(mem.map(|mem| (pid, mem)))
    };

    let result = match tokio::time::timeout(timeout, query).await {
        Ok(Ok(Some((pid, mem)))) => ProbeResult::running(target, pid, mem),
        Ok(Ok(None)) => ProbeResult::stopped(target),
        Ok(Err(e)) => ProbeResult::unreachable(target, e.to_string()),
        Err(_) => ProbeResult::unreachable(
            target,
            format!("probe timed out after {}ms", timeout.as_millis()),
        ),
    };

    debug!(host = %result.target(), status = %result.summary(), "probed");
    result
}
