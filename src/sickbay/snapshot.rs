//! Fleet snapshot aggregation

use crate::muster::Target;
use crate::sickbay::prober::ProbeResult;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One consistent view of the fleet with a single reference time
#[derive(Debug, Clone, Serialize)]
pub struct FleetSnapshot {
    timestamp: DateTime<Utc>,
    results: Vec<ProbeResult>,
}

impl FleetSnapshot {
    /// Join probe results onto the inventory, stamping `at` once
    ///
    /// The snapshot always holds exactly one result per target, in
    /// inventory order. Targets without a result are unreachable; results
    /// for unknown targets and duplicates are dropped.
    pub fn aggregate(targets: &[Target], results: Vec<ProbeResult>, at: DateTime<Utc>) -> Self {
        let mut pool: Vec<Option<ProbeResult>> = results.into_iter().map(Some).collect();

        let results = targets
            .iter()
            .map(|target| {
                pool.iter_mut()
                    .find(|slot| slot.as_ref().is_some_and(|r| r.target() == target))
                    .and_then(Option::take)
                    .unwrap_or_else(|| {
                        ProbeResult::unreachable(target.clone(), "no probe result for target")
                    })
            })
            .collect();

        Self {
            timestamp: at,
            results,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn results(&self) -> &[ProbeResult] {
        &self.results
    }

    pub fn get(&self, target: &Target) -> Option<&ProbeResult> {
        self.results.iter().find(|r| r.target() == target)
    }

    /// Targets whose service is running
    pub fn healthy_count(&self) -> usize {
        self.results.iter().filter(|r| r.service_running()).count()
    }

    /// Healthy count ignoring the given targets
    pub fn healthy_count_excluding(&self, excluded: &[Target]) -> usize {
        self.results
            .iter()
            .filter(|r| r.service_running() && !excluded.contains(r.target()))
            .count()
    }

    /// Time elapsed since the snapshot was taken
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}
