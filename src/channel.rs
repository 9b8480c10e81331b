//! Remote command channel
//!
//! Narrow interface the prober and warden use to talk to a target. The
//! ssh adapter parses raw command output; everything above this module
//! only sees typed results.

pub mod parse;
pub mod ssh;

#[cfg(test)]
pub mod fake;

use crate::error::Result;
use crate::muster::Target;
use serde::Serialize;
use std::future::Future;

pub use ssh::SshChannel;

/// Service manager view of the monitored service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub running: bool,
    /// Main process id; absent when not running
    pub pid: Option<u32>,
}

impl ServiceHealth {
    pub fn running(pid: u32) -> Self {
        Self {
            running: true,
            pid: Some(pid),
        }
    }

    pub fn stopped() -> Self {
        Self {
            running: false,
            pid: None,
        }
    }
}

/// Operations the engine needs from a target host
pub trait RemoteChannel: Send + Sync + 'static {
    /// Whether the service runs, and its main pid
    fn query_service_health(
        &self,
        target: &Target,
    ) -> impl Future<Output = Result<ServiceHealth>> + Send;

    /// Resident memory of `pid` as a percentage of system memory
    ///
    /// `None` means the process no longer exists.
    fn query_memory_percent(
        &self,
        target: &Target,
        pid: u32,
    ) -> impl Future<Output = Result<Option<f64>>> + Send;

    /// Issue the scoped privileged restart of the service
    fn execute_restart(&self, target: &Target) -> impl Future<Output = Result<()>> + Send;
}
