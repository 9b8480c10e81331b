//! Scripted in-memory channel for tests

use crate::channel::{RemoteChannel, ServiceHealth};
use crate::error::{Error, Result};
use crate::muster::Target;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How a fake node answers
#[derive(Debug, Clone)]
pub enum NodeScript {
    /// Service running with the given pid and memory
    Running { pid: u32, mem: f64 },
    /// Service stopped
    Stopped,
    /// Connection refused
    Unreachable,
    /// Never answers
    Hang,
    /// Answers garbage to the memory query
    Garbled { pid: u32 },
}

/// How a fake node reacts to a restart
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RestartScript {
    /// Comes back with a new pid at the given memory
    Recover { mem_after: f64 },
    /// sudo refuses
    Deny,
    /// Command succeeds but the pid never changes
    Stuck,
    /// Remote command exits non-zero
    Fail,
}

#[derive(Debug)]
struct FakeNode {
    script: NodeScript,
    on_restart: RestartScript,
}

/// Every call the fake received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Health(String),
    Memory(String, u32),
    Restart(String),
}

#[derive(Default)]
pub struct FakeChannel {
    nodes: Mutex<HashMap<String, FakeNode>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    restart_delay: Option<Duration>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(self, address: &str, script: NodeScript) -> Self {
        self.node_with_restart(address, script, RestartScript::Recover { mem_after: 5.0 })
    }

    pub fn node_with_restart(
        self,
        address: &str,
        script: NodeScript,
        on_restart: RestartScript,
    ) -> Self {
        self.nodes
            .lock()
            .unwrap()
            .insert(address.to_string(), FakeNode { script, on_restart });
        self
    }

    /// Hold each restart open for a while so overlap would be observable
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = Some(delay);
        self
    }

    /// Change a node's state between probes
    pub fn set_script(&self, address: &str, script: NodeScript) {
        if let Some(node) = self.nodes.lock().unwrap().get_mut(address) {
            node.script = script;
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn restarts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Restart(host) => Some(host),
                _ => None,
            })
            .collect()
    }

    pub fn max_concurrent_restarts(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn script(&self, target: &Target) -> NodeScript {
        self.nodes
            .lock()
            .unwrap()
            .get(target.address())
            .map(|n| n.script.clone())
            .unwrap_or(NodeScript::Unreachable)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn unreachable(target: &Target) -> Error {
        Error::Unreachable {
            host: target.address().to_string(),
            message: "Connection refused".to_string(),
        }
    }
}

impl RemoteChannel for FakeChannel {
    async fn query_service_health(&self, target: &Target) -> Result<ServiceHealth> {
        self.record(Call::Health(target.address().to_string()));
        match self.script(target) {
            NodeScript::Running { pid, .. } | NodeScript::Garbled { pid } => {
                Ok(ServiceHealth::running(pid))
            }
            NodeScript::Stopped => Ok(ServiceHealth::stopped()),
            NodeScript::Unreachable => Err(Self::unreachable(target)),
            NodeScript::Hang => std::future::pending().await,
        }
    }

    async fn query_memory_percent(&self, target: &Target, pid: u32) -> Result<Option<f64>> {
        self.record(Call::Memory(target.address().to_string(), pid));
        match self.script(target) {
            NodeScript::Running { pid: live, mem } if live == pid => Ok(Some(mem)),
            NodeScript::Running { .. } | NodeScript::Stopped => Ok(None),
            NodeScript::Garbled { .. } => Err(Error::MalformedResponse {
                host: target.address().to_string(),
                query: "%mem".to_string(),
                output: "ps: bad option".to_string(),
            }),
            NodeScript::Unreachable => Err(Self::unreachable(target)),
            NodeScript::Hang => std::future::pending().await,
        }
    }

    async fn execute_restart(&self, target: &Target) -> Result<()> {
        self.record(Call::Restart(target.address().to_string()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.restart_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut nodes = self.nodes.lock().unwrap();
        let Some(node) = nodes.get_mut(target.address()) else {
            return Err(Self::unreachable(target));
        };

        match (node.on_restart, node.script.clone()) {
            (RestartScript::Deny, _) => Err(Error::PermissionDenied {
                host: target.address().to_string(),
                command: "sudo -n systemctl restart memhog".to_string(),
                message: "sudo: a password is required".to_string(),
            }),
            (RestartScript::Fail, _) => Err(Error::RemoteCommand {
                host: target.address().to_string(),
                command: "sudo -n systemctl restart memhog".to_string(),
                message: "exit Some(1): Job for memhog.service failed".to_string(),
            }),
            (RestartScript::Stuck, _) => Ok(()),
            (RestartScript::Recover { mem_after }, NodeScript::Running { pid, .. }) => {
                node.script = NodeScript::Running {
                    pid: pid + 1000,
                    mem: mem_after,
                };
                Ok(())
            }
            (RestartScript::Recover { mem_after }, _) => {
                node.script = NodeScript::Running {
                    pid: 1000,
                    mem: mem_after,
                };
                Ok(())
            }
        }
    }
}
