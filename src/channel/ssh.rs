//! ssh-backed remote channel
//!
//! Runs one command per call through the system ssh client in batch
//! mode, using the dedicated key. No password prompts, ever.

use crate::channel::parse::{self, CommandFailure};
use crate::channel::{RemoteChannel, ServiceHealth};
use crate::error::{Error, Result};
use crate::manifest::KeelhaulConfig;
use crate::muster::Target;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Captured output of one remote command
struct RemoteOutput {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl RemoteOutput {
    fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Remote channel over the system ssh client
#[derive(Debug, Clone)]
pub struct SshChannel {
    binary: String,
    user: String,
    service: String,
    query_timeout: Duration,
    restart_timeout: Duration,
}

impl SshChannel {
    pub fn from_config(config: &KeelhaulConfig) -> Self {
        Self {
            binary: config.ssh.binary.clone(),
            user: config.ssh.user.clone(),
            service: config.service.name.clone(),
            query_timeout: config.probe.timeout(),
            restart_timeout: config.restart.command_timeout(),
        }
    }

    /// Full argument vector for running `remote` on `target`
    fn ssh_args(&self, target: &Target, remote: &str) -> Vec<String> {
        let connect_timeout = self.query_timeout.as_secs().max(1);
        vec![
            "-i".to_string(),
            target.identity().display().to_string(),
            "-p".to_string(),
            target.port().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            format!("{}@{}", self.user, target.address()),
            "--".to_string(),
            remote.to_string(),
        ]
    }

    async fn run(&self, target: &Target, remote: &str, timeout: Duration) -> Result<RemoteOutput> {
        debug!(host = %target, command = remote, "ssh exec");

        let child = Command::new(&self.binary)
            .args(self.ssh_args(target, remote))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Unreachable {
                host: target.address().to_string(),
                message: format!("failed to spawn {}: {}", self.binary, e),
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::Unreachable {
                    host: target.address().to_string(),
                    message: format!("failed to wait for ssh: {}", e),
                });
            }
            Err(_) => {
                return Err(Error::RemoteTimeout {
                    host: target.address().to_string(),
                    secs: timeout.as_secs(),
                });
            }
        };

        Ok(RemoteOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Map a failed query onto the probe error taxonomy
    fn query_error(target: &Target, query: &str, output: &RemoteOutput) -> Error {
        match parse::classify_failure(output.exit_code, &output.stderr) {
            CommandFailure::Transport => Error::Unreachable {
                host: target.address().to_string(),
                message: output.stderr.trim().to_string(),
            },
            _ => Error::MalformedResponse {
                host: target.address().to_string(),
                query: query.to_string(),
                output: format!("{}{}", output.stdout, output.stderr),
            },
        }
    }
}

impl RemoteChannel for SshChannel {
    async fn query_service_health(&self, target: &Target) -> Result<ServiceHealth> {
        let remote = format!("systemctl show -p MainPID --value {}", self.service);
        let output = self.run(target, &remote, self.query_timeout).await?;
        if !output.success() {
            return Err(Self::query_error(target, "MainPID", &output));
        }

        parse::parse_main_pid(&output.stdout).map_err(|message| Error::MalformedResponse {
            host: target.address().to_string(),
            query: "MainPID".to_string(),
            output: message,
        })
    }

    async fn query_memory_percent(&self, target: &Target, pid: u32) -> Result<Option<f64>> {
        let remote = format!("ps -p {} -o %mem=", pid);
        let output = self.run(target, &remote, self.query_timeout).await?;

        // ps exits 1 with empty output when the pid is gone
        if !output.success() && !(output.exit_code == Some(1) && output.stdout.trim().is_empty()) {
            return Err(Self::query_error(target, "%mem", &output));
        }

        parse::parse_mem_percent(&output.stdout).map_err(|message| Error::MalformedResponse {
            host: target.address().to_string(),
            query: "%mem".to_string(),
            output: message,
        })
    }

    async fn execute_restart(&self, target: &Target) -> Result<()> {
        let remote = format!("sudo -n systemctl restart {}", self.service);
        let output = self.run(target, &remote, self.restart_timeout).await?;
        if output.success() {
            return Ok(());
        }

        let message = output.stderr.trim().to_string();
        Err(match parse::classify_failure(output.exit_code, &output.stderr) {
            CommandFailure::Permission => Error::PermissionDenied {
                host: target.address().to_string(),
                command: remote,
                message,
            },
            CommandFailure::Transport => Error::Unreachable {
                host: target.address().to_string(),
                message,
            },
            CommandFailure::Remote => Error::RemoteCommand {
                host: target.address().to_string(),
                command: remote,
                message: format!("exit {:?}: {}", output.exit_code, message),
            },
        })
    }
}
