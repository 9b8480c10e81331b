//! Parsing of raw remote command output
//!
//! Pure functions so the ssh adapter's interpretation of systemctl, ps
//! and sudo output can be tested without a remote host.

use crate::channel::ServiceHealth;

/// ssh reserves this exit status for its own failures
pub const SSH_EXIT_FAILURE: i32 = 255;

/// stderr fragments sudo prints when the scoped command is refused
const SUDO_REFUSALS: &[&str] = &[
    "a password is required",
    "is not allowed to execute",
    "not in the sudoers",
    "may not run sudo",
    "sorry, user",
];

/// Parse `systemctl show -p MainPID --value <unit>` output
///
/// Empty output or `0` means the unit has no main process.
pub fn parse_main_pid(output: &str) -> Result<ServiceHealth, String> {
    let value = output.trim();
    if value.is_empty() {
        return Ok(ServiceHealth::stopped());
    }

    match value.parse::<u32>() {
        Ok(0) => Ok(ServiceHealth::stopped()),
        Ok(pid) => Ok(ServiceHealth::running(pid)),
        Err(_) => Err(format!("expected numeric MainPID, got {:?}", value)),
    }
}

/// Parse `ps -p <pid> -o %mem=` output
///
/// Empty output means the process vanished between queries.
pub fn parse_mem_percent(output: &str) -> Result<Option<f64>, String> {
    let value = output.trim();
    if value.is_empty() {
        return Ok(None);
    }

    // Some locales print a decimal comma
    let normalized = value.replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(pct) if pct.is_finite() && (0.0..=100.0).contains(&pct) => Ok(Some(pct)),
        Ok(pct) => Err(format!("memory percentage out of range: {}", pct)),
        Err(_) => Err(format!("expected numeric %mem, got {:?}", value)),
    }
}

/// How a failed remote command should be classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFailure {
    /// ssh itself could not connect or authenticate
    Transport,
    /// sudo refused the scoped command
    Permission,
    /// The remote command ran and failed
    Remote,
}

/// Classify a non-zero exit from an ssh invocation
pub fn classify_failure(exit_code: Option<i32>, stderr: &str) -> CommandFailure {
    let lower = stderr.to_lowercase();
    if SUDO_REFUSALS.iter().any(|needle| lower.contains(needle)) {
        return CommandFailure::Permission;
    }
    if exit_code == Some(SSH_EXIT_FAILURE) {
        return CommandFailure::Transport;
    }
    CommandFailure::Remote
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_pid_running() {
        assert_eq!(parse_main_pid("4321\n"), Ok(ServiceHealth::running(4321)));
    }

    #[test]
    fn test_main_pid_zero_or_empty_is_stopped() {
        assert_eq!(parse_main_pid("0\n"), Ok(ServiceHealth::stopped()));
        assert_eq!(parse_main_pid("  \n"), Ok(ServiceHealth::stopped()));
        assert_eq!(parse_main_pid("0").unwrap().pid, None);
    }

    #[test]
    fn test_main_pid_garbage_is_error() {
        assert!(parse_main_pid("Failed to connect to bus").is_err());
        assert!(parse_main_pid("-1").is_err());
    }

    #[test]
    fn test_mem_percent_variants() {
        assert_eq!(parse_mem_percent(" 75.3\n"), Ok(Some(75.3)));
        assert_eq!(parse_mem_percent("12,5"), Ok(Some(12.5)));
        assert_eq!(parse_mem_percent("0.0"), Ok(Some(0.0)));
        assert_eq!(parse_mem_percent(""), Ok(None));
        assert!(parse_mem_percent("abc").is_err());
        assert!(parse_mem_percent("130.0").is_err());
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure(Some(1), "sudo: a password is required\n"),
            CommandFailure::Permission
        );
        assert_eq!(
            classify_failure(
                Some(1),
                "Sorry, user vagrant is not allowed to execute '/bin/systemctl restart memhog' as root"
            ),
            CommandFailure::Permission
        );
        assert_eq!(
            classify_failure(Some(255), "ssh: connect to host 10.0.0.1 port 22: No route to host"),
            CommandFailure::Transport
        );
        assert_eq!(
            classify_failure(Some(5), "Job for memhog.service failed"),
            CommandFailure::Remote
        );
    }
}
