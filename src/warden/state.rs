//! Remediation cycle state machine
//!
//! Explicit lifecycle for acting on one candidate at a time, using the
//! state-machines crate in dynamic dispatch mode. There is no edge from
//! `Restarting` back to `Idle`: every issued restart passes `Verifying`
//! or ends in `Halted`.

use crate::error::Error;
use state_machines::state_machine;

state_machine! {
    name: RemediationMachine,
    dynamic: true,
    initial: Idle,
    states: [Idle, Evaluating, Restarting, Verifying, Halted],
    events {
        evaluate {
            transition: { from: Idle, to: Evaluating }
        }
        skip {
            transition: { from: Evaluating, to: Idle }
        }
        restart {
            transition: { from: Evaluating, to: Restarting }
        }
        verify {
            transition: { from: Restarting, to: Verifying }
        }
        confirm {
            transition: { from: Verifying, to: Idle }
        }
        halt {
            transition: { from: [Restarting, Verifying], to: Halted }
        }
    }
}

/// Simple state enum for external use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Evaluating,
    Restarting,
    Verifying,
    Halted,
}

impl Phase {
    fn from_name(s: &str) -> Self {
        match s {
            "Evaluating" => Phase::Evaluating,
            "Restarting" => Phase::Restarting,
            "Verifying" => Phase::Verifying,
            "Halted" => Phase::Halted,
            _ => Phase::Idle,
        }
    }
}

/// One run's remediation cycle
pub struct RemediationCycle {
    machine: DynamicRemediationMachine<()>,
    /// Transitions taken, for the run record and tests
    history: Vec<Phase>,
}

impl RemediationCycle {
    pub fn new() -> Self {
        Self {
            machine: RemediationMachine::new(()).into_dynamic(),
            history: vec![Phase::Idle],
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_name(self.machine.current_state())
    }

    #[cfg(test)]
    pub fn is_halted(&self) -> bool {
        self.phase() == Phase::Halted
    }

    pub fn history(&self) -> &[Phase] {
        &self.history
    }

    fn fire(&mut self, event: RemediationMachineEvent, name: &str) -> crate::error::Result<()> {
        let from = self.phase();
        self.machine.handle(event).map_err(|e| {
            Error::StateTransition(format!("'{}' from {:?}: {:?}", name, from, e))
        })?;
        self.history.push(self.phase());
        Ok(())
    }

    pub fn evaluate(&mut self) -> crate::error::Result<()> {
        self.fire(RemediationMachineEvent::Evaluate, "evaluate")
    }

    pub fn skip(&mut self) -> crate::error::Result<()> {
        self.fire(RemediationMachineEvent::Skip, "skip")
    }

    pub fn restart(&mut self) -> crate::error::Result<()> {
        self.fire(RemediationMachineEvent::Restart, "restart")
    }

    pub fn verify(&mut self) -> crate::error::Result<()> {
        self.fire(RemediationMachineEvent::Verify, "verify")
    }

    pub fn confirm(&mut self) -> crate::error::Result<()> {
        self.fire(RemediationMachineEvent::Confirm, "confirm")
    }

    pub fn halt(&mut self) -> crate::error::Result<()> {
        self.fire(RemediationMachineEvent::Halt, "halt")
    }
}

impl Default for RemediationCycle {
    fn default() -> Self {
        Self::new()
    }
}
