//! Per-instance lifecycle state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle state of one worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Constructed, install not started.
    Parsed,
    Installing,
    /// Provisioned and waiting to activate.
    Installed,
    Activating,
    /// Routing requests.
    Activated,
    /// Superseded by a newer instance. Terminal.
    Redundant,
    /// Provisioning rejected. Terminal.
    Failed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
            WorkerState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Redundant | WorkerState::Failed)
    }

    pub fn can_transition(&self, to: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, to),
            (Parsed, Installing)
                | (Installing, Installed)
                | (Installing, Failed)
                | (Installed, Activating)
                | (Installed, Redundant)
                | (Activating, Activated)
                | (Activated, Redundant)
        )
    }

    /// Validate a transition, returning the new state.
    pub fn transition(self, to: WorkerState) -> Result<WorkerState, Error> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(Error::InvalidState { from: self.to_string(), to: to.to_string() })
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let state = WorkerState::Parsed
            .transition(WorkerState::Installing)
            .and_then(|s| s.transition(WorkerState::Installed))
            .and_then(|s| s.transition(WorkerState::Activating))
            .and_then(|s| s.transition(WorkerState::Activated))
            .unwrap();
        assert_eq!(state, WorkerState::Activated);
    }

    #[test]
    fn test_failed_only_from_installing() {
        assert!(WorkerState::Installing.can_transition(WorkerState::Failed));
        assert!(!WorkerState::Installed.can_transition(WorkerState::Failed));
        assert!(!WorkerState::Activated.can_transition(WorkerState::Failed));
    }

    #[test]
    fn test_terminal_states() {
        for to in [WorkerState::Installing, WorkerState::Activated, WorkerState::Parsed] {
            assert!(!WorkerState::Failed.can_transition(to));
            assert!(!WorkerState::Redundant.can_transition(to));
        }
        assert!(WorkerState::Failed.is_terminal());
        assert!(!WorkerState::Installed.is_terminal());
    }

    #[test]
    fn test_cannot_skip_install() {
        let err = WorkerState::Parsed.transition(WorkerState::Activating).unwrap_err();
        assert_eq!(err.to_string(), "INVALID_STATE: cannot move from parsed to activating");
    }
}
