//! Coordinator lifecycle state machine.

use serde::Serialize;

/// Lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Running,
    ShutdownRequested,
    Draining,
    Terminated,
}

impl LifecycleState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::ShutdownRequested => 1,
            Self::Draining => 2,
            Self::Terminated => 3,
        }
    }

    /// Out-of-range values decode as `Terminated`, the only absorbing state.
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::ShutdownRequested,
            2 => Self::Draining,
            _ => Self::Terminated,
        }
    }

    /// Check if new work is accepted without restriction.
    pub fn is_accepting(self) -> bool {
        self == Self::Running
    }

    pub fn is_terminated(self) -> bool {
        self == Self::Terminated
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::ShutdownRequested => "shutdown_requested",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_accepts() {
        assert!(LifecycleState::Running.is_accepting());
        assert!(!LifecycleState::ShutdownRequested.is_accepting());
        assert!(!LifecycleState::Draining.is_accepting());
        assert!(LifecycleState::Terminated.is_terminated());
    }

    #[test]
    fn test_unknown_value_decodes_terminated() {
        assert_eq!(LifecycleState::from_u8(200), LifecycleState::Terminated);
    }
}
