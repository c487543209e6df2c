use thiserror::Error;

/// Process-wide run state owned by the orchestrating core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum LifecycleState {
    /// Not monitoring; configuration may change.
    #[default]
    Idle = 0,
    /// Workload under measurement; workers drain the event buffer.
    Running = 1,
    /// Stop requested; workers drain until the buffer is empty.
    Stopping = 2,
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("invalid lifecycle transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// State the machine was in.
    pub from: LifecycleState,
    /// Requested state.
    pub to: LifecycleState,
}

impl LifecycleState {
    /// Converts the state to the value published to the accelerator.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a published value back into a state.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Running),
            2 => Some(Self::Stopping),
            _ => None,
        }
    }

    /// Returns true for the single legal successor of this state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running) | (Self::Running, Self::Stopping) | (Self::Stopping, Self::Idle)
        )
    }

    /// Applies a transition, enforcing `Idle -> Running -> Stopping -> Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for any other pair.
    pub const fn transition(self, next: Self) -> Result<Self, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}
