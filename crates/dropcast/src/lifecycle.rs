//! Connection lifecycle state machine.

use std::fmt;

/// The lifecycle state of one connection.
///
/// Transitions are strictly ordered — no skipping states:
///
/// ```text
/// Connecting → Joined → Closing → Closed
/// ```
///
/// - **Connecting**: Upgraded and gated, not yet in any channel.
/// - **Joined**: Registered in its channel; the read loop is running.
/// - **Closing**: The read loop ended (peer close, read error, idle
///   timeout, forced close after eviction, or server shutdown).
/// - **Closed**: Left the registry and released the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Connecting,
    Joined,
    Closing,
    Closed,
}

impl LifecycleState {
    /// Returns the state that follows this one, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Connecting => Some(Self::Joined),
            Self::Joined => Some(Self::Closing),
            Self::Closing => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Returns `true` if transitioning to `target` is valid.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Joined => write!(f, "Joined"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
