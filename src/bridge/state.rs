//! Listener state machine.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of a bridge's listener.
///
/// `Idle -> Running -> Stopped`. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListenerState {
    #[default]
    Idle,
    Running,
    Stopped,
}

impl ListenerState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Stopped => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Shared, cheaply cloneable view of a listener's state.
///
/// Written only by the listener task; any clone can read it from another
/// thread.
#[derive(Debug, Clone, Default)]
pub struct ListenerStatus(Arc<AtomicU8>);

impl ListenerStatus {
    /// Current state.
    #[must_use]
    pub fn get(&self) -> ListenerState {
        ListenerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Whether the listener is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.get() == ListenerState::Running
    }

    pub(crate) fn transition(&self, new_state: ListenerState) {
        let old = self.0.swap(new_state.as_u8(), Ordering::AcqRel);
        tracing::debug!(
            from = ?ListenerState::from_u8(old),
            to = ?new_state,
            "Listener state transition"
        );
    }
}
