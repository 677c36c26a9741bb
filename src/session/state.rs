use tracing::{debug, warn};

/// Lifecycle of a session's process.
///
/// `Created → Spawning → Running → Exited(code)`, with `Failed` reachable from
/// `Spawning` (PTY or spawn error) and `Running` (lost track of the process).
/// Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Spawning,
    Running,
    /// The process ended; `None` when it was killed by a signal.
    Exited(Option<i32>),
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited(_) | Self::Failed)
    }

    pub fn can_advance_to(&self, next: &SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Spawning)
                | (Self::Spawning, Self::Running)
                | (Self::Spawning, Self::Failed)
                | (Self::Running, Self::Exited(_))
                | (Self::Running, Self::Failed)
        )
    }

    /// Move to `next`. Invalid transitions are logged and ignored.
    pub fn advance(&mut self, next: SessionState) {
        if self.can_advance_to(&next) {
            debug!(from = ?*self, to = ?next, "Session state change");
            *self = next;
        } else {
            warn!(from = ?*self, to = ?next, "Ignoring invalid session state change");
        }
    }
}
