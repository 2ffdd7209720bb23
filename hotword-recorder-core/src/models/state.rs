/// Listener state machine.
///
/// State transitions:
/// ```text
/// not_running → listening ⟲ (one detection cycle)
///                   ↓
///              interrupted → not_running
///                   ↓
///              terminated (absorbing)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    NotRunning,
    Listening,
    Interrupted,
    Terminated,
}

impl ListenerState {
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listening)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Whether `start` may be called from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::NotRunning | Self::Interrupted)
    }
}
