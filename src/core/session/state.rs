use std::fmt;

/// Where the device's prompt is believed to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No prompt synchronised since the link was opened.
    Disconnected,
    /// At the friendly prompt after an interrupt.
    Interrupted,
    /// In raw mode, ready for source text.
    RawMode,
    /// Source submitted and its blocks not fully read, or the device is
    /// running a program. Only `reset()` leaves this state.
    Executing,
}

impl SessionState {
    /// States from which a new submission is well framed.
    pub fn accepts_source(self) -> bool {
        matches!(self, SessionState::Interrupted | SessionState::RawMode)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Interrupted => write!(f, "interrupted-ready"),
            SessionState::RawMode => write!(f, "raw-mode-ready"),
            SessionState::Executing => write!(f, "executing"),
        }
    }
}
