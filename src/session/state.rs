//! Session lifecycle states and the transitions between them

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Unconnected = 0,
    Negotiating = 1,
    Ready = 2,
    Closed = 3,
    Failed = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport attached.
    Connect,
    NegotiationSucceeded,
    NegotiationFailed,
    Close,
    ProtocolViolation,
}

impl SessionState {
    /// `Closed` and `Failed` are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    pub fn accepts_registration(self) -> bool {
        matches!(self, Self::Unconnected | Self::Negotiating)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Negotiating => "negotiating",
            Self::Ready => "ready",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }

    /// Returns the next state, or `None` when `event` is not valid in `self`.
    ///
    /// Closing a terminal session is allowed and leaves it unchanged. Closing
    /// while negotiating fails the in-flight handshake.
    pub fn next(self, event: SessionEvent) -> Option<Self> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Unconnected, Connect) => Some(Negotiating),
            (Unconnected, Close) => Some(Closed),
            (Negotiating, NegotiationSucceeded) => Some(Ready),
            (Negotiating, NegotiationFailed | ProtocolViolation | Close) => Some(Failed),
            (Ready, Close) => Some(Closed),
            (Ready, ProtocolViolation) => Some(Failed),
            (Closed | Failed, Close) => Some(self),
            _ => None,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unconnected,
            1 => Self::Negotiating,
            2 => Self::Ready,
            3 => Self::Closed,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{SessionEvent::*, SessionState::*, *};

    #[test]
    fn happy_path() {
        let state = Unconnected.next(Connect).expect("connect");
        assert_eq!(state, Negotiating);
        let state = state.next(NegotiationSucceeded).expect("negotiated");
        assert_eq!(state, Ready);
        assert_eq!(state.next(Close), Some(Closed));
    }

    #[test]
    fn terminal_states_absorb_everything_but_close() {
        for terminal in [Closed, Failed] {
            assert!(terminal.is_terminal());
            assert_eq!(terminal.next(Close), Some(terminal));
            assert_eq!(terminal.next(Connect), None);
            assert_eq!(terminal.next(NegotiationSucceeded), None);
            assert_eq!(terminal.next(ProtocolViolation), None);
        }
    }

    #[test]
    fn only_one_ready_period() {
        assert_eq!(Ready.next(NegotiationSucceeded), None);
        assert_eq!(Ready.next(Connect), None);
        assert_eq!(Ready.next(ProtocolViolation), Some(Failed));
    }

    #[test]
    fn close_during_negotiation_fails_the_session() {
        assert_eq!(Negotiating.next(Close), Some(Failed));
        assert_eq!(Negotiating.next(NegotiationFailed), Some(Failed));
    }

    #[test]
    fn registration_window_ends_at_ready() {
        assert!(Unconnected.accepts_registration());
        assert!(Negotiating.accepts_registration());
        assert!(!Ready.accepts_registration());
        assert!(!Closed.accepts_registration());
    }

    #[test]
    fn round_trips_through_u8() {
        for state in [Unconnected, Negotiating, Ready, Closed, Failed] {
            assert_eq!(SessionState::from_u8(state as u8), state);
        }
    }
}
