//! XMPP session lifecycle states.

use std::fmt;

/// Lifecycle of one XMPP session.
///
/// Only `Ready` accepts outbound sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticated,
    Ready,
    Disconnecting,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Any state may drop straight to `Disconnected` on a fatal error.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Authenticated)
                | (Connecting, Disconnecting)
                | (Authenticated, Ready)
                | (Authenticated, Disconnecting)
                | (Ready, Disconnecting)
        )
    }

    pub fn accepts_sends(self) -> bool {
        self == ConnectionState::Ready
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Authenticated => "Authenticated",
            ConnectionState::Ready => "Ready",
            ConnectionState::Disconnecting => "Disconnecting",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Authenticated));
        assert!(Authenticated.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Disconnecting));
        assert!(Disconnecting.can_transition_to(Disconnected));
    }

    #[test]
    fn test_fatal_error_from_any_state() {
        for state in [Connecting, Authenticated, Ready, Disconnecting] {
            assert!(state.can_transition_to(Disconnected));
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Disconnected.can_transition_to(Ready));
        assert!(!Connecting.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Connecting));
        assert!(!Disconnecting.can_transition_to(Ready));
    }

    #[test]
    fn test_only_ready_accepts_sends() {
        assert!(Ready.accepts_sends());
        for state in [Disconnected, Connecting, Authenticated, Disconnecting] {
            assert!(!state.accepts_sends());
        }
    }
}
