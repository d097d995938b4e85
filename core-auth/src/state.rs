//! Session state machine.
//!
//! | Event                | From                               | To              |
//! |----------------------|------------------------------------|-----------------|
//! | `LoginSucceeded`     | Unauthenticated                    | Authenticated   |
//! | `CredentialRejected` | Authenticated                      | Refreshing      |
//! | `RefreshSucceeded`   | Refreshing                         | Authenticated   |
//! | `RefreshFailed`      | Refreshing                         | Failed          |
//! | `Reset`              | Failed                             | Unauthenticated |
//! | `Logout`             | Authenticated, Refreshing, Failed  | Unauthenticated |
//!
//! Everything else is rejected and leaves the state untouched.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AuthError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SessionState {
    #[default]
    Unauthenticated,
    Authenticated,
    Refreshing,
    /// Terminal until an explicit login.
    Failed,
}

impl SessionState {
    /// Whether a credential pair must be present in this state.
    pub fn holds_credentials(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Refreshing)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Authenticated => "authenticated",
            SessionState::Refreshing => "refreshing",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionEvent {
    LoginSucceeded,
    CredentialRejected,
    RefreshSucceeded,
    RefreshFailed,
    /// Explicit login leaving `Failed`.
    Reset,
    Logout,
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionEvent::LoginSucceeded => "login succeeded",
            SessionEvent::CredentialRejected => "credential rejected",
            SessionEvent::RefreshSucceeded => "refresh succeeded",
            SessionEvent::RefreshFailed => "refresh failed",
            SessionEvent::Reset => "reset",
            SessionEvent::Logout => "logout",
        };
        f.write_str(name)
    }
}

/// The state `event` leads to from `from`, if the transition is legal.
pub fn next_state(from: SessionState, event: SessionEvent) -> Option<SessionState> {
    use SessionEvent::*;
    use SessionState::*;

    match (from, event) {
        (Unauthenticated, LoginSucceeded) => Some(Authenticated),
        (Authenticated, CredentialRejected) => Some(Refreshing),
        (Refreshing, RefreshSucceeded) => Some(Authenticated),
        (Refreshing, RefreshFailed) => Some(Failed),
        (Failed, Reset) => Some(Unauthenticated),
        (Authenticated | Refreshing | Failed, Logout) => Some(Unauthenticated),
        _ => None,
    }
}

/// Like [`next_state`], but an illegal transition is an error.
pub fn transition(from: SessionState, event: SessionEvent) -> Result<SessionState> {
    next_state(from, event).ok_or(AuthError::InvalidTransition { from, event })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [SessionState; 4] = [
        SessionState::Unauthenticated,
        SessionState::Authenticated,
        SessionState::Refreshing,
        SessionState::Failed,
    ];

    const EVENTS: [SessionEvent; 6] = [
        SessionEvent::LoginSucceeded,
        SessionEvent::CredentialRejected,
        SessionEvent::RefreshSucceeded,
        SessionEvent::RefreshFailed,
        SessionEvent::Reset,
        SessionEvent::Logout,
    ];

    #[test]
    fn test_exactly_eight_legal_transitions() {
        let legal = STATES
            .iter()
            .flat_map(|&from| EVENTS.iter().map(move |&event| (from, event)))
            .filter(|&(from, event)| next_state(from, event).is_some())
            .count();
        assert_eq!(legal, 8);
    }

    #[test]
    fn test_refresh_cycle() {
        let state = transition(SessionState::Unauthenticated, SessionEvent::LoginSucceeded).unwrap();
        let state = transition(state, SessionEvent::CredentialRejected).unwrap();
        assert_eq!(state, SessionState::Refreshing);
        assert_eq!(
            transition(state, SessionEvent::RefreshSucceeded).unwrap(),
            SessionState::Authenticated
        );
        assert_eq!(
            transition(state, SessionEvent::RefreshFailed).unwrap(),
            SessionState::Failed
        );
    }

    #[test]
    fn test_failed_is_terminal_until_reset_or_logout() {
        for event in [
            SessionEvent::LoginSucceeded,
            SessionEvent::CredentialRejected,
            SessionEvent::RefreshSucceeded,
            SessionEvent::RefreshFailed,
        ] {
            assert!(next_state(SessionState::Failed, event).is_none());
        }
        assert_eq!(
            next_state(SessionState::Failed, SessionEvent::Reset),
            Some(SessionState::Unauthenticated)
        );
    }

    #[test]
    fn test_illegal_transition_reports_both_sides() {
        let err = transition(SessionState::Unauthenticated, SessionEvent::Logout).unwrap_err();
        assert!(matches!(
            err,
            AuthError::InvalidTransition {
                from: SessionState::Unauthenticated,
                event: SessionEvent::Logout
            }
        ));
        assert_eq!(err.to_string(), "Invalid session transition: logout while unauthenticated");
    }

    #[test]
    fn test_credential_expectations() {
        assert!(SessionState::Authenticated.holds_credentials());
        assert!(SessionState::Refreshing.holds_credentials());
        assert!(!SessionState::Unauthenticated.holds_credentials());
        assert!(!SessionState::Failed.holds_credentials());
    }
}
