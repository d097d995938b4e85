//! Process-wide session: the state machine and the credential store, kept
//! consistent with each other.
//!
//! Every mutation validates the state transition first and swaps the
//! in-memory credentials under the same lock, so `Authenticated`/`Refreshing`
//! always pair with stored credentials and `Unauthenticated`/`Failed` with
//! none. Persistence is flushed after the lock is released.
//!
//! The session epoch increases on every login and logout. A refresh episode
//! records the epoch it started in; if the epoch moved by the time the
//! refresh settles, its outcome is discarded.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::credential_store::CredentialStore;
use crate::error::Result;
use crate::state::{transition, SessionEvent, SessionState};
use crate::types::CredentialPair;

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    epoch: u64,
}

/// How a refresh episode may begin.
#[derive(Debug)]
pub(crate) enum RefreshStart {
    /// State moved to `Refreshing`. `refresh_token` is `None` when the stored
    /// pair has no refresh token.
    Started {
        epoch: u64,
        refresh_token: Option<String>,
    },
    /// No credentials at all; nothing to refresh.
    NoCredentials,
}

pub struct Session {
    store: Arc<CredentialStore>,
    inner: Mutex<SessionInner>,
    state_tx: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            store,
            inner: Mutex::new(SessionInner {
                state: SessionState::Unauthenticated,
                epoch: 0,
            }),
            state_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    /// Load persisted credentials and set the initial state.
    pub async fn initialize(&self) -> Result<SessionState> {
        let pair = self.store.load().await?;

        let state = {
            let mut inner = self.lock();
            inner.state = if pair.is_some() {
                SessionState::Authenticated
            } else {
                SessionState::Unauthenticated
            };
            inner.state
        };

        self.publish(state);
        info!(state = %state, "Session initialized");
        Ok(state)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn credentials(&self) -> Option<CredentialPair> {
        self.store.get()
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// State and credentials observed together.
    pub fn snapshot(&self) -> (SessionState, Option<CredentialPair>) {
        let inner = self.lock();
        (inner.state, self.store.get())
    }

    pub(crate) fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Install credentials from a login or registration.
    ///
    /// Leaves `Failed` through `Reset` and replaces an existing session
    /// through `Logout` first. Returns the new epoch.
    pub async fn establish(&self, pair: CredentialPair) -> Result<u64> {
        let (state, epoch) = {
            let mut inner = self.lock();
            let mut state = inner.state;

            match state {
                SessionState::Failed => state = transition(state, SessionEvent::Reset)?,
                SessionState::Authenticated | SessionState::Refreshing => {
                    state = transition(state, SessionEvent::Logout)?
                }
                SessionState::Unauthenticated => {}
            }
            state = transition(state, SessionEvent::LoginSucceeded)?;

            inner.epoch += 1;
            inner.state = state;
            self.store.replace(Some(pair));
            (state, inner.epoch)
        };

        self.publish(state);
        self.store.flush().await;
        debug!(epoch, "Session established");
        Ok(epoch)
    }

    /// End the session. Always leaves the store empty and the state
    /// `Unauthenticated`.
    pub async fn end(&self) -> u64 {
        let epoch = {
            let mut inner = self.lock();
            if let Ok(state) = transition(inner.state, SessionEvent::Logout) {
                inner.state = state;
            }
            inner.epoch += 1;
            self.store.replace(None);
            inner.epoch
        };

        self.publish(SessionState::Unauthenticated);
        self.store.flush().await;
        debug!(epoch, "Session ended");
        epoch
    }

    pub(crate) fn begin_refresh(&self) -> RefreshStart {
        let mut inner = self.lock();
        let Some(pair) = self.store.get() else {
            return RefreshStart::NoCredentials;
        };

        match transition(inner.state, SessionEvent::CredentialRejected) {
            Ok(state) => {
                inner.state = state;
                let epoch = inner.epoch;
                drop(inner);
                self.publish(SessionState::Refreshing);
                RefreshStart::Started {
                    epoch,
                    refresh_token: pair.refresh_token,
                }
            }
            Err(_) => RefreshStart::NoCredentials,
        }
    }

    /// Store the rotated pair. `false` if the session changed since `epoch`.
    pub(crate) async fn complete_refresh(&self, epoch: u64, pair: CredentialPair) -> bool {
        let applied = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                false
            } else if let Ok(state) = transition(inner.state, SessionEvent::RefreshSucceeded) {
                inner.state = state;
                self.store.replace(Some(pair));
                true
            } else {
                false
            }
        };

        if applied {
            self.publish(SessionState::Authenticated);
            self.store.flush().await;
        }
        applied
    }

    /// Move to `Failed` and drop credentials. `false` if the session changed
    /// since `epoch`.
    pub(crate) async fn fail_refresh(&self, epoch: u64) -> bool {
        let applied = self.mark_failed(epoch);
        if applied {
            self.store.flush().await;
        }
        applied
    }

    /// In-memory part of [`fail_refresh`](Self::fail_refresh).
    pub(crate) fn mark_failed(&self, epoch: u64) -> bool {
        let applied = {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                false
            } else if let Ok(state) = transition(inner.state, SessionEvent::RefreshFailed) {
                inner.state = state;
                self.store.replace(None);
                true
            } else {
                false
            }
        };

        if applied {
            self.publish(SessionState::Failed);
        }
        applied
    }

    /// The stored pair, if the session is `Authenticated` and its access
    /// token differs from `rejected`.
    pub(crate) fn rotated_since(&self, rejected: Option<&str>) -> Option<CredentialPair> {
        let inner = self.lock();
        if inner.state != SessionState::Authenticated {
            return None;
        }
        self.store
            .get()
            .filter(|pair| Some(pair.access_token.as_str()) != rejected)
    }

    /// The stored pair, if the session is `Authenticated`.
    pub(crate) fn authenticated_credentials(&self) -> Option<CredentialPair> {
        let inner = self.lock();
        if inner.state == SessionState::Authenticated {
            self.store.get()
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Session")
            .field("state", &inner.state)
            .field("epoch", &inner.epoch)
            .finish()
    }
}
