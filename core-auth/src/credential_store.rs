//! Credential Store
//!
//! Holds the current [`CredentialPair`] in memory and writes it through to
//! client-local storage under two keys, `token` and `refreshToken`, which are
//! always written and removed together in one transaction.
//!
//! Persistence is a durability optimization: failures are logged and the
//! in-memory value stays authoritative for the lifetime of the process.
//!
//! Outside this crate the store is read-only. Credentials change through
//! [`Session::establish`](crate::session::Session::establish) and
//! [`Session::end`](crate::session::Session::end), which keep the session
//! state in step with the stored pair.

use bridge_traits::{BridgeError, SettingsStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{AuthError, Result};
use crate::types::CredentialPair;

/// Storage key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "token";
/// Storage key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

pub struct CredentialStore {
    settings: Arc<dyn SettingsStore>,
    current: RwLock<Option<CredentialPair>>,
    /// Serializes writes to persistence so the last flush always wins.
    persist_lock: Mutex<()>,
    loaded: AtomicBool,
}

impl CredentialStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self {
            settings,
            current: RwLock::new(None),
            persist_lock: Mutex::new(()),
            loaded: AtomicBool::new(false),
        }
    }

    /// Current credentials. No side effects.
    pub fn get(&self) -> Option<CredentialPair> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Hydrate from persistence. Callable once per store.
    ///
    /// A persisted refresh token without an access token is treated as no
    /// session and scrubbed.
    #[instrument(skip(self))]
    pub(crate) async fn load(&self) -> Result<Option<CredentialPair>> {
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Err(AuthError::AlreadyInitialized);
        }

        let access = self.read_key(ACCESS_TOKEN_KEY).await;
        let refresh = self.read_key(REFRESH_TOKEN_KEY).await;

        let pair = match (access, refresh) {
            (Some(access_token), refresh_token) => Some(CredentialPair {
                access_token,
                refresh_token,
            }),
            (None, Some(_)) => {
                warn!("Discarding persisted refresh token without access token");
                if let Err(e) = self.settings.delete(REFRESH_TOKEN_KEY).await {
                    warn!(error = %e, "Failed to remove orphaned refresh token");
                }
                None
            }
            (None, None) => None,
        };

        debug!(
            found = pair.is_some(),
            has_refresh_token = pair.as_ref().map_or(false, |p| p.refresh_token.is_some()),
            "Loaded persisted credentials"
        );

        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = pair.clone();
        Ok(pair)
    }

    /// In-memory swap only. Callers follow up with [`flush`](Self::flush).
    pub(crate) fn replace(&self, pair: Option<CredentialPair>) {
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = pair;
    }

    /// Write the current in-memory value to persistence.
    pub(crate) async fn flush(&self) {
        let _guard = self.persist_lock.lock().await;
        let pair = self.get();

        let result = match &pair {
            Some(pair) => self.write_pair(pair).await,
            None => self.remove_pair().await,
        };

        match result {
            Ok(()) => debug!(present = pair.is_some(), "Persisted credentials"),
            Err(e) => warn!(error = %e, "Failed to persist credentials; continuing in memory"),
        }
    }

    async fn read_key(&self, key: &str) -> Option<String> {
        match self.settings.get_string(key).await {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read persisted credential");
                None
            }
        }
    }

    async fn write_pair(&self, pair: &CredentialPair) -> std::result::Result<(), BridgeError> {
        let mut tx = self.settings.begin_transaction().await?;
        tx.set_string(ACCESS_TOKEN_KEY, &pair.access_token).await?;
        match pair.refresh_token() {
            Some(refresh_token) => tx.set_string(REFRESH_TOKEN_KEY, refresh_token).await?,
            None => tx.delete(REFRESH_TOKEN_KEY).await?,
        }
        tx.commit().await
    }

    async fn remove_pair(&self) -> std::result::Result<(), BridgeError> {
        let mut tx = self.settings.begin_transaction().await?;
        tx.delete(ACCESS_TOKEN_KEY).await?;
        tx.delete(REFRESH_TOKEN_KEY).await?;
        tx.commit().await
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("present", &self.get().is_some())
            .field("loaded", &self.loaded.load(Ordering::SeqCst))
            .finish()
    }
}
