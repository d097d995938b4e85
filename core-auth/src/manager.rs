//! # Session Manager
//!
//! High-level authentication API for the host application.
//!
//! ## Overview
//!
//! The `SessionManager` wires the credential store, the session state machine,
//! the refresh coordinator and the request pipeline together, and adds the
//! account operations that sit outside the pipeline: login, registration,
//! logout, identity lookup and password change.
//!
//! Login and registration talk to the backend directly rather than through the
//! pipeline: a 401 from the login endpoint means "wrong password", not "expired
//! token", and must never start a refresh.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{FnHooks, SessionManager};
//! use core_runtime::config::CoreConfig;
//! use core_runtime::events::EventBus;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::builder()
//!     .base_url("https://records.example.org/api")
//!     .build()
//!     .await?;
//!
//! let hooks = FnHooks::new().with_on_failure(|| println!("session expired, back to /login"));
//! let manager = SessionManager::from_config(&config, Arc::new(hooks), EventBus::new(100));
//! manager.initialize().await?;
//!
//! if !manager.is_authenticated() {
//!     manager.login("alice", "correct horse").await?;
//! }
//!
//! let records: serde_json::Value = manager.client().get_json("/records").await?;
//! # let _ = records;
//! # Ok(())
//! # }
//! ```

use bridge_traits::{HttpClient, HttpRequest, HttpResponse, RetryPolicy, SettingsStore};
use bytes::Bytes;
use core_runtime::config::{ApiConfig, CoreConfig};
use core_runtime::events::{AuthEvent, EventBus};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::coordinator::RefreshCoordinator;
use crate::credential_store::CredentialStore;
use crate::error::{AuthError, Result};
use crate::hooks::SessionHooks;
use crate::pipeline::{check, AuthenticatedClient};
use crate::refresh::{HttpRefreshClient, RefreshClient};
use crate::session::Session;
use crate::state::SessionState;
use crate::types::{
    error_message, validate_password, CredentialPair, Identity, LoginForm, PasswordChange,
    RegistrationRequest, TokenResponse,
};

/// Entry point for everything authentication-related.
pub struct SessionManager {
    api: ApiConfig,
    http: Arc<dyn HttpClient>,
    session: Arc<Session>,
    coordinator: RefreshCoordinator,
    client: AuthenticatedClient,
    hooks: Arc<dyn SessionHooks>,
    events: EventBus,
    identity: RwLock<Option<Identity>>,
}

impl SessionManager {
    /// Creates a manager that refreshes through the backend's refresh endpoint.
    pub fn new(
        api: ApiConfig,
        http: Arc<dyn HttpClient>,
        settings: Arc<dyn SettingsStore>,
        hooks: Arc<dyn SessionHooks>,
        events: EventBus,
    ) -> Self {
        let refresher = Arc::new(HttpRefreshClient::new(http.clone(), api.refresh_url()));
        Self::with_refresh_client(api, http, settings, refresher, hooks, events)
    }

    /// Creates a manager with a custom [`RefreshClient`].
    pub fn with_refresh_client(
        api: ApiConfig,
        http: Arc<dyn HttpClient>,
        settings: Arc<dyn SettingsStore>,
        refresher: Arc<dyn RefreshClient>,
        hooks: Arc<dyn SessionHooks>,
        events: EventBus,
    ) -> Self {
        let session = Arc::new(Session::new(Arc::new(CredentialStore::new(settings))));
        let coordinator = RefreshCoordinator::new(
            session.clone(),
            refresher,
            hooks.clone(),
            events.clone(),
            api.refresh_timeout,
        );
        let client = AuthenticatedClient::new(
            http.clone(),
            session.clone(),
            coordinator.clone(),
            api.clone(),
            events.clone(),
        );

        Self {
            api,
            http,
            session,
            coordinator,
            client,
            hooks,
            events,
            identity: RwLock::new(None),
        }
    }

    /// Creates a manager from the bridges and API settings in `config`.
    pub fn from_config(config: &CoreConfig, hooks: Arc<dyn SessionHooks>, events: EventBus) -> Self {
        Self::new(
            config.api.clone(),
            config.http_client.clone(),
            config.settings_store.clone(),
            hooks,
            events,
        )
    }

    /// Restores persisted credentials. Call once at startup, before any
    /// request is sent.
    ///
    /// Returns [`AuthError::AlreadyInitialized`] on a second call.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<SessionState> {
        let state = self.session.initialize().await?;
        if state == SessionState::Authenticated {
            let user_id = match self.fetch_identity().await {
                Ok(identity) => Some(identity.id),
                Err(e) => {
                    warn!(error = %e, "Restored session but identity lookup failed");
                    None
                }
            };
            self.events.emit_auth(AuthEvent::SignedIn { user_id });
        }
        Ok(state)
    }

    /// Exchanges a username and password for a credential pair.
    ///
    /// # Errors
    ///
    /// - `AuthError::LoginFailed` - the backend rejected the credentials
    /// - `AuthError::Transport` - the backend could not be reached
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn login(&self, username: &str, password: &str) -> Result<CredentialPair> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput(
                "username and password are required".to_string(),
            ));
        }

        info!("Signing in");
        self.events.emit_auth(AuthEvent::SigningIn {
            username: username.to_string(),
        });

        let form = serde_urlencoded::to_string(LoginForm { username, password })
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        let request = HttpRequest::post(self.api.login_url())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(Bytes::from(form));

        let response = self.send_unauthenticated(request).await?;
        self.accept_tokens(response).await
    }

    /// Creates an account and signs it in.
    #[instrument(skip(self, registration), fields(username = %registration.username))]
    pub async fn register(&self, registration: RegistrationRequest) -> Result<CredentialPair> {
        registration.validate()?;

        info!("Registering account");
        self.events.emit_auth(AuthEvent::SigningIn {
            username: registration.username.clone(),
        });

        let request = HttpRequest::post(self.api.register_url())
            .json(&registration)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;

        let response = self.send_unauthenticated(request).await?;
        self.accept_tokens(response).await
    }

    /// Fetches the signed-in user and caches it.
    #[instrument(skip(self))]
    pub async fn fetch_identity(&self) -> Result<Identity> {
        if self.session.credentials().is_none() {
            return Err(AuthError::NotAuthenticated);
        }

        let identity: Identity = self.client.get_json(&self.api.identity_path).await?;
        debug!(user_id = %identity.id, "Fetched identity");
        *self.identity.write().await = Some(identity.clone());
        Ok(identity)
    }

    /// Ends the session.
    ///
    /// The backend is told on a best-effort basis; local credentials are
    /// cleared whether or not that call succeeds.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Some(pair) = self.session.credentials() {
            let request = HttpRequest::post(self.api.logout_url())
                .bearer_token(pair.access_token)
                .timeout(self.api.request_timeout);

            match self.http.execute_with_retry(request, RetryPolicy::none()).await {
                Ok(response) if !response.is_success() => {
                    debug!(status = response.status, "Logout call not accepted; clearing anyway")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Logout call failed; clearing anyway"),
            }
        }

        self.session.end().await;
        *self.identity.write().await = None;
        info!("Signed out");
        self.events.emit_auth(AuthEvent::SignedOut);
    }

    /// Changes the password of the signed-in user.
    #[instrument(skip(self, current_password, new_password))]
    pub async fn change_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        validate_password(new_password)?;
        if self.session.credentials().is_none() {
            return Err(AuthError::NotAuthenticated);
        }

        let request = HttpRequest::post(self.api.change_password_path.as_str())
            .json(&PasswordChange {
                current_password,
                new_password,
            })
            .map_err(|e| AuthError::Serialization(e.to_string()))?;

        check(self.client.execute(request).await?)?;
        info!("Password changed");
        Ok(())
    }

    /// The cached identity, if one has been fetched.
    pub async fn identity(&self) -> Option<Identity> {
        self.identity.read().await.clone()
    }

    pub async fn is_admin(&self) -> bool {
        self.identity
            .read()
            .await
            .as_ref()
            .map_or(false, Identity::is_admin)
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.state().holds_credentials()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The authenticated request pipeline.
    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    async fn send_unauthenticated(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = request.timeout(self.api.request_timeout);
        self.http
            .execute_with_retry(request, RetryPolicy::none())
            .await
            .map_err(|e| {
                self.events.emit_auth(AuthEvent::AuthError {
                    message: e.to_string(),
                    recoverable: true,
                });
                AuthError::Transport(e)
            })
    }

    /// Install the pair from a login or registration response.
    async fn accept_tokens(&self, response: HttpResponse) -> Result<CredentialPair> {
        if !response.is_success() {
            let message = error_message(&response.body);
            warn!(status = response.status, %message, "Sign-in rejected");
            self.events.emit_auth(AuthEvent::AuthError {
                message: message.clone(),
                recoverable: true,
            });
            return Err(AuthError::LoginFailed {
                status: response.status,
                message,
            });
        }

        let pair = TokenResponse::parse(&response.body)?.into_pair();
        self.session.establish(pair.clone()).await?;
        *self.identity.write().await = None;
        self.hooks.on_authenticated(&pair);

        let user_id = match self.fetch_identity().await {
            Ok(identity) => Some(identity.id),
            Err(e) => {
                warn!(error = %e, "Signed in but identity lookup failed");
                None
            }
        };

        info!("Signed in");
        self.events.emit_auth(AuthEvent::SignedIn { user_id });
        Ok(pair)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.api.base_url)
            .field("session", &self.session)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
