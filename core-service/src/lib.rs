//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP and settings
//! storage) into the shared Rust core and hands the host a single
//! [`CoreService`] to talk to the health-records API through. Desktop apps
//! typically enable the `desktop-shims` feature, which lets the core fall back
//! to the reqwest client and the SQLite settings store from `bridge-desktop`.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use core_auth::{AuthenticatedClient, SessionHooks, SessionManager, SessionState};
use core_runtime::config::{ApiConfig, CoreConfig};
use core_runtime::events::{CoreEvent, EventBus, EventStream};
use tracing::info;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    api: ApiConfig,
    events: EventBus,
    sessions: Arc<SessionManager>,
}

impl CoreService {
    /// Create a service from a validated configuration. Persisted credentials
    /// are not loaded until [`initialize`](Self::initialize).
    pub fn new(config: &CoreConfig, hooks: Arc<dyn SessionHooks>) -> Self {
        let events = EventBus::new(config.event_buffer_size);
        let sessions = Arc::new(SessionManager::from_config(config, hooks, events.clone()));

        Self {
            api: config.api.clone(),
            events,
            sessions,
        }
    }

    /// Create a service and restore any persisted session.
    pub async fn bootstrap(config: CoreConfig, hooks: Arc<dyn SessionHooks>) -> Result<Self> {
        config.validate()?;
        let service = Self::new(&config, hooks);
        service.initialize().await?;
        Ok(service)
    }

    /// Load persisted credentials. Callable once.
    pub async fn initialize(&self) -> Result<SessionState> {
        let state = self.sessions.initialize().await?;
        info!(state = %state, base_url = %self.api.base_url, "Core service ready");
        Ok(state)
    }

    /// Account operations and session state.
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The authenticated request pipeline.
    pub fn client(&self) -> &AuthenticatedClient {
        self.sessions.client()
    }

    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to core events, optionally narrowed with
    /// [`EventStream::filter`].
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.events.subscribe())
    }

    /// Subscribe to authentication events only.
    pub fn subscribe_auth(&self) -> EventStream {
        self.subscribe()
            .filter(|event| matches!(event, CoreEvent::Auth(_)))
    }
}

/// Convenience bootstrapper for desktop hosts: default HTTP client, settings
/// database in the platform data directory.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// use core_auth::FnHooks;
/// use std::sync::Arc;
///
/// let hooks = FnHooks::new().with_on_failure(|| eprintln!("please sign in again"));
/// let core = core_service::bootstrap_desktop("https://records.example.org/api", Arc::new(hooks)).await?;
/// if !core.sessions().is_authenticated() {
///     core.sessions().login("alice", "correct horse").await?;
/// }
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(
    base_url: impl Into<String>,
    hooks: Arc<dyn SessionHooks>,
) -> Result<CoreService> {
    let config = CoreConfig::builder().base_url(base_url).build().await?;
    CoreService::bootstrap(config, hooks).await
}
