//! # Core Configuration Module
//!
//! Builder-based configuration for the health records client core.
//!
//! ## Overview
//!
//! [`CoreConfig`] holds the host bridges the core talks through and the
//! [`ApiConfig`] describing where the backend lives. The builder validates
//! everything up front so a misconfigured client fails at startup, not on the
//! first request.
//!
//! ## Dependencies
//!
//! - `HttpClient`: outbound transport (desktop default: reqwest)
//! - `SettingsStore`: client-local durable storage for the credential pair
//!   (desktop default: SQLite in the platform data directory)
//!
//! Without the `desktop-shims` feature both must be injected.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{ApiConfig, CoreConfig};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .api(ApiConfig::from_env()?)
//!     .http_client(Arc::new(MyHttpClient))
//!     .settings_store(Arc::new(MySettingsStore))
//!     .build()
//!     .await?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{HttpClient, SettingsStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding [`ApiConfig::base_url`].
pub const ENV_BASE_URL: &str = "HEALTH_API_BASE_URL";
/// Environment variable overriding [`ApiConfig::request_timeout`] (seconds).
pub const ENV_TIMEOUT_SECS: &str = "HEALTH_API_TIMEOUT_SECS";
/// Environment variable overriding [`ApiConfig::refresh_timeout`] (seconds).
pub const ENV_REFRESH_TIMEOUT_SECS: &str = "HEALTH_REFRESH_TIMEOUT_SECS";

const MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// Application name used for the default settings location.
pub const APP_NAME: &str = "health-records-client";

/// Backend location and auth endpoint layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Prefix for relative request paths. The default `/api` only suits
    /// transports that resolve paths themselves; the reqwest client needs an
    /// absolute `http(s)://` URL.
    pub base_url: String,
    pub refresh_path: String,
    pub login_path: String,
    pub register_path: String,
    pub logout_path: String,
    pub identity_path: String,
    pub change_password_path: String,
    /// Applied to every pipeline request that does not set its own timeout
    pub request_timeout: Duration,
    /// Upper bound for one refresh call; elapsing counts as refresh failure
    pub refresh_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "/api".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            login_path: "/auth/token".to_string(),
            register_path: "/auth/register".to_string(),
            logout_path: "/auth/logout".to_string(),
            identity_path: "/users/me".to_string(),
            change_password_path: "/auth/change-password".to_string(),
            request_timeout: Duration::from_secs(30),
            refresh_timeout: Duration::from_secs(30),
        }
    }
}

impl ApiConfig {
    /// Defaults overlaid with `HEALTH_API_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(base_url) = lookup(ENV_BASE_URL) {
            config.base_url = base_url;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            config.request_timeout = parse_secs(ENV_TIMEOUT_SECS, &secs)?;
        }
        if let Some(secs) = lookup(ENV_REFRESH_TIMEOUT_SECS) {
            config.refresh_timeout = parse_secs(ENV_REFRESH_TIMEOUT_SECS, &secs)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Whether the base URL carries an `http://` or `https://` scheme.
    pub fn has_absolute_base(&self) -> bool {
        is_absolute(self.base_url.trim())
    }

    /// Resolve `path` against the base URL. Absolute URLs are returned as-is.
    pub fn url(&self, path: &str) -> String {
        if is_absolute(path) {
            return path.to_string();
        }

        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    pub fn refresh_url(&self) -> String {
        self.url(&self.refresh_path)
    }

    pub fn login_url(&self) -> String {
        self.url(&self.login_path)
    }

    pub fn register_url(&self) -> String {
        self.url(&self.register_path)
    }

    pub fn logout_url(&self) -> String {
        self.url(&self.logout_path)
    }

    pub fn identity_url(&self) -> String {
        self.url(&self.identity_path)
    }

    pub fn change_password_url(&self) -> String {
        self.url(&self.change_password_path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("API base URL cannot be empty".to_string()));
        }

        for (name, path) in [
            ("refresh", &self.refresh_path),
            ("login", &self.login_path),
            ("register", &self.register_path),
            ("logout", &self.logout_path),
            ("identity", &self.identity_path),
            ("change-password", &self.change_password_path),
        ] {
            if path.trim().is_empty() {
                return Err(Error::Config(format!("{} endpoint path cannot be empty", name)));
            }
        }

        for (name, timeout) in [
            ("Request", self.request_timeout),
            ("Refresh", self.refresh_timeout),
        ] {
            if timeout.is_zero() {
                return Err(Error::Config(format!(
                    "{} timeout must be greater than 0",
                    name
                )));
            }
            if timeout > MAX_TIMEOUT {
                return Err(Error::Config(format!(
                    "{} timeout exceeds maximum of {} seconds",
                    name,
                    MAX_TIMEOUT.as_secs()
                )));
            }
        }

        Ok(())
    }
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| Error::InvalidEnv {
            key: key.to_string(),
            value: value.to_string(),
            message: "expected a whole number of seconds".to_string(),
        })
}

/// Core configuration. Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub api: ApiConfig,

    pub http_client: Arc<dyn HttpClient>,

    /// Durable storage for the persisted credential pair
    pub settings_store: Arc<dyn SettingsStore>,

    /// Per-subscriber buffer of the event bus
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api", &self.api)
            .field("http_client", &"HttpClient { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        self.api.validate()?;

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn http_client_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "HttpClient implementation is required to reach the backend. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestHttpClient. \
                 Other hosts: inject a platform-native HTTP client."
            .to_string(),
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "SettingsStore implementation is required to persist the session. \
                 Desktop: enable the 'desktop-shims' feature to use the default SqliteSettingsStore. \
                 Web: inject a localStorage-backed settings store."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(api: &ApiConfig) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    if !api.has_absolute_base() {
        return Err(Error::Config(format!(
            "API base URL '{}' must be an absolute http(s) URL for the default HttpClient",
            api.base_url
        )));
    }

    let client = ReqwestHttpClient::with_timeout(api.request_timeout).map_err(|e| {
        Error::BridgeInit(format!("default HttpClient: {}", e))
    })?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_api: &ApiConfig) -> Result<Arc<dyn HttpClient>> {
    Err(http_client_missing_error())
}

#[cfg(feature = "desktop-shims")]
async fn provide_default_settings_store(
    settings_path: Option<PathBuf>,
) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;

    let path = match settings_path {
        Some(path) => path,
        None => SqliteSettingsStore::default_path(APP_NAME).map_err(|e| Error::CapabilityMissing {
            capability: "SettingsStore".to_string(),
            message: format!("No settings location available: {}", e),
        })?,
    };

    let store = SqliteSettingsStore::open(&path).await.map_err(|e| {
        Error::BridgeInit(format!("default SettingsStore: {}", e))
    })?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
async fn provide_default_settings_store(
    _settings_path: Option<PathBuf>,
) -> Result<Arc<dyn SettingsStore>> {
    Err(settings_store_missing_error())
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    api: Option<ApiConfig>,
    http_client: Option<Arc<dyn HttpClient>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    settings_path: Option<PathBuf>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the backend configuration. Default: [`ApiConfig::default`].
    pub fn api(mut self, api: ApiConfig) -> Self {
        self.api = Some(api);
        self
    }

    /// Shorthand for overriding only the base URL of the current API config.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        let api = self.api.take().unwrap_or_default();
        self.api = Some(api.with_base_url(base_url));
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the reqwest-based desktop default is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the settings store implementation.
    ///
    /// If not provided, a SQLite store is opened at
    /// [`settings_path`](Self::settings_path) (or the platform data directory)
    /// when the `desktop-shims` feature is enabled.
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Location of the default SQLite settings database.
    pub fn settings_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    /// Default: [`DEFAULT_EVENT_BUFFER_SIZE`].
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the API configuration is invalid, or the base URL
    ///   is relative while the default reqwest client is selected
    /// - `Error::CapabilityMissing` if a bridge is missing and no default exists
    /// - `Error::BridgeInit` if a default bridge fails to initialize
    pub async fn build(self) -> Result<CoreConfig> {
        let api = self.api.unwrap_or_default();
        api.validate()?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(&api)?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(self.settings_path).await?,
        };

        let config = CoreConfig {
            api,
            http_client,
            settings_store,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;
        Ok(config)
    }
}
