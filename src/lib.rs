//! Health records client core.
//!
//! Umbrella crate re-exporting the workspace crates so host applications can
//! depend on `health-records-client` alone:
//!
//! - [`service`]: the [`CoreService`] façade and bootstrap helpers
//! - [`auth`]: sessions, the authenticated request pipeline and refresh
//! - [`runtime`]: configuration, events and logging

pub use core_auth as auth;
pub use core_runtime as runtime;
pub use core_service as service;

pub use core_auth::{
    AuthError, AuthenticatedClient, CredentialPair, FnHooks, Identity, NoopHooks,
    RegistrationRequest, SessionHooks, SessionManager, SessionState,
};
pub use core_runtime::config::{ApiConfig, CoreConfig};
pub use core_runtime::events::{AuthEvent, CoreEvent, RequestEvent};
pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
pub use core_service::{CoreError, CoreService};

#[cfg(feature = "desktop-shims")]
pub use core_service::bootstrap_desktop;
