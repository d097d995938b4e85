//! # Authentication Module
//!
//! Bearer-token session handling for the health-records client.
//!
//! ## Overview
//!
//! Every API request goes through an [`AuthenticatedClient`], which attaches
//! the stored access token. When the backend answers 401 the client asks the
//! [`RefreshCoordinator`] for a new pair; however many requests are rejected
//! at once, exactly one refresh call is made and every request is replayed
//! once with its result. A failed refresh clears the stored credentials and
//! notifies the host once through [`SessionHooks`].
//!
//! ## Features
//!
//! - Write-through credential persistence (`token` / `refreshToken`)
//! - Explicit session state machine with guarded transitions
//! - Single-flight refresh with bounded duration
//! - Retry-once request pipeline
//! - Login, registration, logout, identity and password change
//! - Auth event emission on the core event bus

pub mod coordinator;
pub mod credential_store;
pub mod error;
pub mod hooks;
pub mod manager;
pub mod pipeline;
pub mod refresh;
pub mod session;
pub mod state;
pub mod types;

pub use coordinator::{RefreshCoordinator, RefreshOutcome};
pub use credential_store::{CredentialStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
pub use error::{AuthError, RefreshFailure, Result};
pub use hooks::{FnHooks, NoopHooks, SessionHooks};
pub use manager::SessionManager;
pub use pipeline::AuthenticatedClient;
pub use refresh::{HttpRefreshClient, RefreshClient};
pub use session::Session;
pub use state::{SessionEvent, SessionState};
pub use types::{CredentialPair, Identity, RegistrationRequest, TokenResponse};
