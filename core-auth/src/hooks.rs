//! Session Lifecycle Hooks
//!
//! Callbacks the host application supplies to react to session changes
//! without the core knowing anything about navigation or UI.

use crate::types::CredentialPair;

/// Host callbacks invoked by the core.
///
/// Both methods are synchronous and must return quickly; spawn work if more
/// is needed. They may run more than once over the life of a process (one
/// call per failure episode or credential change) and must tolerate that.
pub trait SessionHooks: Send + Sync {
    /// A refresh failed and the session was torn down; typically navigate to
    /// the login screen.
    fn on_irrecoverable_failure(&self) {}

    /// New credentials are available after login, registration or refresh.
    fn on_authenticated(&self, _credentials: &CredentialPair) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {}

/// Hooks built from closures.
///
/// ```
/// use core_auth::hooks::FnHooks;
///
/// let hooks = FnHooks::new().with_on_failure(|| println!("redirect to /login"));
/// ```
#[derive(Default)]
pub struct FnHooks {
    failure: Option<Box<dyn Fn() + Send + Sync>>,
    authenticated: Option<Box<dyn Fn(&CredentialPair) + Send + Sync>>,
}

impl FnHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_failure(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.failure = Some(Box::new(f));
        self
    }

    pub fn with_on_authenticated(mut self, f: impl Fn(&CredentialPair) + Send + Sync + 'static) -> Self {
        self.authenticated = Some(Box::new(f));
        self
    }
}

impl SessionHooks for FnHooks {
    fn on_irrecoverable_failure(&self) {
        if let Some(f) = &self.failure {
            f();
        }
    }

    fn on_authenticated(&self, credentials: &CredentialPair) {
        if let Some(f) = &self.authenticated {
            f(credentials);
        }
    }
}

impl std::fmt::Debug for FnHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHooks")
            .field("failure", &self.failure.is_some())
            .field("authenticated", &self.authenticated.is_some())
            .finish()
    }
}
