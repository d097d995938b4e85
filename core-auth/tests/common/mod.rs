//! Shared fixtures for the core-auth integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::SqliteSettingsStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{HttpClient, HttpRequest, HttpResponse};
use core_auth::{
    AuthenticatedClient, CredentialPair, CredentialStore, RefreshClient, RefreshCoordinator,
    RefreshFailure, Session, SessionHooks,
};
use core_runtime::config::ApiConfig;
use core_runtime::events::EventBus;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Backend that accepts a configurable set of access tokens and answers 401
/// to everything else.
#[derive(Default)]
pub struct TokenCheckingBackend {
    accepted: Mutex<Vec<String>>,
    seen: Mutex<Vec<Option<String>>>,
}

impl TokenCheckingBackend {
    pub fn accepting(tokens: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            accepted: Mutex::new(tokens.iter().map(|t| t.to_string()).collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Bearer tokens of every request received, in order. `None` means the
    /// request carried no credential.
    pub fn seen(&self) -> Vec<Option<String>> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count_with(&self, token: &str) -> usize {
        self.seen()
            .iter()
            .filter(|t| t.as_deref() == Some(token))
            .count()
    }
}

#[async_trait]
impl HttpClient for TokenCheckingBackend {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let bearer = request.bearer().map(str::to_string);
        self.seen.lock().unwrap().push(bearer.clone());

        let accepted = bearer
            .as_ref()
            .map_or(false, |b| self.accepted.lock().unwrap().contains(b));

        if accepted {
            Ok(HttpResponse::new(
                200,
                format!(r#"{{"url":"{}"}}"#, request.url),
            ))
        } else {
            Ok(HttpResponse::new(401, r#"{"detail":"Could not validate credentials"}"#))
        }
    }
}

/// What the scripted refresh call does once released.
#[derive(Clone)]
pub enum RefreshScript {
    Rotate(CredentialPair),
    Fail(RefreshFailure),
    Hang,
    Panic,
}

/// Refresh client that optionally blocks until [`release`](Self::release)
/// and then follows its script.
pub struct ScriptedRefresher {
    script: RefreshScript,
    gated: bool,
    gate: Notify,
    calls: AtomicUsize,
    tokens: Mutex<Vec<String>>,
}

impl ScriptedRefresher {
    pub fn immediate(script: RefreshScript) -> Arc<Self> {
        Arc::new(Self::build(script, false))
    }

    pub fn gated(script: RefreshScript) -> Arc<Self> {
        Arc::new(Self::build(script, true))
    }

    fn build(script: RefreshScript, gated: bool) -> Self {
        Self {
            script,
            gated,
            gate: Notify::new(),
            calls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl RefreshClient for ScriptedRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, RefreshFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(refresh_token.to_string());

        if self.gated {
            self.gate.notified().await;
        }

        match &self.script {
            RefreshScript::Rotate(pair) => Ok(pair.clone()),
            RefreshScript::Fail(failure) => Err(failure.clone()),
            RefreshScript::Hang => std::future::pending().await,
            RefreshScript::Panic => panic!("refresh client crashed"),
        }
    }
}

pub struct Harness {
    pub backend: Arc<TokenCheckingBackend>,
    pub refresher: Arc<ScriptedRefresher>,
    pub settings: Arc<SqliteSettingsStore>,
    pub session: Arc<Session>,
    pub coordinator: RefreshCoordinator,
    pub client: AuthenticatedClient,
    pub events: EventBus,
}

pub struct HarnessBuilder {
    stored: Option<CredentialPair>,
    backend: Arc<TokenCheckingBackend>,
    refresher: Arc<ScriptedRefresher>,
    hooks: Arc<dyn SessionHooks>,
    refresh_timeout: Duration,
}

impl HarnessBuilder {
    pub fn new(backend: Arc<TokenCheckingBackend>, refresher: Arc<ScriptedRefresher>) -> Self {
        Self {
            stored: None,
            backend,
            refresher,
            hooks: Arc::new(core_auth::NoopHooks),
            refresh_timeout: Duration::from_secs(5),
        }
    }

    pub fn stored(mut self, pair: CredentialPair) -> Self {
        self.stored = Some(pair);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub async fn build(self) -> Harness {
        let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        let session = Arc::new(Session::new(Arc::new(CredentialStore::new(settings.clone()))));
        session.initialize().await.unwrap();
        if let Some(pair) = self.stored {
            session.establish(pair).await.unwrap();
        }

        let events = EventBus::new(64);
        let coordinator = RefreshCoordinator::new(
            session.clone(),
            self.refresher.clone(),
            self.hooks,
            events.clone(),
            self.refresh_timeout,
        );
        let api = ApiConfig::default().with_base_url("https://records.example.org/api");
        let client = AuthenticatedClient::new(
            self.backend.clone(),
            session.clone(),
            coordinator.clone(),
            api,
            events.clone(),
        );

        Harness {
            backend: self.backend,
            refresher: self.refresher,
            settings,
            session,
            coordinator,
            client,
            events,
        }
    }
}

/// Wait until `count` callers are queued on the running refresh episode.
pub async fn wait_for_waiters(coordinator: &RefreshCoordinator, count: usize) {
    for _ in 0..400 {
        if coordinator.waiting() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {count} waiters, found {}",
        coordinator.waiting()
    );
}
