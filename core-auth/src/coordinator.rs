//! Refresh Coordinator
//!
//! Collapses concurrent refresh demand into a single refresh call and fans
//! its one outcome out to every caller.
//!
//! The coordinator owns an in-flight flag and a queue of waiters. The first
//! caller to find the flag clear sets it and spawns the refresh episode; every
//! caller, the first included, then enqueues a oneshot receiver and waits.
//! When the episode settles the queue is drained in arrival order and the flag
//! is cleared, all under one lock, so no caller can slip between the outcome
//! and the release.
//!
//! The episode runs as its own task: dropping a waiting caller never cancels
//! the refresh other callers depend on.

use core_runtime::events::{AuthEvent, EventBus};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::RefreshFailure;
use crate::hooks::SessionHooks;
use crate::refresh::RefreshClient;
use crate::session::{RefreshStart, Session};
use crate::types::CredentialPair;

pub type RefreshOutcome = Result<CredentialPair, RefreshFailure>;

#[derive(Default)]
struct Flight {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
    episodes: u64,
}

struct Inner {
    session: Arc<Session>,
    client: Arc<dyn RefreshClient>,
    hooks: Arc<dyn SessionHooks>,
    events: EventBus,
    refresh_timeout: Duration,
    flight: Mutex<Flight>,
}

/// Single-flight refresh coordinator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        session: Arc<Session>,
        client: Arc<dyn RefreshClient>,
        hooks: Arc<dyn SessionHooks>,
        events: EventBus,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                client,
                hooks,
                events,
                refresh_timeout,
                flight: Mutex::new(Flight::default()),
            }),
        }
    }

    /// Obtain a fresh credential pair, starting a refresh or joining the one
    /// in flight.
    ///
    /// On failure the session has already been torn down and the failure
    /// hook has fired once for the whole episode.
    pub async fn request_refresh(&self) -> RefreshOutcome {
        self.join_or_lead(None).await
    }

    /// Refresh on behalf of a request rejected while carrying
    /// `rejected_access_token`.
    ///
    /// If the stored credential already differs from the rejected one (an
    /// earlier episode rotated it while the request was on the wire), the
    /// current pair is returned without a refresh call.
    pub async fn refresh_after_rejection(&self, rejected_access_token: Option<&str>) -> RefreshOutcome {
        self.join_or_lead(Some(rejected_access_token)).await
    }

    /// Whether a refresh episode is currently running.
    pub fn is_refreshing(&self) -> bool {
        self.inner.flight().in_flight
    }

    /// Callers currently waiting on the running episode.
    pub fn waiting(&self) -> usize {
        self.inner.flight().waiters.len()
    }

    /// Number of refresh episodes started so far.
    pub fn episodes(&self) -> u64 {
        self.inner.flight().episodes
    }

    async fn join_or_lead(&self, rejected: Option<Option<&str>>) -> RefreshOutcome {
        let receiver = {
            let mut flight = self.inner.flight();

            if !flight.in_flight {
                if let Some(rejected) = rejected {
                    if let Some(current) = self.inner.session.rotated_since(rejected) {
                        debug!("Rejected credential already rotated; reusing current pair");
                        return Ok(current);
                    }
                }

                flight.in_flight = true;
                flight.episodes += 1;
                let inner = Arc::clone(&self.inner);
                tokio::spawn(inner.run_episode());
            }

            let (tx, rx) = oneshot::channel();
            flight.waiters.push_back(tx);
            rx
        };

        receiver.await.unwrap_or(Err(RefreshFailure::Abandoned))
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flight = self.inner.flight();
        f.debug_struct("RefreshCoordinator")
            .field("in_flight", &flight.in_flight)
            .field("waiting", &flight.waiters.len())
            .field("episodes", &flight.episodes)
            .finish()
    }
}

impl Inner {
    fn flight(&self) -> MutexGuard<'_, Flight> {
        self.flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve every waiter with `outcome` and release the in-flight flag.
    fn settle(&self, outcome: RefreshOutcome) -> usize {
        let mut flight = self.flight();
        let waiters = std::mem::take(&mut flight.waiters);
        flight.in_flight = false;

        let count = waiters.len();
        for waiter in waiters {
            // A dropped receiver only means that caller stopped waiting.
            let _ = waiter.send(outcome.clone());
        }
        count
    }

    #[instrument(skip(self), fields(episode_id = tracing::field::Empty))]
    async fn run_episode(self: Arc<Self>) {
        let episode_id = Uuid::new_v4().to_string();
        tracing::Span::current().record("episode_id", episode_id.as_str());

        let mut guard = EpisodeGuard {
            inner: Arc::clone(&self),
            epoch: None,
            settled: false,
        };

        let outcome = self.refresh_once(&episode_id, &mut guard.epoch).await;

        guard.settled = true;
        let resolved = self.settle(outcome);
        debug!(resolved, "Refresh episode settled");
    }

    async fn refresh_once(&self, episode_id: &str, epoch_slot: &mut Option<u64>) -> RefreshOutcome {
        let (epoch, refresh_token) = match self.session.begin_refresh() {
            RefreshStart::Started {
                epoch,
                refresh_token,
            } => (epoch, refresh_token),
            RefreshStart::NoCredentials => {
                warn!("Credential rejected with no stored session; skipping refresh call");
                self.hooks.on_irrecoverable_failure();
                self.expired(episode_id, &RefreshFailure::MissingRefreshToken);
                return Err(RefreshFailure::MissingRefreshToken);
            }
        };
        *epoch_slot = Some(epoch);

        self.events.emit_auth(AuthEvent::TokenRefreshing {
            episode_id: episode_id.to_string(),
        });

        let result = match refresh_token {
            None => Err(RefreshFailure::MissingRefreshToken),
            Some(refresh_token) => {
                info!("Refreshing access token");
                match tokio::time::timeout(self.refresh_timeout, self.client.refresh(&refresh_token))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(RefreshFailure::Timeout),
                }
            }
        };

        match result {
            Ok(pair) => {
                if !self.session.complete_refresh(epoch, pair.clone()).await {
                    info!("Session changed during refresh; discarding refreshed credentials");
                    return self.superseded();
                }

                let waiters = self.flight().waiters.len().saturating_sub(1);
                info!(waiters, "Access token refreshed");
                self.hooks.on_authenticated(&pair);
                self.events.emit_auth(AuthEvent::TokenRefreshed {
                    episode_id: episode_id.to_string(),
                    waiters,
                });
                Ok(pair)
            }
            Err(failure) => {
                if !self.session.fail_refresh(epoch).await {
                    info!(reason = %failure, "Session changed during refresh; ignoring failure");
                    return self.superseded();
                }

                error!(reason = %failure, "Token refresh failed; session cleared");
                self.hooks.on_irrecoverable_failure();
                self.expired(episode_id, &failure);
                Err(failure)
            }
        }
    }

    /// Outcome for an episode whose session was replaced mid-flight.
    fn superseded(&self) -> RefreshOutcome {
        self.session
            .authenticated_credentials()
            .ok_or(RefreshFailure::Superseded)
    }

    fn expired(&self, episode_id: &str, failure: &RefreshFailure) {
        self.events.emit_auth(AuthEvent::SessionExpired {
            episode_id: episode_id.to_string(),
            reason: failure.to_string(),
        });
    }
}

/// Releases waiters if an episode ends without settling (panic or runtime
/// shutdown).
struct EpisodeGuard {
    inner: Arc<Inner>,
    epoch: Option<u64>,
    settled: bool,
}

impl Drop for EpisodeGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        error!("Refresh episode ended without settling");

        if let Some(epoch) = self.epoch {
            if self.inner.session.mark_failed(epoch) {
                self.inner.hooks.on_irrecoverable_failure();
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    let store = Arc::clone(self.inner.session.store());
                    handle.spawn(async move { store.flush().await });
                }
            }
        }

        self.inner.settle(Err(RefreshFailure::Abandoned));
    }
}
