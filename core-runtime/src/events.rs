//! # Event Bus System
//!
//! Broadcast channel for session and request lifecycle events.
//!
//! ## Overview
//!
//! The event bus lets hosts observe what the authenticated pipeline is doing
//! without coupling to it: a login screen can react to `SessionExpired`, a
//! status bar can show `TokenRefreshing`, diagnostics can count retries.
//!
//! Events never carry credential values.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(CoreEvent::Auth(AuthEvent::SignedOut)).ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "User signed out");
//! # }
//! ```
//!
//! Emitting with no subscribers returns an error which callers ignore with
//! `.ok()`; events are advisory.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that fall further behind receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum published through the [`EventBus`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Session and credential events
    Auth(AuthEvent),
    /// Authenticated request events
    Request(RequestEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Request(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::AuthError { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::SessionExpired { .. }) => EventSeverity::Warning,
            CoreEvent::Request(RequestEvent::RejectedAfterRetry { .. }) => {
                EventSeverity::Warning
            }
            CoreEvent::Auth(AuthEvent::SignedIn { .. })
            | CoreEvent::Auth(AuthEvent::SignedOut)
            | CoreEvent::Auth(AuthEvent::TokenRefreshed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events related to the session lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A login or registration call is in progress.
    SigningIn {
        /// The username or email submitted.
        username: String,
    },
    /// Credentials were obtained through login or registration.
    SignedIn {
        /// Server-side user id, when the identity could be fetched.
        user_id: Option<String>,
    },
    /// The session was ended explicitly.
    SignedOut,
    /// A refresh call was started.
    TokenRefreshing {
        /// Identifies one refresh episode across its events.
        episode_id: String,
    },
    /// The refresh call succeeded and the rotated pair was stored.
    TokenRefreshed {
        episode_id: String,
        /// Callers that were suspended on this refresh, the leader excluded.
        waiters: usize,
    },
    /// The refresh failed; credentials were cleared and the session is over.
    SessionExpired {
        episode_id: String,
        /// Short failure description, never a token.
        reason: String,
    },
    /// Authentication error occurred.
    AuthError {
        message: String,
        /// Whether retrying the same action might succeed.
        recoverable: bool,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SigningIn { .. } => "Authentication in progress",
            AuthEvent::SignedIn { .. } => "User signed in successfully",
            AuthEvent::SignedOut => "User signed out",
            AuthEvent::TokenRefreshing { .. } => "Refreshing access token",
            AuthEvent::TokenRefreshed { .. } => "Token refreshed successfully",
            AuthEvent::SessionExpired { .. } => "Session expired",
            AuthEvent::AuthError { .. } => "Authentication error",
        }
    }
}

// ============================================================================
// Request Events
// ============================================================================

/// Events emitted by the authenticated request pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RequestEvent {
    /// A request was rejected and replayed with a refreshed credential.
    Retried { method: String, url: String },
    /// The replayed request was rejected again; the 401 was returned as-is.
    RejectedAfterRetry { method: String, url: String },
}

impl RequestEvent {
    fn description(&self) -> &str {
        match self {
            RequestEvent::Retried { .. } => "Request replayed after refresh",
            RequestEvent::RejectedAfterRetry { .. } => "Request rejected after refresh",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Multi-producer, multi-consumer event bus built on `tokio::sync::broadcast`.
///
/// Cloning is cheap; all clones publish into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Shorthand for `emit(CoreEvent::Auth(event)).ok()`.
    pub fn emit_auth(&self, event: AuthEvent) {
        self.emit(CoreEvent::Auth(event)).ok();
    }

    /// Shorthand for `emit(CoreEvent::Request(event)).ok()`.
    pub fn emit_request(&self, event: RequestEvent) {
        self.emit(CoreEvent::Request(event)).ok();
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{AuthEvent, CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::default();
/// let expirations = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Auth(AuthEvent::SessionExpired { .. })));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` if the subscriber fell behind by `n` events,
    /// `RecvError::Closed` once every sender is gone.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refreshed(episode: usize) -> CoreEvent {
        CoreEvent::Auth(AuthEvent::TokenRefreshed {
            episode_id: format!("episode-{}", episode),
            waiters: episode,
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_an_error() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(CoreEvent::Auth(AuthEvent::SignedOut)).is_err());

        // The shorthand swallows it
        bus.emit_auth(AuthEvent::SignedOut);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let delivered = bus.emit(refreshed(1)).unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(first.recv().await.unwrap(), refreshed(1));
        assert_eq!(second.recv().await.unwrap(), refreshed(1));
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Request(_)));

        bus.emit(refreshed(1)).unwrap();
        let retried = CoreEvent::Request(RequestEvent::Retried {
            method: "GET".to_string(),
            url: "/api/users/me".to_string(),
        });
        bus.emit(retried.clone()).unwrap();

        assert_eq!(stream.recv().await.unwrap(), retried);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(refreshed(i)).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let error = CoreEvent::Auth(AuthEvent::AuthError {
            message: "Login failed".to_string(),
            recoverable: true,
        });
        assert_eq!(error.severity(), EventSeverity::Error);

        let expired = CoreEvent::Auth(AuthEvent::SessionExpired {
            episode_id: "e".to_string(),
            reason: "refresh rejected".to_string(),
        });
        assert_eq!(expired.severity(), EventSeverity::Warning);

        let refreshing = CoreEvent::Auth(AuthEvent::TokenRefreshing {
            episode_id: "e".to_string(),
        });
        assert_eq!(refreshing.severity(), EventSeverity::Debug);
        assert_eq!(refreshed(0).severity(), EventSeverity::Info);
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let bus = bus.clone();
                tokio::spawn(async move {
                    for i in 0..10 {
                        bus.emit(refreshed(i)).ok();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Auth(AuthEvent::SessionExpired {
            episode_id: "episode-7".to_string(),
            reason: "refresh token rejected (401)".to_string(),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("SessionExpired"));
        assert!(json.contains("episode-7"));

        let decoded: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }
}
