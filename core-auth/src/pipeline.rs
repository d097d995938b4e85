//! Request Pipeline
//!
//! Wraps every outbound API request: attaches the stored access token, and on
//! a 401 waits for the shared refresh episode and replays the request exactly
//! once with the new token.
//!
//! A second 401 is handed back to the caller as an ordinary response. The
//! pipeline never loops and never tears the session down itself; teardown
//! belongs to the refresh coordinator.

use bridge_traits::{HttpClient, HttpMethod, HttpRequest, HttpResponse, AUTHORIZATION};
use core_runtime::config::ApiConfig;
use core_runtime::events::{EventBus, RequestEvent};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::coordinator::RefreshCoordinator;
use crate::error::{AuthError, Result};
use crate::session::Session;
use crate::types::error_message;

/// HTTP client that authenticates requests against the current session.
#[derive(Clone)]
pub struct AuthenticatedClient {
    http: Arc<dyn HttpClient>,
    session: Arc<Session>,
    coordinator: RefreshCoordinator,
    api: ApiConfig,
    events: EventBus,
}

impl AuthenticatedClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        session: Arc<Session>,
        coordinator: RefreshCoordinator,
        api: ApiConfig,
        events: EventBus,
    ) -> Self {
        Self {
            http,
            session,
            coordinator,
            api,
            events,
        }
    }

    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    /// Send `request` with the current credential.
    ///
    /// Relative URLs are resolved against the configured base URL. Any
    /// `Authorization` header on `request` is replaced by the stored access
    /// token, or removed when no token is stored.
    ///
    /// Every HTTP status is returned as `Ok`. Errors are limited to transport
    /// failures and a failed refresh episode.
    #[instrument(skip(self, request), fields(method = request.method.as_str(), url = %request.url))]
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = self.prepare(request);

        let (first, sent_with) = self.send_current(request.clone()).await?;
        if !first.is_unauthorized() {
            return Ok(first);
        }

        debug!(had_credential = sent_with.is_some(), "Request rejected; awaiting refresh");
        let pair = self
            .coordinator
            .refresh_after_rejection(sent_with.as_deref())
            .await?;

        self.events.emit_request(RequestEvent::Retried {
            method: request.method.as_str().to_string(),
            url: request.url.clone(),
        });

        let retried = request.clone().bearer_token(pair.access_token);
        let second = self.http.execute(retried).await?;

        if second.is_unauthorized() {
            warn!("Request rejected again after refresh");
            self.events.emit_request(RequestEvent::RejectedAfterRetry {
                method: request.method.as_str().to_string(),
                url: request.url,
            });
        }

        Ok(second)
    }

    /// GET `path` and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute(HttpRequest::get(path)).await?;
        decode(check(response)?)
    }

    /// POST a JSON body to `path` and decode a JSON response.
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let request = HttpRequest::post(path)
            .json(body)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        let response = self.execute(request).await?;
        decode(check(response)?)
    }

    /// PUT a JSON body to `path` and decode a JSON response.
    pub async fn put_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let request = HttpRequest::new(HttpMethod::Put, path)
            .json(body)
            .map_err(|e| AuthError::Serialization(e.to_string()))?;
        let response = self.execute(request).await?;
        decode(check(response)?)
    }

    /// DELETE `path`, discarding any response body.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.execute(HttpRequest::new(HttpMethod::Delete, path)).await?;
        check(response).map(|_| ())
    }

    fn prepare(&self, mut request: HttpRequest) -> HttpRequest {
        request.url = self.api.url(&request.url);
        if request.timeout.is_none() {
            request.timeout = Some(self.api.request_timeout);
        }
        request
    }

    /// Attach whatever credential is stored right now and send.
    async fn send_current(&self, mut request: HttpRequest) -> Result<(HttpResponse, Option<String>)> {
        let access_token = self.session.credentials().map(|pair| pair.access_token);

        request = match &access_token {
            Some(token) => request.bearer_token(token.as_str()),
            None => {
                request.remove_header(AUTHORIZATION);
                request
            }
        };

        let response = self.http.execute(request).await?;
        Ok((response, access_token))
    }
}

impl std::fmt::Debug for AuthenticatedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedClient")
            .field("base_url", &self.api.base_url)
            .field("coordinator", &self.coordinator)
            .finish()
    }
}

/// Map a non-2xx response to [`AuthError::Api`].
pub(crate) fn check(response: HttpResponse) -> Result<HttpResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(AuthError::Api {
            status: response.status,
            message: error_message(&response.body),
        })
    }
}

fn decode<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body)
        .map_err(|e| AuthError::Serialization(format!("Invalid response body: {}", e)))
}
