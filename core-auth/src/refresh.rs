//! The refresh call: exchange a refresh token for a rotated credential pair.

use async_trait::async_trait;
use bridge_traits::{BridgeError, HttpClient, HttpRequest, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::RefreshFailure;
use crate::types::{CredentialPair, RefreshRequest, TokenResponse};

/// Performs one refresh call.
///
/// Implementations report every failure as a [`RefreshFailure`]; the
/// coordinator decides what happens next.
#[async_trait]
pub trait RefreshClient: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, RefreshFailure>;
}

/// POSTs `{"refresh_token": ...}` as JSON and expects
/// `{"access_token": ..., "refresh_token": ...}` in a 2xx response.
pub struct HttpRefreshClient {
    http: Arc<dyn HttpClient>,
    url: String,
}

impl HttpRefreshClient {
    pub fn new(http: Arc<dyn HttpClient>, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RefreshClient for HttpRefreshClient {
    #[instrument(skip(self, refresh_token), fields(url = %self.url))]
    async fn refresh(&self, refresh_token: &str) -> Result<CredentialPair, RefreshFailure> {
        let request = HttpRequest::post(&self.url)
            .json(&RefreshRequest { refresh_token })
            .map_err(|e| RefreshFailure::MalformedResponse(e.to_string()))?;

        // A single attempt; the rotated token must not be requested twice.
        let response = self
            .http
            .execute_with_retry(request, RetryPolicy::none())
            .await
            .map_err(|e| match e {
                BridgeError::Timeout(_) => RefreshFailure::Timeout,
                other => RefreshFailure::Transport(other.to_string()),
            })?;

        if !response.is_success() {
            warn!(status = response.status, "Refresh call rejected");
            return Err(RefreshFailure::Rejected {
                status: response.status,
            });
        }

        let pair = TokenResponse::parse(&response.body)
            .map_err(|e| RefreshFailure::MalformedResponse(e.to_string()))?
            .into_pair();

        debug!("Refresh call succeeded");
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::HttpResponse;
    use std::sync::Mutex;

    struct OneShotHttp {
        reply: Mutex<Option<BridgeResult<HttpResponse>>>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl OneShotHttp {
        fn replying(reply: BridgeResult<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpClient for OneShotHttp {
        async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
            self.seen.lock().unwrap().push(request);
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(HttpResponse::new(500, "")))
        }
    }

    #[tokio::test]
    async fn test_refresh_posts_token_and_parses_pair() {
        let http = OneShotHttp::replying(Ok(HttpResponse::new(
            200,
            r#"{"access_token":"A2","refresh_token":"R2","token_type":"bearer"}"#,
        )));
        let client = HttpRefreshClient::new(http.clone(), "/api/auth/refresh");

        let pair = client.refresh("R1").await.unwrap();
        assert_eq!(pair, CredentialPair::new("A2", "R2"));

        let seen = http.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].url, "/api/auth/refresh");
        assert!(seen[0].bearer().is_none());
        let body: serde_json::Value = serde_json::from_slice(seen[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({ "refresh_token": "R1" }));
    }

    #[tokio::test]
    async fn test_refresh_failure_classification() {
        let rejected = HttpRefreshClient::new(
            OneShotHttp::replying(Ok(HttpResponse::new(401, r#"{"detail":"Invalid refresh token"}"#))),
            "/refresh",
        );
        assert_eq!(
            rejected.refresh("R1").await,
            Err(RefreshFailure::Rejected { status: 401 })
        );

        let malformed = HttpRefreshClient::new(
            OneShotHttp::replying(Ok(HttpResponse::new(200, r#"{"access_token":"A2"}"#))),
            "/refresh",
        );
        assert!(matches!(
            malformed.refresh("R1").await,
            Err(RefreshFailure::MalformedResponse(_))
        ));

        let timed_out = HttpRefreshClient::new(
            OneShotHttp::replying(Err(BridgeError::Timeout("30s".to_string()))),
            "/refresh",
        );
        assert_eq!(timed_out.refresh("R1").await, Err(RefreshFailure::Timeout));

        let offline = HttpRefreshClient::new(
            OneShotHttp::replying(Err(BridgeError::Connection("refused".to_string()))),
            "/refresh",
        );
        assert!(matches!(
            offline.refresh("R1").await,
            Err(RefreshFailure::Transport(_))
        ));
    }
}
