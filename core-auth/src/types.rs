use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AuthError, Result};

/// Minimum password length accepted by the backend.
pub const MIN_PASSWORD_LEN: usize = 8;

/// The access/refresh credential pair of the current session.
///
/// Both values are opaque bearer strings; nothing in the client inspects
/// their contents. The refresh token is optional because a persisted session
/// may carry an access token alone.
///
/// # Security
///
/// Credentials must never be logged. The `Debug` implementation redacts them.
///
/// # Examples
///
/// ```
/// use core_auth::CredentialPair;
///
/// let pair = CredentialPair::new("A1", "R1");
/// assert_eq!(pair.refresh_token(), Some("R1"));
/// assert!(!format!("{:?}", pair).contains("A1"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
        }
    }

    /// A pair with no refresh token; a rejection can't be recovered from.
    pub fn access_only(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
        }
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Token body returned by the login, registration and refresh endpoints.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Parse a token body, requiring both tokens to be present and non-empty.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let response: TokenResponse = serde_json::from_slice(body)
            .map_err(|e| AuthError::Serialization(format!("Invalid token response: {}", e)))?;

        if response.access_token.is_empty() || response.refresh_token.is_empty() {
            return Err(AuthError::Serialization(
                "Token response contains an empty token".to_string(),
            ));
        }

        Ok(response)
    }

    pub fn into_pair(self) -> CredentialPair {
        CredentialPair::new(self.access_token, self.refresh_token)
    }
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// The signed-in user as reported by the backend's identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub username: String,
    #[serde(rename = "full_name")]
    pub display_name: String,
    pub role: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub storage_quota_mb: Option<i64>,
    #[serde(default)]
    pub storage_used_mb: Option<i64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Account creation payload.
#[derive(Clone, Serialize)]
pub struct RegistrationRequest {
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub password: String,
}

impl RegistrationRequest {
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        full_name: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            full_name: full_name.into(),
            password: password.into(),
        }
    }

    /// Client-side checks mirroring the backend's field constraints.
    pub fn validate(&self) -> Result<()> {
        let email = self.email.trim();
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
            _ => {
                return Err(AuthError::InvalidInput(
                    "email must be a valid address".to_string(),
                ))
            }
        }

        let username_len = self.username.trim().chars().count();
        if !(3..=50).contains(&username_len) {
            return Err(AuthError::InvalidInput(
                "username must be between 3 and 50 characters".to_string(),
            ));
        }

        let name_len = self.full_name.trim().chars().count();
        if !(1..=100).contains(&name_len) {
            return Err(AuthError::InvalidInput(
                "full name must be between 1 and 100 characters".to_string(),
            ));
        }

        validate_password(&self.password)
    }
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("full_name", &self.full_name)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

pub(crate) fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::InvalidInput(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Form body of the login endpoint.
#[derive(Serialize)]
pub(crate) struct LoginForm<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// JSON body of the change-password endpoint.
#[derive(Serialize)]
pub(crate) struct PasswordChange<'a> {
    pub current_password: &'a str,
    pub new_password: &'a str,
}

/// JSON body of the refresh endpoint.
#[derive(Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Error body shape used by the backend (`{"detail": "..."}`).
#[derive(Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Best-effort human-readable message from an error response body.
pub(crate) fn error_message(body: &[u8]) -> String {
    if let Ok(parsed) = serde_json::from_slice::<ErrorBody>(body) {
        return match parsed.detail {
            serde_json::Value::String(message) => message,
            other => other.to_string(),
        };
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        "no details".to_string()
    } else {
        text.chars().take(200).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_debug_redacts_tokens() {
        let pair = CredentialPair::new("access-secret", "refresh-secret");
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("access-secret"));
        assert!(!debug.contains("refresh-secret"));

        let access_only = CredentialPair::access_only("A1");
        assert_eq!(access_only.refresh_token(), None);
        assert!(format!("{:?}", access_only).contains("None"));
    }

    #[test]
    fn test_token_response_requires_both_tokens() {
        let pair = TokenResponse::parse(
            br#"{"access_token":"A2","refresh_token":"R2","token_type":"bearer"}"#,
        )
        .unwrap()
        .into_pair();
        assert_eq!(pair, CredentialPair::new("A2", "R2"));

        assert!(TokenResponse::parse(br#"{"access_token":"A2"}"#).is_err());
        assert!(TokenResponse::parse(br#"{"access_token":"","refresh_token":"R2"}"#).is_err());
        assert!(TokenResponse::parse(b"<html>").is_err());
    }

    #[test]
    fn test_identity_from_backend_body() {
        let body = r#"{
            "id": "u-1",
            "email": "ada@example.com",
            "username": "ada",
            "full_name": "Ada Lovelace",
            "role": "admin",
            "is_active": true,
            "storage_quota_mb": 1024,
            "storage_used_mb": 12,
            "created_at": "2024-03-01T10:00:00Z",
            "last_login": null
        }"#;

        let identity: Identity = serde_json::from_str(body).unwrap();
        assert_eq!(identity.display_name, "Ada Lovelace");
        assert!(identity.is_admin());
        assert_eq!(identity.storage_quota_mb, Some(1024));
        assert!(identity.last_login.is_none());

        let minimal: Identity = serde_json::from_str(
            r#"{"id":"u-2","email":"b@example.com","username":"bob","full_name":"Bob","role":"user"}"#,
        )
        .unwrap();
        assert!(minimal.is_active);
        assert!(!minimal.is_admin());
    }

    #[test]
    fn test_registration_validation() {
        let valid = RegistrationRequest::new("ada@example.com", "ada", "Ada", "correct-horse");
        assert!(valid.validate().is_ok());
        assert!(!format!("{:?}", valid).contains("correct-horse"));

        let cases = [
            RegistrationRequest::new("not-an-email", "ada", "Ada", "correct-horse"),
            RegistrationRequest::new("ada@example.com", "ad", "Ada", "correct-horse"),
            RegistrationRequest::new("ada@example.com", "ada", " ", "correct-horse"),
            RegistrationRequest::new("ada@example.com", "ada", "Ada", "short"),
        ];
        for request in cases {
            assert!(matches!(request.validate(), Err(AuthError::InvalidInput(_))));
        }
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(br#"{"detail":"Incorrect username or password"}"#),
            "Incorrect username or password"
        );
        assert!(error_message(br#"{"detail":[{"loc":["body","email"]}]}"#).contains("email"));
        assert_eq!(error_message(b"Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message(b""), "no details");
    }
}
