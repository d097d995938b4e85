//! Integration tests for logging system

use bridge_traits::LogLevel;
use core_runtime::logging::{init_logging, redact_if_sensitive, LogFormat, LoggingConfig};

#[test]
fn test_credential_fields_are_redacted() {
    for field in ["token", "refreshToken", "refresh_token", "Authorization", "bearer"] {
        assert_eq!(redact_if_sensitive(field, "opaque-value"), "[REDACTED]");
    }
}

#[test]
fn test_email_values_are_masked() {
    let redacted = redact_if_sensitive("email", "user@example.com");

    assert!(redacted.starts_with('u'));
    assert!(redacted.contains("[REDACTED]"));
    assert!(!redacted.contains("example.com"));
}

#[test]
fn test_normal_values_pass_through() {
    assert_eq!(redact_if_sensitive("status", "401"), "401");
    assert_eq!(redact_if_sensitive("url", "/api/users/me"), "/api/users/me");
    assert_eq!(redact_if_sensitive("user_id", "user_123"), "user_123");
}

#[test]
fn test_format_selection() {
    let config = LoggingConfig::default();

    #[cfg(debug_assertions)]
    assert_eq!(config.format, LogFormat::Pretty);

    #[cfg(not(debug_assertions))]
    assert_eq!(config.format, LogFormat::Json);
}

#[test]
fn test_init_logging_only_once() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_filter("core_auth=warn");

    // Integration test binaries run in their own process, so the first call wins.
    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_err());
}
