//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the health records client core:
//! - Logging and tracing infrastructure
//! - Configuration management (bridges, backend endpoints, timeouts)
//! - Event bus for session and request lifecycle events
//!
//! Every other core crate depends on this one for its logging conventions,
//! configuration types and event broadcasting.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{ApiConfig, CoreConfig, CoreConfigBuilder};
pub use error::{Error, Result};
pub use events::{AuthEvent, CoreEvent, EventBus, EventStream, RequestEvent};
