//! Safety envelope and secure database client for exposing a MySQL or
//! MariaDB database over a tool-invocation protocol.
//!
//! Every database-touching call in this crate is expected to go through
//! [`client::SecureClient`], which composes the other modules in a fixed
//! order: rate limit, guard, gate, execute, audit, sanitise.

pub mod audit;
pub mod client;
pub mod compat;
pub mod config;
pub mod gate;
pub mod guard;
pub mod rate_limit;
pub mod sanitize;
pub mod timeout;

pub use audit::{AuditContext, AuditEvent, EventType, Sink};
pub use client::{ClientConfig, QueryResult, SecureClient};
pub use compat::{Backend, CompatibilityProfile, Feature};
pub use config::SecurityConfig;
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use sanitize::SanitizedError;
pub use timeout::{TimeoutConfig, TimeoutProfile};
