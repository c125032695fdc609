//! Client configuration and constants.
//!
//! This module provides:
//! - Configuration constants (timeouts, limits, boundary format)
//! - The `ClientConfig` struct shared read-only by every logical request
//! - Proxy discovery from the process environment

mod constants;
mod proxy_env;
mod types;

// Re-export all constants
pub use constants::*;
pub use proxy_env::{proxy_for, EnvProxies};
pub use types::{ClientConfig, FollowPredicate, LogFormat, LogLevel};
