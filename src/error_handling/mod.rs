//! Error handling.
//!
//! This module provides:
//! - Error type definitions for every layer (policy, tunnel, transport, body)
//! - Error categorization for callers that aggregate failures
//!
//! Errors are always reported per logical request; nothing here is shared
//! between requests.

mod categorization;
mod types;

// Re-export public API
pub use categorization::ErrorCategory;
pub use types::{
    Error, InitializationError, MultipartError, PolicyError, TransportError, TunnelError,
};
