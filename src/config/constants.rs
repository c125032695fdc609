//! Configuration constants.
//!
//! This module defines the constants used as defaults throughout the engine,
//! including timeouts, size limits and the multipart boundary format.

// Network operation timeouts
/// TCP connection timeout in seconds (applies to every hop)
pub const TCP_CONNECT_TIMEOUT_SECS: u64 = 5;
/// TLS handshake timeout in seconds (proxy hop and tunneled target hop alike)
pub const TLS_HANDSHAKE_TIMEOUT_SECS: u64 = 5;
/// Whole-request deadline in seconds when neither the request nor the config sets one.
/// Covers every attempt of a redirect chain, not each attempt individually.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

// Redirect handling
/// Maximum number of redirect hops to follow
/// Prevents infinite redirect loops and excessive request chains
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

// Tunnel establishment
/// Maximum size of a CONNECT response head (status line + headers) in bytes.
/// A proxy that sends more than this without a header terminator is treated as broken.
pub const MAX_CONNECT_RESPONSE_BYTES: usize = 16 * 1024;

// Multipart boundary format
/// Number of leading dashes in a generated boundary token
pub const BOUNDARY_DASHES: usize = 26;
/// Number of random decimal digits following the dashes
pub const BOUNDARY_DIGITS: usize = 24;
/// Content type used for file and byte parts when nothing better is known
pub const DEFAULT_PART_CONTENT_TYPE: &str = "application/octet-stream";

/// Default User-Agent string sent on every attempt unless the caller sets one.
pub const DEFAULT_USER_AGENT: &str = concat!("tunnel_fetch/", env!("CARGO_PKG_VERSION"));

// Default ports
/// Port assumed for `http://` URLs without an explicit port
pub const DEFAULT_HTTP_PORT: u16 = 80;
/// Port assumed for `https://` URLs without an explicit port
pub const DEFAULT_HTTPS_PORT: u16 = 443;
