//! Error type definitions.
//!
//! This module defines every error the engine can surface. Each variant carries
//! enough context (hop, host, status line or handshake diagnostic) to tell a
//! proxy-layer failure from a target-layer failure.

use std::io;
use std::time::Duration;

use http::StatusCode;
use log::SetLoggerError;
use thiserror::Error;

use crate::fetch::{Hop, Response};

/// Error types for initialization failures.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)] // All variants end with "Error" by convention
pub enum InitializationError {
    /// Error initializing the logger.
    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] SetLoggerError),
}

/// Malformed or contradictory target/proxy configuration.
///
/// Raised before any connection is attempted and never retried.
#[derive(Error, Debug)]
pub enum PolicyError {
    /// A URL failed to parse or resolve.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL text.
        url: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// The target URL uses a scheme other than http/https.
    #[error("Unsupported target scheme '{scheme}' in {url}")]
    UnsupportedScheme {
        /// Scheme found in the URL.
        scheme: String,
        /// The target URL.
        url: String,
    },

    /// The proxy URL uses a scheme other than http/https.
    #[error("Unsupported proxy scheme '{scheme}' in {url}")]
    UnsupportedProxyScheme {
        /// Scheme found in the proxy URL.
        scheme: String,
        /// The proxy URL.
        url: String,
    },

    /// The URL has no host component.
    #[error("URL has no host: {0}")]
    MissingHost(String),

    /// `tunnel = false` was requested for an https target.
    #[error("Cannot forward-proxy secure target {target}: tunnel=false conflicts with an https target")]
    ForwardingSecureTarget {
        /// The https target URL.
        target: String,
    },
}

/// Failure while establishing a tunnel or performing a TLS handshake on either hop.
///
/// Fatal for the attempt; never downgraded to forward-proxy mode.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// The proxy answered CONNECT with a non-2xx status.
    #[error("Proxy {proxy} refused CONNECT to {target}: {status_line}")]
    Rejected {
        /// Proxy host:port.
        proxy: String,
        /// Requested tunnel target host:port.
        target: String,
        /// The proxy's status line, verbatim.
        status_line: String,
    },

    /// The proxy's CONNECT response could not be parsed.
    #[error("Malformed CONNECT response from proxy {proxy}: {detail}")]
    MalformedResponse {
        /// Proxy host:port.
        proxy: String,
        /// What was wrong with it.
        detail: String,
    },

    /// TLS handshake failure (certificate validation, client key mismatch, alerts).
    #[error("TLS handshake with {hop} {host} failed: {detail}")]
    Handshake {
        /// Which hop the handshake belonged to.
        hop: Hop,
        /// Host the handshake was addressed to.
        host: String,
        /// Handshake diagnostic.
        detail: String,
    },

    /// The trust context for a hop could not be turned into a TLS configuration.
    #[error("Invalid trust context for {hop} hop: {detail}")]
    Trust {
        /// Which hop the trust context belongs to.
        hop: Hop,
        /// What was wrong with it.
        detail: String,
    },
}

/// Connection-level failure (refused, reset, timed out, cancelled).
///
/// Fatal per attempt and never silently retried.
#[derive(Error, Debug)]
pub enum TransportError {
    /// TCP connect failed.
    #[error("Failed to connect to {hop} {addr}: {source}")]
    Connect {
        /// Which hop was being dialed.
        hop: Hop,
        /// host:port dialed.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Read/write failure on an established connection.
    #[error("I/O error talking to {hop} {host}: {source}")]
    Io {
        /// Which hop the connection belonged to.
        hop: Hop,
        /// Remote host.
        host: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// HTTP/1.1 exchange failure reported by hyper.
    ///
    /// In forward-proxy mode the exchange is with the proxy, so `hop` is
    /// `Hop::Proxy` and `host` is the proxy's host:port.
    #[error("HTTP exchange with {hop} {host} failed: {source}")]
    Http {
        /// Which hop the request was written to.
        hop: Hop,
        /// Peer the request was written to.
        host: String,
        /// Underlying hyper error.
        #[source]
        source: hyper::Error,
    },

    /// The request deadline elapsed.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,
}

/// Failure while building a multipart body.
#[derive(Error, Debug)]
pub enum MultipartError {
    /// A one-shot stream part was already consumed by an earlier build.
    #[error("Multipart field '{field}' is backed by a one-shot stream that was already consumed")]
    NotReplayable {
        /// Field name of the exhausted part.
        field: String,
    },

    /// A file or reader factory could not be (re)opened.
    #[error("Failed to open source for multipart field '{field}': {source}")]
    Source {
        /// Field name of the part.
        field: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Top-level error returned for a logical request.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed target/proxy URL or contradictory configuration.
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// CONNECT rejection or TLS handshake failure on either hop.
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Redirect count exceeded the configured maximum.
    ///
    /// The last 3xx response is kept so callers can still inspect it.
    #[error("Exceeded maximum of {limit} redirects at {}", .response.url())]
    RedirectLimit {
        /// The configured maximum.
        limit: usize,
        /// The 3xx response that would have been followed.
        response: Box<Response>,
    },

    /// A 307/308 redirect needs the body again but its source cannot be reopened.
    #[error("Redirect {status} requires replaying the request body, but {reason}")]
    BodyNotReplayable {
        /// The redirect status that required replay.
        status: StatusCode,
        /// Why the body cannot be reproduced.
        reason: String,
    },

    /// Connection reset, refused, timeout or cancellation.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The multipart body could not be built for the first attempt.
    #[error("Multipart error: {0}")]
    Multipart(#[from] MultipartError),

    /// The request itself is unusable (invalid header name/value).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// The hop a failure belongs to, when it belongs to one.
    ///
    /// `None` for configuration, redirect-policy and body errors.
    pub fn hop(&self) -> Option<Hop> {
        match self {
            Error::Tunnel(TunnelError::Rejected { .. })
            | Error::Tunnel(TunnelError::MalformedResponse { .. }) => Some(Hop::Proxy),
            Error::Tunnel(TunnelError::Handshake { hop, .. })
            | Error::Tunnel(TunnelError::Trust { hop, .. }) => Some(*hop),
            Error::Transport(TransportError::Connect { hop, .. })
            | Error::Transport(TransportError::Io { hop, .. })
            | Error::Transport(TransportError::Http { hop, .. }) => Some(*hop),
            _ => None,
        }
    }

    /// Returns the last 3xx response for `RedirectLimit`, `None` otherwise.
    pub fn redirect_response(&self) -> Option<&Response> {
        match self {
            Error::RedirectLimit { response, .. } => Some(response),
            _ => None,
        }
    }
}
