//! Error categorization.
//!
//! Maps the structured error tree onto a flat set of categories so callers
//! can count or alert on failures without matching nested enums.

use strum_macros::EnumIter as EnumIterMacro;

use super::types::{Error, MultipartError, PolicyError, TransportError, TunnelError};

/// Flat classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIterMacro)]
pub enum ErrorCategory {
    // Configuration errors
    /// Target or proxy URL could not be used.
    PolicyInvalidUrl,
    /// Explicit tunnel setting contradicts the target scheme.
    PolicyConflict,
    // Proxy/tunnel errors
    /// Proxy answered CONNECT with a non-2xx status.
    TunnelRejected,
    /// Proxy's CONNECT response could not be parsed.
    TunnelMalformedResponse,
    /// TLS handshake failed on either hop.
    TlsHandshake,
    /// Trust anchors or client identity could not be loaded.
    TlsTrustContext,
    // Redirect errors
    /// Too many redirects.
    RedirectLimit,
    /// A redirect needed the body again but it was a one-shot stream.
    BodyNotReplayable,
    // Transport errors
    /// TCP connect failed.
    TransportConnect,
    /// Read or write failed on an open connection.
    TransportIo,
    /// hyper reported a failed HTTP/1.1 exchange.
    TransportHttp,
    /// Request deadline elapsed.
    TransportTimeout,
    /// Caller cancelled the request.
    TransportCancelled,
    // Request construction errors
    /// A multipart part source could not be read.
    MultipartSource,
    /// Method, header or URL could not be put on the wire.
    InvalidRequest,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorCategory {
    /// Returns a human-readable string representation of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::PolicyInvalidUrl => "Invalid target or proxy URL",
            ErrorCategory::PolicyConflict => "Conflicting proxy configuration",
            ErrorCategory::TunnelRejected => "Proxy rejected CONNECT",
            ErrorCategory::TunnelMalformedResponse => "Malformed CONNECT response",
            ErrorCategory::TlsHandshake => "TLS handshake failure",
            ErrorCategory::TlsTrustContext => "Invalid TLS trust context",
            ErrorCategory::RedirectLimit => "Redirect limit exceeded",
            ErrorCategory::BodyNotReplayable => "Request body not replayable",
            ErrorCategory::TransportConnect => "Connection failure",
            ErrorCategory::TransportIo => "Connection I/O error",
            ErrorCategory::TransportHttp => "HTTP exchange error",
            ErrorCategory::TransportTimeout => "Request timeout",
            ErrorCategory::TransportCancelled => "Request cancelled",
            ErrorCategory::MultipartSource => "Multipart source error",
            ErrorCategory::InvalidRequest => "Invalid request",
        }
    }

    /// True for categories raised by the proxy hop or the tunnel itself.
    pub fn is_tunnel_layer(&self) -> bool {
        matches!(
            self,
            ErrorCategory::TunnelRejected
                | ErrorCategory::TunnelMalformedResponse
                | ErrorCategory::TlsHandshake
                | ErrorCategory::TlsTrustContext
        )
    }
}

impl Error {
    /// Categorizes this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Policy(PolicyError::ForwardingSecureTarget { .. }) => {
                ErrorCategory::PolicyConflict
            }
            Error::Policy(_) => ErrorCategory::PolicyInvalidUrl,
            Error::Tunnel(TunnelError::Rejected { .. }) => ErrorCategory::TunnelRejected,
            Error::Tunnel(TunnelError::MalformedResponse { .. }) => {
                ErrorCategory::TunnelMalformedResponse
            }
            Error::Tunnel(TunnelError::Handshake { .. }) => ErrorCategory::TlsHandshake,
            Error::Tunnel(TunnelError::Trust { .. }) => ErrorCategory::TlsTrustContext,
            Error::RedirectLimit { .. } => ErrorCategory::RedirectLimit,
            Error::BodyNotReplayable { .. } => ErrorCategory::BodyNotReplayable,
            Error::Transport(TransportError::Connect { .. }) => ErrorCategory::TransportConnect,
            Error::Transport(TransportError::Io { .. }) => ErrorCategory::TransportIo,
            Error::Transport(TransportError::Http { .. }) => ErrorCategory::TransportHttp,
            Error::Transport(TransportError::Timeout(_)) => ErrorCategory::TransportTimeout,
            Error::Transport(TransportError::Cancelled) => ErrorCategory::TransportCancelled,
            Error::Multipart(MultipartError::NotReplayable { .. }) => {
                ErrorCategory::BodyNotReplayable
            }
            Error::Multipart(MultipartError::Source { .. }) => ErrorCategory::MultipartSource,
            Error::InvalidRequest(_) => ErrorCategory::InvalidRequest,
        }
    }
}
