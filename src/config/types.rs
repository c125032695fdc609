//! Configuration types.
//!
//! This module defines the client configuration struct and the logging
//! option enums used by `initialization::init_logger_with`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use url::Url;

use crate::config::constants::{
    DEFAULT_MAX_REDIRECTS, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_USER_AGENT,
    TCP_CONNECT_TIMEOUT_SECS, TLS_HANDSHAKE_TIMEOUT_SECS,
};
use crate::tls::TrustContext;

/// Logging level for the engine's own log output.
///
/// Controls the verbosity of log output, from most restrictive (Error) to most
/// verbose (Trace).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// Only error messages
    Error,
    /// Error and warning messages
    Warn,
    /// Error, warning, and informational messages
    Info,
    /// All messages except trace
    Debug,
    /// All messages including trace
    Trace,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

/// Log output format.
///
/// Controls how log messages are formatted:
/// - `Plain`: Human-readable format with colors (default)
/// - `Json`: Structured JSON format for machine parsing
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors (default)
    #[default]
    Plain,
    /// Structured JSON format for machine parsing
    Json,
}

/// Caller-supplied redirect filter, consulted after the built-in rules.
///
/// Receives the redirect status and the already-resolved next URL. Returning
/// `false` stops the chain and surfaces the 3xx response as the result.
pub type FollowPredicate = Arc<dyn Fn(StatusCode, &Url) -> bool + Send + Sync>;

/// Client configuration.
///
/// Read-only once handed to a `Client`; every logical request shares it.
///
/// # Examples
///
/// ```no_run
/// use tunnel_fetch::ClientConfig;
///
/// let config = ClientConfig {
///     proxy: Some("http://proxy.internal:3128".parse().unwrap()),
///     tunnel: Some(true),
///     follow_all_redirects: true,
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct ClientConfig {
    /// Explicit proxy URL (`http://` or `https://`). Takes precedence over the environment.
    pub proxy: Option<Url>,
    /// Read `HTTP_PROXY`/`HTTPS_PROXY`/`NO_PROXY` per attempt when `proxy` is unset.
    pub proxy_from_env: bool,
    /// Explicit tunnel flag: `Some(true)` forces CONNECT for every scheme,
    /// `Some(false)` asks for forward proxying, `None` lets the target scheme decide.
    pub tunnel: Option<bool>,
    /// Trust inputs for the TLS handshake with an `https://` proxy.
    pub proxy_trust: TrustContext,
    /// Trust inputs for the TLS handshake with an `https://` target (direct or tunneled).
    pub target_trust: TrustContext,
    /// Maximum number of redirects followed before `Error::RedirectLimit`.
    pub max_redirects: usize,
    /// Follow redirects for methods other than POST/PUT/PATCH/DELETE.
    pub follow_redirects: bool,
    /// Follow redirects for every method.
    pub follow_all_redirects: bool,
    /// Keep the original method and body on 301/302/303 (legacy behavior).
    pub follow_original_method: bool,
    /// Do not set a `Referer` header on redirected attempts.
    pub remove_referer_header: bool,
    /// Optional extra redirect filter.
    pub follow_predicate: Option<FollowPredicate>,
    /// Deadline for a whole logical request, redirects included.
    pub timeout: Duration,
    /// TCP connect timeout per hop.
    pub connect_timeout: Duration,
    /// TLS handshake timeout per hop.
    pub tls_handshake_timeout: Duration,
    /// User-Agent header value sent unless the request sets one.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            proxy_from_env: false,
            tunnel: None,
            proxy_trust: TrustContext::default(),
            target_trust: TrustContext::default(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            follow_redirects: true,
            follow_all_redirects: false,
            follow_original_method: false,
            remove_referer_header: false,
            follow_predicate: None,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(TCP_CONNECT_TIMEOUT_SECS),
            tls_handshake_timeout: Duration::from_secs(TLS_HANDSHAKE_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("proxy", &self.proxy.as_ref().map(Url::as_str))
            .field("proxy_from_env", &self.proxy_from_env)
            .field("tunnel", &self.tunnel)
            .field("proxy_trust", &self.proxy_trust)
            .field("target_trust", &self.target_trust)
            .field("max_redirects", &self.max_redirects)
            .field("follow_redirects", &self.follow_redirects)
            .field("follow_all_redirects", &self.follow_all_redirects)
            .field("follow_original_method", &self.follow_original_method)
            .field("remove_referer_header", &self.remove_referer_header)
            .field("follow_predicate", &self.follow_predicate.is_some())
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("tls_handshake_timeout", &self.tls_handshake_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}
