//! Proxy/tunnel decision.
//!
//! Given a target URL, the proxy selected for this attempt and the explicit
//! tunnel flag, decides how the attempt reaches the origin:
//!
//! | proxy | tunnel flag | target | mode      |
//! |-------|-------------|--------|-----------|
//! | none  | any         | any    | `None`    |
//! | set   | `true`      | any    | `Tunnel`  |
//! | set   | unset       | https  | `Tunnel`  |
//! | set   | unset       | http   | `Forward` |
//! | set   | `false`     | http   | `Forward` |
//! | set   | `false`     | https  | error     |
//!
//! A forward proxy sees the request in plaintext, so an https target can only
//! ever be reached through a CONNECT tunnel. An explicit `tunnel = false` for an
//! https target is rejected instead of being silently upgraded.

use serde::Serialize;
use url::Url;

use crate::config::{DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT};
use crate::error_handling::PolicyError;

/// How one attempt reaches its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Connect straight to the target.
    None,
    /// Send an absolute-form request to the proxy.
    Forward,
    /// Open a CONNECT tunnel through the proxy, then talk to the target inside it.
    Tunnel,
}

/// Host, port and scheme security of one end of a hop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Host without IPv6 brackets.
    pub host: String,
    /// Explicit port, or the scheme default.
    pub port: u16,
    /// True for `https`.
    pub secure: bool,
}

impl Endpoint {
    /// Extracts the endpoint of an `http`/`https` target URL.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::UnsupportedScheme` for other schemes and
    /// `PolicyError::MissingHost` for host-less URLs.
    pub fn from_target(url: &Url) -> Result<Self, PolicyError> {
        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(PolicyError::UnsupportedScheme {
                    scheme: other.to_string(),
                    url: url.to_string(),
                })
            }
        };
        Self::build(url, secure)
    }

    /// Extracts the endpoint of a proxy URL.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::UnsupportedProxyScheme` for schemes other than
    /// `http`/`https` and `PolicyError::MissingHost` for host-less URLs.
    pub fn from_proxy(url: &Url) -> Result<Self, PolicyError> {
        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => {
                return Err(PolicyError::UnsupportedProxyScheme {
                    scheme: other.to_string(),
                    url: url.to_string(),
                })
            }
        };
        Self::build(url, secure)
    }

    fn build(url: &Url, secure: bool) -> Result<Self, PolicyError> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| PolicyError::MissingHost(url.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let default_port = if secure {
            DEFAULT_HTTPS_PORT
        } else {
            DEFAULT_HTTP_PORT
        };
        Ok(Self {
            host,
            port: url.port().unwrap_or(default_port),
            secure,
        })
    }

    /// `host:port` with IPv6 literals re-bracketed, as used in CONNECT and `Host`.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Resolved connection plan for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPlan {
    /// Chosen mode.
    pub mode: ProxyMode,
    /// The proxy URL (`None` iff `mode == ProxyMode::None`).
    pub proxy: Option<Url>,
    /// True when the target scheme is `https`.
    pub target_is_secure: bool,
}

/// Decides no-proxy / forward / tunnel for one attempt.
///
/// Pure function of its inputs; called again for every redirect hop so a chain
/// never inherits the previous hop's decision.
///
/// # Arguments
///
/// * `target` - The attempt's target URL
/// * `proxy` - The proxy selected for this attempt, if any
/// * `explicit_tunnel` - The caller's tunnel flag (`None` = unset)
///
/// # Errors
///
/// Returns a `PolicyError` when the target or proxy URL is unusable, or when
/// `explicit_tunnel == Some(false)` is combined with an https target.
pub fn decide(
    target: &Url,
    proxy: Option<&Url>,
    explicit_tunnel: Option<bool>,
) -> Result<ProxyPlan, PolicyError> {
    let target_is_secure = Endpoint::from_target(target)?.secure;

    let Some(proxy) = proxy else {
        return Ok(ProxyPlan {
            mode: ProxyMode::None,
            proxy: None,
            target_is_secure,
        });
    };
    Endpoint::from_proxy(proxy)?;

    let mode = match (explicit_tunnel, target_is_secure) {
        (Some(true), _) => ProxyMode::Tunnel,
        (None, true) => ProxyMode::Tunnel,
        (None, false) | (Some(false), false) => ProxyMode::Forward,
        (Some(false), true) => {
            return Err(PolicyError::ForwardingSecureTarget {
                target: target.to_string(),
            })
        }
    };

    log::debug!(
        "Proxy plan for {}: {:?} via {} (tunnel flag {:?})",
        target,
        mode,
        proxy,
        explicit_tunnel
    );

    Ok(ProxyPlan {
        mode,
        proxy: Some(proxy.clone()),
        target_is_secure,
    })
}
