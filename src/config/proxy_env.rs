//! Proxy discovery from the process environment.
//!
//! Proxy selection is re-evaluated for every attempt, so a redirect that
//! switches scheme (http -> https) can switch from `HTTP_PROXY` to
//! `HTTPS_PROXY`, or bypass the proxy entirely via `NO_PROXY`.

use url::Url;

use crate::config::types::ClientConfig;
use crate::error_handling::PolicyError;

/// Snapshot of the proxy-related environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvProxies {
    http: Option<String>,
    https: Option<String>,
    no_proxy: Vec<String>,
}

impl EnvProxies {
    /// Reads `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY` (upper or lower case).
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a snapshot from an arbitrary variable lookup.
    ///
    /// Lower-case names win over upper-case ones, matching curl.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        let no_proxy = first(&["no_proxy", "NO_PROXY"])
            .map(|raw| {
                raw.split(',')
                    .map(|entry| entry.trim().to_ascii_lowercase())
                    .filter(|entry| !entry.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            http: first(&["http_proxy", "HTTP_PROXY"]),
            https: first(&["https_proxy", "HTTPS_PROXY"]),
            no_proxy,
        }
    }

    /// Returns the proxy to use for `target`, if any.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::InvalidUrl` if the selected variable does not hold a URL.
    pub fn proxy_for(&self, target: &Url) -> Result<Option<Url>, PolicyError> {
        if self.bypasses(target) {
            log::debug!("NO_PROXY bypass for {}", target);
            return Ok(None);
        }

        let raw = match target.scheme() {
            "https" => self.https.as_deref(),
            _ => self.http.as_deref(),
        };

        raw.map(parse_env_proxy).transpose()
    }

    fn bypasses(&self, target: &Url) -> bool {
        let Some(host) = target.host_str() else {
            return false;
        };
        let host = host.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase();
        let port = target.port_or_known_default();

        self.no_proxy.iter().any(|entry| {
            if entry == "*" {
                return true;
            }
            let (pattern, entry_port) = split_entry_port(entry);
            if let Some(entry_port) = entry_port {
                if Some(entry_port) != port {
                    return false;
                }
            }
            let pattern = pattern.trim_start_matches('.');
            host == pattern || host.ends_with(&format!(".{pattern}"))
        })
    }
}

/// Splits `host:port` entries; bare IPv6 literals are left alone.
fn split_entry_port(entry: &str) -> (&str, Option<u16>) {
    if entry.matches(':').count() == 1 {
        if let Some((host, port)) = entry.rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                return (host, Some(port));
            }
        }
    }
    (entry, None)
}

/// Parses an environment proxy value; a missing scheme means `http://`.
fn parse_env_proxy(raw: &str) -> Result<Url, PolicyError> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    Url::parse(&candidate).map_err(|e| PolicyError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Resolves the proxy for one attempt against `target`.
///
/// An explicit `ClientConfig::proxy` always wins; the environment is only
/// consulted when `proxy_from_env` is set.
pub fn proxy_for(config: &ClientConfig, target: &Url) -> Result<Option<Url>, PolicyError> {
    if let Some(proxy) = &config.proxy {
        return Ok(Some(proxy.clone()));
    }
    if !config.proxy_from_env {
        return Ok(None);
    }
    EnvProxies::from_env().proxy_for(target)
}
