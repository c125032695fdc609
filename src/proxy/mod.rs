//! Proxy traversal.
//!
//! This module provides:
//! - The per-attempt proxy/tunnel decision (`policy`)
//! - CONNECT tunnel establishment with target-hop TLS upgrade (`tunnel`)
//! - `Proxy-Authorization` derivation from proxy URL credentials

pub mod policy;
pub mod tunnel;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::HeaderValue;
use percent_encoding::percent_decode_str;
use url::Url;

pub use policy::{decide, Endpoint, ProxyMode, ProxyPlan};
pub use tunnel::{establish, ConnectRequest};

/// Builds a `Basic` `Proxy-Authorization` value from `user:pass@` in the proxy URL.
///
/// Returns `None` when the URL carries no username.
pub fn proxy_authorization(proxy: &Url) -> Option<HeaderValue> {
    if proxy.username().is_empty() {
        return None;
    }
    let user = percent_decode_str(proxy.username()).decode_utf8_lossy();
    let pass = proxy
        .password()
        .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned())
        .unwrap_or_default();
    let token = STANDARD.encode(format!("{user}:{pass}"));
    let mut value = HeaderValue::from_str(&format!("Basic {token}")).ok()?;
    value.set_sensitive(true);
    Some(value)
}
