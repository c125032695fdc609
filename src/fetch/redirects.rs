//! Redirect state machine.
//!
//! Drives the attempts of one logical request:
//!
//! ```text
//! Sending -> AwaitingResponse -> Done
//!                             -> Redirecting -> Sending
//!                             -> Failed
//! ```
//!
//! Every attempt re-selects the proxy and re-runs the proxy/tunnel decision for
//! its own URL, so an http -> https redirect can switch from forward proxying to
//! a tunnel and back. Transport failures end the request; nothing is retried.

use http::header::{
    AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION, REFERER, TRANSFER_ENCODING,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use log::{debug, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error_handling::{Error, PolicyError};
use crate::fetch::attempt;
use crate::fetch::body::Body;
use crate::fetch::request::Request;
use crate::fetch::response::Response;
use crate::fetch::trace::{Hop, Trace, TraceAction, TraceEvent};
use crate::fetch::Client;

/// State carried from one attempt to the next.
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    /// Target of this attempt.
    pub url: Url,
    /// Method of this attempt.
    pub method: Method,
    /// Caller headers after redirect hygiene.
    pub headers: HeaderMap,
    /// Redirects followed before this attempt.
    pub redirect_count: usize,
    /// Method of the first attempt.
    pub original_method: Method,
    /// Whether this attempt sends the request body.
    pub keep_body: bool,
}

impl RequestAttempt {
    /// First attempt of a logical request.
    pub fn new(method: Method, url: Url, headers: HeaderMap) -> Self {
        Self {
            url,
            original_method: method.clone(),
            method,
            headers,
            redirect_count: 0,
            keep_body: true,
        }
    }

    /// Builds the next attempt from a followed redirect.
    ///
    /// Header hygiene:
    /// - body headers are removed when the body is dropped
    /// - `Host` is always recomputed for the new target
    /// - `Authorization` is removed when the host changes
    /// - `Referer` is set to the previous URL unless disabled or on https -> http
    pub fn follow(&self, decision: &RedirectDecision, remove_referer: bool) -> Self {
        let mut headers = self.headers.clone();
        let keep_body = self.keep_body && decision.keep_body;

        if !keep_body {
            headers.remove(CONTENT_TYPE);
            headers.remove(CONTENT_LENGTH);
            headers.remove(TRANSFER_ENCODING);
        }
        headers.remove(HOST);
        if self.url.host_str() != decision.next_url.host_str() {
            headers.remove(AUTHORIZATION);
        }

        headers.remove(REFERER);
        let downgrade = self.url.scheme() == "https" && decision.next_url.scheme() != "https";
        if !remove_referer && !downgrade {
            let mut referer = self.url.clone();
            referer.set_fragment(None);
            let _ = referer.set_username("");
            let _ = referer.set_password(None);
            if let Ok(value) = HeaderValue::from_str(referer.as_str()) {
                headers.insert(REFERER, value);
            }
        }

        Self {
            url: decision.next_url.clone(),
            method: decision.next_method.clone(),
            headers,
            redirect_count: self.redirect_count + 1,
            original_method: self.original_method.clone(),
            keep_body,
        }
    }
}

/// What to do with a redirect-class response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectDecision {
    /// False when policy (method gate or predicate) declines the redirect.
    pub follow: bool,
    /// `Location` resolved against the current URL.
    pub next_url: Url,
    /// Method for the next attempt.
    pub next_method: Method,
    /// True when the next attempt must resend the body.
    pub keep_body: bool,
}

fn is_redirect_class(status: StatusCode) -> bool {
    status.is_redirection() && status != StatusCode::NOT_MODIFIED
}

fn preserves_method(status: StatusCode) -> bool {
    status == StatusCode::TEMPORARY_REDIRECT || status == StatusCode::PERMANENT_REDIRECT
}

fn method_allows_follow(config: &ClientConfig, method: &Method) -> bool {
    if config.follow_all_redirects {
        return true;
    }
    config.follow_redirects
        && !matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
}

/// Classifies a response.
///
/// Returns `None` when the response is final: not a redirect class, or a 3xx
/// without a usable `Location`. The redirect limit is not checked here.
pub fn decide_redirect(
    config: &ClientConfig,
    attempt: &RequestAttempt,
    status: StatusCode,
    headers: &HeaderMap,
) -> Option<RedirectDecision> {
    if !is_redirect_class(status) {
        return None;
    }

    let Some(location) = headers.get(LOCATION) else {
        warn!("Redirect status {} for {} but no Location header", status, attempt.url);
        return None;
    };
    let next_url = match location
        .to_str()
        .ok()
        .and_then(|loc| attempt.url.join(loc.trim()).ok())
    {
        Some(url) => url,
        None => {
            warn!("Unusable Location {:?} in {} from {}", location, status, attempt.url);
            return None;
        }
    };

    let (next_method, keep_body) = if preserves_method(status) {
        (attempt.method.clone(), true)
    } else if config.follow_original_method {
        (attempt.original_method.clone(), true)
    } else if attempt.method == Method::HEAD {
        (Method::HEAD, false)
    } else {
        (Method::GET, false)
    };

    let follow = method_allows_follow(config, &attempt.method)
        && config
            .follow_predicate
            .as_ref()
            .map_or(true, |predicate| predicate(status, &next_url));

    Some(RedirectDecision {
        follow,
        next_url,
        next_method,
        keep_body,
    })
}

/// Runs the attempt loop for `request`.
///
/// # Returns
///
/// The first non-redirect response, or a 3xx response whose redirect policy
/// declined to follow.
///
/// # Errors
///
/// - `Error::RedirectLimit` when following would exceed `max_redirects`
/// - `Error::BodyNotReplayable` when a body-preserving redirect cannot resend the body
/// - Any policy, tunnel or transport error from an attempt
pub(crate) async fn run(
    client: &Client,
    request: Request,
    trace: &mut Trace,
) -> Result<Response, Error> {
    let config = client.config();
    let Request {
        method,
        url,
        headers,
        body,
        invalid,
        ..
    } = request;

    if let Some(reason) = invalid {
        return Err(Error::InvalidRequest(reason));
    }
    let url = Url::parse(&url).map_err(|e| PolicyError::InvalidUrl {
        url: url.clone(),
        reason: e.to_string(),
    })?;

    let mut current = RequestAttempt::new(method, url, headers);
    loop {
        let response = attempt::send(client, &current, &body, trace).await?;
        let status = response.status();

        let Some(decision) = decide_redirect(config, &current, status, response.headers()) else {
            return Ok(response);
        };
        if !decision.follow {
            debug!(
                "Not following {} from {} to {}",
                status, current.url, decision.next_url
            );
            return Ok(response);
        }
        if current.redirect_count >= config.max_redirects {
            warn!(
                "Redirect limit {} reached at {}",
                config.max_redirects, current.url
            );
            return Err(Error::RedirectLimit {
                limit: config.max_redirects,
                response: Box::new(response),
            });
        }
        if current.keep_body && decision.keep_body {
            check_replayable(&body, status)?;
        }

        info!(
            "Following {} redirect {} -> {} ({} {})",
            status.as_u16(),
            current.url,
            decision.next_url,
            decision.next_method,
            if current.keep_body && decision.keep_body {
                "with body"
            } else {
                "without body"
            }
        );
        trace.push(TraceEvent {
            hop: Hop::Target,
            host: current.url.host_str().unwrap_or_default().to_string(),
            action: TraceAction::Redirect {
                status: status.as_u16(),
                from: current.url.to_string(),
                to: decision.next_url.to_string(),
            },
        });

        current = current.follow(&decision, config.remove_referer_header);
    }
}

fn check_replayable(body: &Body, status: StatusCode) -> Result<(), Error> {
    match body.replay_blocker() {
        Some(reason) => Err(Error::BodyNotReplayable { status, reason }),
        None => Ok(()),
    }
}
