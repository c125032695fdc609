//! One HTTP/1.1 request/response over an established hop.
//!
//! hyper only frames the message; connecting, proxying and TLS have already
//! happened by the time a connection reaches this module.

use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, PROXY_AUTHORIZATION, USER_AGENT};
use http::{HeaderMap, HeaderValue, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper_util::rt::TokioIo;
use log::{debug, warn};
use tokio::task::JoinHandle;
use url::{Position, Url};

use crate::error_handling::{Error, TransportError};
use crate::fetch::body::{PreparedBody, RequestBody};
use crate::fetch::connection::BoxedIo;
use crate::fetch::redirects::RequestAttempt;
use crate::fetch::trace::Hop;

/// Aborts the connection driver when the exchange is dropped or finishes.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// How the request target is written on the request line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestForm {
    /// `GET /path?query HTTP/1.1`
    Origin,
    /// `GET http://host/path?query HTTP/1.1`, for forward proxies.
    Absolute,
}

/// `Host` header value: host plus explicit non-default port.
pub(crate) fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Builds the hyper request for one attempt.
///
/// # Errors
///
/// Returns `Error::InvalidRequest` if the URL cannot be expressed as a request URI.
pub(crate) fn build_request(
    attempt: &RequestAttempt,
    form: RequestForm,
    body: PreparedBody,
    proxy_authorization: Option<&HeaderValue>,
    user_agent: &str,
) -> Result<http::Request<RequestBody>, Error> {
    let target = match form {
        RequestForm::Origin => &attempt.url[Position::BeforePath..Position::AfterQuery],
        RequestForm::Absolute => &attempt.url[..Position::AfterQuery],
    };
    let uri: Uri = target
        .parse()
        .map_err(|e| Error::InvalidRequest(format!("invalid request target '{target}': {e}")))?;

    let mut headers = attempt.headers.clone();
    if !headers.contains_key(HOST) {
        let host = HeaderValue::from_str(&host_header(&attempt.url))
            .map_err(|e| Error::InvalidRequest(e.to_string()))?;
        headers.insert(HOST, host);
    }
    if !headers.contains_key(USER_AGENT) {
        let agent =
            HeaderValue::from_str(user_agent).map_err(|e| Error::InvalidRequest(e.to_string()))?;
        headers.insert(USER_AGENT, agent);
    }
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    if let Some(content_type) = body.content_type {
        headers.insert(CONTENT_TYPE, content_type);
    }
    if let Some(length) = body.content_length {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    } else if body.is_empty {
        headers.remove(CONTENT_LENGTH);
    }
    if let (RequestForm::Absolute, Some(auth)) = (form, proxy_authorization) {
        headers.insert(PROXY_AUTHORIZATION, auth.clone());
    }

    let mut request = http::Request::new(body.body);
    *request.method_mut() = attempt.method.clone();
    *request.uri_mut() = uri;
    *request.headers_mut() = headers;
    Ok(request)
}

/// Sends `request` over `io` and reads the whole response.
///
/// `hop` and `host` name the peer `io` is connected to: the proxy for
/// absolute-form requests, the target otherwise.
///
/// # Errors
///
/// Returns `TransportError::Http` if the HTTP/1.1 exchange fails at any point.
pub(crate) async fn send(
    io: BoxedIo,
    request: http::Request<RequestBody>,
    hop: Hop,
    host: &str,
) -> Result<(StatusCode, HeaderMap, Bytes), Error> {
    let http_error = |source| TransportError::Http {
        hop,
        host: host.to_string(),
        source,
    };

    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(http_error)?;
    let driver_host = host.to_string();
    let _driver = AbortOnDrop(tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("Connection to {} ended with error: {}", driver_host, e);
        }
    }));

    debug!("{} {} (host {})", request.method(), request.uri(), host);
    let response = sender.send_request(request).await.map_err(http_error)?;
    let (parts, body) = response.into_parts();
    let body = body.collect().await.map_err(http_error)?.to_bytes();
    debug!("{} answered {} ({} bytes)", host, parts.status, body.len());

    Ok((parts.status, parts.headers, body))
}
