//! Final response and exchange result.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use url::Url;

use crate::error_handling::Error;
use crate::fetch::trace::Trace;

/// A fully read response.
#[derive(Debug, Clone)]
pub struct Response {
    pub(crate) url: Url,
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) redirects: usize,
}

impl Response {
    /// URL of the attempt that produced this response.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The fully read body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Number of redirects followed before this response.
    pub fn redirects(&self) -> usize {
        self.redirects
    }

    /// True for a 3xx status (a redirect that was not followed).
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }
}

/// Outcome of one logical request together with its trace.
#[derive(Debug)]
pub struct Exchange {
    /// Events in attempt order, including those of a failed attempt.
    pub trace: Trace,
    /// The final response or the error that ended the request.
    pub result: Result<Response, Error>,
}

impl Exchange {
    /// Splits into the result and the trace.
    pub fn into_parts(self) -> (Result<Response, Error>, Trace) {
        (self.result, self.trace)
    }
}
