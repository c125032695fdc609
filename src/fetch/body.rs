//! Request bodies.
//!
//! A `Body` is the declarative source; a `PreparedBody` is what one attempt
//! actually sends. Every attempt that carries a body prepares it again from
//! the source, so replay never reads from a stream an earlier attempt drained.

use std::convert::Infallible;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use http::HeaderValue;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;

use crate::error_handling::Error;
use crate::multipart::MultipartSpec;

/// Boxed stream of body chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Body type handed to hyper.
pub(crate) type RequestBody = UnsyncBoxBody<Bytes, io::Error>;

/// A stream that can be read exactly once.
///
/// Clones share the same underlying stream; whichever clone takes it first
/// wins and every later `take` returns `None`.
#[derive(Clone)]
pub struct OneShotStream {
    inner: Arc<Mutex<Option<ByteStream>>>,
}

impl OneShotStream {
    /// Wraps a stream that can be taken once.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(Some(stream.boxed()))),
        }
    }

    /// Takes the stream, leaving the slot empty.
    pub fn take(&self) -> Option<ByteStream> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// True once the stream has been taken.
    pub fn is_consumed(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for OneShotStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneShotStream")
            .field("consumed", &self.is_consumed())
            .finish()
    }
}

/// Request body source.
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// In-memory bytes; always replayable.
    Bytes(Bytes),
    /// Caller-supplied stream; usable for one attempt only.
    Stream(OneShotStream),
    /// `multipart/form-data`, rebuilt with a fresh boundary for every attempt.
    Multipart(MultipartSpec),
}

impl Body {
    /// Wraps a stream as a single-use body.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Body::Stream(OneShotStream::new(stream))
    }

    /// True when every attempt can reproduce this body in full.
    pub fn is_replayable(&self) -> bool {
        self.replay_blocker().is_none()
    }

    /// Describes why a follow-up attempt cannot send this body again.
    pub(crate) fn replay_blocker(&self) -> Option<String> {
        match self {
            Body::Empty | Body::Bytes(_) => None,
            Body::Stream(_) => Some("the stream body was consumed by the previous attempt".to_string()),
            Body::Multipart(spec) => spec.non_replayable_field().map(|field| {
                format!("multipart field '{field}' is backed by a one-shot stream")
            }),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Bytes(bytes.into())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Bytes(text.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Bytes(Bytes::from_static(text.as_bytes()))
    }
}

impl From<MultipartSpec> for Body {
    fn from(spec: MultipartSpec) -> Self {
        Body::Multipart(spec)
    }
}

/// The body of one attempt, ready to send.
pub(crate) struct PreparedBody {
    pub content_type: Option<HeaderValue>,
    /// `None` means the length is unknown and the body goes out chunked.
    pub content_length: Option<u64>,
    pub body: RequestBody,
    pub is_empty: bool,
}

impl PreparedBody {
    pub(crate) fn empty() -> Self {
        Self {
            content_type: None,
            content_length: None,
            body: Empty::<Bytes>::new()
                .map_err(|never: Infallible| match never {})
                .boxed_unsync(),
            is_empty: true,
        }
    }

    fn full(bytes: Bytes, content_type: Option<HeaderValue>) -> Self {
        Self {
            content_type,
            content_length: Some(bytes.len() as u64),
            body: Full::new(bytes)
                .map_err(|never: Infallible| match never {})
                .boxed_unsync(),
            is_empty: false,
        }
    }

    fn streaming(
        stream: ByteStream,
        content_length: Option<u64>,
        content_type: Option<HeaderValue>,
    ) -> Self {
        Self {
            content_type,
            content_length,
            body: StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
            is_empty: false,
        }
    }

    /// Materializes `body` for one attempt.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidRequest` when a stream body was already taken elsewhere
    /// - `Error::Multipart` when a multipart part source cannot be opened
    pub(crate) async fn prepare(body: &Body) -> Result<Self, Error> {
        match body {
            Body::Empty => Ok(Self::empty()),
            Body::Bytes(bytes) => Ok(Self::full(bytes.clone(), None)),
            Body::Stream(stream) => {
                let stream = stream.take().ok_or_else(|| {
                    Error::InvalidRequest("stream body was already consumed".to_string())
                })?;
                Ok(Self::streaming(stream, None, None))
            }
            Body::Multipart(spec) => {
                let built = spec.build().await?;
                let content_type = HeaderValue::from_str(built.content_type())
                    .map_err(|e| Error::InvalidRequest(e.to_string()))?;
                let stream = built.open()?;
                Ok(Self::streaming(
                    stream,
                    built.content_length(),
                    Some(content_type),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_one_shot_stream_takes_once() {
        let body = OneShotStream::new(stream::iter(vec![Ok(Bytes::from_static(b"x"))]));
        let clone = body.clone();
        assert!(!body.is_consumed());
        assert!(clone.take().is_some());
        assert!(body.is_consumed());
        assert!(body.take().is_none());
    }

    #[test]
    fn test_replayability() {
        assert!(Body::Empty.is_replayable());
        assert!(Body::from("abc").is_replayable());
        let streamed = Body::stream(stream::empty::<io::Result<Bytes>>());
        assert!(!streamed.is_replayable());
        assert!(streamed.replay_blocker().unwrap().contains("consumed"));
    }

    #[tokio::test]
    async fn test_prepare_bytes_has_length() {
        let prepared = PreparedBody::prepare(&Body::from("hello")).await.unwrap();
        assert_eq!(prepared.content_length, Some(5));
        assert!(prepared.content_type.is_none());
        let collected = prepared.body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_prepare_consumed_stream_fails() {
        let body = Body::stream(stream::iter(vec![Ok(Bytes::from_static(b"x"))]));
        assert!(PreparedBody::prepare(&body).await.is_ok());
        assert!(matches!(
            PreparedBody::prepare(&body).await,
            Err(Error::InvalidRequest(_))
        ));
    }
}
