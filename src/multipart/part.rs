//! Part sources and per-part options.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;

use crate::fetch::{ByteStream, OneShotStream};

/// Produces a fresh stream every time it is called.
pub type ReaderFactory = Arc<dyn Fn() -> io::Result<ByteStream> + Send + Sync>;

/// Where a part's bytes come from.
///
/// Everything except `OneShot` can be read again on every build, which is
/// what lets a 307/308 redirect resend the whole form.
#[derive(Clone)]
pub enum PartSource {
    /// UTF-8 text.
    Text(String),
    /// In-memory bytes.
    Bytes(Bytes),
    /// A file, reopened by path on every build.
    File(PathBuf),
    /// A stream factory, called again on every build.
    Reader {
        /// Stream constructor.
        factory: ReaderFactory,
        /// Exact byte length, when known.
        length: Option<u64>,
    },
    /// A stream that can be sent once.
    OneShot(OneShotStream),
}

impl PartSource {
    /// A file opened afresh for every build.
    pub fn file(path: impl AsRef<Path>) -> Self {
        PartSource::File(path.as_ref().to_path_buf())
    }

    /// A re-openable stream source; pass `length` to keep `Content-Length`.
    pub fn reader<F>(factory: F, length: Option<u64>) -> Self
    where
        F: Fn() -> io::Result<ByteStream> + Send + Sync + 'static,
    {
        PartSource::Reader {
            factory: Arc::new(factory),
            length,
        }
    }

    /// A single-use stream. Forms containing one are not replayable.
    pub fn one_shot<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        PartSource::OneShot(OneShotStream::new(stream))
    }

    /// True unless the source is a one-shot stream.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, PartSource::OneShot(_))
    }
}

impl fmt::Debug for PartSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartSource::Text(text) => f.debug_tuple("Text").field(text).finish(),
            PartSource::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            PartSource::File(path) => f.debug_tuple("File").field(path).finish(),
            PartSource::Reader { length, .. } => {
                f.debug_struct("Reader").field("length", length).finish()
            }
            PartSource::OneShot(stream) => f.debug_tuple("OneShot").field(stream).finish(),
        }
    }
}

impl From<&str> for PartSource {
    fn from(text: &str) -> Self {
        PartSource::Text(text.to_string())
    }
}

impl From<String> for PartSource {
    fn from(text: String) -> Self {
        PartSource::Text(text)
    }
}

impl From<Bytes> for PartSource {
    fn from(bytes: Bytes) -> Self {
        PartSource::Bytes(bytes)
    }
}

impl From<Vec<u8>> for PartSource {
    fn from(bytes: Vec<u8>) -> Self {
        PartSource::Bytes(bytes.into())
    }
}

impl From<PathBuf> for PartSource {
    fn from(path: PathBuf) -> Self {
        PartSource::File(path)
    }
}

/// Per-part options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartOptions {
    /// `filename` in Content-Disposition; marks the part as a file.
    pub filename: Option<String>,
    /// Overrides the default or guessed Content-Type.
    pub content_type: Option<String>,
    /// Extra part headers, written after Content-Type.
    pub headers: Vec<(String, String)>,
}

/// One entry of an ordered form.
#[derive(Debug, Clone)]
pub struct FormPart {
    /// Field name.
    pub key: String,
    /// Part content.
    pub value: PartSource,
    /// Per-part options.
    pub options: PartOptions,
}

impl FormPart {
    /// A part without options.
    pub fn new(key: impl Into<String>, value: impl Into<PartSource>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            options: PartOptions::default(),
        }
    }

    /// Overrides the filename written in Content-Disposition.
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.options.filename = Some(filename.into());
        self
    }

    /// Overrides the part's Content-Type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.options.content_type = Some(content_type.into());
        self
    }

    /// Adds an extra header line to this part.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.push((name.into(), value.into()));
        self
    }
}
