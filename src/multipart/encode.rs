//! Wire encoding of `multipart/form-data`.
//!
//! Layout of a body with parts `p1..pn`:
//!
//! ```text
//! --<boundary>\r\n<headers of p1>\r\n\r\n<bytes of p1>\r\n
//! ...
//! --<boundary>\r\n<headers of pn>\r\n\r\n<bytes of pn>\r\n
//! --<boundary>--\r\n
//! ```

use std::path::Path;

use bytes::Bytes;
use futures::future::ready;
use futures::{stream, StreamExt, TryStreamExt};
use rand::Rng;
use tokio_util::io::ReaderStream;

use super::part::{PartOptions, PartSource};
use crate::config::{BOUNDARY_DASHES, BOUNDARY_DIGITS, DEFAULT_PART_CONTENT_TYPE};
use crate::error_handling::MultipartError;
use crate::fetch::ByteStream;

/// Generates a fresh boundary: dashes followed by random decimal digits.
pub(crate) fn generate_boundary() -> String {
    let mut rng = rand::rng();
    let mut boundary = "-".repeat(BOUNDARY_DASHES);
    for _ in 0..BOUNDARY_DIGITS {
        let digit: u8 = rng.random_range(0..10);
        boundary.push(char::from(b'0' + digit));
    }
    boundary
}

/// Escapes a Content-Disposition parameter value.
pub(crate) fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn guess_from_name(name: &Path) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(DEFAULT_PART_CONTENT_TYPE)
        .to_string()
}

/// File name written in Content-Disposition.
pub(crate) fn resolve_filename(source: &PartSource, options: &PartOptions) -> Option<String> {
    if options.filename.is_some() {
        return options.filename.clone();
    }
    match source {
        PartSource::File(path) => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        _ => None,
    }
}

/// Content-Type written for a part, if any.
///
/// Text and byte parts only get one when they carry a filename; files are
/// sniffed by name; streams fall back to `application/octet-stream`.
pub(crate) fn resolve_content_type(
    source: &PartSource,
    options: &PartOptions,
    filename: Option<&str>,
) -> Option<String> {
    if let Some(content_type) = &options.content_type {
        return Some(content_type.clone());
    }
    let by_filename = filename.map(|name| guess_from_name(Path::new(name)));
    match source {
        PartSource::Text(_) | PartSource::Bytes(_) => by_filename,
        PartSource::File(path) => by_filename.or_else(|| Some(guess_from_name(path))),
        PartSource::Reader { .. } | PartSource::OneShot(_) => {
            by_filename.or_else(|| Some(DEFAULT_PART_CONTENT_TYPE.to_string()))
        }
    }
}

/// Encodes the delimiter and header block that precede a part's bytes.
pub(crate) fn encode_part_head(
    boundary: &str,
    name: &str,
    filename: Option<&str>,
    content_type: Option<&str>,
    headers: &[(String, String)],
) -> Bytes {
    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(b"--");
    buf.extend_from_slice(boundary.as_bytes());
    buf.extend_from_slice(b"\r\nContent-Disposition: form-data; name=\"");
    buf.extend_from_slice(escape_quoted(name).as_bytes());
    buf.extend_from_slice(b"\"");
    if let Some(filename) = filename {
        buf.extend_from_slice(b"; filename=\"");
        buf.extend_from_slice(escape_quoted(filename).as_bytes());
        buf.extend_from_slice(b"\"");
    }
    if let Some(content_type) = content_type {
        buf.extend_from_slice(b"\r\nContent-Type: ");
        buf.extend_from_slice(content_type.as_bytes());
    }
    for (key, value) in headers {
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(value.as_bytes());
    }
    buf.extend_from_slice(b"\r\n\r\n");
    Bytes::from(buf)
}

/// `--<boundary>--\r\n`
pub(crate) fn encode_closing(boundary: &str) -> Bytes {
    Bytes::from(format!("--{boundary}--\r\n"))
}

const PART_TRAILER: &[u8] = b"\r\n";

/// One part with its encoded head.
#[derive(Debug, Clone)]
pub(crate) struct EncodedPart {
    pub field: String,
    pub head: Bytes,
    pub source: PartSource,
    pub length: Option<u64>,
}

impl EncodedPart {
    fn encoded_len(&self) -> Option<u64> {
        self.length
            .map(|len| self.head.len() as u64 + len + PART_TRAILER.len() as u64)
    }

    fn open_source(&self) -> Result<ByteStream, MultipartError> {
        match &self.source {
            PartSource::Text(text) => Ok(single(Bytes::from(text.clone()))),
            PartSource::Bytes(bytes) => Ok(single(bytes.clone())),
            PartSource::File(path) => {
                let path = path.clone();
                Ok(stream::once(async move { tokio::fs::File::open(path).await })
                    .map_ok(ReaderStream::new)
                    .try_flatten()
                    .boxed())
            }
            PartSource::Reader { factory, .. } => {
                factory().map_err(|source| MultipartError::Source {
                    field: self.field.clone(),
                    source,
                })
            }
            PartSource::OneShot(stream) => {
                stream.take().ok_or_else(|| MultipartError::NotReplayable {
                    field: self.field.clone(),
                })
            }
        }
    }
}

fn single(bytes: Bytes) -> ByteStream {
    stream::once(ready(Ok(bytes))).boxed()
}

/// A built form: fixed boundary and headers, re-openable byte stream.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    content_type: String,
    parts: Vec<EncodedPart>,
}

impl MultipartBody {
    pub(crate) fn new(boundary: String, parts: Vec<EncodedPart>) -> Self {
        Self {
            content_type: format!("multipart/form-data; boundary={boundary}"),
            boundary,
            parts,
        }
    }

    /// The boundary shared by every delimiter in this body.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `multipart/form-data; boundary=<boundary>`
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Total body length, when every part's length is known.
    pub fn content_length(&self) -> Option<u64> {
        let closing = encode_closing(&self.boundary).len() as u64;
        self.parts
            .iter()
            .map(EncodedPart::encoded_len)
            .sum::<Option<u64>>()
            .map(|parts| parts + closing)
    }

    /// Opens the body bytes.
    ///
    /// Callable more than once: text and byte parts are identical every time,
    /// files are reopened and reader factories called again.
    ///
    /// # Errors
    ///
    /// Returns `MultipartError::NotReplayable` when a one-shot part was already
    /// taken, or `MultipartError::Source` when a reader factory fails.
    pub fn open(&self) -> Result<ByteStream, MultipartError> {
        let mut pieces: Vec<ByteStream> = Vec::with_capacity(self.parts.len() * 3 + 1);
        for part in &self.parts {
            pieces.push(single(part.head.clone()));
            pieces.push(part.open_source()?);
            pieces.push(single(Bytes::from_static(PART_TRAILER)));
        }
        pieces.push(single(encode_closing(&self.boundary)));
        Ok(stream::iter(pieces).flatten().boxed())
    }

    /// Reads the whole body into memory.
    pub async fn to_bytes(&self) -> Result<Bytes, MultipartError> {
        let chunks: Vec<Bytes> = self
            .open()?
            .try_collect()
            .await
            .map_err(|source| MultipartError::Source {
                field: "<body>".to_string(),
                source,
            })?;
        Ok(Bytes::from(chunks.concat()))
    }
}
