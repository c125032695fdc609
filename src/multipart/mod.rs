//! `multipart/form-data` body builder.
//!
//! This module provides:
//! - `MultipartSpec`: declarative form description in map or ordered form
//! - `PartSource` / `PartOptions` / `FormPart`: per-part content and metadata
//! - `MultipartBody`: one build (boundary + headers) whose bytes can be opened repeatedly
//!
//! A `MultipartSpec` is the durable source: every attempt builds it again with a new
//! boundary, and file and reader parts are reopened from their descriptors
//! rather than replayed from a drained stream.

mod encode;
mod part;

use bytes::Bytes;
use log::debug;

use crate::error_handling::MultipartError;

pub use encode::MultipartBody;
pub use part::{FormPart, PartOptions, PartSource, ReaderFactory};

use encode::{encode_part_head, generate_boundary, resolve_content_type, resolve_filename, EncodedPart};

/// Value of a map-form field.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// One part.
    Single(PartSource),
    /// One part per element, all with the same field name, in order.
    Batch(Vec<PartSource>),
}

impl From<PartSource> for FieldValue {
    fn from(source: PartSource) -> Self {
        FieldValue::Single(source)
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Single(text.into())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Single(text.into())
    }
}

impl From<Bytes> for FieldValue {
    fn from(bytes: Bytes) -> Self {
        FieldValue::Single(bytes.into())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(bytes: Vec<u8>) -> Self {
        FieldValue::Single(bytes.into())
    }
}

impl From<Vec<PartSource>> for FieldValue {
    fn from(sources: Vec<PartSource>) -> Self {
        FieldValue::Batch(sources)
    }
}

/// Declarative multipart form.
#[derive(Debug, Clone)]
pub enum MultipartSpec {
    /// Field name to value, in insertion order. Setting an existing name
    /// replaces its value in place.
    Map(Vec<(String, FieldValue)>),
    /// Parts in exactly this order, each with its own options.
    Ordered(Vec<FormPart>),
}

impl Default for MultipartSpec {
    fn default() -> Self {
        MultipartSpec::Map(Vec::new())
    }
}

impl MultipartSpec {
    /// Empty map-form spec.
    pub fn map() -> Self {
        MultipartSpec::Map(Vec::new())
    }

    /// Empty ordered-form spec.
    pub fn ordered() -> Self {
        MultipartSpec::Ordered(Vec::new())
    }

    /// Sets a field. In map form an existing name keeps its position; in
    /// ordered form the part is appended.
    pub fn field(self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name.into(), value.into())
    }

    /// Sets a repeated field.
    pub fn batch<I, V>(self, name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<PartSource>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.set(name.into(), FieldValue::Batch(values))
    }

    fn set(mut self, name: String, value: FieldValue) -> Self {
        match &mut self {
            MultipartSpec::Map(fields) => {
                match fields.iter_mut().find(|(existing, _)| *existing == name) {
                    Some(slot) => slot.1 = value,
                    None => fields.push((name, value)),
                }
            }
            MultipartSpec::Ordered(parts) => {
                let values = match value {
                    FieldValue::Single(source) => vec![source],
                    FieldValue::Batch(sources) => sources,
                };
                parts.extend(values.into_iter().map(|source| FormPart::new(name.clone(), source)));
            }
        }
        self
    }

    /// Appends a part with options, switching a map-form spec to ordered form.
    pub fn part(self, part: FormPart) -> Self {
        let mut parts = match self {
            MultipartSpec::Ordered(parts) => parts,
            map @ MultipartSpec::Map(_) => map.flatten(),
        };
        parts.push(part);
        MultipartSpec::Ordered(parts)
    }

    /// The parts this spec produces, in wire order.
    pub fn flatten(self) -> Vec<FormPart> {
        match self {
            MultipartSpec::Ordered(parts) => parts,
            MultipartSpec::Map(fields) => fields
                .into_iter()
                .flat_map(|(name, value)| {
                    let values = match value {
                        FieldValue::Single(source) => vec![source],
                        FieldValue::Batch(sources) => sources,
                    };
                    values
                        .into_iter()
                        .map(move |source| FormPart::new(name.clone(), source))
                })
                .collect(),
        }
    }

    fn for_each_source(&self) -> Vec<(&str, &PartSource)> {
        match self {
            MultipartSpec::Ordered(parts) => parts
                .iter()
                .map(|part| (part.key.as_str(), &part.value))
                .collect(),
            MultipartSpec::Map(fields) => fields
                .iter()
                .flat_map(|(name, value)| {
                    let sources: Vec<&PartSource> = match value {
                        FieldValue::Single(source) => vec![source],
                        FieldValue::Batch(sources) => sources.iter().collect(),
                    };
                    sources.into_iter().map(move |source| (name.as_str(), source))
                })
                .collect(),
        }
    }

    /// Number of parts the spec produces.
    pub fn len(&self) -> usize {
        self.for_each_source().len()
    }

    /// True when there are no fields.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every build can reproduce the full body.
    pub fn is_replayable(&self) -> bool {
        self.non_replayable_field().is_none()
    }

    /// Name of the first field backed by a one-shot stream.
    pub(crate) fn non_replayable_field(&self) -> Option<&str> {
        self.for_each_source()
            .into_iter()
            .find(|(_, source)| !source.is_replayable())
            .map(|(name, _)| name)
    }

    /// Builds the form with a fresh boundary.
    ///
    /// File parts are checked (and measured) here but only opened when the
    /// body is read.
    ///
    /// # Errors
    ///
    /// - `MultipartError::Source` when a file part cannot be found
    /// - `MultipartError::NotReplayable` when a one-shot part was already consumed
    pub async fn build(&self) -> Result<MultipartBody, MultipartError> {
        let boundary = generate_boundary();
        let parts = self.clone().flatten();
        let mut encoded = Vec::with_capacity(parts.len());

        for FormPart {
            key,
            value,
            options,
        } in parts
        {
            let filename = resolve_filename(&value, &options);
            let content_type = resolve_content_type(&value, &options, filename.as_deref());
            let length = match &value {
                PartSource::Text(text) => Some(text.len() as u64),
                PartSource::Bytes(bytes) => Some(bytes.len() as u64),
                PartSource::File(path) => Some(
                    tokio::fs::metadata(path)
                        .await
                        .map_err(|source| MultipartError::Source {
                            field: key.clone(),
                            source,
                        })?
                        .len(),
                ),
                PartSource::Reader { length, .. } => *length,
                PartSource::OneShot(stream) => {
                    if stream.is_consumed() {
                        return Err(MultipartError::NotReplayable { field: key });
                    }
                    None
                }
            };
            let head = encode_part_head(
                &boundary,
                &key,
                filename.as_deref(),
                content_type.as_deref(),
                &options.headers,
            );
            encoded.push(EncodedPart {
                field: key,
                head,
                source: value,
                length,
            });
        }

        debug!(
            "Built multipart body with {} part(s), boundary {}",
            encoded.len(),
            boundary
        );
        Ok(MultipartBody::new(boundary, encoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use std::io;
    use std::io::Write;

    fn text(body: &Bytes) -> String {
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn test_map_replaces_in_place() {
        let spec = MultipartSpec::map()
            .field("a", "1")
            .field("b", "2")
            .field("a", "3");
        let parts = spec.flatten();
        let keys: Vec<_> = parts.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(matches!(&parts[0].value, PartSource::Text(v) if v == "3"));
    }

    #[test]
    fn test_batch_expands_in_order() {
        let spec = MultipartSpec::map()
            .field("first", "x")
            .batch("batch", ["b1", "b2", "b3"]);
        assert_eq!(spec.len(), 4);
        let parts = spec.flatten();
        let values: Vec<_> = parts
            .iter()
            .map(|p| match &p.value {
                PartSource::Text(v) => v.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(values, vec!["x", "b1", "b2", "b3"]);
        assert!(parts[1..].iter().all(|p| p.key == "batch"));
    }

    #[test]
    fn test_part_switches_to_ordered() {
        let spec = MultipartSpec::map()
            .field("a", "1")
            .part(FormPart::new("b", "2").filename("b.txt"));
        match spec {
            MultipartSpec::Ordered(parts) => {
                assert_eq!(parts.len(), 2);
                assert_eq!(parts[1].options.filename.as_deref(), Some("b.txt"));
            }
            MultipartSpec::Map(_) => panic!("expected ordered form"),
        }
    }

    #[tokio::test]
    async fn test_ordered_body_layout() {
        let spec = MultipartSpec::ordered()
            .part(FormPart::new("field", "value"))
            .part(
                FormPart::new("my_file", vec![1u8, 2, 3])
                    .filename("topsecret.jpg")
                    .content_type("image/custom"),
            );
        let body = spec.build().await.unwrap();
        let boundary = body.boundary().to_string();
        let bytes = body.to_bytes().await.unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nvalue\r\n"
            )
            .as_bytes(),
        );
        expected.extend_from_slice(
            format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"my_file\"; \
                 filename=\"topsecret.jpg\"\r\nContent-Type: image/custom\r\n\r\n"
            )
            .as_bytes(),
        );
        expected.extend_from_slice(&[1, 2, 3]);
        expected.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        assert_eq!(bytes.as_ref(), expected.as_slice());
        assert_eq!(body.content_length(), Some(expected.len() as u64));
        assert_eq!(
            body.content_type(),
            format!("multipart/form-data; boundary={boundary}")
        );
    }

    #[tokio::test]
    async fn test_rebuild_is_fresh_and_identical_modulo_boundary() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"file contents").unwrap();
        let spec = MultipartSpec::map()
            .field("name", "value")
            .field("upload", PartSource::file(file.path()));

        let first = spec.build().await.unwrap();
        let second = spec.build().await.unwrap();
        assert_ne!(first.boundary(), second.boundary());

        let a = text(&first.to_bytes().await.unwrap()).replace(first.boundary(), "B");
        let b = text(&second.to_bytes().await.unwrap()).replace(second.boundary(), "B");
        assert_eq!(a, b);
        assert!(a.contains("file contents"));

        // The same build can also be opened twice
        let again = text(&first.to_bytes().await.unwrap()).replace(first.boundary(), "B");
        assert_eq!(a, again);
    }

    #[tokio::test]
    async fn test_reader_factory_called_per_open() {
        let spec = MultipartSpec::map().field(
            "stream",
            PartSource::reader(
                || {
                    Ok(stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"abc"))]).boxed())
                },
                None,
            ),
        );
        let body = spec.build().await.unwrap();
        assert_eq!(body.content_length(), None);
        let first = text(&body.to_bytes().await.unwrap());
        let second = text(&body.to_bytes().await.unwrap());
        assert_eq!(first, second);
        assert!(first.contains("Content-Type: application/octet-stream\r\n\r\nabc\r\n"));
    }

    #[tokio::test]
    async fn test_one_shot_is_not_replayable() {
        let spec = MultipartSpec::map()
            .field("ok", "1")
            .field(
                "once",
                PartSource::one_shot(stream::iter(vec![Ok(Bytes::from_static(b"x"))])),
            );
        assert!(!spec.is_replayable());
        assert_eq!(spec.non_replayable_field(), Some("once"));

        let body = spec.build().await.unwrap();
        assert!(body.open().is_ok());
        assert!(matches!(
            body.open(),
            Err(MultipartError::NotReplayable { field }) if field == "once"
        ));
        assert!(matches!(
            spec.build().await,
            Err(MultipartError::NotReplayable { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_source_error() {
        let spec = MultipartSpec::map().field("f", PartSource::file("/nonexistent/upload.bin"));
        assert!(matches!(
            spec.build().await,
            Err(MultipartError::Source { field, .. }) if field == "f"
        ));
    }
}
