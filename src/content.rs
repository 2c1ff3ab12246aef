//! Request bodies.

use bytes::Bytes;
use encoding_rs::Encoding;
use reqwest::multipart::{Form, Part};
use serde::Serialize;

use crate::options::JsonOptions;
use crate::{HttpUtilError, Result};

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// The single body of a request. The last `set_*` call on a builder wins.
#[derive(Clone, Debug)]
pub enum Content {
    /// Plain text, encoded with the request encoding.
    Text(String),
    /// A pre-serialized JSON document.
    Json(Bytes),
    /// Raw binary content.
    Bytes(Bytes),
    /// URL-encoded form fields.
    Form(FormFields),
    /// `multipart/form-data` parts.
    Multipart(FileContent),
}

impl Content {
    pub(crate) fn json<T: Serialize + ?Sized>(value: &T, options: Option<&JsonOptions>) -> Result<Self> {
        let bytes = match options {
            Some(options) => options.to_vec(value)?,
            None => serde_json::to_vec(value)?,
        };
        Ok(Self::Json(Bytes::from(bytes)))
    }

    /// Attaches the body to an outgoing request.
    ///
    /// `content_type` is applied to every body except multipart, whose
    /// boundary-carrying type is owned by the transport.
    pub(crate) fn attach(
        &self,
        builder: reqwest::RequestBuilder,
        encoding: &'static Encoding,
        content_type: Option<&str>,
    ) -> Result<reqwest::RequestBuilder> {
        let builder = match self {
            Self::Text(text) => {
                let (encoded, _, _) = encoding.encode(text);
                builder.body(encoded.into_owned())
            }
            Self::Json(bytes) | Self::Bytes(bytes) => builder.body(bytes.clone()),
            Self::Form(fields) => builder.body(fields.encode()?),
            Self::Multipart(file_content) => return file_content.build(encoding).map(|form| builder.multipart(form)),
        };

        Ok(match content_type {
            Some(value) => builder.header(reqwest::header::CONTENT_TYPE, value),
            None => builder,
        })
    }

    /// Content type used when the request does not override it.
    pub(crate) fn default_content_type<'a>(&self, configured: Option<&'a str>) -> Option<&'a str> {
        match self {
            Self::Form(_) => Some(FORM_URLENCODED),
            Self::Multipart(_) => None,
            _ => configured,
        }
    }
}

/// Ordered URL-encoded form fields. Setting an existing key replaces its value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormFields(Vec<(String, String)>);

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    /// Parses a raw `key=value&key2=value2` string, keeping values as written.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(HttpUtilError::ContentFormat("form content is blank".to_owned()));
        }
        let mut fields = Self::new();
        for pair in raw.split('&') {
            match pair.split_once('=') {
                Some((key, value)) if !key.is_empty() => fields.insert(key, value),
                _ => {
                    return Err(HttpUtilError::ContentFormat(format!(
                        "'{pair}' is not a key=value pair"
                    )))
                }
            }
        }
        Ok(fields)
    }

    /// Flattens a serializable struct or map into fields.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let encoded = serde_urlencoded::to_string(value)
            .map_err(|err| HttpUtilError::ContentFormat(err.to_string()))?;
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&encoded)
            .map_err(|err| HttpUtilError::ContentFormat(err.to_string()))?;
        Ok(pairs.into_iter().collect())
    }

    pub fn encode(&self) -> Result<String> {
        serde_urlencoded::to_string(&self.0)
            .map_err(|err| HttpUtilError::ContentFormat(err.to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FormFields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (key, value) in iter {
            fields.insert(key, value);
        }
        fields
    }
}

#[derive(Clone, Debug)]
enum FilePart {
    Text {
        name: String,
        value: String,
        encoding: Option<&'static Encoding>,
    },
    File {
        name: String,
        file_name: String,
        bytes: Bytes,
        mime: Option<String>,
    },
}

/// Builder for `multipart/form-data` bodies.
///
/// Parts are kept as owned data so the body can be rebuilt for every retry.
#[derive(Clone, Debug, Default)]
pub struct FileContent {
    parts: Vec<FilePart>,
}

impl FileContent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a text field, encoded with `encoding` or the request encoding.
    pub fn text(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        encoding: Option<&'static Encoding>,
    ) -> Self {
        self.parts.push(FilePart::Text {
            name: name.into(),
            value: value.into(),
            encoding,
        });
        self
    }

    /// Adds a file part.
    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        self.parts.push(FilePart::File {
            name: name.into(),
            file_name: file_name.into(),
            bytes: bytes.into(),
            mime: None,
        });
        self
    }

    /// Adds a file part with an explicit media type.
    pub fn file_with_mime(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Bytes>,
        mime: &str,
    ) -> Result<Self> {
        let mime = crate::options::validate_media_type(mime)?;
        self.parts.push(FilePart::File {
            name: name.into(),
            file_name: file_name.into(),
            bytes: bytes.into(),
            mime: Some(mime),
        });
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub(crate) fn build(&self, request_encoding: &'static Encoding) -> Result<Form> {
        let mut form = Form::new();
        for part in &self.parts {
            form = match part {
                FilePart::Text {
                    name,
                    value,
                    encoding,
                } => {
                    let encoding = encoding.unwrap_or(request_encoding);
                    if encoding == encoding_rs::UTF_8 {
                        form.text(name.clone(), value.clone())
                    } else {
                        let (encoded, _, _) = encoding.encode(value);
                        let part = Part::bytes(encoded.into_owned())
                            .mime_str(&format!("text/plain; charset={}", encoding.name()))?;
                        form.part(name.clone(), part)
                    }
                }
                FilePart::File {
                    name,
                    file_name,
                    bytes,
                    mime,
                } => {
                    let mut part = Part::stream(reqwest::Body::from(bytes.clone())).file_name(file_name.clone());
                    if let Some(mime) = mime {
                        part = part.mime_str(mime)?;
                    }
                    form.part(name.clone(), part)
                }
            };
        }
        Ok(form)
    }
}
