//! Dispatched responses and their one-shot body decoders.

use std::fmt;
use std::sync::OnceLock;

use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use encoding_rs::Encoding;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::header::{self, HeaderMap};
use reqwest::{Method, StatusCode, Version};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::cookie::{parse_set_cookies, ResponseCookie};
use crate::stream::{
    bytes_stream, chunk_stream, json_array_stream, ByteStream, BytesReader, ChunkReader,
    LineReader,
};
use crate::{HttpUtilError, Result};

/// Response body, either fully buffered or still on the wire.
pub(crate) enum Body {
    Buffered(Bytes),
    Streaming(reqwest::Response),
}

/// Reads a whole body, failing once it grows past `limit` bytes.
pub(crate) async fn buffer_body(mut response: reqwest::Response, limit: usize) -> Result<Bytes> {
    if response
        .content_length()
        .is_some_and(|length| length > limit as u64)
    {
        return Err(HttpUtilError::BodyTooLarge { limit });
    }
    let mut buffer = BytesMut::new();
    while let Some(chunk) = response.chunk().await? {
        if buffer.len() + chunk.len() > limit {
            return Err(HttpUtilError::BodyTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

fn write_headers(f: &mut fmt::Formatter<'_>, headers: &HeaderMap) -> fmt::Result {
    f.write_str("Headers:\n{\n")?;
    for (name, value) in headers {
        let value = if name == header::AUTHORIZATION {
            "<redacted>"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        writeln!(f, "  {name}: {value}")?;
    }
    f.write_str("}")
}

/// Request line and headers of a dispatched request.
#[derive(Clone, Debug)]
pub(crate) struct RequestSnapshot {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
}

impl RequestSnapshot {
    pub(crate) fn from_request(request: &reqwest::Request) -> Self {
        Self {
            method: request.method().clone(),
            url: request.url().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }
}

impl fmt::Display for RequestSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Method: {}, RequestUri: '{}', Version: {:?}, ",
            self.method, self.url, self.version
        )?;
        write_headers(f, &self.headers)
    }
}

/// A received response.
///
/// Every decoder consumes the context, so a body is read at most once.
pub struct ResponseContext {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    cookies: Vec<ResponseCookie>,
    body: Body,
    request: RequestSnapshot,
    max_buffer_size: usize,
    cancellation: CancellationToken,
    request_info: OnceLock<String>,
    response_info: OnceLock<String>,
}

impl fmt::Debug for ResponseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseContext")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.request.url.as_str())
            .field("buffered", &matches!(self.body, Body::Buffered(_)))
            .finish()
    }
}

impl ResponseContext {
    pub(crate) fn new(
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
        body: Body,
        request: RequestSnapshot,
        max_buffer_size: usize,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            status,
            version,
            cookies: parse_set_cookies(&headers),
            headers,
            body,
            request,
            max_buffer_size,
            cancellation,
            request_info: OnceLock::new(),
            response_info: OnceLock::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success_status(&self) -> bool {
        self.status.is_success()
    }

    pub fn reason_phrase(&self) -> Option<&'static str> {
        self.status.canonical_reason()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URI of the request that produced this response.
    pub fn url(&self) -> &Url {
        &self.request.url
    }

    /// Headers describing the body: `content-*`, `allow`, `expires` and
    /// `last-modified`.
    pub fn content_headers(&self) -> HeaderMap {
        self.headers
            .iter()
            .filter(|(name, _)| {
                name.as_str().starts_with("content-")
                    || *name == header::ALLOW
                    || *name == header::EXPIRES
                    || *name == header::LAST_MODIFIED
            })
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Media type of the body without parameters, e.g. `application/json`.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(header::CONTENT_TYPE)?
            .to_str()
            .ok()?
            .split(';')
            .next()
            .map(str::trim)
            .filter(|media_type| !media_type.is_empty())
    }

    /// Declared body length, or the buffered length when none was declared.
    pub fn content_length(&self) -> Option<u64> {
        let declared = self
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok());
        match &self.body {
            Body::Buffered(bytes) => declared.or(Some(bytes.len() as u64)),
            Body::Streaming(_) => declared,
        }
    }

    /// Methods listed in the `Allow` header.
    pub fn allow(&self) -> Vec<Method> {
        self.headers
            .get_all(header::ALLOW)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .filter_map(|method| Method::from_bytes(method.trim().as_bytes()).ok())
            .collect()
    }

    pub fn cookies(&self) -> &[ResponseCookie] {
        &self.cookies
    }

    /// Charset from `Content-Type`, UTF-8 when absent or unknown.
    pub fn encoding(&self) -> &'static Encoding {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| {
                value.split(';').skip(1).find_map(|param| {
                    let (name, charset) = param.split_once('=')?;
                    name.trim()
                        .eq_ignore_ascii_case("charset")
                        .then(|| charset.trim().trim_matches('"'))
                })
            })
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(encoding_rs::UTF_8)
    }

    /// Diagnostic dump of the producing request; the body is never shown.
    pub fn request_info(&self) -> &str {
        self.request_info.get_or_init(|| self.request.to_string())
    }

    /// Diagnostic dump of the status line and headers.
    pub fn response_info(&self) -> &str {
        self.response_info.get_or_init(|| self.to_string())
    }

    fn into_byte_stream(self) -> (ByteStream, CancellationToken) {
        let bytes: ByteStream = match self.body {
            Body::Buffered(bytes) if bytes.is_empty() => stream::empty().boxed(),
            Body::Buffered(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
            Body::Streaming(response) => response
                .bytes_stream()
                .map(|chunk| chunk.map_err(HttpUtilError::from))
                .boxed(),
        };
        (bytes, self.cancellation)
    }

    pub async fn read_as_bytes(self) -> Result<Bytes> {
        match self.body {
            Body::Buffered(bytes) => Ok(bytes),
            Body::Streaming(response) => {
                tokio::select! {
                    biased;
                    _ = self.cancellation.cancelled() => Err(HttpUtilError::Cancelled),
                    bytes = buffer_body(response, self.max_buffer_size) => bytes,
                }
            }
        }
    }

    /// Decodes the body with the response charset.
    pub async fn read_as_string(self) -> Result<String> {
        let encoding = self.encoding();
        let bytes = self.read_as_bytes().await?;
        let (text, _, _) = encoding.decode(&bytes);
        Ok(text.into_owned())
    }

    /// JSON-decodes the body; `None` when the body is declared empty.
    pub async fn read_as<T: DeserializeOwned>(self) -> Result<Option<T>> {
        if self.content_length().unwrap_or(0) == 0 {
            return Ok(None);
        }
        let bytes = self.read_as_bytes().await?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Standard base64 of the body; `None` when the body is declared empty.
    pub async fn read_as_base64(self) -> Result<Option<String>> {
        if self.content_length().unwrap_or(0) == 0 {
            return Ok(None);
        }
        let bytes = self.read_as_bytes().await?;
        Ok(Some(base64::engine::general_purpose::STANDARD.encode(&bytes)))
    }

    /// Raw body chunks as they arrive.
    pub fn read_as_stream(self) -> BoxStream<'static, Result<Bytes>> {
        self.into_byte_stream().0
    }

    /// Elements of a top-level JSON array, decoded as each one completes.
    pub fn read_as_json_stream<T>(self) -> BoxStream<'static, Result<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (bytes, token) = self.into_byte_stream();
        json_array_stream(bytes, token)
    }

    /// Chunks produced by `reader`. `String` receives raw text, any other
    /// type is JSON-decoded per chunk.
    pub fn read_stream_as<T, R>(self, reader: R) -> BoxStream<'static, Result<T>>
    where
        T: DeserializeOwned + Send + 'static,
        R: ChunkReader + 'static,
    {
        let encoding = self.encoding();
        let (bytes, token) = self.into_byte_stream();
        chunk_stream(bytes, encoding, reader, token)
    }

    /// Non-blank lines, each decoded as `T`.
    pub fn read_lines_as<T>(self) -> BoxStream<'static, Result<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.read_stream_as(LineReader::new().ignore_empty_lines(true))
    }

    pub fn read_bytes_stream(self, reader: BytesReader) -> BoxStream<'static, Result<Bytes>> {
        let (bytes, token) = self.into_byte_stream();
        bytes_stream(bytes, reader, token)
    }
}

impl fmt::Display for ResponseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StatusCode: {}, ReasonPhrase: '{}', Version: {:?}, ",
            self.status.as_u16(),
            self.reason_phrase().unwrap_or_default(),
            self.version
        )?;
        write_headers(f, &self.headers)
    }
}
