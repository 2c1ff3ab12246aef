//! `httputils` is a fluent async HTTP request builder on top of `reqwest`.
//!
//! A [`HttpUtil`] instance hands out [`RequestBuilder`]s:
//! - configure headers, query, cookies, body, timeout and retry by chaining
//! - dispatch with [`RequestBuilder::send`] or one of the `read_as_*` shortcuts
//! - decode the [`ResponseContext`] as text, bytes, JSON or a lazy stream
//!
//! [`HttpUtilFactory`] keeps one shared instance per name and disposes the
//! ones that stay idle.

mod client;
mod content;
mod cookie;
mod error;
mod factory;
mod options;
mod pending;
mod request;
mod response;
mod retry;
mod stream;

pub use client::HttpUtil;
pub use content::{Content, FileContent, FormFields, FORM_URLENCODED};
pub use cookie::{parse_set_cookie, parse_set_cookies, ResponseCookie};
pub use error::HttpUtilError;
pub use factory::HttpUtilFactory;
pub use options::{
    ClientOptions, HeaderAction, JsonOptions, Timeout, TransportTuning, VersionPolicy,
    DEFAULT_CONTENT_TYPE, DEFAULT_USER_AGENT, MAX_TIMEOUT,
};
pub use pending::{PendingCounter, PendingGuard};
pub use request::{CompletionMode, RequestBuilder};
pub use response::ResponseContext;
pub use retry::{RetryDecision, RetryDelay, RetryPolicy, RetryTrigger};
pub use stream::{BlockReader, BytesReader, ChunkReader, JsonArrayDecoder, LineReader, Replacer, TextReader};

pub use reqwest::{Method, StatusCode, Version};
pub use tokio_util::sync::CancellationToken;
pub use url::Url;

pub type Result<T> = std::result::Result<T, HttpUtilError>;
