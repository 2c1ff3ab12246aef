use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use encoding_rs::Encoding;
use reqwest::cookie::Jar;
use reqwest::header::HeaderMap;
use reqwest::Version;
use serde::Serialize;
use url::Url;

use crate::{HttpUtilError, Result, RetryPolicy, RetryTrigger};

/// Browser-like user agent sent unless overridden.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(100);
const DEFAULT_AUTO_DISPOSE: Duration = Duration::from_secs(30 * 60);
const MIN_AUTO_DISPOSE: Duration = Duration::from_secs(3 * 60);
/// Largest finite timeout: `i32::MAX` milliseconds, about 24.8 days.
pub const MAX_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);
const MAX_BUFFER_SIZE: usize = i32::MAX as usize;

/// Ordered header mutation, applied in registration order.
pub type HeaderAction = Arc<dyn Fn(&mut HeaderMap) + Send + Sync>;

/// Low-level transport tuning hook.
pub type TransportTuning =
    Arc<dyn Fn(reqwest::ClientBuilder) -> reqwest::ClientBuilder + Send + Sync>;

/// Per-attempt timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    Finite(Duration),
    /// Disables the timeout scope entirely.
    Infinite,
}

impl Timeout {
    /// Validates a finite timeout: `0 < timeout <= MAX_TIMEOUT`.
    pub fn finite(duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(HttpUtilError::out_of_range(
                "timeout",
                "must be greater than zero",
            ));
        }
        if duration > MAX_TIMEOUT {
            return Err(HttpUtilError::out_of_range(
                "timeout",
                format!("must not exceed {} ms", MAX_TIMEOUT.as_millis()),
            ));
        }
        Ok(Self::Finite(duration))
    }

    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Finite(duration) => Some(duration),
            Self::Infinite => None,
        }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::Finite(DEFAULT_TIMEOUT)
    }
}

/// How the requested protocol version is negotiated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VersionPolicy {
    /// Use the requested version or fall back to a lower one.
    #[default]
    RequestVersionOrLower,
    /// Use the requested version or upgrade when the server offers more.
    RequestVersionOrHigher,
    /// Use exactly the requested version.
    RequestVersionExact,
}

impl VersionPolicy {
    /// Version to pin on the outgoing request, `None` leaves it to negotiation.
    pub(crate) fn pin(self, version: Version) -> Option<Version> {
        let legacy = version <= Version::HTTP_11;
        match self {
            Self::RequestVersionExact => Some(version),
            Self::RequestVersionOrLower => legacy.then_some(version),
            Self::RequestVersionOrHigher => (!legacy).then_some(version),
        }
    }
}

/// JSON serializer settings for request bodies.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JsonOptions {
    /// Emit indented JSON.
    pub pretty: bool,
    /// Drop object fields whose value is `null`.
    pub omit_null_fields: bool,
}

impl JsonOptions {
    pub(crate) fn to_vec<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let mut json = serde_json::to_value(value)?;
        if self.omit_null_fields {
            strip_nulls(&mut json);
        }
        let bytes = if self.pretty {
            serde_json::to_vec_pretty(&json)?
        } else {
            serde_json::to_vec(&json)?
        };
        Ok(bytes)
    }
}

fn strip_nulls(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Shared configuration for a client instance and the requests it creates.
///
/// Clones share the cookie jar.
#[derive(Clone)]
pub struct ClientOptions {
    base_address: Option<Url>,
    timeout: Timeout,
    auto_dispose: Option<Duration>,
    max_response_buffer_size: usize,
    cookie_jar: Arc<Jar>,
    user_agent: Option<String>,
    authorization: Option<String>,
    content_type: Option<String>,
    encoding: &'static Encoding,
    json_options: Option<JsonOptions>,
    retry: RetryPolicy,
    ensure_success_status: bool,
    version: Version,
    version_policy: VersionPolicy,
    default_headers: Vec<HeaderAction>,
    transport_tuning: Vec<TransportTuning>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_address: None,
            timeout: Timeout::default(),
            auto_dispose: Some(DEFAULT_AUTO_DISPOSE),
            max_response_buffer_size: MAX_BUFFER_SIZE,
            cookie_jar: Arc::new(Jar::default()),
            user_agent: Some(DEFAULT_USER_AGENT.to_owned()),
            authorization: None,
            content_type: Some(DEFAULT_CONTENT_TYPE.to_owned()),
            encoding: encoding_rs::UTF_8,
            json_options: None,
            retry: RetryPolicy::none(),
            ensure_success_status: false,
            version: Version::HTTP_11,
            version_policy: VersionPolicy::default(),
            default_headers: Vec::new(),
            transport_tuning: Vec::new(),
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("base_address", &self.base_address.as_ref().map(Url::as_str))
            .field("timeout", &self.timeout)
            .field("auto_dispose", &self.auto_dispose)
            .field("max_response_buffer_size", &self.max_response_buffer_size)
            .field("user_agent", &self.user_agent)
            .field(
                "authorization",
                &self.authorization.as_ref().map(|_| "<redacted>"),
            )
            .field("content_type", &self.content_type)
            .field("encoding", &self.encoding.name())
            .field("json_options", &self.json_options)
            .field("retry", &self.retry)
            .field("ensure_success_status", &self.ensure_success_status)
            .field("version", &self.version)
            .field("version_policy", &self.version_policy)
            .field("default_headers", &self.default_headers.len())
            .field("transport_tuning", &self.transport_tuning.len())
            .finish()
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base address. It can only be set once and must be absolute.
    pub fn base_address(mut self, address: &str) -> Result<Self> {
        if self.base_address.is_some() {
            return Err(HttpUtilError::invalid(
                "base_address",
                "can only be set once",
            ));
        }
        let url = Url::parse(address)
            .map_err(|err| HttpUtilError::invalid("base_address", format!("{address}: {err}")))?;
        if url.cannot_be_a_base() || !url.has_host() {
            return Err(HttpUtilError::invalid(
                "base_address",
                format!("{address} must be an absolute URI"),
            ));
        }
        self.base_address = Some(url);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Result<Self> {
        self.timeout = Timeout::finite(timeout)?;
        Ok(self)
    }

    pub fn infinite_timeout(mut self) -> Self {
        self.timeout = Timeout::Infinite;
        self
    }

    /// Idle window after which the registry may dispose the instance.
    ///
    /// `None` disables idle disposal; shorter windows are raised to 3 minutes.
    pub fn auto_dispose(mut self, window: Option<Duration>) -> Self {
        self.auto_dispose = window.map(|window| window.max(MIN_AUTO_DISPOSE));
        self
    }

    pub fn max_response_buffer_size(mut self, size: usize) -> Result<Self> {
        if size == 0 || size > MAX_BUFFER_SIZE {
            return Err(HttpUtilError::out_of_range(
                "max_response_buffer_size",
                format!("must be within 1..={MAX_BUFFER_SIZE}"),
            ));
        }
        self.max_response_buffer_size = size;
        Ok(self)
    }

    pub fn cookie_jar(mut self, jar: Arc<Jar>) -> Self {
        self.cookie_jar = jar;
        self
    }

    /// Sets or clears (`None` or blank) the default user agent.
    pub fn user_agent(mut self, user_agent: Option<&str>) -> Self {
        self.user_agent = user_agent
            .filter(|value| !value.trim().is_empty())
            .map(str::to_owned);
        self
    }

    /// Sets or clears the default `Authorization` value, e.g. `"Bearer abc"`.
    pub fn authorization(mut self, authorization: Option<&str>) -> Result<Self> {
        self.authorization = match authorization.filter(|value| !value.trim().is_empty()) {
            Some(value) => {
                let trimmed = value.trim();
                let scheme = trimmed.split_whitespace().next().unwrap_or_default();
                if !is_token(scheme) {
                    return Err(HttpUtilError::invalid(
                        "authorization",
                        format!("invalid scheme in '{trimmed}'"),
                    ));
                }
                Some(trimmed.to_owned())
            }
            None => None,
        };
        Ok(self)
    }

    /// Default content type of request bodies; `None` sends none.
    pub fn content_type(mut self, content_type: Option<&str>) -> Result<Self> {
        self.content_type = match content_type {
            Some(value) => Some(validate_media_type(value)?),
            None => None,
        };
        Ok(self)
    }

    pub fn encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn json_options(mut self, options: JsonOptions) -> Self {
        self.json_options = Some(options);
        self
    }

    /// Default retry behavior for every request.
    pub fn retry(mut self, max_retries: usize, trigger: RetryTrigger) -> Self {
        self.retry = RetryPolicy::new(max_retries, trigger);
        self
    }

    /// Default retry behavior with a delay function.
    pub fn retry_with_delay(
        mut self,
        max_retries: usize,
        delay: impl Fn(usize) -> i64 + Send + Sync + 'static,
        trigger: RetryTrigger,
    ) -> Self {
        self.retry = RetryPolicy::new(max_retries, trigger).with_delay(delay);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn ensure_success_status(mut self, ensure: bool) -> Self {
        self.ensure_success_status = ensure;
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    /// Adds a mutation of the headers sent with every request.
    pub fn default_headers(mut self, action: impl Fn(&mut HeaderMap) + Send + Sync + 'static) -> Self {
        self.default_headers.push(Arc::new(action));
        self
    }

    /// Adds a hook that tunes the underlying `reqwest::ClientBuilder`.
    pub fn transport(
        mut self,
        tuning: impl Fn(reqwest::ClientBuilder) -> reqwest::ClientBuilder + Send + Sync + 'static,
    ) -> Self {
        self.transport_tuning.push(Arc::new(tuning));
        self
    }

    /// Stores a host-only cookie for `url` with path `/`.
    pub fn add_cookie(self, url: &Url, name: &str, value: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(HttpUtilError::invalid("name", "cookie name is blank"));
        }
        add_cookie_to_jar(&self.cookie_jar, url, name, value);
        Ok(self)
    }

    /// Stores several cookies for `url`.
    pub fn add_cookies<I, K, V>(mut self, url: &Url, cookies: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in cookies {
            self = self.add_cookie(url, name.as_ref(), value.as_ref())?;
        }
        Ok(self)
    }

    /// Stores cookies from a raw `a=1; b=2` header value.
    pub fn add_cookie_header(self, url: &Url, header: &str) -> Result<Self> {
        add_cookie_header_to_jar(&self.cookie_jar, url, header)?;
        Ok(self)
    }

    /// Stores a cookie for the base address.
    pub fn add_base_cookie(self, name: &str, value: &str) -> Result<Self> {
        let url = self.require_base_address()?;
        self.add_cookie(&url, name, value)
    }

    /// Stores cookies from a raw header value for the base address.
    pub fn add_base_cookie_header(self, header: &str) -> Result<Self> {
        let url = self.require_base_address()?;
        self.add_cookie_header(&url, header)
    }

    fn require_base_address(&self) -> Result<Url> {
        self.base_address
            .clone()
            .ok_or_else(|| HttpUtilError::invalid("base_address", "no base address is set"))
    }

    pub fn get_base_address(&self) -> Option<&Url> {
        self.base_address.as_ref()
    }

    pub fn get_timeout(&self) -> Timeout {
        self.timeout
    }

    pub fn get_auto_dispose(&self) -> Option<Duration> {
        self.auto_dispose
    }

    pub fn get_max_response_buffer_size(&self) -> usize {
        self.max_response_buffer_size
    }

    pub fn get_cookie_jar(&self) -> &Arc<Jar> {
        &self.cookie_jar
    }

    pub fn get_user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    pub fn get_authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    pub fn get_content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn get_encoding(&self) -> &'static Encoding {
        self.encoding
    }

    pub fn get_json_options(&self) -> Option<&JsonOptions> {
        self.json_options.as_ref()
    }

    pub fn get_retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn get_ensure_success_status(&self) -> bool {
        self.ensure_success_status
    }

    pub fn get_version(&self) -> Version {
        self.version
    }

    pub fn get_version_policy(&self) -> VersionPolicy {
        self.version_policy
    }

    /// Headers applied to every request of the instance.
    pub(crate) fn build_default_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(user_agent) = &self.user_agent {
            headers.insert(
                reqwest::header::USER_AGENT,
                header_value("user_agent", user_agent)?,
            );
        }
        if let Some(authorization) = &self.authorization {
            headers.insert(
                reqwest::header::AUTHORIZATION,
                header_value("authorization", authorization)?,
            );
        }
        for action in &self.default_headers {
            action(&mut headers);
        }
        Ok(headers)
    }

    pub(crate) fn apply_transport_tuning(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> reqwest::ClientBuilder {
        self.transport_tuning
            .iter()
            .fold(builder, |builder, tuning| tuning(builder))
    }
}

pub(crate) fn header_value(name: &'static str, value: &str) -> Result<reqwest::header::HeaderValue> {
    reqwest::header::HeaderValue::from_str(value)
        .map_err(|err| HttpUtilError::invalid(name, format!("'{value}': {err}")))
}

pub(crate) fn add_cookie_to_jar(jar: &Jar, url: &Url, name: &str, value: &str) {
    jar.add_cookie_str(&format!("{}={}; Path=/", name.trim(), value), url);
}

pub(crate) fn add_cookie_header_to_jar(jar: &Jar, url: &Url, header: &str) -> Result<()> {
    if header.trim().is_empty() {
        return Err(HttpUtilError::invalid("cookies", "cookie header is blank"));
    }
    for pair in header.split(';').map(str::trim).filter(|pair| !pair.is_empty()) {
        match pair.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                add_cookie_to_jar(jar, url, name, value.trim());
            }
            _ => {
                return Err(HttpUtilError::invalid(
                    "cookies",
                    format!("'{pair}' is not a name=value pair"),
                ))
            }
        }
    }
    Ok(())
}

/// RFC 7230 `token`.
pub(crate) fn is_token(value: &str) -> bool {
    !value.is_empty()
        && value.bytes().all(|b| {
            b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
        })
}

/// Validates `type/subtype[; name=value]*` and returns the trimmed value.
pub(crate) fn validate_media_type(value: &str) -> Result<String> {
    let trimmed = value.trim();
    let mut parts = trimmed.split(';');
    let essence = parts.next().unwrap_or_default().trim();
    let valid_essence = essence
        .split_once('/')
        .is_some_and(|(kind, sub)| is_token(kind) && is_token(sub));
    let valid_params = parts.all(|param| {
        let param = param.trim();
        param.is_empty()
            || param
                .split_once('=')
                .is_some_and(|(name, value)| is_token(name.trim()) && !value.trim().is_empty())
    });

    if !valid_essence || !valid_params {
        return Err(HttpUtilError::invalid(
            "content_type",
            format!("'{value}' is not a valid media type"),
        ));
    }
    header_value("content_type", trimmed)?;
    Ok(trimmed.to_owned())
}
