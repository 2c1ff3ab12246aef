use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use encoding_rs::Encoding;
use futures_util::stream::BoxStream;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{self, HeaderMap, HeaderName};
use reqwest::{Method, Version};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::content::{Content, FileContent, FormFields};
use crate::options::{
    add_cookie_header_to_jar, add_cookie_to_jar, header_value, is_token, validate_media_type,
    HeaderAction, JsonOptions, Timeout, VersionPolicy,
};
use crate::pending::{PendingCounter, PendingRequests};
use crate::response::{buffer_body, Body, RequestSnapshot, ResponseContext};
use crate::stream::{BytesReader, ChunkReader};
use crate::{
    ClientOptions, HttpUtilError, Result, RetryDecision, RetryDelay, RetryPolicy, RetryTrigger,
};

/// When a dispatched request is considered complete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompletionMode {
    /// Buffer the full body inside the timeout scope.
    #[default]
    ResponseContentRead,
    /// Return as soon as the headers arrive; the body streams afterwards.
    ResponseHeadersRead,
}

/// Which side of the composite cancellation scope fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CancelSource {
    Caller,
    Timeout,
}

enum Attempt {
    Success(ResponseContext),
    FailStatus(ResponseContext),
    Failed(RetryTrigger, HttpUtilError),
}

/// A single HTTP request under construction.
///
/// Setters consume the builder and hand it back, terminal operations borrow
/// it, so one fully configured builder can be sent several times in a row.
pub struct RequestBuilder {
    client: reqwest::Client,
    jar: Arc<Jar>,
    pending: Arc<PendingCounter>,
    pending_requests: PendingRequests,
    base_address: Option<Url>,
    method: Method,
    uri: String,
    form_data: bool,
    disposed: AtomicBool,
    timeout: Timeout,
    retry: RetryPolicy,
    encoding: &'static Encoding,
    ensure_success_status: bool,
    version: Version,
    version_policy: VersionPolicy,
    completion_mode: CompletionMode,
    use_cookies: bool,
    max_response_buffer_size: usize,
    default_content_type: Option<String>,
    json_options: Option<JsonOptions>,
    content: Option<Content>,
    content_type: Option<String>,
    content_actions: Vec<HeaderAction>,
    header_actions: Vec<HeaderAction>,
    cancellation: CancellationToken,
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("form_data", &self.form_data)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("version", &self.version)
            .field("completion_mode", &self.completion_mode)
            .field("content", &self.content.as_ref().map(|_| "<redacted>"))
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn parse_absolute(uri: &str) -> Option<Url> {
    Url::parse(uri).ok().filter(Url::has_host)
}

/// Length of the query component including its `?`, `0` when there is none.
fn query_len(uri: &str) -> usize {
    let without_fragment = uri.split('#').next().unwrap_or_default();
    without_fragment
        .find('?')
        .map_or(0, |index| without_fragment.len() - index)
}

/// Appends a raw query fragment, keeping any `#fragment` at the end.
fn append_query(uri: &str, raw: &str) -> String {
    let mut query = raw.to_owned();
    match query_len(uri) {
        0 if !query.starts_with('?') => query.insert(0, '?'),
        1 if query.starts_with('?') => {
            query.remove(0);
        }
        0 | 1 => {}
        _ if !query.starts_with('&') => query.insert(0, '&'),
        _ => {}
    }

    match uri.split_once('#') {
        Some((head, fragment)) => format!("{head}{query}#{fragment}"),
        None => format!("{uri}{query}"),
    }
}

/// Resolves `reference` against a relative `current` path.
fn join_relative(current: &str, reference: &str) -> String {
    if reference.starts_with('/') {
        return reference.to_owned();
    }
    let path = current.split(['?', '#']).next().unwrap_or_default();
    match path.rfind('/') {
        Some(index) => format!("{}{reference}", &path[..=index]),
        None => reference.to_owned(),
    }
}

impl RequestBuilder {
    pub(crate) fn new(
        client: reqwest::Client,
        options: &ClientOptions,
        pending: Arc<PendingCounter>,
        pending_requests: PendingRequests,
        method: Method,
        uri: &str,
        form_data: bool,
    ) -> Result<Self> {
        if parse_absolute(uri).is_none() && options.get_base_address().is_none() {
            return Err(HttpUtilError::invalid(
                "uri",
                format!("'{uri}' is relative and no base address is configured"),
            ));
        }

        Ok(Self {
            client,
            jar: Arc::clone(options.get_cookie_jar()),
            pending,
            pending_requests,
            base_address: options.get_base_address().cloned(),
            method,
            uri: uri.to_owned(),
            form_data,
            disposed: AtomicBool::new(false),
            timeout: options.get_timeout(),
            retry: options.get_retry().clone(),
            encoding: options.get_encoding(),
            ensure_success_status: options.get_ensure_success_status(),
            version: options.get_version(),
            version_policy: options.get_version_policy(),
            completion_mode: CompletionMode::default(),
            use_cookies: true,
            max_response_buffer_size: options.get_max_response_buffer_size(),
            default_content_type: options.get_content_type().map(str::to_owned),
            json_options: options.get_json_options().cloned(),
            content: None,
            content_type: None,
            content_actions: Vec::new(),
            header_actions: Vec::new(),
            cancellation: CancellationToken::new(),
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The target URI as configured, possibly relative.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_form_data(&self) -> bool {
        self.form_data
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Marks the builder disposed. Later sends fail and pending retries stop.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// Resolves the target against the base address.
    pub fn resolve_uri(&self) -> Result<Url> {
        if let Some(url) = parse_absolute(&self.uri) {
            return Ok(url);
        }
        let base = self.base_address.as_ref().ok_or_else(|| {
            HttpUtilError::invalid("uri", "relative URI requires a base address")
        })?;
        base.join(&self.uri)
            .map_err(|err| HttpUtilError::invalid("uri", format!("'{}': {err}", self.uri)))
    }

    /// Appends a header value; existing values of the same name are kept.
    pub fn add_header(mut self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        self.header_actions.push(Arc::new(move |headers: &mut HeaderMap| {
            headers.append(name.clone(), value.clone());
        }));
        Ok(self)
    }

    pub fn add_headers<I, K, V>(mut self, headers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let parsed = headers
            .into_iter()
            .map(|(name, value)| parse_header(name.as_ref(), value.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if parsed.is_empty() {
            return Err(HttpUtilError::invalid("headers", "no headers given"));
        }
        self.header_actions.push(Arc::new(move |headers: &mut HeaderMap| {
            for (name, value) in &parsed {
                headers.append(name.clone(), value.clone());
            }
        }));
        Ok(self)
    }

    /// Adds an arbitrary mutation of the outgoing request headers.
    pub fn configure_headers(mut self, action: impl Fn(&mut HeaderMap) + Send + Sync + 'static) -> Self {
        self.header_actions.push(Arc::new(action));
        self
    }

    /// Adds a percent-escaped `name=value` query pair.
    pub fn add_query(self, name: &str, value: impl fmt::Display) -> Result<Self> {
        self.add_queries([(name, value)], true)
    }

    /// Adds a query pair whose value is appended as written.
    pub fn add_query_raw_value(self, name: &str, value: impl fmt::Display) -> Result<Self> {
        self.add_queries([(name, value)], false)
    }

    pub fn add_queries<I, K, V>(self, queries: I, escape: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: fmt::Display,
    {
        let mut pairs = Vec::new();
        for (name, value) in queries {
            let name = name.as_ref();
            if name.trim().is_empty() {
                return Err(HttpUtilError::invalid("queries", "query name is blank"));
            }
            let value = value.to_string();
            let value = if escape {
                urlencoding::encode(&value).into_owned()
            } else {
                value
            };
            pairs.push(format!("{name}={value}"));
        }
        self.add_query_str(&pairs.join("&"))
    }

    /// Appends a raw query string such as `a=1&b=2`. Nothing is deduplicated.
    pub fn add_query_str(mut self, query: &str) -> Result<Self> {
        if query.trim().is_empty() {
            return Err(HttpUtilError::invalid("query", "query is blank"));
        }
        self.uri = append_query(&self.uri, query);
        Ok(self)
    }

    /// Stores a cookie for the request host in the instance jar.
    pub fn add_cookie(self, name: &str, value: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(HttpUtilError::invalid("name", "cookie name is blank"));
        }
        let url = self.resolve_uri()?;
        add_cookie_to_jar(&self.jar, &url, name, value);
        Ok(self)
    }

    pub fn add_cookies<I, K, V>(mut self, cookies: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in cookies {
            self = self.add_cookie(name.as_ref(), value.as_ref())?;
        }
        Ok(self)
    }

    /// Stores cookies from a raw `a=1; b=2` value.
    pub fn add_cookie_header(self, header: &str) -> Result<Self> {
        let url = self.resolve_uri()?;
        add_cookie_header_to_jar(&self.jar, &url, header)?;
        Ok(self)
    }

    pub fn set_user_agent(mut self, user_agent: &str) -> Result<Self> {
        if user_agent.trim().is_empty() {
            return Err(HttpUtilError::invalid("user_agent", "user agent is blank"));
        }
        let value = header_value("user_agent", user_agent)?;
        self.header_actions.push(Arc::new(move |headers: &mut HeaderMap| {
            headers.insert(header::USER_AGENT, value.clone());
        }));
        Ok(self)
    }

    /// Replaces the `Authorization` header with `scheme [parameter]`.
    pub fn set_authorization(mut self, scheme: &str, parameter: Option<&str>) -> Result<Self> {
        let scheme = scheme.trim();
        if !is_token(scheme) {
            return Err(HttpUtilError::invalid(
                "scheme",
                format!("'{scheme}' is not a valid authorization scheme"),
            ));
        }
        let raw = match parameter.filter(|value| !value.is_empty()) {
            Some(parameter) => format!("{scheme} {parameter}"),
            None => scheme.to_owned(),
        };
        let value = header_value("authorization", &raw)?;
        self.header_actions.push(Arc::new(move |headers: &mut HeaderMap| {
            headers.insert(header::AUTHORIZATION, value.clone());
        }));
        Ok(self)
    }

    pub fn set_referrer(mut self, referrer: &str) -> Result<Self> {
        let url = parse_absolute(referrer).ok_or_else(|| {
            HttpUtilError::invalid("referrer", format!("'{referrer}' is not an absolute URI"))
        })?;
        let value = header_value("referrer", url.as_str())?;
        self.header_actions.push(Arc::new(move |headers: &mut HeaderMap| {
            headers.insert(header::REFERER, value.clone());
        }));
        Ok(self)
    }

    fn with_content(mut self, content: Content, content_type: Option<&str>) -> Result<Self> {
        self.content_type = content_type.map(validate_media_type).transpose()?;
        self.content = Some(content);
        Ok(self)
    }

    fn reject_in_form_mode(&self, operation: &'static str) -> Result<()> {
        if self.form_data {
            return Err(HttpUtilError::invalid(
                operation,
                "not supported by a form-data request",
            ));
        }
        Ok(())
    }

    /// Sets a text body. A form-data request parses it as `k=v&k2=v2` instead.
    pub fn set_text(self, text: &str, content_type: Option<&str>) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(HttpUtilError::invalid("content", "text content is blank"));
        }
        let content = if self.form_data {
            Content::Form(FormFields::parse(text)?)
        } else {
            Content::Text(text.to_owned())
        };
        self.with_content(content, content_type)
    }

    /// Sets a key/value body: form fields for form-data requests, a JSON
    /// object otherwise.
    pub fn set_map<I, K, V>(self, map: I, content_type: Option<&str>) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let fields: FormFields = map.into_iter().collect();
        let content = if self.form_data {
            Content::Form(fields)
        } else {
            let object: serde_json::Map<String, serde_json::Value> = fields
                .into_pairs()
                .into_iter()
                .map(|(key, value)| (key, serde_json::Value::String(value)))
                .collect();
            Content::json(&object, self.json_options.as_ref())?
        };
        self.with_content(content, content_type)
    }

    pub fn set_bytes(self, bytes: impl Into<Bytes>, content_type: Option<&str>) -> Result<Self> {
        self.reject_in_form_mode("set_bytes")?;
        self.with_content(Content::Bytes(bytes.into()), content_type)
    }

    /// Sets a `multipart/form-data` body.
    pub fn set_file_content(self, content: FileContent) -> Result<Self> {
        self.with_content(Content::Multipart(content), None)
    }

    /// Serializes `value` as the JSON body using the request JSON options.
    pub fn set_json<T: Serialize + ?Sized>(self, value: &T, content_type: Option<&str>) -> Result<Self> {
        self.reject_in_form_mode("set_json")?;
        let content = Content::json(value, self.json_options.as_ref())?;
        self.with_content(content, content_type)
    }

    pub fn set_content(self, content: Content) -> Result<Self> {
        self.with_content(content, None)
    }

    /// Sets a URL-encoded body from a raw `k=v&k2=v2` string.
    pub fn set_form_str(self, form: &str) -> Result<Self> {
        let fields = FormFields::parse(form)?;
        self.with_content(Content::Form(fields), None)
    }

    /// Sets a URL-encoded body from the fields of a flat serializable value.
    pub fn set_form<T: Serialize + ?Sized>(self, value: &T) -> Result<Self> {
        let fields = FormFields::from_serialize(value)?;
        self.with_content(Content::Form(fields), None)
    }

    /// Re-targets the request relative to its current URI.
    pub fn set_relative_uri(mut self, uri: &str) -> Result<Self> {
        self.uri = match parse_absolute(&self.uri) {
            Some(current) => current
                .join(uri)
                .map_err(|err| HttpUtilError::invalid("uri", format!("'{uri}': {err}")))?
                .to_string(),
            None if parse_absolute(uri).is_some() => uri.to_owned(),
            None => join_relative(&self.uri, uri),
        };
        Ok(self)
    }

    /// Overrides the body content type after the body is attached.
    pub fn set_content_type(mut self, content_type: &str) -> Result<Self> {
        let value = header_value("content_type", &validate_media_type(content_type)?)?;
        self.content_actions.push(Arc::new(move |headers: &mut HeaderMap| {
            headers.insert(header::CONTENT_TYPE, value.clone());
        }));
        Ok(self)
    }

    pub fn set_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.timeout = Timeout::finite(timeout)?;
        Ok(self)
    }

    pub fn set_infinite_timeout(mut self) -> Self {
        self.timeout = Timeout::Infinite;
        self
    }

    /// Edits the JSON options, starting from defaults when none are set.
    pub fn set_json_options(mut self, configure: impl FnOnce(&mut JsonOptions)) -> Self {
        configure(self.json_options.get_or_insert_with(JsonOptions::default));
        self
    }

    /// `None` falls back to UTF-8.
    pub fn set_encoding(mut self, encoding: Option<&'static Encoding>) -> Self {
        self.encoding = encoding.unwrap_or(encoding_rs::UTF_8);
        self
    }

    pub fn set_retry(mut self, max_retries: usize, delay: Option<RetryDelay>, trigger: RetryTrigger) -> Self {
        self.retry = RetryPolicy::new(max_retries, trigger).with_delay_arc(delay);
        self
    }

    pub fn set_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn set_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn set_version_policy(mut self, policy: VersionPolicy) -> Self {
        self.version_policy = policy;
        self
    }

    /// Sends and stores cookies through the instance jar (on by default).
    pub fn use_cookies(mut self, use_cookies: bool) -> Self {
        self.use_cookies = use_cookies;
        self
    }

    pub fn use_completion_mode(mut self, mode: CompletionMode) -> Self {
        self.completion_mode = mode;
        self
    }

    /// Fails non-success responses that no retry recovered.
    pub fn ensure_success_status(mut self, ensure: bool) -> Self {
        self.ensure_success_status = ensure;
        self
    }

    /// Cancels every send and the streams of the responses it produces.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    fn build_request(&self, url: &Url) -> Result<reqwest::Request> {
        let mut builder = self.client.request(self.method.clone(), url.clone());
        if let Some(version) = self.version_policy.pin(self.version) {
            builder = builder.version(version);
        }
        if let Some(content) = &self.content {
            let content_type = self
                .content_type
                .as_deref()
                .or_else(|| content.default_content_type(self.default_content_type.as_deref()));
            builder = content.attach(builder, self.encoding, content_type)?;
        }

        let mut request = builder.build()?;
        if self.content.is_some() {
            for action in &self.content_actions {
                action(request.headers_mut());
            }
        }
        for action in &self.header_actions {
            action(request.headers_mut());
        }
        if self.use_cookies {
            if let Some(cookies) = self.jar.cookies(url) {
                request.headers_mut().append(header::COOKIE, cookies);
            }
        }
        Ok(request)
    }

    /// Diagnostic dump of the request line and headers. The body is never shown.
    pub fn request_info(&self) -> Result<String> {
        let url = self.resolve_uri()?;
        let request = self.build_request(&url)?;
        Ok(RequestSnapshot::from_request(&request).to_string())
    }

    async fn attempt(&self) -> Result<Attempt> {
        let url = self.resolve_uri()?;
        let request = self.build_request(&url)?;
        let snapshot = RequestSnapshot::from_request(&request);
        let instance_cancellation = self.pending_requests.current();

        let limit = self.max_response_buffer_size;
        let mode = self.completion_mode;
        let dispatch = async {
            let response = self.client.execute(request).await?;
            let status = response.status();
            let version = response.version();
            let headers = response.headers().clone();
            let body = match mode {
                CompletionMode::ResponseContentRead => Body::Buffered(buffer_body(response, limit).await?),
                CompletionMode::ResponseHeadersRead => Body::Streaming(response),
            };
            Ok::<_, HttpUtilError>((status, version, headers, body))
        };
        let deadline = async {
            match self.timeout.as_duration() {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(CancelSource::Caller),
            _ = instance_cancellation.cancelled() => Err(CancelSource::Caller),
            _ = deadline => Err(CancelSource::Timeout),
            result = dispatch => Ok(result),
        };

        match outcome {
            Err(CancelSource::Caller) => Err(HttpUtilError::Cancelled),
            Err(CancelSource::Timeout) => {
                let timeout = self.timeout.as_duration().unwrap_or_default();
                Ok(Attempt::Failed(
                    RetryTrigger::TIMEOUT,
                    HttpUtilError::Timeout { timeout },
                ))
            }
            Ok(Err(err)) => Ok(Attempt::Failed(RetryTrigger::EXCEPTION, err)),
            Ok(Ok((status, version, headers, body))) => {
                if self.use_cookies {
                    self.jar
                        .set_cookies(&mut headers.get_all(header::SET_COOKIE).iter(), &url);
                }
                let response = ResponseContext::new(
                    status,
                    version,
                    headers,
                    body,
                    snapshot,
                    limit,
                    self.cancellation.clone(),
                );
                if status.is_success() {
                    Ok(Attempt::Success(response))
                } else {
                    Ok(Attempt::FailStatus(response))
                }
            }
        }
    }

    /// Dispatches the request, retrying failed attempts per the retry policy.
    pub async fn send(&self) -> Result<ResponseContext> {
        // One pending operation spans every attempt and retry delay.
        let _pending = self.pending.guard();
        let mut retries = 0usize;
        loop {
            if self.is_disposed() {
                return Err(HttpUtilError::Disposed("request builder"));
            }

            let (class, failure) = match self.attempt().await? {
                Attempt::Success(response) => return Ok(response),
                Attempt::FailStatus(response) => (RetryTrigger::FAIL_STATUS_CODE, Ok(response)),
                Attempt::Failed(class, err) => (class, Err(err)),
            };

            let decision = if self.is_disposed() {
                RetryDecision::DoNotRetry
            } else {
                self.retry.decide(class, retries)
            };

            match decision {
                RetryDecision::Retry { delay, attempt } => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        "retrying {} {} as attempt {} after {:?} ({:?})",
                        self.method,
                        self.uri,
                        attempt,
                        delay,
                        class
                    );

                    if !delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = self.cancellation.cancelled() => return Err(HttpUtilError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    retries = attempt;
                }
                RetryDecision::DoNotRetry => {
                    return match failure {
                        Ok(response) if self.ensure_success_status => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(
                                "{} {} failed with status {}",
                                self.method,
                                self.uri,
                                response.status()
                            );
                            Err(HttpUtilError::Status {
                                status: response.status(),
                                reason: response.reason_phrase().unwrap_or_default().to_owned(),
                            })
                        }
                        other => other,
                    };
                }
            }
        }
    }

    pub async fn read_as_string(&self) -> Result<String> {
        self.send().await?.read_as_string().await
    }

    pub async fn read_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.send().await?.read_as().await
    }

    pub async fn read_as_stream(&self) -> Result<BoxStream<'static, Result<Bytes>>> {
        Ok(self.send().await?.read_as_stream())
    }

    pub async fn read_as_bytes(&self) -> Result<Bytes> {
        self.send().await?.read_as_bytes().await
    }

    pub async fn read_as_base64(&self) -> Result<Option<String>> {
        self.send().await?.read_as_base64().await
    }

    /// Streams the elements of a JSON array body.
    pub async fn read_as_json_stream<T>(&self) -> Result<BoxStream<'static, Result<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Ok(self.send().await?.read_as_json_stream())
    }

    pub async fn read_stream_as<T, R>(&self, reader: R) -> Result<BoxStream<'static, Result<T>>>
    where
        T: DeserializeOwned + Send + 'static,
        R: ChunkReader + 'static,
    {
        Ok(self.send().await?.read_stream_as(reader))
    }

    /// Streams non-blank lines, each decoded as `T`.
    pub async fn read_lines_as<T>(&self) -> Result<BoxStream<'static, Result<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Ok(self.send().await?.read_lines_as())
    }

    pub async fn read_bytes_stream(&self, reader: BytesReader) -> Result<BoxStream<'static, Result<Bytes>>> {
        Ok(self.send().await?.read_bytes_stream(reader))
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, header::HeaderValue)> {
    if name.trim().is_empty() {
        return Err(HttpUtilError::invalid("name", "header name is blank"));
    }
    let header_name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|err| HttpUtilError::invalid("name", format!("'{name}': {err}")))?;
    Ok((header_name, header_value("value", value)?))
}
