use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::Method;
use tokio::time::Instant;

use crate::pending::{PendingCounter, PendingRequests};
use crate::{ClientOptions, HttpUtilError, RequestBuilder, Result};

type DisposeListener = Box<dyn FnOnce() + Send>;

/// A configured HTTP client instance.
///
/// Every verb returns a [`RequestBuilder`] seeded from the instance options.
pub struct HttpUtil {
    http: reqwest::Client,
    options: ClientOptions,
    pending: Arc<PendingCounter>,
    pending_requests: PendingRequests,
    last_call: Arc<Mutex<Instant>>,
    disposed: AtomicBool,
    listeners: Mutex<Vec<DisposeListener>>,
}

impl fmt::Debug for HttpUtil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpUtil")
            .field("options", &self.options)
            .field("pending", &self.pending.value())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl HttpUtil {
    /// Builds the transport from `options`.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let builder = reqwest::Client::builder().default_headers(options.build_default_headers()?);
        let http = options.apply_transport_tuning(builder).build()?;

        let last_call = Arc::new(Mutex::new(Instant::now()));
        let touched = Arc::clone(&last_call);
        let pending = PendingCounter::new().on_start(move || {
            *touched.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        });

        Ok(Self {
            http,
            options,
            pending: Arc::new(pending),
            pending_requests: PendingRequests::default(),
            last_call,
            disposed: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Starts a request with an arbitrary method.
    ///
    /// `uri` may be relative when a base address is configured.
    pub fn method(&self, uri: &str, method: Method) -> Result<RequestBuilder> {
        self.request(uri, method, false)
    }

    fn request(&self, uri: &str, method: Method, form_data: bool) -> Result<RequestBuilder> {
        if self.is_disposed() {
            return Err(HttpUtilError::Disposed("http util"));
        }
        RequestBuilder::new(
            self.http.clone(),
            &self.options,
            Arc::clone(&self.pending),
            self.pending_requests.clone(),
            method,
            uri,
            form_data,
        )
    }

    pub fn get(&self, uri: &str) -> Result<RequestBuilder> {
        self.method(uri, Method::GET)
    }

    pub fn post(&self, uri: &str) -> Result<RequestBuilder> {
        self.method(uri, Method::POST)
    }

    /// A POST whose body setters produce `application/x-www-form-urlencoded`.
    pub fn post_form_data(&self, uri: &str) -> Result<RequestBuilder> {
        self.request(uri, Method::POST, true)
    }

    pub fn put(&self, uri: &str) -> Result<RequestBuilder> {
        self.method(uri, Method::PUT)
    }

    pub fn delete(&self, uri: &str) -> Result<RequestBuilder> {
        self.method(uri, Method::DELETE)
    }

    pub fn head(&self, uri: &str) -> Result<RequestBuilder> {
        self.method(uri, Method::HEAD)
    }

    pub fn options(&self, uri: &str) -> Result<RequestBuilder> {
        self.method(uri, Method::OPTIONS)
    }

    pub fn trace(&self, uri: &str) -> Result<RequestBuilder> {
        self.method(uri, Method::TRACE)
    }

    pub fn patch(&self, uri: &str) -> Result<RequestBuilder> {
        self.method(uri, Method::PATCH)
    }

    pub fn connect(&self, uri: &str) -> Result<RequestBuilder> {
        self.method(uri, Method::CONNECT)
    }

    /// Cancels every send currently in flight on this instance.
    pub fn cancel_pending_requests(&self) {
        if !self.is_disposed() {
            self.pending_requests.cancel_all();
        }
    }

    pub fn pending(&self) -> &PendingCounter {
        &self.pending
    }

    /// When the most recent request started (or the instance was created).
    pub fn last_call(&self) -> Instant {
        *self.last_call.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn auto_dispose(&self) -> Option<Duration> {
        self.options.get_auto_dispose()
    }

    pub fn cookie_jar(&self) -> &Arc<Jar> {
        self.options.get_cookie_jar()
    }

    pub fn config(&self) -> &ClientOptions {
        &self.options
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Registers a callback run once when the instance is disposed.
    ///
    /// Runs immediately if the instance is already disposed.
    pub fn on_disposed(&self, listener: impl FnOnce() + Send + 'static) {
        {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.is_disposed() {
                listeners.push(Box::new(listener));
                return;
            }
        }
        listener();
    }

    /// Marks the instance disposed and notifies listeners once.
    ///
    /// Requests already in flight run to completion.
    pub fn dispose(&self) {
        let listeners = {
            let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
            if self.disposed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *listeners)
        };

        #[cfg(feature = "tracing")]
        tracing::debug!("disposing http util ({} listeners)", listeners.len());

        for listener in listeners {
            listener();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::HttpUtil;
    use crate::{ClientOptions, HttpUtilError};

    fn http_util() -> HttpUtil {
        let options = ClientOptions::new()
            .base_address("http://localhost:5200")
            .and_then(|options| options.authorization(Some("Bearer secret-token")))
            .expect("valid options");
        HttpUtil::new(options).expect("client builds")
    }

    #[test]
    fn debug_redacts_authorization_value() {
        let debug = format!("{:?}", http_util());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn verbs_seed_method_and_form_mode() {
        let util = http_util();
        assert_eq!(util.get("a").expect("get").method(), "GET");
        assert_eq!(util.patch("a").expect("patch").method(), "PATCH");
        assert_eq!(util.connect("a").expect("connect").method(), "CONNECT");
        let form = util.post_form_data("a").expect("form");
        assert_eq!(form.method(), "POST");
        assert!(form.is_form_data());
        assert!(!util.post("a").expect("post").is_form_data());
    }

    #[test]
    fn relative_uri_requires_base_address() {
        let util = HttpUtil::new(ClientOptions::new()).expect("client builds");
        assert!(matches!(
            util.get("test/check"),
            Err(HttpUtilError::InvalidArgument { .. })
        ));
        assert!(util.get("http://localhost/test/check").is_ok());
    }

    #[test]
    fn dispose_fires_listeners_once_and_blocks_verbs() {
        let util = http_util();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        util.on_disposed(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        util.dispose();
        util.dispose();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(util.is_disposed());
        assert!(matches!(util.get("a"), Err(HttpUtilError::Disposed(_))));

        let late = Arc::clone(&fired);
        util.on_disposed(move || {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_start_refreshes_last_call() {
        let util = http_util();
        let created = util.last_call();
        tokio::time::advance(std::time::Duration::from_secs(60)).await;
        drop(util.pending.guard());
        assert_eq!(util.last_call() - created, std::time::Duration::from_secs(60));
        assert_eq!(util.pending().value(), 0);
    }
}
