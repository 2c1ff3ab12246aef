//! Keyed pool of [`HttpUtil`] instances with idle-based disposal.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{ClientOptions, HttpUtil, HttpUtilError, Result};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3 * 60);

struct Registry {
    default_options: ClientOptions,
    profiles: DashMap<String, ClientOptions>,
    instances: DashMap<String, Arc<HttpUtil>>,
    create_lock: Mutex<()>,
    sweep_lock: tokio::sync::Mutex<()>,
    sweeper_started: AtomicBool,
    shutdown: CancellationToken,
    disposed: AtomicBool,
}

impl Registry {
    async fn sweep(&self) -> usize {
        let _sweeping = self.sweep_lock.lock().await;
        let candidates: Vec<(String, Arc<HttpUtil>)> = self
            .instances
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let now = Instant::now();
        let mut disposed = 0;
        for (name, instance) in candidates {
            let Some(window) = instance.auto_dispose() else {
                continue;
            };
            if now.saturating_duration_since(instance.last_call()) <= window {
                continue;
            }
            if instance.pending().is_active() {
                #[cfg(feature = "tracing")]
                tracing::debug!("[{}] idle window elapsed but {}", name, instance.pending());
                continue;
            }

            let removed = self
                .instances
                .remove_if(&name, |_, current| Arc::ptr_eq(current, &instance));
            if removed.is_some() {
                instance.dispose();
                disposed += 1;

                #[cfg(feature = "tracing")]
                tracing::debug!("[{}] removed after {:?} idle", name, window);
            }
        }
        disposed
    }

    fn remove_and_dispose(&self, name: &str) -> bool {
        match self.instances.remove(name) {
            Some((_, instance)) => {
                instance.dispose();
                true
            }
            None => false,
        }
    }
}

/// Hands out one shared [`HttpUtil`] per name.
///
/// Instances are created on first use from the named profile, or from the
/// default options when no profile is configured. A background task started
/// on the first [`HttpUtilFactory::get`] disposes instances that stayed idle
/// longer than their auto-dispose window and have nothing in flight.
pub struct HttpUtilFactory {
    registry: Arc<Registry>,
    sweep_interval: Duration,
}

impl fmt::Debug for HttpUtilFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpUtilFactory")
            .field("instances", &self.registry.instances.len())
            .field("profiles", &self.registry.profiles.len())
            .field("sweep_interval", &self.sweep_interval)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Default for HttpUtilFactory {
    fn default() -> Self {
        Self::new(ClientOptions::default())
    }
}

impl HttpUtilFactory {
    pub fn new(default_options: ClientOptions) -> Self {
        Self {
            registry: Arc::new(Registry {
                default_options,
                profiles: DashMap::new(),
                instances: DashMap::new(),
                create_lock: Mutex::new(()),
                sweep_lock: tokio::sync::Mutex::new(()),
                sweeper_started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                disposed: AtomicBool::new(false),
            }),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Interval of the background sweep, 3 minutes by default.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn default_options(&self) -> &ClientOptions {
        &self.registry.default_options
    }

    /// Registers the options used for instances created under `name`.
    ///
    /// An instance that already exists keeps its options.
    pub fn configure(&self, name: &str, options: ClientOptions) -> Result<()> {
        let name = validate_name(name)?;
        self.registry.profiles.insert(name.to_owned(), options);
        Ok(())
    }

    /// Registers a profile keyed by the host of `url`.
    pub fn configure_host(&self, url: &Url, options: ClientOptions) -> Result<()> {
        self.configure(host_key(url)?, options)
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(HttpUtilError::Disposed("http util factory"));
        }
        Ok(())
    }

    /// Returns the instance registered under `name`, creating it if needed.
    pub fn get(&self, name: &str) -> Result<Arc<HttpUtil>> {
        self.ensure_not_disposed()?;
        let name = validate_name(name)?;
        self.ensure_sweeper();

        if let Some(existing) = self.registry.instances.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let _creating = self
            .registry
            .create_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = self.registry.instances.get(name) {
            return Ok(Arc::clone(existing.value()));
        }

        let options = self
            .registry
            .profiles
            .get(name)
            .map(|profile| profile.value().clone())
            .unwrap_or_else(|| self.registry.default_options.clone());
        let instance = Arc::new(HttpUtil::new(options)?);

        let registry = Arc::downgrade(&self.registry);
        let key = name.to_owned();
        let weak_instance = Arc::downgrade(&instance);
        instance.on_disposed(move || evict(&registry, &key, &weak_instance));

        self.registry
            .instances
            .insert(name.to_owned(), Arc::clone(&instance));

        #[cfg(feature = "tracing")]
        tracing::debug!("[{}] created http util", name);

        Ok(instance)
    }

    /// Returns the instance keyed by the host of `url`.
    pub fn get_for(&self, url: &Url) -> Result<Arc<HttpUtil>> {
        self.get(host_key(url)?)
    }

    /// A fresh, unregistered instance built from the default options.
    pub fn get_default(&self) -> Result<Arc<HttpUtil>> {
        self.ensure_not_disposed()?;
        Ok(Arc::new(HttpUtil::new(self.registry.default_options.clone())?))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.instances.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.registry.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.instances.is_empty()
    }

    /// Disposes idle instances now and returns how many were removed.
    pub async fn sweep(&self) -> usize {
        self.registry.sweep().await
    }

    /// Removes and disposes the instance registered under `name`.
    pub fn dispose_named(&self, name: &str) -> bool {
        self.registry.remove_and_dispose(name)
    }

    pub fn dispose_host(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| self.registry.remove_and_dispose(host))
    }

    pub fn is_disposed(&self) -> bool {
        self.registry.disposed.load(Ordering::Acquire)
    }

    /// Stops the sweep and disposes every registered instance.
    pub fn dispose(&self) {
        if self.registry.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.registry.shutdown.cancel();

        let names: Vec<String> = self
            .registry
            .instances
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for name in names {
            self.registry.remove_and_dispose(&name);
        }
    }

    fn ensure_sweeper(&self) {
        if self.registry.sweeper_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Retry on a later call made from inside a runtime.
            self.registry.sweeper_started.store(false, Ordering::Release);
            return;
        };

        let registry = Arc::downgrade(&self.registry);
        let shutdown = self.registry.shutdown.clone();
        let interval = self.sweep_interval;
        handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep().await;
            }
        });
    }
}

impl Drop for HttpUtilFactory {
    fn drop(&mut self) {
        self.registry.shutdown.cancel();
    }
}

fn evict(registry: &Weak<Registry>, name: &str, instance: &Weak<HttpUtil>) {
    if let Some(registry) = registry.upgrade() {
        registry
            .instances
            .remove_if(name, |_, current| std::ptr::eq(Arc::as_ptr(current), instance.as_ptr()));
    }
}

fn validate_name(name: &str) -> Result<&str> {
    if name.trim().is_empty() {
        return Err(HttpUtilError::invalid("name", "instance name is blank"));
    }
    Ok(name)
}

fn host_key(url: &Url) -> Result<&str> {
    url.host_str()
        .ok_or_else(|| HttpUtilError::invalid("url", format!("'{url}' has no host")))
}
