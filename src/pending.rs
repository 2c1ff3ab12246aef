use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Atomic count of in-flight operations on a client instance.
///
/// The registry only evicts an instance whose counter is zero.
#[derive(Default)]
pub struct PendingCounter {
    value: AtomicUsize,
    on_start: Option<Hook>,
    on_complete: Option<Hook>,
}

impl PendingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `hook` after every [`PendingCounter::start`].
    pub fn on_start(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    /// Runs `hook` after every [`PendingCounter::complete`].
    pub fn on_complete(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    pub fn start(&self) {
        self.value.fetch_add(1, Ordering::AcqRel);
        if let Some(hook) = &self.on_start {
            hook();
        }
    }

    pub fn complete(&self) {
        // Saturate at zero so an unbalanced complete cannot wrap around.
        let _ = self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1));
        if let Some(hook) = &self.on_complete {
            hook();
        }
    }

    pub fn value(&self) -> usize {
        self.value.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.value() > 0
    }

    /// Starts an operation that completes when the guard is dropped.
    pub fn guard(self: &Arc<Self>) -> PendingGuard {
        self.start();
        PendingGuard {
            counter: Arc::clone(self),
        }
    }
}

impl fmt::Display for PendingCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pending: {}", self.value())
    }
}

impl fmt::Debug for PendingCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCounter")
            .field("value", &self.value())
            .finish()
    }
}

/// Completes one pending operation on drop.
#[must_use = "the operation completes as soon as the guard is dropped"]
pub struct PendingGuard {
    counter: Arc<PendingCounter>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.counter.complete();
    }
}

/// Cancellation shared by the in-flight sends of one client instance.
///
/// Cancelling replaces the token, so sends started afterwards are unaffected.
#[derive(Clone, Debug, Default)]
pub(crate) struct PendingRequests(Arc<Mutex<CancellationToken>>);

impl PendingRequests {
    pub(crate) fn current(&self) -> CancellationToken {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn cancel_all(&self) {
        let mut token = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }
}
