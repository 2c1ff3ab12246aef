//! Retry classification and scheduling.
//!
//! A failed attempt is classified into one [`RetryTrigger`] class. The
//! [`RetryPolicy`] retries only when its trigger mask contains that class and
//! the attempt budget is not exhausted.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::Duration;

/// Bit set of failure classes that enable a retry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryTrigger(u8);

impl RetryTrigger {
    pub const NONE: Self = Self(0);
    /// The per-attempt timeout elapsed.
    pub const TIMEOUT: Self = Self(1);
    /// Dispatch failed with anything other than cancellation.
    pub const EXCEPTION: Self = Self(2);
    /// The response carried a non-success status code.
    pub const FAIL_STATUS_CODE: Self = Self(4);
    pub const ALL: Self = Self(1 | 2 | 4);

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns `true` when every class in `other` is also in `self`.
    pub const fn contains(self, other: Self) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    fn name(self) -> &'static str {
        match self.0 {
            0 => "None",
            1 => "Timeout",
            2 => "Exception",
            4 => "FailStatusCode",
            7 => "All",
            _ => "Mixed",
        }
    }
}

impl Default for RetryTrigger {
    fn default() -> Self {
        Self::TIMEOUT
    }
}

impl BitOr for RetryTrigger {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RetryTrigger {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for RetryTrigger {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for RetryTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name() != "Mixed" {
            return f.write_str(self.name());
        }
        let parts: Vec<&str> = [Self::TIMEOUT, Self::EXCEPTION, Self::FAIL_STATUS_CODE]
            .into_iter()
            .filter(|flag| self.contains(*flag))
            .map(Self::name)
            .collect();
        f.write_str(&parts.join(" | "))
    }
}

/// Maps the 1-based upcoming attempt number to a delay in milliseconds.
///
/// Values `<= 0` mean "retry immediately".
pub type RetryDelay = Arc<dyn Fn(usize) -> i64 + Send + Sync>;

/// Outcome of asking a [`RetryPolicy`] about a failed attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Send again after `delay` as attempt number `attempt`.
    Retry { delay: Duration, attempt: usize },
    DoNotRetry,
}

/// How many times, on which failures, and how long to wait between attempts.
#[derive(Clone, Default)]
pub struct RetryPolicy {
    max_retries: usize,
    trigger: RetryTrigger,
    delay: Option<RetryDelay>,
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(max_retries: usize, trigger: RetryTrigger) -> Self {
        Self {
            max_retries,
            trigger,
            delay: None,
        }
    }

    /// Sets the delay function.
    pub fn with_delay(mut self, delay: impl Fn(usize) -> i64 + Send + Sync + 'static) -> Self {
        self.delay = Some(Arc::new(delay));
        self
    }

    pub(crate) fn with_delay_arc(mut self, delay: Option<RetryDelay>) -> Self {
        self.delay = delay;
        self
    }

    /// `base_ms * 2^(attempt - 1)`, i.e. 1x, 2x, 4x ... of `base_ms`.
    pub fn exponential(max_retries: usize, base_ms: i64, trigger: RetryTrigger) -> Self {
        Self::new(max_retries, trigger).with_delay(move |attempt| {
            let exp = attempt.saturating_sub(1).min(30) as u32;
            base_ms.saturating_mul(1i64 << exp)
        })
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn trigger(&self) -> RetryTrigger {
        self.trigger
    }

    /// Decides whether the attempt that just failed with `class` is retried.
    ///
    /// `attempts_so_far` counts retries already taken (0 after the first send).
    pub fn decide(&self, class: RetryTrigger, attempts_so_far: usize) -> RetryDecision {
        if !self.trigger.contains(class) || attempts_so_far >= self.max_retries {
            return RetryDecision::DoNotRetry;
        }

        let attempt = attempts_so_far + 1;
        let delay_ms = self.delay.as_ref().map_or(0, |delay| delay(attempt));
        let delay = u64::try_from(delay_ms)
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);

        RetryDecision::Retry { delay, attempt }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("trigger", &self.trigger)
            .field("delay", &self.delay.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
