//! Exponential backoff for throttled control-plane calls.
//!
//! Only failures that classify themselves as throttling are retried. Every
//! other failure goes straight back to the caller, untouched and without a
//! sleep. Once the attempt ceiling is reached the caller gets
//! [`RetryError::LimitExceeded`] instead of the provider error, so "the call
//! failed" and "we gave up waiting for the rate limit" stay distinguishable.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_DELAY_SECS: u64 = 1;

/// Errors that know whether they were caused by request throttling.
pub trait Throttle {
    fn is_throttling(&self) -> bool;
}

/// Blocking wait in whole seconds. Only the calling thread is suspended.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, secs: u64);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, secs: u64) {
        std::thread::sleep(Duration::from_secs(secs));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// The wrapped call failed for a reason other than throttling.
    Call(E),
    /// Every attempt was throttled.
    LimitExceeded { attempts: u32, last: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Call(err) => write!(f, "{}", err),
            RetryError::LimitExceeded { attempts, last } => {
                write!(f, "retry limit exceeded after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay_secs: u64,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay_secs", &self.initial_delay_secs)
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_INITIAL_DELAY_SECS)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay_secs: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay_secs,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails for a non-throttling reason, or has
    /// been throttled `max_attempts` times.
    ///
    /// Each throttled attempt sleeps for the current delay before the next
    /// one; the delay starts at `initial_delay_secs` and doubles every time
    /// (1, 2, 4, 8, 16 with the defaults).
    pub fn call<T, E, F>(&self, label: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: Throttle + fmt::Display,
    {
        let mut attempts = 0;
        let mut delay = self.initial_delay_secs;

        loop {
            let err = match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_throttling() => err,
                Err(err) => return Err(RetryError::Call(err)),
            };

            attempts += 1;
            log_status!(
                "retry",
                "{} throttled (attempt {}/{}), retrying in {}s: {}",
                label,
                attempts,
                self.max_attempts,
                delay,
                err
            );
            self.sleeper.sleep(delay);
            delay = delay.saturating_mul(2);

            if attempts >= self.max_attempts {
                return Err(RetryError::LimitExceeded {
                    attempts,
                    last: err,
                });
            }
        }
    }

    /// Lift `op` into an operation with the same shape plus backoff.
    pub fn wrap<'a, T, E, F>(
        &'a self,
        label: &'a str,
        mut op: F,
    ) -> impl FnMut() -> Result<T, RetryError<E>> + 'a
    where
        F: FnMut() -> Result<T, E> + 'a,
        E: Throttle + fmt::Display,
    {
        move || self.call(label, &mut op)
    }
}
