use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

/// Exponential backoff between attempts: the n-th wait is `scale * base^n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub scale: Duration,
    pub base: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            scale: Duration::from_millis(100),
            base: 2,
        }
    }
}

impl Backoff {
    /// Retry without waiting.
    pub fn none() -> Self {
        Self {
            scale: Duration::ZERO,
            base: 1,
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.scale
            .saturating_mul(self.base.saturating_pow(attempt))
    }
}

/// Result of one attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    Done(T),
    /// Worth trying again.
    Retry(E),
    /// Give up now.
    Abort(E),
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: E },
    Aborted(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "reached the max number of attempts {}: {}", attempts, last)
            }
            Self::Aborted(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Aborted(e) => Some(e),
        }
    }
}

/// Run `op` up to `max_attempts` times (at least once), parking between
/// retryable failures.
pub fn retry<T, E, F>(max_attempts: u32, backoff: Backoff, op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Attempt<T, E>,
{
    retry_until(max_attempts, backoff, || false, op)
}

/// Like [`retry`], but a backoff wait ends early once `cancelled` holds.
/// `cancelled` is checked whenever the waiting thread is unparked.
pub fn retry_until<T, E, C, F>(
    max_attempts: u32,
    backoff: Backoff,
    cancelled: C,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    C: Fn() -> bool,
    F: FnMut(u32) -> Attempt<T, E>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt) {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(e) => return Err(RetryError::Aborted(e)),
            Attempt::Retry(e) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: e,
                });
            }
            Attempt::Retry(_) => {
                let delay = backoff.delay(attempt);
                debug!("Attempt {}/{} failed, retrying in {:?}", attempt, max_attempts, delay);
                park_until(Instant::now() + delay, &cancelled);
            }
        }
    }
}

/// Park until `deadline`. Spurious wakeups and stale unpark tokens park again.
fn park_until(deadline: Instant, cancelled: &impl Fn() -> bool) {
    loop {
        if cancelled() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}
