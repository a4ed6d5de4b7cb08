use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::warn;

use crate::capability::{CapabilityError, CapabilityResult};

/// Exponential backoff for retryable capability failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base, ...
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Run `attempt` until it succeeds, fails fatally, or retries run out.
    /// Returns the number of attempts made with the final result.
    pub fn run<T, F>(&self, label: &str, mut attempt: F) -> (u32, CapabilityResult<T>)
    where
        F: FnMut() -> CapabilityResult<T>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt() {
                Err(e) if e.is_retryable() && attempts <= self.max_retries => {
                    let delay = self.delay_for(attempts);
                    warn!(
                        "{} failed (attempt {}): {}. Retrying in {:?}",
                        label, attempts, e, delay
                    );
                    thread::sleep(delay);
                }
                result => return (attempts, result),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Run `call` on its own thread and give up waiting after `timeout`. An
/// overrun leaves the thread detached and reports a retryable timeout.
pub fn call_with_timeout<T, F>(timeout: Duration, call: F) -> CapabilityResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CapabilityResult<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("collate-attempt".to_string())
        .spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(call));
            let _ = tx.send(result);
        });
    if let Err(e) = spawned {
        return Err(CapabilityError::Transfer(format!("could not spawn worker: {e}")));
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(result)) => result,
        Ok(Err(payload)) => Err(CapabilityError::Panicked(panic_message(payload.as_ref()))),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(CapabilityError::Timeout(timeout)),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(CapabilityError::Panicked("worker exited without a result".to_string()))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
