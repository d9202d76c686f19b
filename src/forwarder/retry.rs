//! Retry policy for `AddPortMapping`
//!
//! Pauses are cancellable: once the agent's [`CancellationToken`] fires,
//! every current and future pause ends at once.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How often and how patiently a mapping is attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (at least one is always made)
    pub max_attempts: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Run `attempt` until it returns `true` or the attempts are exhausted
    ///
    /// Returns whether an attempt succeeded and how many were made. Blocks
    /// the calling thread between attempts; a cancelled `cancel` ends the
    /// pause early but the loop carries on.
    pub fn run<F>(&self, cancel: &CancellationToken, mut attempt: F) -> (bool, u32)
    where
        F: FnMut() -> bool,
    {
        let max = self.max_attempts.max(1);
        let mut tries = 0;
        loop {
            tries += 1;
            if attempt() {
                return (true, tries);
            }
            if tries >= max {
                return (false, tries);
            }
            pause_blocking(self.delay, cancel);
        }
    }
}

/// Wait for `delay` unless `cancel` fires first
///
/// Returns `false` if the wait was cut short.
pub async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Blocking form of [`pause`]
///
/// Must not be called from within an async context.
pub fn pause_blocking(delay: Duration, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if delay.is_zero() {
        return true;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            warn!("Unable to start timer, skipping retry pause: {}", e);
            return true;
        }
    };
    runtime.block_on(pause(delay, cancel))
}
