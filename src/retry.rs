//! Bounded exponential backoff for network-bound work.
use std::{future::Future, sync::Arc, time::Duration};

use rand::{thread_rng, Rng};

use crate::{Error, Result};

/// Base of the exponential backoff, in seconds.
const INITIAL_DELAY_SECS: f64 = 5.0;

/// Delay before retrying after the failed `attempt` (zero-based), or `None` once
/// `attempt > max_retries`.
///
/// The delay is `5^(1 + attempt / max_retries)` seconds plus up to one second of jitter, so it
/// grows from about 5s to at most 26s at `attempt == max_retries`. The policy is stateless:
/// callers own the attempt counter and the sleep.
pub fn delay(attempt: u32, max_retries: u32) -> Option<Duration> {
    if attempt > max_retries {
        return None;
    }
    let jitter = thread_rng().gen_range(0.0..1.0);
    Some(backoff(attempt, max_retries, jitter))
}

fn backoff(attempt: u32, max_retries: u32, jitter: f64) -> Duration {
    // With no retries configured the only valid attempt is the last one.
    let ratio = if max_retries == 0 {
        1.0
    } else {
        f64::from(attempt) / f64::from(max_retries)
    };
    Duration::from_secs_f64(INITIAL_DELAY_SECS.powf(1.0 + ratio) + jitter)
}

/// Run `operation`, retrying failures up to `max_retries` times.
///
/// Between attempts the task sleeps for `retry_interval` if given, otherwise for the backoff
/// [`delay`]. If the final attempt still fails, returns [`Error::RetryExhausted`] wrapping the
/// last error.
pub async fn retrying<T, F, Fut>(
    max_retries: u32,
    retry_interval: Option<Duration>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let wait = match retry_interval {
            Some(interval) if attempt < max_retries => Some(interval),
            Some(_) => None,
            None if attempt < max_retries => delay(attempt, max_retries),
            None => None,
        };
        let Some(wait) = wait else {
            log::warn!(target: "paywall",
                       attempts = attempt + 1;
                       "giving up after repeated failures: {}", err);
            return Err(Error::RetryExhausted {
                attempts: attempt + 1,
                source: Arc::new(err),
            });
        };

        log::debug!(target: "paywall",
                    attempt = attempt + 1,
                    delay_ms = wait.as_millis() as u64;
                    "attempt failed, retrying: {}", err);
        tokio::time::sleep(wait).await;
        attempt += 1;
    }
}
