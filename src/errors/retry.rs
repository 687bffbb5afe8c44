use std::future::Future;
use std::time::Duration;

use super::types::CegirError;
use tracing::{debug, warn};

const BACKOFF_CAP: Duration = Duration::from_secs(30);
const THROTTLE_BASE: Duration = Duration::from_secs(30);
const THROTTLE_CAP: Duration = Duration::from_secs(120);

/// Retry policy for toolchain, engine and collaborator invocations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Extra attempts after the first.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, base_delay: Duration::from_secs(1) }
    }
}

impl RetryConfig {
    pub fn no_retries() -> Self {
        Self { max_retries: 0, base_delay: Duration::ZERO }
    }

    /// Pause before retry `retry` (1-based). Throttled calls wait 30s plus
    /// 10s per retry; everything else doubles from `base_delay` with up to
    /// one `base_delay` of jitter.
    pub fn delay_for(&self, err: &CegirError, retry: u32) -> Duration {
        let n = retry.saturating_sub(1);
        if err.is_throttled() {
            return (THROTTLE_BASE + Duration::from_secs(10 * u64::from(n))).min(THROTTLE_CAP);
        }
        let doubling = 2f64.powi(n.min(16) as i32);
        let secs = self.base_delay.as_secs_f64() * (doubling + rand::random::<f64>());
        Duration::from_secs_f64(secs).min(BACKOFF_CAP)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retries in `config` are used up. The last error is returned.
pub async fn with_retry<F, Fut, T>(name: &str, config: &RetryConfig, mut op: F) -> Result<T, CegirError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CegirError>>,
{
    let mut retry = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let class = err.classify();
        if !class.retryable {
            debug!(operation = name, error_type = class.error_type, "Failure is not retryable");
            return Err(err);
        }
        if retry == config.max_retries {
            warn!(operation = name, attempts = retry + 1, error = %err, "Retries exhausted");
            return Err(err);
        }
        retry += 1;
        let delay = config.delay_for(&err, retry);
        warn!(
            operation = name,
            retry,
            of = config.max_retries,
            error_type = class.error_type,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
