//! Jittered exponential backoff.
//!
//! `delay(attempt)` is `min(base * 2^attempt, max_delay)` scaled by a uniform
//! factor in `[1 - jitter, 1 + jitter]`. The coordinator uses [`retry`] for
//! backup flushes; clients use [`ReconnectPolicy`] for reconnection.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            jitter: 0.25,
            max_attempts: 3,
        }
    }
}

impl BackoffConfig {
    /// Upper bound of any delay this config can produce.
    pub fn ceiling(&self) -> Duration {
        self.max_delay.mul_f64(1.0 + self.jitter.clamp(0.0, 1.0))
    }
}

pub fn delay(attempt: u32, config: &BackoffConfig) -> Duration {
    delay_with_rng(attempt, config, &mut rand::thread_rng())
}

pub fn delay_with_rng<R: Rng + ?Sized>(
    attempt: u32,
    config: &BackoffConfig,
    rng: &mut R,
) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(31));
    let capped = config.base.saturating_mul(factor).min(config.max_delay);
    let jitter = config.jitter.clamp(0.0, 1.0);
    if jitter == 0.0 {
        return capped;
    }
    let scale = rng.gen_range((1.0 - jitter)..=(1.0 + jitter));
    capped.mul_f64(scale)
}

/// Runs `op` up to `max_attempts` times, sleeping `delay(attempt)` between
/// failures. Returns the last error once attempts are exhausted.
pub async fn retry<T, E, F, Fut>(config: &BackoffConfig, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 >= attempts => return Err(err),
            Err(err) => {
                let wait = delay(attempt, config);
                debug!(attempt, error = %err, wait_ms = wait.as_millis() as u64, "retrying");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

/// Client reconnection schedule: the backoff curve with its own attempt cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub backoff: BackoffConfig,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig {
                max_attempts: 10,
                ..BackoffConfig::default()
            },
        }
    }
}

impl ReconnectPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.backoff.max_attempts
    }

    /// Delay before reconnect attempt `attempt` (0-based), or `None` once the
    /// cap is reached.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.backoff.max_attempts).then(|| delay(attempt, &self.backoff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test_timeout::timeout]
    fn first_attempt_stays_within_jitter_band() {
        let config = BackoffConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let d = delay_with_rng(0, &config, &mut rng);
            assert!(d >= Duration::from_millis(750), "{d:?} below band");
            assert!(d <= Duration::from_millis(1_250), "{d:?} above band");
        }
    }

    #[test_timeout::timeout]
    fn late_attempts_are_capped() {
        let config = BackoffConfig::default();
        let ceiling = Duration::from_millis(37_500);
        assert_eq!(config.ceiling(), ceiling);
        let mut rng = StdRng::seed_from_u64(11);
        for attempt in 5..64 {
            for _ in 0..50 {
                assert!(delay_with_rng(attempt, &config, &mut rng) <= ceiling);
            }
        }
    }

    #[test_timeout::timeout]
    fn zero_jitter_is_exact() {
        let config = BackoffConfig {
            jitter: 0.0,
            ..BackoffConfig::default()
        };
        assert_eq!(delay(0, &config), Duration::from_secs(1));
        assert_eq!(delay(3, &config), Duration::from_secs(8));
        assert_eq!(delay(10, &config), Duration::from_secs(30));
    }

    #[test_timeout::timeout]
    fn reconnect_policy_stops_at_cap() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts(), 10);
        assert!(policy.next_delay(9).is_some());
        assert!(policy.next_delay(10).is_none());
    }

    #[test_timeout::tokio_timeout_test]
    async fn retry_does_not_sleep_after_final_attempt() {
        tokio::time::pause();
        let config = BackoffConfig {
            base: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
            jitter: 0.0,
            max_attempts: 3,
        };
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();
        let result: Result<(), String> = retry(&config, |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            }
        })
        .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // two waits between three attempts, none after the last
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[test_timeout::tokio_timeout_test]
    async fn retry_returns_first_success() {
        let config = BackoffConfig {
            base: Duration::from_millis(1),
            ..BackoffConfig::default()
        };
        let value = retry(&config, |attempt| async move {
            if attempt == 0 {
                Err("flaky")
            } else {
                Ok(attempt)
            }
        })
        .await;
        assert_eq!(value, Ok(1));
    }
}
