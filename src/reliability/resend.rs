use crate::buffer::EventBatch;
use crate::config::RetryConfig;
use crate::sender::{ChainResult, Middleware, Next};
use futures::future::BoxFuture;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff: `initial * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            jitter: false,
        }
    }

    /// Spreads each delay over 50%..150% of its nominal value.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Nominal delay before retry number `attempt + 1`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial
            .checked_mul(multiplier)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl From<&RetryConfig> for Backoff {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.initial_delay(), config.max_delay()).with_jitter(config.jitter)
    }
}

/// Resends a batch after transport failures, up to `max_retries` times.
///
/// A completed exchange is never resent: a non-200 reply, or a 200 carrying
/// an application error code, comes back as `ServerRejection` right away.
pub struct ResendMiddleware {
    max_retries: u32,
    backoff: Backoff,
}

impl ResendMiddleware {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Backoff::from(config))
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Middleware for ResendMiddleware {
    fn name(&self) -> &'static str {
        "resend"
    }

    fn handle<'a>(&'a self, batch: Arc<EventBatch>, next: Next<'a>) -> BoxFuture<'a, ChainResult> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                match next.run(Arc::clone(&batch)).await {
                    Ok(reply) => {
                        reply.check()?;
                        if attempt > 0 {
                            debug!(batch_id = %batch.id(), attempt, "Batch delivered after resend");
                        }
                        return Ok(reply);
                    }
                    Err(error) if error.is_retryable() && attempt < self.max_retries => {
                        let delay = self.backoff.next_delay(attempt);
                        attempt += 1;
                        warn!(
                            batch_id = %batch.id(),
                            attempt,
                            max_retries = self.max_retries,
                            ?delay,
                            %error,
                            "Transport failure, resending batch"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(error) => return Err(error),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(5), Duration::from_secs(32));
        assert_eq!(backoff.delay_for(6), Duration::from_secs(60));
        assert_eq!(backoff.delay_for(40), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff::default().with_jitter(true);
        for _ in 0..100 {
            let delay = backoff.next_delay(2);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(6));
        }
    }

    #[test]
    fn test_from_retry_config() {
        let config = RetryConfig {
            max_retries: 2,
            initial_delay_ms: 10,
            max_delay_ms: 25,
            jitter: false,
        };
        let resend = ResendMiddleware::from_config(&config);
        assert_eq!(resend.max_retries(), 2);
        assert_eq!(resend.backoff.delay_for(3), Duration::from_millis(25));
    }
}
