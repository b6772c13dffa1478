use std::future::Future;
use std::time::Duration;

use log::warn;
use rand::Rng;
use tokio::time::{sleep, Instant};

use crate::{Error, Result};

/// Exponential backoff bounded by total elapsed time, not by attempt count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Nominal wait after the first failure.
    pub base_delay: Duration,
    /// Growth factor of the nominal wait per failed attempt.
    pub multiplier: f64,
    /// Share of each wait that is randomised, in `0.0..=1.0`. `1.0` is full jitter.
    pub jitter: f64,
    /// Once this much time has passed since the first attempt, the last error is final.
    pub max_total_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 1.0,
            max_total_time: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_total_time(self, max_total_time: Duration) -> Self {
        RetryPolicy {
            max_total_time,
            ..self
        }
    }

    /// Wait before attempt `attempt + 1`, `attempt` counting failures from 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let nominal = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let nominal = nominal.min(self.max_total_time.as_secs_f64());

        let jitter = self.jitter.clamp(0.0, 1.0);
        let fixed = nominal * (1.0 - jitter);
        let random = if jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=nominal * jitter)
        } else {
            0.0
        };
        Duration::from_secs_f64(fixed + random)
    }

    /// Runs `op` until it succeeds, fails with a non retryable error, or the time
    /// budget is spent. Waits never run past the budget.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let mut attempt = 0;
        loop {
            let err = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };
            attempt += 1;

            let elapsed = start.elapsed();
            if elapsed >= self.max_total_time {
                return Err(Error::RetryBudgetExhausted {
                    attempts: attempt,
                    elapsed,
                    last: Box::new(err),
                });
            }

            let wait = self
                .delay_for_attempt(attempt - 1)
                .min(self.max_total_time - elapsed);
            warn!("{label}: attempt {attempt} failed ({err}), backing off {wait:.2?}");
            sleep(wait).await;
        }
    }
}
