use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use quant_core::EngineError;

/// Token bucket limiting one provider's request rate.
///
/// Refills continuously at `rate` tokens per second up to `capacity`.
/// Shared across workers via `Arc`.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    rate: f64,
    capacity: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, capacity: f64) -> Self {
        let rate = rate.max(0.01);
        let capacity = capacity.max(1.0);
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            rate,
            capacity,
        }
    }

    /// Take one token, sleeping until one is available. Fails with
    /// `RateLimited` when the wait would exceed `max_wait`.
    pub async fn acquire(&self, max_wait: Duration) -> Result<(), EngineError> {
        let started = Instant::now();
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };

            if started.elapsed() + wait > max_wait {
                return Err(EngineError::RateLimited(format!(
                    "token wait of {:.1}s exceeds budget of {:.1}s",
                    wait.as_secs_f64(),
                    max_wait.as_secs_f64()
                )));
            }
            tracing::debug!("rate limiter: waiting {:.2}s for a token", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
    }
}
