//! Token-bucket rate limiting keyed by upstream service.
//!
//! Each upstream gets its own bucket so a slow aggregator never throttles the
//! chain writer and the other way round. Callers wait asynchronously until a
//! token is available.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Slowest pace a bucket accepts, one call every ~17 minutes
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.001;

/// Wait reported when the computed delay is not representable
const MAX_WAIT: Duration = Duration::from_secs(3_600);

/// External services the orchestrator paces its calls against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Upstream {
    Aggregator,
    ChainWriter,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::Aggregator => f.write_str("aggregator"),
            Upstream::ChainWriter => f.write_str("chain-writer"),
        }
    }
}

/// Rate of one bucket
#[derive(Debug, Clone, Copy)]
pub struct BucketRate {
    pub requests_per_second: f64,
    pub burst: u32,
}

#[derive(Debug)]
struct Bucket {
    rate: BucketRate,
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn new(rate: BucketRate) -> Self {
        Self {
            rate,
            tokens: f64::from(rate.burst),
            refilled_at: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate.requests_per_second).min(f64::from(self.rate.burst));
        self.refilled_at = now;
    }

    /// Take a token, or report how long until one is available
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            Err(Duration::try_from_secs_f64(missing / self.rate.requests_per_second).unwrap_or(MAX_WAIT))
        }
    }
}

/// Process-wide limiter shared by every swap batch
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<Upstream, Bucket>>,
}

impl RateLimiter {
    pub fn new(rates: impl IntoIterator<Item = (Upstream, BucketRate)>) -> Self {
        let buckets = rates
            .into_iter()
            .map(|(upstream, rate)| {
                // NaN would disable limiting
                let requests_per_second = if rate.requests_per_second.is_nan() {
                    MIN_REQUESTS_PER_SECOND
                } else {
                    rate.requests_per_second.max(MIN_REQUESTS_PER_SECOND)
                };
                let rate = BucketRate {
                    requests_per_second,
                    burst: rate.burst.max(1),
                };
                (upstream, Bucket::new(rate))
            })
            .collect();
        Self { buckets: Mutex::new(buckets) }
    }

    /// Wait for a permit to call `upstream`. Upstreams without a bucket are not limited.
    pub async fn acquire(&self, upstream: Upstream) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock();
                let Some(bucket) = buckets.get_mut(&upstream) else {
                    return;
                };
                match bucket.try_take(Instant::now()) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            debug!(%upstream, ?wait, "rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}
