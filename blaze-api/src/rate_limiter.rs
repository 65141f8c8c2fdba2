//! Per-client rate limiting using the token bucket algorithm
//!
//! Every key (the client IP for HTTP requests) gets its own bucket:
//!
//! - A new key starts with `burst` tokens
//! - Tokens refill at `requests_per_second`, up to `burst`
//! - Each request consumes one token, and is refused when none is left
//!
//! Buckets that haven't been touched for `idle_timeout` are removed by a
//! background sweep so the map doesn't grow with every client ever seen.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use ahash::AHashMap;
use blaze_common::Signal;
use parking_lot::Mutex;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        let capacity = f64::from(config.burst);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: config.requests_per_second,
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = elapsed.mul_add(self.refill_rate, self.tokens).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

type Buckets = Mutex<AHashMap<String, TokenBucket>>;

/// Token buckets keyed by client.
///
/// Clones share the same buckets.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Arc<Buckets>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Arc::default(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take a token for `key`, returning `false` if none is available
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// [`allow`](Self::allow), as if called at `now`
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();

        let allowed = match buckets.get_mut(key) {
            Some(bucket) => bucket.try_consume(now),
            None => buckets
                .entry(key.to_string())
                .or_insert_with(|| TokenBucket::new(&self.config, now))
                .try_consume(now),
        };
        drop(buckets);

        if !allowed {
            tracing::debug!(key, "Rate limit exceeded");
        }
        allowed
    }

    /// Remove buckets idle for longer than the configured timeout, returning
    /// how many were removed
    pub fn sweep_at(&self, now: Instant) -> usize {
        sweep(&self.buckets, self.config.idle_timeout(), now)
    }

    /// Number of clients currently tracked
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    /// Start the periodic sweep.
    ///
    /// The task ends on shutdown, or at the first tick after every clone of
    /// this limiter has been dropped.
    pub fn spawn_sweeper(&self, mut shutdown: broadcast::Receiver<Signal>) -> JoinHandle<()> {
        let buckets: Weak<Buckets> = Arc::downgrade(&self.buckets);
        let idle = self.config.idle_timeout();
        let period = self.config.sweep_interval().max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::debug!("Rate limiter sweep stopping on shutdown");
                        return;
                    }
                    _ = interval.tick() => {
                        let Some(buckets) = buckets.upgrade() else {
                            return;
                        };

                        let removed = sweep(&buckets, idle, Instant::now());
                        if removed > 0 {
                            tracing::debug!(removed, "Evicted idle rate limit buckets");
                        }
                    }
                }
            }
        })
    }
}

fn sweep(buckets: &Buckets, idle: Duration, now: Instant) -> usize {
    let mut buckets = buckets.lock();
    let before = buckets.len();
    buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= idle);
    before - buckets.len()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn limiter(requests_per_second: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_second,
            burst,
            ..RateLimitConfig::default()
        })
    }

    #[test]
    fn burst_then_refused() {
        let limiter = limiter(1.0, 3);
        let now = Instant::now();

        assert!(limiter.allow_at("10.0.0.1", now));
        assert!(limiter.allow_at("10.0.0.1", now));
        assert!(limiter.allow_at("10.0.0.1", now));
        assert!(!limiter.allow_at("10.0.0.1", now));
    }

    #[test]
    fn refills_with_elapsed_time() {
        let limiter = limiter(2.0, 1);
        let start = Instant::now();

        assert!(limiter.allow_at("client", start));
        assert!(!limiter.allow_at("client", start + Duration::from_millis(100)));
        assert!(limiter.allow_at("client", start + Duration::from_millis(600)));
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let limiter = limiter(100.0, 2);
        let start = Instant::now();
        assert!(limiter.allow_at("client", start));

        let later = start + Duration::from_secs(60);
        assert!(limiter.allow_at("client", later));
        assert!(limiter.allow_at("client", later));
        assert!(!limiter.allow_at("client", later));
    }

    #[test]
    fn sweep_removes_only_idle_keys() {
        let limiter = limiter(1.0, 1);
        let start = Instant::now();

        limiter.allow_at("stale", start);
        limiter.allow_at("fresh", start + Duration::from_secs(3000));
        assert_eq!(limiter.len(), 2);

        let removed = limiter.sweep_at(start + Duration::from_secs(3601));
        assert_eq!(removed, 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.sweep_at(start + Duration::from_secs(3601)), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn keys_are_independent_under_concurrency() {
        let limiter = limiter(0.001, 5);
        let now = Instant::now();

        let tasks: Vec<_> = (0..8)
            .map(|client| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    let key = format!("192.0.2.{client}");
                    (0..10).filter(|_| limiter.allow_at(&key, now)).count()
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), 5);
        }
        assert_eq!(limiter.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_idle_buckets() {
        let limiter = limiter(1.0, 1);
        let (_tx, rx) = broadcast::channel(1);
        let _sweeper = limiter.spawn_sweeper(rx);

        assert!(limiter.allow("idle"));
        tokio::time::sleep(Duration::from_secs(71 * 60)).await;
        tokio::task::yield_now().await;

        assert!(limiter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_when_limiter_dropped() {
        let limiter = limiter(1.0, 1);
        let (_tx, rx) = broadcast::channel(1);
        let sweeper = limiter.spawn_sweeper(rx);

        drop(limiter);

        tokio::time::timeout(Duration::from_secs(3600), sweeper)
            .await
            .expect("sweeper should stop once the limiter is gone")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_shutdown() {
        let limiter = limiter(1.0, 1);
        let (tx, rx) = broadcast::channel(1);
        let sweeper = limiter.spawn_sweeper(rx);

        tx.send(Signal::Shutdown).unwrap();
        sweeper.await.unwrap();
        assert!(limiter.allow("still usable"));
    }
}
