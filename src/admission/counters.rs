//! Counter primitives backing the limiters.
//!
//! [`CounterStore`] is the narrow interface to the external atomic counter
//! store. Its contract is per-key atomicity across concurrent requests: two
//! concurrent requests against a near-empty bucket must not both succeed if
//! only one token remains. [`MemoryCounterStore`] is the in-process
//! implementation, a mutex-guarded key table with a sliding request log per
//! window and a lazily-refilled token bucket.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowSample {
    /// Requests in the trailing window, including this one.
    pub count: u64,
    /// Time until the oldest counted request falls out of the window.
    pub reset_in: Duration,
}

#[derive(Clone, Copy, Debug)]
pub struct BucketParams {
    pub capacity: u64,
    pub refill_rate: u64,
    pub refill_interval: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenDecision {
    pub ok: bool,
    pub remaining: u64,
    /// Time until the next refill grants a token, set when `ok` is false.
    pub retry_after: Option<Duration>,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record a request against `key` and return the trailing-window count.
    async fn increment_window(&self, key: &str, window: Duration, now: Instant) -> WindowSample;

    /// Consume one token from the bucket for `key`, creating a full bucket
    /// on first sight.
    async fn consume_token(&self, key: &str, params: BucketParams, now: Instant) -> TokenDecision;
}

struct Bucket {
    tokens: u64,
    last_refill: Instant,
}

#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Bucket {
    fn refill(&mut self, params: &BucketParams, now: Instant) {
        if params.refill_rate == 0 || params.refill_interval.is_zero() {
            return;
        }
        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = (elapsed.as_nanos() / params.refill_interval.as_nanos())
            .min(u128::from(u32::MAX)) as u32;
        if intervals == 0 {
            return;
        }
        let added = params.refill_rate.saturating_mul(intervals as u64);
        self.tokens = self.tokens.saturating_add(added).min(params.capacity);
        self.last_refill += params.refill_interval * intervals;
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_window(&self, key: &str, window: Duration, now: Instant) -> WindowSample {
        let mut windows = self.windows.lock().expect("counter store poisoned");
        let log = windows.entry(key.to_string()).or_default();
        while let Some(oldest) = log.front() {
            if now.saturating_duration_since(*oldest) >= window {
                log.pop_front();
            } else {
                break;
            }
        }
        log.push_back(now);
        let oldest = *log.front().expect("log never empty after push");
        WindowSample {
            count: log.len() as u64,
            reset_in: window.saturating_sub(now.saturating_duration_since(oldest)),
        }
    }

    async fn consume_token(&self, key: &str, params: BucketParams, now: Instant) -> TokenDecision {
        let mut buckets = self.buckets.lock().expect("counter store poisoned");
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: params.capacity,
            last_refill: now,
        });
        bucket.refill(&params, now);
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            TokenDecision {
                ok: true,
                remaining: bucket.tokens,
                retry_after: None,
            }
        } else {
            let next_refill = bucket.last_refill + params.refill_interval;
            TokenDecision {
                ok: false,
                remaining: 0,
                retry_after: Some(next_refill.saturating_duration_since(now)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(30);

    fn params(capacity: u64) -> BucketParams {
        BucketParams {
            capacity,
            refill_rate: 2,
            refill_interval: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn window_counts_and_expires() {
        let store = MemoryCounterStore::new();
        let t0 = Instant::now();
        for expected in 1..=3u64 {
            let sample = store.increment_window("ip", WINDOW, t0).await;
            assert_eq!(sample.count, expected);
        }

        // Past the boundary the old entries fall out.
        let later = t0 + Duration::from_secs(31);
        let sample = store.increment_window("ip", WINDOW, later).await;
        assert_eq!(sample.count, 1);
        assert_eq!(sample.reset_in, WINDOW);
    }

    #[tokio::test]
    async fn window_reset_tracks_oldest_entry() {
        let store = MemoryCounterStore::new();
        let t0 = Instant::now();
        store.increment_window("ip", WINDOW, t0).await;
        let sample = store
            .increment_window("ip", WINDOW, t0 + Duration::from_secs(10))
            .await;
        assert_eq!(sample.count, 2);
        assert_eq!(sample.reset_in, Duration::from_secs(20));
    }

    #[tokio::test]
    async fn window_keys_are_isolated() {
        let store = MemoryCounterStore::new();
        let t0 = Instant::now();
        store.increment_window("a", WINDOW, t0).await;
        let sample = store.increment_window("b", WINDOW, t0).await;
        assert_eq!(sample.count, 1);
    }

    #[tokio::test]
    async fn bucket_grants_capacity_then_fails_with_retry() {
        let store = MemoryCounterStore::new();
        let t0 = Instant::now();
        for left in (0..5u64).rev() {
            let decision = store.consume_token("ip", params(5), t0).await;
            assert!(decision.ok);
            assert_eq!(decision.remaining, left);
        }
        let decision = store.consume_token("ip", params(5), t0).await;
        assert!(!decision.ok);
        // Next refill is one full interval away from bucket creation.
        assert_eq!(decision.retry_after, Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn bucket_refills_at_configured_rate() {
        let store = MemoryCounterStore::new();
        let t0 = Instant::now();
        let p = params(5);
        for _ in 0..5 {
            assert!(store.consume_token("ip", p, t0).await.ok);
        }
        assert!(!store.consume_token("ip", p, t0).await.ok);

        // One interval later two tokens are back.
        let t1 = t0 + Duration::from_secs(10);
        assert!(store.consume_token("ip", p, t1).await.ok);
        assert!(store.consume_token("ip", p, t1).await.ok);
        assert!(!store.consume_token("ip", p, t1).await.ok);
    }

    #[tokio::test]
    async fn bucket_never_overfills() {
        let store = MemoryCounterStore::new();
        let t0 = Instant::now();
        let p = params(5);
        assert!(store.consume_token("ip", p, t0).await.ok);
        // A long quiet period refills to capacity, not beyond.
        let later = t0 + Duration::from_secs(1000);
        let decision = store.consume_token("ip", p, later).await;
        assert!(decision.ok);
        assert_eq!(decision.remaining, 4);
    }

    #[tokio::test]
    async fn concurrent_consumers_cannot_share_the_last_token() {
        use std::sync::Arc;

        let store = Arc::new(MemoryCounterStore::new());
        let t0 = Instant::now();
        let p = params(1);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.consume_token("ip", p, t0).await.ok
            }));
        }
        let mut granted = 0;
        for handle in handles {
            if handle.await.expect("task panicked") {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }
}
