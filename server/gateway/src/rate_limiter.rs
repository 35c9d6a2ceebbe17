use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Bucket {
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, capacity: f64, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * capacity).min(capacity);
        self.last_update = now;
    }
}

/// Dual token-bucket limiter: a single global bucket and one per-peer
/// bucket keyed by IP. Grounded on the original's `RateLimiter` —
/// refill rate equals capacity per second for both buckets, and a single
/// `allow` call always debits both (even when the result is a reject), so
/// one saturated peer can't starve the global bucket's refill bookkeeping.
pub struct RateLimiter {
    global_capacity: f64,
    peer_capacity: f64,
    global: Mutex<Bucket>,
    peers: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    pub fn new(global_capacity: f64, peer_capacity: f64) -> Self {
        Self {
            global_capacity,
            peer_capacity,
            global: Mutex::new(Bucket::new(global_capacity)),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes one token from both the global and `addr`'s bucket,
    /// reporting whether the request should be allowed. Always debits both
    /// buckets regardless of the outcome, matching the original.
    pub fn allow(&self, addr: IpAddr) -> bool {
        let now = Instant::now();

        let peer_allow = {
            let mut peers = self.peers.lock();
            let bucket = peers
                .entry(addr)
                .or_insert_with(|| Bucket::new(self.peer_capacity));
            bucket.refill(self.peer_capacity, now);
            let allow = bucket.tokens > 0.0;
            bucket.tokens -= 1.0;
            allow
        };

        let global_allow = {
            let mut global = self.global.lock();
            global.refill(self.global_capacity, now);
            let allow = global.tokens > 0.0;
            global.tokens -= 1.0;
            allow
        };

        peer_allow && global_allow
    }

    /// Evicts per-peer buckets that have not been touched in `idle_for`.
    /// Intended to be called from a periodic background task (the original
    /// runs this every 30s with a 1-minute idle threshold).
    pub fn sweep_idle(&self, idle_for: Duration) {
        let now = Instant::now();
        self.peers
            .lock()
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_update) < idle_for);
    }

    pub fn tracked_peer_count(&self) -> usize {
        self.peers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_recovers_after_refill_window() {
        let limiter = RateLimiter::new(1000.0, 2.0);
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.allow(addr));
        assert!(limiter.allow(addr));
        assert!(!limiter.allow(addr));
    }

    #[test]
    fn independent_peers_have_independent_buckets() {
        let limiter = RateLimiter::new(1000.0, 1.0);
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.allow(a));
        assert!(!limiter.allow(a));
        assert!(limiter.allow(b));
    }

    #[test]
    fn global_bucket_caps_combined_throughput() {
        let limiter = RateLimiter::new(1.0, 1000.0);
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.allow(a));
        assert!(!limiter.allow(b));
    }

    #[test]
    fn sweep_idle_evicts_stale_buckets_only() {
        let limiter = RateLimiter::new(1000.0, 5.0);
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        limiter.allow(addr);
        assert_eq!(limiter.tracked_peer_count(), 1);
        limiter.sweep_idle(Duration::from_secs(0));
        assert_eq!(limiter.tracked_peer_count(), 0);
    }
}
