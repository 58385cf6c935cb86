//! Sliding-window rate limiting for webhook routes.
//!
//! One limiter instance is shared by every webhook-class route, keyed by
//! `(endpoint slug, source ip)`. The state is admission control only; it
//! is never authoritative for execution correctness, so a process restart
//! simply resets the windows.

use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window limiter: at most `burst` admissions per key per window.
pub struct SlidingWindowLimiter {
    window: Duration,
    burst: usize,
    hits: Mutex<FxHashMap<(String, String), VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new(window: Duration, burst: usize) -> Self {
        Self {
            window,
            burst,
            hits: Mutex::new(FxHashMap::default()),
        }
    }

    /// Try to admit a request for `(slug, ip)` at `now`.
    ///
    /// Returns `Err(retry_after)` when the budget for the current window
    /// is exhausted.
    pub fn check_at(&self, slug: &str, ip: &str, now: Instant) -> Result<(), Duration> {
        let mut hits = match self.hits.lock() {
            Ok(guard) => guard,
            // A poisoned limiter fails open: admission control must never
            // take the ingestion path down with it.
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = self.window;
        let queue = hits
            .entry((slug.to_string(), ip.to_string()))
            .or_default();
        while queue
            .front()
            .is_some_and(|&t| now.duration_since(t) >= window)
        {
            queue.pop_front();
        }
        if queue.len() >= self.burst {
            let oldest = queue.front().copied().unwrap_or(now);
            let retry_after = window.saturating_sub(now.duration_since(oldest));
            return Err(retry_after);
        }
        queue.push_back(now);
        Ok(())
    }

    /// Convenience wrapper using the current instant.
    pub fn check(&self, slug: &str, ip: &str) -> Result<(), Duration> {
        self.check_at(slug, ip, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_burst_then_rejects() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("slug", "1.2.3.4", now).is_ok());
        }
        let retry = limiter.check_at("slug", "1.2.3.4", now).unwrap_err();
        assert!(retry <= Duration::from_secs(60));
    }

    #[test]
    fn window_slides_and_budget_recovers() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 2);
        let start = Instant::now();
        assert!(limiter.check_at("s", "ip", start).is_ok());
        assert!(limiter.check_at("s", "ip", start).is_ok());
        assert!(limiter.check_at("s", "ip", start).is_err());
        // After the window passes, the oldest hits expire.
        let later = start + Duration::from_secs(11);
        assert!(limiter.check_at("s", "ip", later).is_ok());
    }

    #[test]
    fn keys_are_isolated() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(60), 1);
        let now = Instant::now();
        assert!(limiter.check_at("a", "ip1", now).is_ok());
        assert!(limiter.check_at("a", "ip2", now).is_ok());
        assert!(limiter.check_at("b", "ip1", now).is_ok());
        assert!(limiter.check_at("a", "ip1", now).is_err());
    }

    #[test]
    fn accepted_count_never_exceeds_budget_in_any_window() {
        let limiter = SlidingWindowLimiter::new(Duration::from_secs(5), 4);
        let start = Instant::now();
        let mut accepted: Vec<Instant> = Vec::new();
        for i in 0..50 {
            let t = start + Duration::from_millis(i * 200);
            if limiter.check_at("s", "ip", t).is_ok() {
                accepted.push(t);
            }
        }
        for (i, &t) in accepted.iter().enumerate() {
            let in_window = accepted[i..]
                .iter()
                .take_while(|&&u| u.duration_since(t) < Duration::from_secs(5))
                .count();
            assert!(in_window <= 4, "window starting at accept {i} holds {in_window}");
        }
    }
}
