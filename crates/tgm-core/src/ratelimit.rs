use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::{errors::Error, Result};

/// Fixed-window request counter keyed by a caller token.
///
/// Each call computes the current window from `floor(elapsed / interval)`,
/// sweeps counters from older windows, and increments the counter for
/// `(token, window)`. Exceeding `limit` within a window fails with
/// `Error::RateLimited`, as does exceeding the tracked-entry ceiling (a crude
/// memory bound against token churn).
///
/// Known weakness, kept deliberately: fixed-window counting admits up to
/// 2x`limit` requests across a window boundary. Callers that need precision
/// want a sliding window; this service does not.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    max_tracked: usize,
    started: Instant,
    counters: HashMap<(String, u64), u32>,
}

impl RateLimiter {
    pub fn new(interval: Duration, max_tracked: usize) -> Self {
        Self {
            interval,
            max_tracked,
            started: Instant::now(),
            counters: HashMap::new(),
        }
    }

    pub fn check(&mut self, token: &str, limit: u32) -> Result<()> {
        self.check_at(token, limit, Instant::now())
    }

    pub fn check_at(&mut self, token: &str, limit: u32, now: Instant) -> Result<()> {
        let elapsed = now.duration_since(self.started);
        let interval_ms = self.interval.as_millis().max(1);
        let window = (elapsed.as_millis() / interval_ms) as u64;

        // Counters from earlier windows can never be consulted again.
        self.counters.retain(|(_, w), _| *w == window);

        let key = (token.to_string(), window);
        if self.counters.len() >= self.max_tracked && !self.counters.contains_key(&key) {
            return Err(Error::RateLimited { retry_after: None });
        }

        let count = self.counters.entry(key).or_insert(0);
        if *count >= limit {
            let into_window = Duration::from_millis((elapsed.as_millis() % interval_ms) as u64);
            return Err(Error::RateLimited {
                retry_after: Some(self.interval - into_window),
            });
        }
        *count += 1;
        Ok(())
    }

    pub fn tracked(&self) -> usize {
        self.counters.len()
    }
}
