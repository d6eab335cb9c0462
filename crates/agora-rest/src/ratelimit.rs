//! A lightweight sliding-window rate limiter guarding `/register` and
//! `/send`, ported from the teacher's endpoint-category limiter: same
//! smooth prev/curr window blend, same poisoned-lock recovery, same
//! periodic eviction to bound memory.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitCategory {
    Register,
    Send,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(pub IpAddr, pub RateLimitCategory);

#[derive(Debug, Clone)]
struct WindowState {
    prev_count: u32,
    curr_count: u32,
    window_start: Instant,
}

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct RateLimiter {
    state: Arc<Mutex<HashMap<RateLimitKey, WindowState>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns `true` if the request identified by `key` is within
    /// `limit` requests per minute.
    pub fn check(&self, key: RateLimitKey, limit: u32) -> bool {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("rate limiter lock poisoned, recovering with stale state");
                poisoned.into_inner()
            }
        };
        let now = Instant::now();

        if state.len() > 10_000 {
            state.retain(|_, ws| now.duration_since(ws.window_start) <= RATE_LIMIT_WINDOW * 2);
        }

        let ws = state.entry(key).or_insert(WindowState {
            prev_count: 0,
            curr_count: 0,
            window_start: now,
        });

        let elapsed = now.duration_since(ws.window_start);
        if elapsed > RATE_LIMIT_WINDOW {
            ws.prev_count = ws.curr_count;
            ws.curr_count = 0;
            ws.window_start = now;
        }

        ws.curr_count += 1;

        let elapsed_frac = now.duration_since(ws.window_start).as_secs_f64() / RATE_LIMIT_WINDOW.as_secs_f64();
        let prev_weight = 1.0 - elapsed_frac.min(1.0);
        let effective = (ws.prev_count as f64 * prev_weight) + ws.curr_count as f64;

        effective <= limit as f64
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_within_limit_then_denies() {
        let limiter = RateLimiter::new();
        let key = RateLimitKey("127.0.0.1".parse().unwrap(), RateLimitCategory::Send);
        for _ in 0..5 {
            assert!(limiter.check(key.clone(), 5));
        }
        assert!(!limiter.check(key, 5));
    }

    #[test]
    fn categories_are_independent() {
        let limiter = RateLimiter::new();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        let register_key = RateLimitKey(ip, RateLimitCategory::Register);
        let send_key = RateLimitKey(ip, RateLimitCategory::Send);

        for _ in 0..3 {
            assert!(limiter.check(register_key.clone(), 3));
        }
        assert!(!limiter.check(register_key, 3));
        assert!(limiter.check(send_key, 3));
    }
}
