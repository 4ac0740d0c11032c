use std::time::Instant;

use parking_lot::Mutex;

/// Token-bucket rate limiter. `try_acquire` never blocks; callers that
/// need to wait sleep themselves and try again. Shareable process-wide
/// behind an `Arc`.
pub struct RateLimiter {
    requests_per_minute: u32,
    burst: u32,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        let burst = burst.max(1);
        Self {
            requests_per_minute,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available. Refill is continuous from elapsed
    /// time, clamped to the burst capacity.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token count after refill. Useful for logging.
    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens as u32
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed();
        let refilled = elapsed.as_secs_f64() * (self.requests_per_minute as f64 / 60.0);
        if refilled > 0.0 {
            state.tokens = (state.tokens + refilled).min(self.burst as f64);
            state.last_refill = Instant::now();
        }
    }
}
