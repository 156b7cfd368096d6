//! Inter-request jitter and retry backoff.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use gleaner_core::delay::{DelayPolicy, backoff_delay};
//!
//! let policy = DelayPolicy::new(Duration::from_secs(1), Duration::from_secs(3));
//! let d = policy.jitter();
//! assert!(d >= Duration::from_secs(1) && d <= Duration::from_secs(3));
//!
//! assert_eq!(backoff_delay(Duration::from_secs(1), 3), Duration::from_secs(8));
//! ```

use std::time::Duration;

use rand::Rng;

/// Uniform random delay in `[min, max]`. Bounds are swapped if reversed.
pub fn jitter_delay(min: Duration, max: Duration) -> Duration {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    if lo == hi {
        return lo;
    }
    let lo_ns = lo.as_nanos().min(u64::MAX as u128) as u64;
    let hi_ns = hi.as_nanos().min(u64::MAX as u128) as u64;
    Duration::from_nanos(rand::rng().random_range(lo_ns..=hi_ns))
}

/// `base * 2^attempt`, saturating at `Duration::MAX` instead of overflowing.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return Duration::ZERO;
    }
    let Some(nanos) = 1u128
        .checked_shl(attempt)
        .and_then(|factor| base.as_nanos().checked_mul(factor))
    else {
        return Duration::MAX;
    };
    match u64::try_from(nanos / 1_000_000_000) {
        Ok(secs) => Duration::new(secs, (nanos % 1_000_000_000) as u32),
        Err(_) => Duration::MAX,
    }
}

/// Delay configuration for one scraper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayPolicy {
    /// Range for the jitter applied before every request.
    pub min_delay: Duration,
    pub max_delay: Duration,

    /// Base of the exponential backoff between retries.
    pub backoff_base: Duration,

    /// Flat wait after an HTTP 429, independent of the backoff.
    pub rate_limit_cooldown: Duration,
}

impl DelayPolicy {
    /// Jitter range `[min, max]` with default backoff and cooldown.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// No delays at all. Mostly for tests and local targets.
    pub fn none() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_base: Duration::ZERO,
            rate_limit_cooldown: Duration::ZERO,
        }
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    pub fn jitter(&self) -> Duration {
        jitter_delay(self.min_delay, self.max_delay)
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(self.backoff_base, attempt)
    }
}

impl Default for DelayPolicy {
    /// 1-3 s jitter, 1 s backoff base, 60 s rate-limit cooldown.
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            backoff_base: Duration::from_secs(1),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}
