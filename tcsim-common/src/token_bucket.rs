use std::time::Duration;

use crate::{constants::NANOS_PER_SEC, DataRate, SimTime};

/// Token bucket with exact integer accounting.
///
/// Tokens are kept in byte-nanoseconds (bytes scaled by 10^9), so a refill of `rate` bytes per
/// second over `elapsed` nanoseconds is a plain multiplication with no rounding. The bucket never
/// goes negative and never holds more than its burst size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    /// Fill rate in bytes per second.
    rate: u64,
    /// Capacity, scaled.
    capacity: u128,
    /// Current tokens, scaled.
    tokens: u128,
    last_refill: SimTime,
}

const SCALE: u128 = NANOS_PER_SEC as u128;

impl TokenBucket {
    /// Creates a bucket that fills at `rate`, holds at most `burst` bytes and starts with
    /// `initial` bytes worth of tokens (clamped to `burst`).
    pub fn new(rate: DataRate, burst: u64, initial: u64, now: SimTime) -> Self {
        let capacity = burst as u128 * SCALE;
        Self {
            rate: rate.bytes_per_sec(),
            capacity,
            tokens: (initial as u128 * SCALE).min(capacity),
            last_refill: now,
        }
    }

    /// The bucket size in bytes.
    pub fn burst(&self) -> u64 {
        (self.capacity / SCALE) as u64
    }

    /// Adds the tokens accumulated since the last refill.
    pub fn refill(&mut self, now: SimTime) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = (now - self.last_refill).as_nanos();
        self.tokens = (self.tokens + self.rate as u128 * elapsed).min(self.capacity);
        self.last_refill = now;
    }

    /// Whole bytes available at `now`.
    pub fn available(&mut self, now: SimTime) -> u64 {
        self.refill(now);
        (self.tokens / SCALE) as u64
    }

    /// Takes `bytes` tokens if the bucket holds at least that many at `now`.
    pub fn try_consume(&mut self, bytes: u64, now: SimTime) -> bool {
        self.refill(now);
        let needed = bytes as u128 * SCALE;
        if self.tokens < needed {
            return false;
        }
        self.tokens -= needed;
        true
    }

    /// How long until `bytes` tokens are available, measured from the last refill.
    ///
    /// Returns `None` if the bucket can never hold that many tokens, or it never refills.
    pub fn time_until(&self, bytes: u64) -> Option<Duration> {
        let needed = bytes as u128 * SCALE;
        if needed > self.capacity {
            return None;
        }
        if self.tokens >= needed {
            return Some(Duration::ZERO);
        }
        if self.rate == 0 {
            return None;
        }
        let nanos = (needed - self.tokens).div_ceil(self.rate as u128);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    /// Refills at `now`, then reports when `bytes` tokens will be available.
    pub fn ready_at(&mut self, bytes: u64, now: SimTime) -> Option<SimTime> {
        self.refill(now);
        self.time_until(bytes).map(|wait| now + wait)
    }

    /// Resets the bucket to `initial` bytes worth of tokens.
    pub fn reset(&mut self, initial: u64, now: SimTime) {
        self.tokens = (initial as u128 * SCALE).min(self.capacity);
        self.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refills_at_rate_and_caps_at_burst() {
        let rate = DataRate::from_bytes_per_sec(1_000_000);
        let mut bucket = TokenBucket::new(rate, 10_000, 0, SimTime::ZERO);

        assert!(!bucket.try_consume(1_000, SimTime::from_micros(999)));
        assert!(bucket.try_consume(1_000, SimTime::from_millis(1)));
        assert_eq!(bucket.available(SimTime::from_millis(1)), 0);

        // a full second refills far more than the burst
        assert_eq!(bucket.available(SimTime::from_millis(1_001)), 10_000);
    }

    #[test]
    fn time_until_is_exact() {
        let rate = DataRate::from_bytes_per_sec(1_000_000);
        let mut bucket = TokenBucket::new(rate, 5_000, 0, SimTime::ZERO);

        assert_eq!(bucket.time_until(1_000), Some(Duration::from_millis(1)));
        assert_eq!(bucket.time_until(5_001), None);
        let ready = bucket.ready_at(500, SimTime::from_micros(250));
        assert_eq!(ready, Some(SimTime::from_micros(500)));

        bucket.reset(5_000, SimTime::from_millis(1));
        assert_eq!(bucket.time_until(5_000), Some(Duration::ZERO));
    }
}
