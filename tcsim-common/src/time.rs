use std::{
    fmt,
    ops::{Add, AddAssign, Sub},
    time::Duration,
};

use crate::constants::NANOS_PER_SEC;

/// A point on the simulation clock, with nanosecond resolution.
///
/// The clock is owned by the event scheduler and handed to every queue discipline call. It only
/// moves forward; subtracting a later time from an earlier one saturates at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(u64);

impl SimTime {
    /// The start of the simulation.
    pub const ZERO: Self = Self(0);

    /// Creates a time from nanoseconds since the simulation start.
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a time from microseconds since the simulation start.
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros * 1_000)
    }

    /// Creates a time from milliseconds since the simulation start.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Nanoseconds since the simulation start.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time elapsed since `earlier`, or zero if `earlier` is in the future.
    pub const fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for SimTime {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        let nanos = u64::try_from(rhs.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }
}

impl AddAssign<Duration> for SimTime {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub for SimTime {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

impl From<Duration> for SimTime {
    fn from(value: Duration) -> Self {
        Self::ZERO + value
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}.{:09}s", self.0 / NANOS_PER_SEC, self.0 % NANOS_PER_SEC)
    }
}

/// A link or shaping rate, in bits per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataRate(u64);

impl DataRate {
    /// Creates a rate from bits per second.
    pub const fn from_bps(bps: u64) -> Self {
        Self(bps)
    }

    /// Creates a rate from megabits per second.
    pub const fn from_mbps(mbps: u64) -> Self {
        Self(mbps * 1_000_000)
    }

    /// Creates a rate from gigabits per second.
    pub const fn from_gbps(gbps: u64) -> Self {
        Self(gbps * 1_000_000_000)
    }

    /// Creates a rate from bytes per second.
    pub const fn from_bytes_per_sec(bytes: u64) -> Self {
        Self(bytes * 8)
    }

    /// The rate in bits per second.
    pub const fn bps(self) -> u64 {
        self.0
    }

    /// The rate in bytes per second, rounded down.
    pub const fn bytes_per_sec(self) -> u64 {
        self.0 / 8
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Serialization time of `bytes` at this rate, rounded up to the next nanosecond.
    ///
    /// Returns [`Duration::MAX`] for a zero rate.
    pub fn tx_time(self, bytes: u64) -> Duration {
        if self.0 == 0 {
            return Duration::MAX;
        }
        let bits = bytes as u128 * 8 * NANOS_PER_SEC as u128;
        let nanos = bits.div_ceil(self.0 as u128);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Number of whole bytes this rate carries in `elapsed`.
    pub fn bytes_in(self, elapsed: Duration) -> u64 {
        let bits = self.0 as u128 * elapsed.as_nanos();
        u64::try_from(bits / (8 * NANOS_PER_SEC as u128)).unwrap_or(u64::MAX)
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            bps if bps >= 1_000_000_000 && bps % 1_000_000_000 == 0 => {
                write!(f, "{}Gbps", bps / 1_000_000_000)
            }
            bps if bps >= 1_000_000 && bps % 1_000_000 == 0 => write!(f, "{}Mbps", bps / 1_000_000),
            bps => write!(f, "{bps}bps"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_time_arithmetic_saturates() {
        let t = SimTime::from_millis(5);
        assert_eq!(t + Duration::from_millis(1), SimTime::from_micros(6_000));
        assert_eq!(SimTime::ZERO - t, Duration::ZERO);
        assert_eq!(t - SimTime::from_millis(2), Duration::from_millis(3));
        assert_eq!(t.to_string(), "+0.005000000s");
    }

    #[test]
    fn data_rate_conversions() {
        let rate = DataRate::from_bytes_per_sec(1_000_000);
        assert_eq!(rate.tx_time(1_000), Duration::from_millis(1));
        assert_eq!(rate.bytes_in(Duration::from_millis(3)), 3_000);

        let ten_gig = DataRate::from_gbps(10);
        assert_eq!(ten_gig.tx_time(1_250), Duration::from_nanos(1_000));
        assert_eq!(ten_gig.to_string(), "10Gbps");
        assert_eq!(DataRate::from_bps(0).tx_time(1), Duration::MAX);
    }
}
