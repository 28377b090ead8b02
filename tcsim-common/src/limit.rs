use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::constants::{GiB, KiB, MiB};

/// Occupancy of a queue, in packets and bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Backlog {
    pub packets: u64,
    pub bytes: u64,
}

impl Backlog {
    pub const EMPTY: Self = Self { packets: 0, bytes: 0 };

    pub const fn new(packets: u64, bytes: u64) -> Self {
        Self { packets, bytes }
    }

    pub const fn is_empty(&self) -> bool {
        self.packets == 0
    }

    /// Accounts for one more packet of `len` bytes.
    #[inline]
    pub fn add(&mut self, len: u64) {
        self.packets += 1;
        self.bytes += len;
    }

    /// Accounts for one packet of `len` bytes leaving.
    ///
    /// # Panics
    ///
    /// Panics if the backlog would go negative, which means a packet was removed twice.
    #[inline]
    pub fn remove(&mut self, len: u64) {
        assert!(
            self.packets >= 1 && self.bytes >= len,
            "backlog underflow: removing {len} bytes from {self:?}"
        );
        self.packets -= 1;
        self.bytes -= len;
    }
}

impl std::ops::Add for Backlog {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self { packets: self.packets + rhs.packets, bytes: self.bytes + rhs.bytes }
    }
}

impl std::iter::Sum for Backlog {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::EMPTY, |acc, b| acc + b)
    }
}

/// The capacity of a queue discipline: either a packet count or a byte count, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueLimit {
    Packets(u64),
    Bytes(u64),
}

impl QueueLimit {
    /// The configured value, regardless of unit.
    pub const fn value(&self) -> u64 {
        match self {
            Self::Packets(n) | Self::Bytes(n) => *n,
        }
    }

    /// Returns `true` if `backlog` plus one more packet of `len` bytes stays within the limit.
    #[inline]
    pub const fn admits(&self, backlog: Backlog, len: u64) -> bool {
        match self {
            Self::Packets(max) => backlog.packets < *max,
            Self::Bytes(max) => backlog.bytes + len <= *max,
        }
    }

    /// Returns `true` if `backlog` is above the limit.
    #[inline]
    pub const fn exceeded_by(&self, backlog: Backlog) -> bool {
        match self {
            Self::Packets(max) => backlog.packets > *max,
            Self::Bytes(max) => backlog.bytes > *max,
        }
    }
}

impl fmt::Display for QueueLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Packets(n) => write!(f, "{n}p"),
            Self::Bytes(n) => write!(f, "{n}B"),
        }
    }
}

/// Error returned when parsing a [`QueueLimit`] from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LimitParseError {
    #[error("empty queue limit")]
    Empty,
    #[error("invalid number in queue limit {0:?}")]
    InvalidNumber(String),
    #[error("unknown unit {unit:?} in queue limit {input:?}")]
    UnknownUnit { input: String, unit: String },
    #[error("queue limit {0:?} overflows")]
    Overflow(String),
}

impl FromStr for QueueLimit {
    type Err = LimitParseError;

    /// Parses the `<n><unit>` notation: `p` for packets, `B`, `KB`, `MB`, `GB` for decimal bytes
    /// and `KiB`, `MiB`, `GiB` for binary bytes. For example `"1000p"` or `"3KB"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LimitParseError::Empty);
        }

        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (number, unit) = s.split_at(split);
        let value: u64 =
            number.parse().map_err(|_| LimitParseError::InvalidNumber(s.to_string()))?;

        let scale = match unit {
            "p" => return Ok(Self::Packets(value)),
            "B" => 1,
            "KB" => 1_000,
            "MB" => 1_000_000,
            "GB" => 1_000_000_000,
            "KiB" => KiB,
            "MiB" => MiB,
            "GiB" => GiB,
            other => {
                return Err(LimitParseError::UnknownUnit {
                    input: s.to_string(),
                    unit: other.to_string(),
                })
            }
        };

        value
            .checked_mul(scale)
            .map(Self::Bytes)
            .ok_or_else(|| LimitParseError::Overflow(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_limits() {
        assert_eq!("1000p".parse(), Ok(QueueLimit::Packets(1000)));
        assert_eq!("3KB".parse(), Ok(QueueLimit::Bytes(3_000)));
        assert_eq!("64KiB".parse(), Ok(QueueLimit::Bytes(64 * 1024)));
        assert_eq!("1500B".parse(), Ok(QueueLimit::Bytes(1500)));
        assert_eq!("".parse::<QueueLimit>(), Err(LimitParseError::Empty));
        assert!(matches!("p".parse::<QueueLimit>(), Err(LimitParseError::InvalidNumber(_))));
        assert!(matches!("10Q".parse::<QueueLimit>(), Err(LimitParseError::UnknownUnit { .. })));
    }

    #[test]
    fn admits_respects_unit() {
        let backlog = Backlog::new(9, 9_000);
        assert!(QueueLimit::Packets(10).admits(backlog, 1_500));
        assert!(!QueueLimit::Packets(9).admits(backlog, 1));
        assert!(QueueLimit::Bytes(10_500).admits(backlog, 1_500));
        assert!(!QueueLimit::Bytes(10_499).admits(backlog, 1_500));
    }

    #[test]
    #[should_panic(expected = "backlog underflow")]
    fn removing_from_empty_backlog_panics() {
        let mut backlog = Backlog::EMPTY;
        backlog.remove(1);
    }
}
