use std::{fmt, ops::BitOr};

use tcsim_common::DataRate;

/// Flag bits of the Bolt header.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BoltFlags(u8);

impl BoltFlags {
    pub const EMPTY: Self = Self(0);
    /// The packet carries message data.
    pub const DATA: Self = Self(1 << 0);
    /// First packet of a message.
    pub const FIRST: Self = Self(1 << 1);
    /// Last packet of a message. The sender is about to stop, freeing capacity for others.
    pub const LAST: Self = Self(1 << 2);
    /// The sender asks to grow its window.
    pub const INCWIN: Self = Self(1 << 3);
    /// A queue on the path already sent a congestion signal for this packet.
    pub const DECWIN: Self = Self(1 << 4);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for BoltFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for BoltFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(BoltFlags, &str); 5] = [
            (BoltFlags::DATA, "DATA"),
            (BoltFlags::FIRST, "FIRST"),
            (BoltFlags::LAST, "LAST"),
            (BoltFlags::INCWIN, "INCWIN"),
            (BoltFlags::DECWIN, "DECWIN"),
        ];

        let mut set = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                set.entry(&format_args!("{name}"));
            }
        }
        set.finish()
    }
}

/// The subset of the Bolt header a switch queue reads and rewrites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BoltHeader {
    pub flags: BoltFlags,
    /// Largest queue occupancy, in bytes, seen by the packet so far along its path.
    pub queue_occupancy: u64,
    /// Rate of the link behind the queue that reported `queue_occupancy`.
    pub link_rate: DataRate,
}

impl BoltHeader {
    pub const fn new(flags: BoltFlags) -> Self {
        Self { flags, queue_occupancy: 0, link_rate: DataRate::from_bps(0) }
    }

    /// Returns `true` for data packets.
    pub const fn is_data(&self) -> bool {
        self.flags.contains(BoltFlags::DATA)
    }

    /// Records the occupancy of a queue, keeping the largest seen along the path.
    pub fn stamp(&mut self, occupancy: u64, link_rate: DataRate) {
        if occupancy >= self.queue_occupancy {
            self.queue_occupancy = occupancy;
            self.link_rate = link_rate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_set_and_clear() {
        let mut flags = BoltFlags::DATA | BoltFlags::LAST;
        assert!(flags.contains(BoltFlags::DATA));
        assert!(!flags.contains(BoltFlags::INCWIN));

        flags.insert(BoltFlags::INCWIN);
        flags.remove(BoltFlags::LAST);
        assert_eq!(flags, BoltFlags::DATA | BoltFlags::INCWIN);
        assert_eq!(format!("{flags:?}"), "{DATA, INCWIN}");
    }

    #[test]
    fn stamp_keeps_maximum() {
        let mut header = BoltHeader::new(BoltFlags::DATA);
        header.stamp(4_000, DataRate::from_gbps(10));
        header.stamp(1_000, DataRate::from_gbps(100));
        assert_eq!(header.queue_occupancy, 4_000);
        assert_eq!(header.link_rate, DataRate::from_gbps(10));
    }
}
