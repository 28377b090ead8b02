use std::fmt;

use tcsim_aqm::AqmReason;
use tcsim_common::Backlog;

/// Why a packet was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// The queue discipline was full.
    CapacityExceeded,
    /// A random early drop by an AQM law.
    AqmProbabilistic,
    /// A drop an AQM law was forced into.
    AqmForced,
    /// Pushed out of the fattest flow to make room for another flow.
    Overlimit,
    /// The flow table was full and no idle flow could be evicted.
    FlowLimit,
    /// Larger than the shaper can ever send.
    Oversized,
}

impl DropReason {
    /// Number of drop reasons.
    pub const COUNT: usize = 6;

    /// Every drop reason, in counter order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::CapacityExceeded,
        Self::AqmProbabilistic,
        Self::AqmForced,
        Self::Overlimit,
        Self::FlowLimit,
        Self::Oversized,
    ];

    const fn index(self) -> usize {
        self as usize
    }

    /// Human-readable name, as used in traces.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CapacityExceeded => "capacity exceeded",
            Self::AqmProbabilistic => "aqm probabilistic drop",
            Self::AqmForced => "aqm forced drop",
            Self::Overlimit => "overlimit",
            Self::FlowLimit => "flow limit",
            Self::Oversized => "oversized",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AqmReason> for DropReason {
    fn from(reason: AqmReason) -> Self {
        match reason {
            AqmReason::Probabilistic => Self::AqmProbabilistic,
            AqmReason::Forced => Self::AqmForced,
        }
    }
}

/// Whether a drop happened before the packet was admitted, or to a packet already queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropPhase {
    /// The arriving packet was refused.
    BeforeEnqueue,
    /// A queued packet was dropped at dequeue or pushed out.
    AfterEnqueue,
}

/// Why a packet was congestion-marked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkReason {
    /// A random early mark by an AQM law.
    AqmProbabilistic,
    /// A mark an AQM law was forced into.
    AqmForced,
    /// The queue was above the signaling threshold.
    CongestionThreshold,
}

impl MarkReason {
    /// Number of mark reasons.
    pub const COUNT: usize = 3;

    const fn index(self) -> usize {
        self as usize
    }
}

impl From<AqmReason> for MarkReason {
    fn from(reason: AqmReason) -> Self {
        match reason {
            AqmReason::Probabilistic => Self::AqmProbabilistic,
            AqmReason::Forced => Self::AqmForced,
        }
    }
}

/// A packet and byte count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    pub packets: u64,
    pub bytes: u64,
}

impl Counter {
    #[inline]
    fn increment(&mut self, bytes: u64) {
        self.packets += 1;
        self.bytes += bytes;
    }

    const fn saturating_sub(self, rhs: Self) -> Self {
        Self {
            packets: self.packets.saturating_sub(rhs.packets),
            bytes: self.bytes.saturating_sub(rhs.bytes),
        }
    }

    fn sum<'a>(counters: impl IntoIterator<Item = &'a Self>) -> Self {
        counters.into_iter().fold(Self::default(), |acc, c| Self {
            packets: acc.packets + c.packets,
            bytes: acc.bytes + c.bytes,
        })
    }
}

/// Cumulative statistics of a queue discipline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDiscStats {
    enqueued: Counter,
    dequeued: Counter,
    requeued: Counter,
    dropped_before_enqueue: [Counter; DropReason::COUNT],
    dropped_after_enqueue: [Counter; DropReason::COUNT],
    marked: [Counter; MarkReason::COUNT],
}

impl QueueDiscStats {
    #[inline]
    pub(crate) fn increment_enqueued(&mut self, bytes: u64) {
        self.enqueued.increment(bytes);
    }

    #[inline]
    pub(crate) fn increment_dequeued(&mut self, bytes: u64) {
        self.dequeued.increment(bytes);
    }

    #[inline]
    pub(crate) fn increment_requeued(&mut self, bytes: u64) {
        self.requeued.increment(bytes);
    }

    #[inline]
    pub(crate) fn increment_dropped(&mut self, phase: DropPhase, reason: DropReason, bytes: u64) {
        match phase {
            DropPhase::BeforeEnqueue => {
                self.dropped_before_enqueue[reason.index()].increment(bytes)
            }
            DropPhase::AfterEnqueue => self.dropped_after_enqueue[reason.index()].increment(bytes),
        }
    }

    #[inline]
    pub(crate) fn increment_marked(&mut self, reason: MarkReason, bytes: u64) {
        self.marked[reason.index()].increment(bytes);
    }

    /// Folds the after-enqueue drops and the marks of a child discipline into these stats.
    pub(crate) fn absorb_child(&mut self, delta: &Self) {
        for (own, child) in self.dropped_after_enqueue.iter_mut().zip(&delta.dropped_after_enqueue)
        {
            own.packets += child.packets;
            own.bytes += child.bytes;
        }
        for (own, child) in self.marked.iter_mut().zip(&delta.marked) {
            own.packets += child.packets;
            own.bytes += child.bytes;
        }
    }

    /// The change in every counter since `earlier`.
    pub fn delta_since(&self, earlier: &Self) -> Self {
        let sub = |a: &[Counter], b: &[Counter], out: &mut [Counter]| {
            for ((out, a), b) in out.iter_mut().zip(a).zip(b) {
                *out = a.saturating_sub(*b);
            }
        };

        let mut delta = Self {
            enqueued: self.enqueued.saturating_sub(earlier.enqueued),
            dequeued: self.dequeued.saturating_sub(earlier.dequeued),
            requeued: self.requeued.saturating_sub(earlier.requeued),
            ..Self::default()
        };
        sub(
            &self.dropped_before_enqueue,
            &earlier.dropped_before_enqueue,
            &mut delta.dropped_before_enqueue,
        );
        sub(
            &self.dropped_after_enqueue,
            &earlier.dropped_after_enqueue,
            &mut delta.dropped_after_enqueue,
        );
        sub(&self.marked, &earlier.marked, &mut delta.marked);
        delta
    }

    /// Packets accepted by the discipline.
    #[inline]
    pub const fn enqueued(&self) -> Counter {
        self.enqueued
    }

    /// Packets handed to the transmitter.
    #[inline]
    pub const fn dequeued(&self) -> Counter {
        self.dequeued
    }

    /// Packets handed back by the transmitter.
    #[inline]
    pub const fn requeued(&self) -> Counter {
        self.requeued
    }

    #[inline]
    pub const fn dropped_before_enqueue(&self, reason: DropReason) -> Counter {
        self.dropped_before_enqueue[reason.index()]
    }

    #[inline]
    pub const fn dropped_after_enqueue(&self, reason: DropReason) -> Counter {
        self.dropped_after_enqueue[reason.index()]
    }

    /// Drops for `reason` in either phase.
    pub fn dropped(&self, reason: DropReason) -> Counter {
        let i = reason.index();
        Counter::sum([&self.dropped_before_enqueue[i], &self.dropped_after_enqueue[i]])
    }

    pub fn total_dropped_before_enqueue(&self) -> Counter {
        Counter::sum(&self.dropped_before_enqueue)
    }

    pub fn total_dropped_after_enqueue(&self) -> Counter {
        Counter::sum(&self.dropped_after_enqueue)
    }

    pub fn total_dropped(&self) -> Counter {
        Counter::sum(self.dropped_before_enqueue.iter().chain(&self.dropped_after_enqueue))
    }

    #[inline]
    pub const fn marked(&self, reason: MarkReason) -> Counter {
        self.marked[reason.index()]
    }

    pub fn total_marked(&self) -> Counter {
        Counter::sum(&self.marked)
    }

    /// The backlog these counters imply: everything accepted or requeued that has neither been
    /// dequeued nor dropped.
    pub fn implied_backlog(&self) -> Backlog {
        let after = self.total_dropped_after_enqueue();
        let packets = self.enqueued.packets + self.requeued.packets;
        let bytes = self.enqueued.bytes + self.requeued.bytes;
        Backlog::new(
            packets.saturating_sub(self.dequeued.packets + after.packets),
            bytes.saturating_sub(self.dequeued.bytes + after.bytes),
        )
    }
}
