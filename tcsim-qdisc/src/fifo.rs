use tcsim_common::{Backlog, QueueLimit, SimTime};
use tracing::debug;

use crate::{ConfigError, DropReason, PacketQueue, QueueDisc, QueueDiscCore, QueueItem, Verdict};

/// What a full FIFO does with an arriving packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Overflow {
    /// Drop the arriving packet.
    #[default]
    DropTail,
    /// Drop the oldest packets until the arriving one fits.
    DropHead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoConfig {
    pub limit: QueueLimit,
    pub overflow: Overflow,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self { limit: QueueLimit::Packets(1000), overflow: Overflow::DropTail }
    }
}

impl FifoConfig {
    pub fn with_limit(mut self, limit: QueueLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_overflow(mut self, overflow: Overflow) -> Self {
        self.overflow = overflow;
        self
    }
}

/// A single first-in first-out queue (`pfifo` with a packet limit, `bfifo` with a byte limit).
#[derive(Debug)]
pub struct Fifo {
    core: QueueDiscCore,
    overflow: Overflow,
    queue: PacketQueue,
}

impl Fifo {
    pub fn new(config: FifoConfig) -> Result<Self, ConfigError> {
        let kind = match config.limit {
            QueueLimit::Packets(_) => "pfifo",
            QueueLimit::Bytes(_) => "bfifo",
        };
        let fifo = Self {
            core: QueueDiscCore::new(kind, Some(config.limit)),
            overflow: config.overflow,
            queue: PacketQueue::new(),
        };
        fifo.check_config()?;
        debug!(kind, limit = %config.limit, overflow = ?config.overflow, "created fifo");
        Ok(fifo)
    }

    /// Returns `true` if a packet of `len` bytes would fit once the queue is empty.
    fn fits_when_empty(&self, len: u64) -> bool {
        let total = self.core.backlog();
        let queued = self.queue.backlog();
        let floor = Backlog::new(total.packets - queued.packets, total.bytes - queued.bytes);
        self.core.limit().map_or(true, |limit| limit.admits(floor, len))
    }
}

impl QueueDisc for Fifo {
    fn core(&self) -> &QueueDiscCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut QueueDiscCore {
        &mut self.core
    }

    fn do_enqueue(&mut self, item: QueueItem, now: SimTime) -> Verdict {
        let len = item.wire_len();
        if !self.core.fits(len) {
            if self.overflow == Overflow::DropTail || !self.fits_when_empty(len) {
                return self.core.drop_before_enqueue(&item, DropReason::CapacityExceeded, now);
            }
            while !self.core.fits(len) {
                let Some(head) = self.queue.pop_front() else { break };
                self.core.drop_after_enqueue(head, DropReason::CapacityExceeded, now);
            }
        }

        self.queue.push_back(item);
        Verdict::Accepted
    }

    fn do_dequeue(&mut self, _now: SimTime) -> Option<QueueItem> {
        self.queue.pop_front()
    }

    fn inner_backlog(&self) -> Backlog {
        self.queue.backlog()
    }

    fn check_config(&self) -> Result<(), ConfigError> {
        self.core.check_limit()
    }

    fn do_reset(&mut self, _now: SimTime) {
        self.queue.clear();
    }
}
