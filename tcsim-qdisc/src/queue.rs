use std::{collections::VecDeque, time::Duration};

use derive_more::{Deref, DerefMut};
use tcsim_common::{Backlog, SimTime};
use tcsim_packet::Packet;

/// A queued packet together with the time it was admitted.
#[derive(Debug, Clone, PartialEq, Eq, Deref, DerefMut)]
pub struct QueueItem {
    #[deref]
    #[deref_mut]
    pub packet: Packet,
    pub enqueued_at: SimTime,
}

impl QueueItem {
    #[inline]
    pub fn new(packet: Packet, enqueued_at: SimTime) -> Self {
        Self { packet, enqueued_at }
    }

    /// Time spent queued as of `now`.
    #[inline]
    pub fn sojourn(&self, now: SimTime) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    #[inline]
    pub fn into_packet(self) -> Packet {
        self.packet
    }
}

/// A FIFO of packets that keeps its packet and byte counts in step with its contents.
#[derive(Debug, Default)]
pub struct PacketQueue {
    items: VecDeque<QueueItem>,
    backlog: Backlog,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn backlog(&self) -> Backlog {
        self.backlog
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push_back(&mut self, item: QueueItem) {
        self.backlog.add(item.wire_len());
        self.items.push_back(item);
        self.check();
    }

    pub fn push_front(&mut self, item: QueueItem) {
        self.backlog.add(item.wire_len());
        self.items.push_front(item);
        self.check();
    }

    pub fn pop_front(&mut self) -> Option<QueueItem> {
        let item = self.items.pop_front()?;
        self.backlog.remove(item.wire_len());
        self.check();
        Some(item)
    }

    pub fn pop_back(&mut self) -> Option<QueueItem> {
        let item = self.items.pop_back()?;
        self.backlog.remove(item.wire_len());
        self.check();
        Some(item)
    }

    #[inline]
    pub fn front(&self) -> Option<&QueueItem> {
        self.items.front()
    }

    /// Removes every packet, returning them oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = QueueItem> + '_ {
        self.backlog = Backlog::EMPTY;
        self.items.drain(..)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.backlog = Backlog::EMPTY;
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    #[inline]
    fn check(&self) {
        assert_eq!(self.backlog.packets, self.items.len() as u64, "queue packet count out of step");
        assert!(
            !self.items.is_empty() || self.backlog.bytes == 0,
            "empty queue still holds {} bytes",
            self.backlog.bytes
        );
    }
}
