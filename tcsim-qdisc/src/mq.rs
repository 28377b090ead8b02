use tcsim_common::{Backlog, SimTime};
use tcsim_packet::Packet;
use tracing::debug;

use crate::{
    disc::with_child, Classifier, ConfigError, DropPhase, Fifo, FifoConfig, QueueDisc,
    QueueDiscCore, QueueItem, TxQueue, Verdict,
};

/// One child discipline per transmit queue of a multi-queue device.
///
/// Packets go to the child of the transmit queue the device selected. The device normally pulls
/// each queue on its own through [`Mq::dequeue_queue`]; a plain dequeue serves the children in
/// turn.
#[derive(Debug)]
pub struct Mq {
    core: QueueDiscCore,
    classifier: TxQueue,
    children: Vec<Box<dyn QueueDisc>>,
    next: usize,
}

impl Mq {
    /// Creates a discipline with a default FIFO on each of `queues` transmit queues.
    pub fn new(queues: u16) -> Result<Self, ConfigError> {
        let children = (0..queues)
            .map(|_| {
                Fifo::new(FifoConfig::default()).map(|fifo| Box::new(fifo) as Box<dyn QueueDisc>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::with_children(children)
    }

    pub fn with_children(children: Vec<Box<dyn QueueDisc>>) -> Result<Self, ConfigError> {
        let queues = u16::try_from(children.len()).unwrap_or(u16::MAX);
        let mq = Self {
            core: QueueDiscCore::new("mq", None),
            classifier: TxQueue::new(queues),
            children,
            next: 0,
        };
        mq.check_config()?;
        debug!(queues, "created mq");
        Ok(mq)
    }

    pub fn queues(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, queue: usize) -> &dyn QueueDisc {
        self.children[queue].as_ref()
    }

    /// Takes the next packet of transmit queue `queue`. A peeked or requeued packet that
    /// belongs to `queue` goes first.
    ///
    /// # Panics
    ///
    /// Panics if `queue` is out of range.
    pub fn dequeue_queue(&mut self, queue: usize, now: SimTime) -> Option<Packet> {
        let old = self.core.backlog();
        let classifier = self.classifier;
        let peeked =
            self.core.take_requeued_if(|item| classifier.classify(item) as usize == queue);
        let packet = match peeked {
            Some(item) => Some(item.into_packet()),
            None => with_child(&mut self.core, self.children[queue].as_mut(), |child| {
                child.dequeue(now)
            }),
        };
        if let Some(packet) = &packet {
            self.core.record_dequeue(packet.wire_len());
        }
        let inner = self.inner_backlog();
        self.core.settle(old, inner, now);
        packet
    }
}

impl QueueDisc for Mq {
    fn core(&self) -> &QueueDiscCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut QueueDiscCore {
        &mut self.core
    }

    fn do_enqueue(&mut self, item: QueueItem, now: SimTime) -> Verdict {
        let queue = self.classifier.classify(&item) as usize;
        let (uid, len) = (item.uid, item.wire_len());
        let verdict = with_child(&mut self.core, self.children[queue].as_mut(), |child| {
            child.enqueue(item.into_packet(), now)
        });
        if let Verdict::Dropped(reason) = verdict {
            self.core.record_drop(uid, len, reason, DropPhase::BeforeEnqueue, now);
        }
        verdict
    }

    fn do_dequeue(&mut self, now: SimTime) -> Option<QueueItem> {
        let queues = self.children.len();
        for offset in 0..queues {
            let queue = (self.next + offset) % queues;
            let packet = with_child(&mut self.core, self.children[queue].as_mut(), |child| {
                child.dequeue(now)
            });
            if let Some(packet) = packet {
                self.next = (queue + 1) % queues;
                return Some(QueueItem::new(packet, now));
            }
        }
        None
    }

    fn inner_backlog(&self) -> Backlog {
        self.children.iter().map(|child| child.backlog()).sum()
    }

    fn check_config(&self) -> Result<(), ConfigError> {
        if self.children.is_empty() {
            return Err(ConfigError::NoBands { kind: "mq" });
        }
        self.children.iter().try_for_each(|child| child.check_config())
    }

    fn do_reset(&mut self, now: SimTime) {
        self.next = 0;
        for child in &mut self.children {
            child.reset(now);
        }
    }

    fn next_due(&self) -> Option<SimTime> {
        self.children.iter().filter_map(|child| child.next_tick()).map(|tick| tick.due).min()
    }

    fn on_tick(&mut self, now: SimTime) {
        for child in &mut self.children {
            if let Some(tick) = child.next_tick().filter(|tick| tick.due <= now) {
                with_child(&mut self.core, child.as_mut(), |child| child.tick(tick, now));
            }
        }
    }

    fn next_wakeup(&self) -> Option<SimTime> {
        self.children.iter().filter_map(|child| child.next_wakeup()).min()
    }
}
