use std::fmt;

use tcsim_common::{Backlog, Observers, QueueLimit, SimTime, Tick};
use tcsim_packet::{Ecn, Packet};
use tracing::{debug, trace};

use crate::{
    ConfigError, DropPhase, DropReason, MarkReason, QueueDiscStats, QueueEvent, QueueEventKind,
    QueueItem,
};

/// The outcome of [`QueueDisc::enqueue`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Dropped(DropReason),
}

impl Verdict {
    #[inline]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    #[inline]
    pub const fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped(_))
    }

    pub const fn drop_reason(&self) -> Option<DropReason> {
        match self {
            Self::Accepted => None,
            Self::Dropped(reason) => Some(*reason),
        }
    }
}

/// State every queue discipline shares: the capacity, the occupancy, the statistics, the
/// one-slot requeue buffer, the observers and the timer epoch.
///
/// The occupancy covers every packet the discipline is responsible for, the requeue slot
/// included. The helpers below keep it, the statistics and the trace events in step.
pub struct QueueDiscCore {
    kind: &'static str,
    limit: Option<QueueLimit>,
    backlog: Backlog,
    stats: QueueDiscStats,
    requeued: Option<QueueItem>,
    observers: Observers<QueueEvent>,
    epoch: u64,
}

impl fmt::Debug for QueueDiscCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueDiscCore")
            .field("kind", &self.kind)
            .field("limit", &self.limit)
            .field("backlog", &self.backlog)
            .field("requeued", &self.requeued.as_ref().map(|item| item.uid))
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl QueueDiscCore {
    /// Creates the core of a discipline. Composite disciplines pass no limit.
    pub fn new(kind: &'static str, limit: Option<QueueLimit>) -> Self {
        Self {
            kind,
            limit,
            backlog: Backlog::EMPTY,
            stats: QueueDiscStats::default(),
            requeued: None,
            observers: Observers::default(),
            epoch: 0,
        }
    }

    #[inline]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[inline]
    pub fn limit(&self) -> Option<QueueLimit> {
        self.limit
    }

    #[inline]
    pub fn backlog(&self) -> Backlog {
        self.backlog
    }

    #[inline]
    pub fn stats(&self) -> &QueueDiscStats {
        &self.stats
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns `true` if one more packet of `len` bytes stays within the limit.
    #[inline]
    pub fn fits(&self, len: u64) -> bool {
        self.limit.map_or(true, |limit| limit.admits(self.backlog, len))
    }

    /// Fails if the limit is zero.
    pub fn check_limit(&self) -> Result<(), ConfigError> {
        match self.limit {
            Some(limit) if limit.value() == 0 => Err(ConfigError::ZeroLimit { kind: self.kind }),
            _ => Ok(()),
        }
    }

    /// Fails unless the limit counts packets.
    pub fn require_packet_limit(&self) -> Result<(), ConfigError> {
        match self.limit {
            Some(QueueLimit::Bytes(_)) => {
                Err(ConfigError::UnsupportedLimit { kind: self.kind, limit: "byte" })
            }
            _ => self.check_limit(),
        }
    }

    /// Refuses a packet before admission.
    pub fn drop_before_enqueue(
        &mut self,
        packet: &Packet,
        reason: DropReason,
        now: SimTime,
    ) -> Verdict {
        self.record_drop(packet.uid, packet.wire_len(), reason, DropPhase::BeforeEnqueue, now);
        Verdict::Dropped(reason)
    }

    /// Drops a packet that was admitted earlier and has been taken out of its queue.
    pub fn drop_after_enqueue(&mut self, item: QueueItem, reason: DropReason, now: SimTime) {
        let len = item.wire_len();
        self.backlog.remove(len);
        self.record_drop(item.uid, len, reason, DropPhase::AfterEnqueue, now);
    }

    /// Accounts for a drop without touching the occupancy. Composite disciplines use this to
    /// mirror a refusal by one of their children.
    pub fn record_drop(
        &mut self,
        uid: u64,
        bytes: u64,
        reason: DropReason,
        phase: DropPhase,
        now: SimTime,
    ) {
        trace!(kind = self.kind, uid, bytes, %reason, ?phase, "packet dropped");
        self.stats.increment_dropped(phase, reason, bytes);
        self.emit(now, QueueEventKind::Dropped { uid, bytes, reason, phase });
    }

    /// Sets the congestion-experienced codepoint if the packet is ECN-capable. Returns `false`
    /// otherwise, leaving the packet untouched.
    pub fn mark(&mut self, packet: &mut Packet, reason: MarkReason, now: SimTime) -> bool {
        if !packet.ecn.is_capable() {
            return false;
        }
        self.force_mark(packet, reason, now);
        true
    }

    /// Sets the congestion-experienced codepoint regardless of the packet's ECN capability.
    pub fn force_mark(&mut self, packet: &mut Packet, reason: MarkReason, now: SimTime) {
        packet.ecn = Ecn::Ce;
        trace!(kind = self.kind, uid = packet.uid, ?reason, "packet marked");
        self.stats.increment_marked(reason, packet.wire_len());
        self.emit(now, QueueEventKind::Marked { uid: packet.uid, reason });
    }

    /// Folds into this discipline the drops and marks a child made since its `before` snapshot.
    /// The child's after-enqueue drops leave this discipline's occupancy too.
    pub fn absorb_child(&mut self, before: &QueueDiscStats, after: &QueueDiscStats) {
        let delta = after.delta_since(before);
        let gone = delta.total_dropped_after_enqueue();
        assert!(
            self.backlog.packets >= gone.packets && self.backlog.bytes >= gone.bytes,
            "{}: child dropped {gone:?} out of {:?}",
            self.kind,
            self.backlog
        );
        self.backlog.packets -= gone.packets;
        self.backlog.bytes -= gone.bytes;
        self.stats.absorb_child(&delta);
    }

    /// Notifies the observers.
    #[inline]
    pub fn emit(&mut self, at: SimTime, kind: QueueEventKind) {
        if !self.observers.is_empty() {
            self.observers.notify(&QueueEvent { at, kind });
        }
    }

    /// Accounts for a packet of `len` bytes leaving through a dequeue path of the discipline's
    /// own, outside of [`QueueDisc::dequeue`].
    pub(crate) fn record_dequeue(&mut self, len: u64) {
        self.backlog.remove(len);
        self.stats.increment_dequeued(len);
    }

    /// Empties the requeue slot if the packet in it satisfies `f`. The packet stays accounted
    /// for until [`QueueDiscCore::record_dequeue`].
    pub(crate) fn take_requeued_if(
        &mut self,
        f: impl FnOnce(&QueueItem) -> bool,
    ) -> Option<QueueItem> {
        if self.requeued.as_ref().is_some_and(f) {
            self.requeued.take()
        } else {
            None
        }
    }

    /// Reports the occupancy change since `old` and checks it against `inner`, the occupancy
    /// of the discipline's queues.
    pub(crate) fn settle(&mut self, old: Backlog, inner: Backlog, now: SimTime) {
        self.backlog_changed(old, now);
        self.check(inner);
    }

    fn backlog_changed(&mut self, old: Backlog, now: SimTime) {
        let new = self.backlog;
        if old != new {
            self.emit(now, QueueEventKind::BacklogChanged { old, new });
        }
    }

    fn clear(&mut self) {
        self.backlog = Backlog::EMPTY;
        self.stats = QueueDiscStats::default();
        self.requeued = None;
        self.epoch += 1;
    }

    fn check(&self, inner: Backlog) {
        let slot =
            self.requeued.as_ref().map_or(Backlog::EMPTY, |item| Backlog::new(1, item.wire_len()));
        assert_eq!(
            self.backlog,
            inner + slot,
            "{}: occupancy out of step with the queued packets",
            self.kind
        );
        assert_eq!(
            self.backlog,
            self.stats.implied_backlog(),
            "{}: occupancy out of step with the statistics",
            self.kind
        );
    }
}

/// A queue discipline: decides which packets to admit, in which order to send them, and which
/// to drop or mark along the way.
///
/// Implementors provide the `do_*` operations on their own queues and a [`QueueDiscCore`]; the
/// provided methods handle the requeue slot, the occupancy, the statistics and the trace events
/// around them, and check after every call that the occupancy, the queued packets and the
/// statistics agree.
pub trait QueueDisc: fmt::Debug + Send {
    fn core(&self) -> &QueueDiscCore;

    fn core_mut(&mut self) -> &mut QueueDiscCore;

    /// Admits `item` into the discipline's queues, or refuses it through
    /// [`QueueDiscCore::drop_before_enqueue`].
    fn do_enqueue(&mut self, item: QueueItem, now: SimTime) -> Verdict;

    /// Takes the next packet to send out of the discipline's queues.
    fn do_dequeue(&mut self, now: SimTime) -> Option<QueueItem>;

    /// Occupancy of the discipline's queues, or of its children, excluding the requeue slot.
    fn inner_backlog(&self) -> Backlog;

    /// Validates the configuration, children included.
    fn check_config(&self) -> Result<(), ConfigError>;

    /// Clears the discipline's queues and control state. Statistics are cleared by the caller.
    fn do_reset(&mut self, now: SimTime);

    /// When the discipline's periodic work is next due.
    fn next_due(&self) -> Option<SimTime> {
        None
    }

    /// Periodic work, run once [`QueueDisc::next_due`] has passed.
    fn on_tick(&mut self, _now: SimTime) {}

    /// When a dequeue refused by rate limiting could succeed.
    fn next_wakeup(&self) -> Option<SimTime> {
        None
    }

    fn kind(&self) -> &'static str {
        self.core().kind()
    }

    /// Offers a packet to the discipline.
    fn enqueue(&mut self, packet: Packet, now: SimTime) -> Verdict {
        let len = packet.wire_len();
        let old = self.core().backlog();
        let verdict = self.do_enqueue(QueueItem::new(packet, now), now);

        let core = self.core_mut();
        if verdict.is_accepted() {
            core.backlog.add(len);
            core.stats.increment_enqueued(len);
        }
        core.backlog_changed(old, now);
        self.core().check(self.inner_backlog());
        verdict
    }

    /// Takes the next packet to send, serving a peeked or requeued packet first.
    fn dequeue(&mut self, now: SimTime) -> Option<Packet> {
        let old = self.core().backlog();
        let item = match self.core_mut().requeued.take() {
            Some(item) => Some(item),
            None => self.do_dequeue(now),
        };

        let core = self.core_mut();
        if let Some(item) = &item {
            let len = item.wire_len();
            core.backlog.remove(len);
            core.stats.increment_dequeued(len);
        }
        core.backlog_changed(old, now);
        self.core().check(self.inner_backlog());
        item.map(QueueItem::into_packet)
    }

    /// Returns the packet the next [`QueueDisc::dequeue`] will return, holding it in the
    /// requeue slot meanwhile.
    fn peek(&mut self, now: SimTime) -> Option<&Packet> {
        if self.core().requeued.is_none() {
            let old = self.core().backlog();
            let item = self.do_dequeue(now);
            let core = self.core_mut();
            core.requeued = item;
            core.backlog_changed(old, now);
            self.core().check(self.inner_backlog());
        }
        self.core().requeued.as_ref().map(|item| &item.packet)
    }

    /// Puts back a packet the transmitter could not send. It is the next one dequeued.
    ///
    /// # Panics
    ///
    /// Panics if the requeue slot is already occupied.
    fn requeue(&mut self, packet: Packet, now: SimTime) {
        let core = self.core_mut();
        assert!(core.requeued.is_none(), "{}: requeue slot already occupied", core.kind);
        let old = core.backlog;
        let len = packet.wire_len();
        core.backlog.add(len);
        core.stats.increment_requeued(len);
        core.requeued = Some(QueueItem::new(packet, now));
        core.backlog_changed(old, now);
        self.core().check(self.inner_backlog());
    }

    fn backlog(&self) -> Backlog {
        self.core().backlog()
    }

    fn stats(&self) -> &QueueDiscStats {
        self.core().stats()
    }

    fn limit(&self) -> Option<QueueLimit> {
        self.core().limit()
    }

    /// Changes the capacity and resets the discipline. Composite disciplines have no capacity of
    /// their own and refuse.
    fn set_limit(&mut self, limit: QueueLimit, now: SimTime) -> Result<(), ConfigError> {
        let core = self.core_mut();
        let Some(previous) = core.limit.replace(limit) else {
            core.limit = None;
            return Err(ConfigError::NoLimit { kind: core.kind });
        };

        if let Err(err) = self.check_config() {
            self.core_mut().limit = Some(previous);
            return Err(err);
        }
        self.reset(now);
        Ok(())
    }

    /// Validates the configuration and starts the discipline's timers. Called once before the
    /// simulation starts.
    fn run(&mut self, now: SimTime) -> Result<(), ConfigError> {
        self.check_config()?;
        self.reset(now);
        debug!(kind = self.kind(), limit = ?self.limit(), "queue disc running");
        Ok(())
    }

    /// Drops every queued packet without accounting, clears the control state and the
    /// statistics, and invalidates every tick handed out so far.
    fn reset(&mut self, now: SimTime) {
        self.core_mut().clear();
        self.do_reset(now);
        self.core().check(self.inner_backlog());
    }

    /// The next periodic re-invocation the scheduler must deliver through [`QueueDisc::tick`].
    fn next_tick(&self) -> Option<Tick> {
        self.next_due().map(|due| Tick { due, epoch: self.core().epoch() })
    }

    /// Runs the periodic work of `tick`, unless a reset happened since it was handed out.
    fn tick(&mut self, tick: Tick, now: SimTime) {
        if tick.epoch != self.core().epoch() {
            trace!(kind = self.kind(), ?tick, "ignoring stale tick");
            return;
        }
        let old = self.core().backlog();
        self.on_tick(now);
        self.core_mut().backlog_changed(old, now);
        self.core().check(self.inner_backlog());
    }

    /// Registers a callback notified of every [`QueueEvent`].
    fn subscribe(&mut self, callback: Box<dyn FnMut(&QueueEvent) + Send>) {
        self.core_mut().observers.subscribe(callback);
    }
}

/// Runs `f` on a child discipline and folds the drops and marks it made into `core`.
pub(crate) fn with_child<R>(
    core: &mut QueueDiscCore,
    child: &mut dyn QueueDisc,
    f: impl FnOnce(&mut dyn QueueDisc) -> R,
) -> R {
    let before = *child.stats();
    let out = f(&mut *child);
    core.absorb_child(&before, child.stats());
    out
}
