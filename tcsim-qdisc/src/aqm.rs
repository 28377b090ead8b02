use tcsim_aqm::{Admission, AqmLaw, AqmReason, Cobalt, Codel, DequeueSource, Head, Pie, Red};
use tcsim_common::{Backlog, PeriodicTimer, QueueLimit, SimTime};
use tracing::debug;

use crate::{ConfigError, DropReason, PacketQueue, QueueDisc, QueueDiscCore, QueueItem, Verdict};

#[derive(Debug, Clone, PartialEq)]
pub struct AqmConfig<C> {
    pub limit: QueueLimit,
    pub law: C,
    /// Seed of the law's random generator.
    pub seed: u64,
}

impl<C: Default> Default for AqmConfig<C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<C> AqmConfig<C> {
    pub fn new(law: C) -> Self {
        Self { limit: QueueLimit::Packets(1000), law, seed: 0 }
    }

    pub fn with_limit(mut self, limit: QueueLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

pub type RedQueueDisc = AqmQueueDisc<Red>;
pub type CodelQueueDisc = AqmQueueDisc<Codel>;
pub type PieQueueDisc = AqmQueueDisc<Pie>;
pub type CobaltQueueDisc = AqmQueueDisc<Cobalt>;

/// A single queue managed by an AQM law.
///
/// Every arrival goes through the law's admission check first, then through the capacity check,
/// which drops regardless of what the law decided. Dequeue hands the queue to the law, which may
/// drop or mark packets on the way out.
#[derive(Debug)]
pub struct AqmQueueDisc<L: AqmLaw> {
    core: QueueDiscCore,
    law: L,
    seed: u64,
    queue: PacketQueue,
    timer: Option<PeriodicTimer>,
}

impl<L: AqmLaw> AqmQueueDisc<L> {
    pub fn new(config: AqmConfig<L::Config>) -> Result<Self, ConfigError> {
        let law = L::new(config.law, config.seed)?;
        let timer = law.tick_interval().map(PeriodicTimer::new);
        let disc = Self {
            core: QueueDiscCore::new(L::NAME, Some(config.limit)),
            law,
            seed: config.seed,
            queue: PacketQueue::new(),
            timer,
        };
        disc.check_config()?;
        debug!(
            kind = L::NAME,
            limit = %config.limit,
            config = ?disc.law.config(),
            "created aqm queue disc"
        );
        Ok(disc)
    }

    pub fn law(&self) -> &L {
        &self.law
    }
}

impl<L: AqmLaw> QueueDisc for AqmQueueDisc<L> {
    fn core(&self) -> &QueueDiscCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut QueueDiscCore {
        &mut self.core
    }

    fn do_enqueue(&mut self, mut item: QueueItem, now: SimTime) -> Verdict {
        let len = item.wire_len();
        match self.law.on_enqueue(self.core.backlog(), len, item.ecn.is_capable(), now) {
            Admission::Admit => {}
            Admission::Mark(reason) => {
                if !self.core.mark(&mut item, reason.into(), now) {
                    return self.core.drop_before_enqueue(&item, reason.into(), now);
                }
            }
            Admission::Drop(reason) => {
                return self.core.drop_before_enqueue(&item, reason.into(), now);
            }
        }

        if !self.core.fits(len) {
            self.law.on_overflow(now);
            return self.core.drop_before_enqueue(&item, DropReason::CapacityExceeded, now);
        }

        self.queue.push_back(item);
        Verdict::Accepted
    }

    fn do_dequeue(&mut self, now: SimTime) -> Option<QueueItem> {
        let mut source = Source { queue: &mut self.queue, core: &mut self.core };
        self.law.dequeue(&mut source, now)
    }

    fn inner_backlog(&self) -> Backlog {
        self.queue.backlog()
    }

    fn check_config(&self) -> Result<(), ConfigError> {
        self.core.check_limit()
    }

    fn do_reset(&mut self, now: SimTime) {
        self.queue.clear();
        self.law.reset(self.seed);
        if let Some(timer) = &mut self.timer {
            timer.arm(now);
        }
    }

    fn next_due(&self) -> Option<SimTime> {
        self.timer.as_ref().and_then(PeriodicTimer::due)
    }

    fn on_tick(&mut self, now: SimTime) {
        if self.timer.as_mut().is_some_and(|timer| timer.fire(now) > 0) {
            self.law.tick(self.core.backlog(), now);
        }
    }
}

/// A queue of packets as seen by a law at dequeue time. Drops and marks go through the
/// discipline's accounting.
pub(crate) struct Source<'a> {
    pub(crate) queue: &'a mut PacketQueue,
    pub(crate) core: &'a mut QueueDiscCore,
}

impl DequeueSource for Source<'_> {
    type Item = QueueItem;

    fn pop(&mut self, now: SimTime) -> Option<Head<QueueItem>> {
        let item = self.queue.pop_front()?;
        Some(Head { len: item.wire_len(), sojourn: item.sojourn(now), item })
    }

    fn backlog(&self) -> Backlog {
        self.queue.backlog()
    }

    fn drop_item(&mut self, item: QueueItem, reason: AqmReason, now: SimTime) {
        self.core.drop_after_enqueue(item, reason.into(), now);
    }

    fn mark(&mut self, item: &mut QueueItem, reason: AqmReason, now: SimTime) -> bool {
        self.core.mark(item, reason.into(), now)
    }
}

#[cfg(test)]
mod tests {
    use tcsim_aqm::{CobaltConfig, CodelConfig, PieConfig, RedConfig};
    use tcsim_packet::{Ecn, Packet};

    use super::*;
    use crate::MarkReason;

    #[test]
    fn red_marks_ecn_capable_packets() {
        let law = RedConfig::default()
            .with_thresholds(1.0, 2.0)
            .with_weight(1.0)
            .with_ecn(true)
            .with_hard_drop(false);
        let mut q = RedQueueDisc::new(AqmConfig::new(law)).unwrap();
        q.run(SimTime::ZERO).unwrap();

        for uid in 0..10 {
            let packet = Packet::new(uid, 500).with_ecn(Ecn::Ect0);
            assert!(q.enqueue(packet, SimTime::ZERO).is_accepted());
        }
        let marked = q.stats().total_marked().packets;
        assert!(marked > 0);

        let ce =
            std::iter::from_fn(|| q.dequeue(SimTime::ZERO)).filter(|p| p.ecn == Ecn::Ce).count();
        assert_eq!(ce as u64, marked);
    }

    #[test]
    fn capacity_drops_even_when_law_admits() {
        let config = AqmConfig::new(RedConfig::default()).with_limit(QueueLimit::Packets(2));
        let mut q = RedQueueDisc::new(config).unwrap();
        q.run(SimTime::ZERO).unwrap();
        let verdicts: Vec<_> =
            (0..3).map(|uid| q.enqueue(Packet::new(uid, 100), SimTime::ZERO)).collect();
        assert_eq!(verdicts[2], Verdict::Dropped(DropReason::CapacityExceeded));
    }

    #[test]
    fn codel_drops_are_accounted_after_enqueue() {
        let _ = tracing_subscriber::fmt::try_init();

        let mut q = CodelQueueDisc::new(AqmConfig::new(CodelConfig::default())).unwrap();
        q.run(SimTime::ZERO).unwrap();
        for uid in 0..200 {
            assert!(q.enqueue(Packet::new(uid, 1_500), SimTime::ZERO).is_accepted());
        }
        for ms in (10..=300).step_by(10) {
            assert!(q.dequeue(SimTime::from_millis(ms)).is_some());
        }

        let dropped = q.stats().dropped_after_enqueue(DropReason::AqmForced);
        assert!(dropped.packets >= 2);
        assert_eq!(q.backlog().packets, 200 - 30 - dropped.packets);
        assert!(q.law().is_dropping());
    }

    #[test]
    fn codel_marks_instead_of_dropping() {
        let law = CodelConfig::default().with_ecn(true);
        let mut q = CodelQueueDisc::new(AqmConfig::new(law)).unwrap();
        q.run(SimTime::ZERO).unwrap();
        for uid in 0..50 {
            let _ = q.enqueue(Packet::new(uid, 1_500).with_ecn(Ecn::Ect1), SimTime::ZERO);
        }
        for ms in (10..=200).step_by(10) {
            let _ = q.dequeue(SimTime::from_millis(ms));
        }
        assert_eq!(q.stats().total_dropped().packets, 0);
        assert!(q.stats().marked(MarkReason::AqmForced).packets > 0);
    }

    #[test]
    fn pie_probability_follows_ticks() {
        let config = AqmConfig::new(PieConfig::default()).with_limit(QueueLimit::Packets(10_000));
        let mut q = PieQueueDisc::new(config).unwrap();
        assert_eq!(q.next_tick(), None);
        q.run(SimTime::ZERO).unwrap();

        // a standing queue: 2 arrivals, 1 departure per millisecond
        let mut uid = 0;
        for ms in 0..300 {
            let now = SimTime::from_millis(ms);
            for _ in 0..2 {
                let _ = q.enqueue(Packet::new(uid, 1_000), now);
                uid += 1;
            }
            let _ = q.dequeue(now);
            while let Some(tick) = q.next_tick().filter(|tick| tick.due <= now) {
                q.tick(tick, now);
            }
        }
        let high = q.law().drop_probability();
        assert!(high > 0.0, "probability stayed at zero");

        // drain, then let the law idle
        let later = SimTime::from_millis(300);
        while q.dequeue(later).is_some() {}
        for ms in 300..3_000 {
            let now = SimTime::from_millis(ms);
            if let Some(tick) = q.next_tick().filter(|tick| tick.due <= now) {
                q.tick(tick, now);
            }
        }
        assert!(q.law().drop_probability() < high);
        assert!(q.next_tick().unwrap().due > SimTime::from_millis(2_999));
    }

    #[test]
    fn cobalt_learns_about_overflow() {
        let config = AqmConfig::new(CobaltConfig::default()).with_limit(QueueLimit::Packets(1));
        let mut q = CobaltQueueDisc::new(config).unwrap();
        q.run(SimTime::ZERO).unwrap();
        let _ = q.enqueue(Packet::new(0, 100), SimTime::ZERO);
        assert!(q.enqueue(Packet::new(1, 100), SimTime::ZERO).is_dropped());
        assert_eq!(q.law().drop_probability(), 1.0 / 256.0);
    }

    #[test]
    fn reset_reseeds_the_law() {
        let law = RedConfig::default().with_thresholds(1.0, 30.0).with_max_p(0.5).with_weight(1.0);
        let config = AqmConfig::new(law).with_seed(9).with_limit(QueueLimit::Packets(100));
        let mut q = RedQueueDisc::new(config).unwrap();

        let run = |q: &mut RedQueueDisc| -> Vec<Verdict> {
            q.run(SimTime::ZERO).unwrap();
            (0..40).map(|uid| q.enqueue(Packet::new(uid, 100), SimTime::ZERO)).collect()
        };
        let first = run(&mut q);
        let second = run(&mut q);
        assert_eq!(first, second);
        assert!(first.iter().any(Verdict::is_dropped));
    }
}
