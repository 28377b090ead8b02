use std::time::Duration;

use tcsim_common::{constants::MTU_ETHERNET, Backlog, DataRate, PeriodicTimer, QueueLimit, SimTime};
use tcsim_packet::{BoltFlags, FlowTuple};
use tracing::{debug, trace};

use crate::{
    ConfigError, DropReason, MarkReason, PacketQueue, QueueDisc, QueueDiscCore, QueueEventKind,
    QueueItem, Verdict,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoltConfig {
    /// Tail-drop capacity.
    pub limit: QueueLimit,
    /// Occupancy, in bytes, above which the queue counts as congested.
    pub cc_threshold: u64,
    /// Rate of the link the queue feeds.
    pub link_rate: DataRate,
    /// Stamp dequeued packets with the occupancy and mark them above the threshold.
    pub enable_marking: bool,
    /// Send backward congestion signals to the senders.
    pub enable_bts: bool,
    /// Suppress signals for bursts that do not grow the queue further.
    pub enable_abs: bool,
    /// Proactive ramp-up: capacity freed by finishing flows is handed to growing ones.
    pub enable_pru: bool,
    /// Supply matching: idle link capacity is handed to growing flows.
    pub enable_sm: bool,
    /// Signal tokens available at once.
    pub signal_budget: u32,
    /// Tokens added every `signal_refill_period`.
    pub signal_refill: u32,
    /// Interval between two refills of the signal budget.
    pub signal_refill_period: Duration,
    /// Cap on the available-load counter, in bytes.
    pub max_inst_avail_load: u64,
}

impl Default for BoltConfig {
    fn default() -> Self {
        Self {
            limit: QueueLimit::Packets(1000),
            cc_threshold: 3_000,
            link_rate: DataRate::from_gbps(10),
            enable_marking: true,
            enable_bts: false,
            enable_abs: false,
            enable_pru: false,
            enable_sm: false,
            signal_budget: 4,
            signal_refill: 1,
            signal_refill_period: Duration::from_micros(1),
            max_inst_avail_load: MTU_ETHERNET,
        }
    }
}

impl BoltConfig {
    pub fn with_limit(mut self, limit: QueueLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_cc_threshold(mut self, bytes: u64) -> Self {
        self.cc_threshold = bytes;
        self
    }

    pub fn with_link_rate(mut self, rate: DataRate) -> Self {
        self.link_rate = rate;
        self
    }

    pub fn with_marking(mut self, enable: bool) -> Self {
        self.enable_marking = enable;
        self
    }

    pub fn with_bts(mut self, enable: bool) -> Self {
        self.enable_bts = enable;
        self
    }

    pub fn with_abs(mut self, enable: bool) -> Self {
        self.enable_abs = enable;
        self
    }

    pub fn with_pru(mut self, enable: bool) -> Self {
        self.enable_pru = enable;
        self
    }

    pub fn with_sm(mut self, enable: bool) -> Self {
        self.enable_sm = enable;
        self
    }

    /// Sets the signal budget and how fast it refills.
    pub fn with_signal_budget(mut self, budget: u32, refill: u32, period: Duration) -> Self {
        self.signal_budget = budget;
        self.signal_refill = refill;
        self.signal_refill_period = period;
        self
    }

    pub fn with_max_inst_avail_load(mut self, bytes: u64) -> Self {
        self.max_inst_avail_load = bytes;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.cc_threshold == 0 {
            return Err(ConfigError::zero("bolt", "cc_threshold"));
        }
        if self.link_rate.is_zero() {
            return Err(ConfigError::zero("bolt", "link_rate"));
        }
        if self.enable_bts {
            if self.signal_budget == 0 {
                return Err(ConfigError::zero("bolt", "signal_budget"));
            }
            if self.signal_refill_period.is_zero() {
                return Err(ConfigError::zero("bolt", "signal_refill_period"));
            }
        }
        Ok(())
    }
}

/// A backward congestion signal, addressed to the sender of the packet that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoltSignal {
    /// Five-tuple of the signal: the triggering packet's, reversed.
    pub flow: Option<FlowTuple>,
    /// The packet that triggered the signal.
    pub uid: u64,
    /// Occupancy of the queue with the packet admitted, in bytes.
    pub queue_bytes: u64,
    pub link_rate: DataRate,
    pub at: SimTime,
}

/// A tail-drop queue that feeds the Bolt congestion control with precise, early feedback.
///
/// Each feature is toggled on its own: in-band occupancy stamping and marking on dequeue,
/// backward signals on enqueue under a token budget (optionally suppressed within bursts), and
/// the ramp-up grants that answer `INCWIN` requests on dequeue. Signals are collected in an
/// outbox; the dispatch layer drains it with [`Bolt::take_signals`] and sends them.
#[derive(Debug)]
pub struct Bolt {
    core: QueueDiscCore,
    config: BoltConfig,
    queue: PacketQueue,
    signal_tokens: u32,
    refill: Option<PeriodicTimer>,
    outbox: Vec<BoltSignal>,
    /// Occupancy at the last signal of the current above-threshold run.
    last_signal: Option<u64>,
    pru_tokens: u32,
    /// Bytes the link could take on top of the arrivals since the last update. Negative while
    /// arrivals outpace the link.
    avail_load: i64,
    avail_updated: SimTime,
    signals_sent: u64,
    signals_suppressed: u64,
}

impl Bolt {
    pub fn new(config: BoltConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let refill = config.enable_bts.then(|| PeriodicTimer::new(config.signal_refill_period));
        let bolt = Self {
            core: QueueDiscCore::new("bolt", Some(config.limit)),
            signal_tokens: config.signal_budget,
            refill,
            queue: PacketQueue::new(),
            outbox: Vec::new(),
            last_signal: None,
            pru_tokens: 0,
            avail_load: load(config.max_inst_avail_load),
            avail_updated: SimTime::ZERO,
            signals_sent: 0,
            signals_suppressed: 0,
            config,
        };
        bolt.check_config()?;
        debug!(
            limit = %bolt.config.limit,
            cc_threshold = bolt.config.cc_threshold,
            link_rate = %bolt.config.link_rate,
            bts = bolt.config.enable_bts,
            abs = bolt.config.enable_abs,
            pru = bolt.config.enable_pru,
            sm = bolt.config.enable_sm,
            "created bolt"
        );
        Ok(bolt)
    }

    pub fn config(&self) -> &BoltConfig {
        &self.config
    }

    /// Takes the signals generated since the last call, oldest first.
    pub fn take_signals(&mut self) -> Vec<BoltSignal> {
        std::mem::take(&mut self.outbox)
    }

    pub fn signals_sent(&self) -> u64 {
        self.signals_sent
    }

    /// Signals that were due but found the budget exhausted.
    pub fn signals_suppressed(&self) -> u64 {
        self.signals_suppressed
    }

    pub fn signal_tokens(&self) -> u32 {
        self.signal_tokens
    }

    pub fn pru_tokens(&self) -> u32 {
        self.pru_tokens
    }

    /// The available-load counter, in bytes, as of its last update.
    pub fn available_load(&self) -> i64 {
        self.avail_load
    }

    fn set_signal_tokens(&mut self, new: u32, now: SimTime) {
        let old = std::mem::replace(&mut self.signal_tokens, new);
        if old != new {
            self.core.emit(now, QueueEventKind::SignalTokensChanged { old, new });
        }
    }

    fn set_pru_tokens(&mut self, new: u32, now: SimTime) {
        let old = std::mem::replace(&mut self.pru_tokens, new);
        if old != new {
            self.core.emit(now, QueueEventKind::PruTokensChanged { old, new });
        }
    }

    fn supply_matching(&self) -> bool {
        self.config.enable_pru || self.config.enable_sm
    }

    /// Credits the link capacity elapsed since the last update.
    fn update_avail_load(&mut self, now: SimTime) {
        let elapsed = now.saturating_duration_since(self.avail_updated);
        let supply = load(self.config.link_rate.bytes_in(elapsed));
        self.avail_load =
            self.avail_load.saturating_add(supply).min(load(self.config.max_inst_avail_load));
        self.avail_updated = now;
    }

    /// Sends a backward signal for an arrival that finds the queue at `occupancy` bytes, unless
    /// the burst or the budget rules hold it back.
    fn signal(&mut self, item: &mut QueueItem, occupancy: u64, now: SimTime) {
        let threshold = self.config.cc_threshold;
        if occupancy <= threshold {
            self.last_signal = None;
            return;
        }

        let Some(bolt) = item.bolt.as_ref() else { return };
        if !bolt.is_data() || bolt.flags.contains(BoltFlags::DECWIN) {
            return;
        }
        if self.config.enable_abs {
            if let Some(last) = self.last_signal {
                if occupancy < last.saturating_add(threshold) {
                    trace!(uid = item.uid, occupancy, last, "bolt signal held back within burst");
                    return;
                }
            }
        }
        if self.signal_tokens == 0 {
            self.signals_suppressed += 1;
            trace!(uid = item.uid, occupancy, "bolt signal budget exhausted");
            return;
        }

        self.set_signal_tokens(self.signal_tokens - 1, now);
        if let Some(bolt) = item.bolt.as_mut() {
            bolt.flags.insert(BoltFlags::DECWIN);
        }
        self.outbox.push(BoltSignal {
            flow: item.flow.as_ref().map(FlowTuple::reversed),
            uid: item.uid,
            queue_bytes: occupancy,
            link_rate: self.config.link_rate,
            at: now,
        });
        self.last_signal = Some(occupancy);
        self.signals_sent += 1;
        trace!(uid = item.uid, occupancy, "bolt signal sent");
        self.core.emit(now, QueueEventKind::SignalSent { uid: item.uid, queue_bytes: occupancy });
    }

    /// Answers a window increase request: granted from a ramp-up token, else from spare link
    /// capacity, else withdrawn.
    fn grant_increase(&mut self, item: &mut QueueItem, now: SimTime) {
        let len = item.wire_len();
        let Some(bolt) = item.bolt.as_mut() else { return };
        if !bolt.flags.contains(BoltFlags::INCWIN) {
            return;
        }

        if self.config.enable_pru && self.pru_tokens > 0 {
            self.set_pru_tokens(self.pru_tokens - 1, now);
            return;
        }
        if self.supply_matching() {
            self.update_avail_load(now);
            if self.avail_load >= load(len) {
                self.avail_load -= load(len);
                return;
            }
        }
        bolt.flags.remove(BoltFlags::INCWIN);
    }
}

impl QueueDisc for Bolt {
    fn core(&self) -> &QueueDiscCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut QueueDiscCore {
        &mut self.core
    }

    fn do_enqueue(&mut self, mut item: QueueItem, now: SimTime) -> Verdict {
        let len = item.wire_len();
        if !self.core.fits(len) {
            return self.core.drop_before_enqueue(&item, DropReason::CapacityExceeded, now);
        }

        if self.supply_matching() {
            self.update_avail_load(now);
            self.avail_load -= load(len);
        }
        if self.config.enable_bts {
            let occupancy = self.core.backlog().bytes + len;
            self.signal(&mut item, occupancy, now);
        }
        if self.config.enable_pru {
            let last = item
                .bolt
                .as_ref()
                .is_some_and(|bolt| bolt.is_data() && bolt.flags.contains(BoltFlags::LAST));
            if last {
                self.set_pru_tokens(self.pru_tokens.saturating_add(1), now);
            }
        }

        self.queue.push_back(item);
        Verdict::Accepted
    }

    fn do_dequeue(&mut self, now: SimTime) -> Option<QueueItem> {
        let occupancy = self.core.backlog().bytes;
        let mut item = self.queue.pop_front()?;

        if self.config.enable_marking {
            if let Some(bolt) = item.bolt.as_mut() {
                bolt.stamp(occupancy, self.config.link_rate);
                // the Bolt header is the congestion channel, ECN capability does not matter
                if occupancy > self.config.cc_threshold {
                    self.core.force_mark(&mut item, MarkReason::CongestionThreshold, now);
                }
            }
        }
        self.grant_increase(&mut item, now);
        Some(item)
    }

    fn inner_backlog(&self) -> Backlog {
        self.queue.backlog()
    }

    fn check_config(&self) -> Result<(), ConfigError> {
        self.config.validate()?;
        self.core.check_limit()
    }

    fn do_reset(&mut self, now: SimTime) {
        self.queue.clear();
        self.outbox.clear();
        self.signal_tokens = self.config.signal_budget;
        self.last_signal = None;
        self.pru_tokens = 0;
        self.avail_load = load(self.config.max_inst_avail_load);
        self.avail_updated = now;
        self.signals_sent = 0;
        self.signals_suppressed = 0;
        if let Some(refill) = &mut self.refill {
            refill.arm(now);
        }
    }

    fn next_due(&self) -> Option<SimTime> {
        self.refill.as_ref().and_then(PeriodicTimer::due)
    }

    fn on_tick(&mut self, now: SimTime) {
        let periods = self.refill.as_mut().map_or(0, |refill| refill.fire(now));
        if periods > 0 {
            let tokens = self
                .signal_tokens
                .saturating_add(self.config.signal_refill.saturating_mul(periods))
                .min(self.config.signal_budget);
            self.set_signal_tokens(tokens, now);
        }
    }
}

fn load(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}
