use tcsim_common::{constants::MTU_ETHERNET, Backlog, DataRate, QueueLimit, SimTime, TokenBucket};
use tracing::{debug, trace};

use crate::{
    disc::with_child, ConfigError, DropPhase, DropReason, Fifo, FifoConfig, QueueDisc,
    QueueDiscCore, QueueItem, Verdict,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbfConfig {
    pub rate: DataRate,
    /// Size of the rate bucket, in bytes.
    pub burst: u64,
    /// Optional peak rate, enforced by a second bucket of `mtu` bytes.
    pub peak_rate: Option<DataRate>,
    pub mtu: u64,
    /// Tokens in the rate bucket at start. Defaults to a full bucket.
    pub initial_tokens: Option<u64>,
    /// Limit of the default child FIFO.
    pub limit: QueueLimit,
}

impl Default for TbfConfig {
    fn default() -> Self {
        Self {
            rate: DataRate::from_bytes_per_sec(125_000),
            burst: 125_000,
            peak_rate: None,
            mtu: MTU_ETHERNET,
            initial_tokens: None,
            limit: QueueLimit::Bytes(150_000),
        }
    }
}

impl TbfConfig {
    pub fn with_rate(mut self, rate: DataRate) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_burst(mut self, burst: u64) -> Self {
        self.burst = burst;
        self
    }

    pub fn with_peak_rate(mut self, peak_rate: DataRate, mtu: u64) -> Self {
        self.peak_rate = Some(peak_rate);
        self.mtu = mtu;
        self
    }

    pub fn with_initial_tokens(mut self, tokens: u64) -> Self {
        self.initial_tokens = Some(tokens);
        self
    }

    pub fn with_limit(mut self, limit: QueueLimit) -> Self {
        self.limit = limit;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // the buckets count whole bytes per second
        if self.rate.bytes_per_sec() == 0 {
            return Err(ConfigError::zero("tbf", "rate"));
        }
        if self.mtu == 0 {
            return Err(ConfigError::zero("tbf", "mtu"));
        }
        if self.burst < self.mtu {
            return Err(ConfigError::BurstBelowMtu { burst: self.burst, mtu: self.mtu });
        }
        match self.peak_rate {
            Some(peak) if peak <= self.rate => Err(ConfigError::PeakRateTooLow {
                rate: self.rate.to_string(),
                peak: peak.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Token bucket filter: releases packets from an inner discipline no faster than `rate`, with
/// bursts of up to `burst` bytes, and optionally no faster than `peak_rate` at any instant.
#[derive(Debug)]
pub struct Tbf {
    core: QueueDiscCore,
    config: TbfConfig,
    bucket: TokenBucket,
    peak: Option<TokenBucket>,
    child: Box<dyn QueueDisc>,
    /// When the packet at the head of the child can be released, if it is waiting for tokens.
    wakeup: Option<SimTime>,
}

impl Tbf {
    /// Creates a shaper over a default FIFO child bounded by `config.limit`.
    pub fn new(config: TbfConfig) -> Result<Self, ConfigError> {
        let child = Fifo::new(FifoConfig::default().with_limit(config.limit))?;
        Self::with_child(config, Box::new(child))
    }

    pub fn with_child(config: TbfConfig, child: Box<dyn QueueDisc>) -> Result<Self, ConfigError> {
        config.validate()?;
        let initial = config.initial_tokens.unwrap_or(config.burst);
        let bucket = TokenBucket::new(config.rate, config.burst, initial, SimTime::ZERO);
        let peak = config
            .peak_rate
            .map(|peak| TokenBucket::new(peak, config.mtu, config.mtu, SimTime::ZERO));
        debug!(
            rate = %config.rate,
            burst = config.burst,
            peak_rate = ?config.peak_rate,
            "created tbf"
        );
        let tbf = Self {
            core: QueueDiscCore::new("tbf", None),
            config,
            bucket,
            peak,
            child,
            wakeup: None,
        };
        tbf.check_config()?;
        Ok(tbf)
    }

    pub fn child(&self) -> &dyn QueueDisc {
        self.child.as_ref()
    }

    /// Largest packet the shaper can ever release.
    fn max_packet(&self) -> u64 {
        match self.peak {
            Some(_) => self.config.burst.min(self.config.mtu),
            None => self.config.burst,
        }
    }

    /// When both buckets hold `len` tokens, or `None` if they never will.
    fn ready_at(&mut self, len: u64, now: SimTime) -> Option<SimTime> {
        let rate = self.bucket.ready_at(len, now)?;
        match &mut self.peak {
            Some(peak) => peak.ready_at(len, now).map(|peak| peak.max(rate)),
            None => Some(rate),
        }
    }
}

impl QueueDisc for Tbf {
    fn core(&self) -> &QueueDiscCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut QueueDiscCore {
        &mut self.core
    }

    fn do_enqueue(&mut self, item: QueueItem, now: SimTime) -> Verdict {
        if item.wire_len() > self.max_packet() {
            return self.core.drop_before_enqueue(&item, DropReason::Oversized, now);
        }
        let (uid, len) = (item.uid, item.wire_len());
        let verdict = with_child(&mut self.core, self.child.as_mut(), |child| {
            child.enqueue(item.into_packet(), now)
        });
        if let Verdict::Dropped(reason) = verdict {
            self.core.record_drop(uid, len, reason, DropPhase::BeforeEnqueue, now);
        }
        verdict
    }

    fn do_dequeue(&mut self, now: SimTime) -> Option<QueueItem> {
        loop {
            let head = with_child(&mut self.core, self.child.as_mut(), |child| {
                child.peek(now).map(|packet| packet.wire_len())
            });
            let Some(len) = head else {
                self.wakeup = None;
                return None;
            };

            match self.ready_at(len, now) {
                Some(at) if at <= now => {
                    let consumed = self.bucket.try_consume(len, now) &&
                        self.peak.as_mut().map_or(true, |peak| peak.try_consume(len, now));
                    assert!(consumed, "tbf: tokens vanished between check and use");
                    self.wakeup = None;
                    let packet = with_child(&mut self.core, self.child.as_mut(), |child| {
                        child.dequeue(now)
                    })?;
                    return Some(QueueItem::new(packet, now));
                }
                Some(at) => {
                    trace!(len, wakeup = %at, "tbf waiting for tokens");
                    self.wakeup = Some(at);
                    return None;
                }
                None => {
                    // Larger than a bucket, e.g. requeued into the child: it can never leave.
                    let packet = with_child(&mut self.core, self.child.as_mut(), |child| {
                        child.dequeue(now)
                    })?;
                    let item = QueueItem::new(packet, now);
                    self.core.drop_after_enqueue(item, DropReason::Oversized, now);
                }
            }
        }
    }

    fn inner_backlog(&self) -> Backlog {
        self.child.backlog()
    }

    fn check_config(&self) -> Result<(), ConfigError> {
        self.config.validate()?;
        self.child.check_config()
    }

    fn do_reset(&mut self, now: SimTime) {
        let initial = self.config.initial_tokens.unwrap_or(self.config.burst);
        self.bucket.reset(initial, now);
        if let Some(peak) = &mut self.peak {
            peak.reset(self.config.mtu, now);
        }
        self.wakeup = None;
        self.child.reset(now);
    }

    fn next_due(&self) -> Option<SimTime> {
        self.child.next_tick().map(|tick| tick.due)
    }

    fn on_tick(&mut self, now: SimTime) {
        if let Some(tick) = self.child.next_tick().filter(|tick| tick.due <= now) {
            with_child(&mut self.core, self.child.as_mut(), |child| child.tick(tick, now));
        }
    }

    fn next_wakeup(&self) -> Option<SimTime> {
        self.wakeup
    }
}
