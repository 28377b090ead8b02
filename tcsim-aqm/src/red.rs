//! Random Early Detection (Floyd & Jacobson, 1993).
//!
//! RED keeps an exponentially weighted moving average of the queue length and drops (or marks)
//! arriving packets with a probability that grows linearly with the average:
//!
//! ```text
//!   p_b
//!    1 ┤                        ┌──────   (gentle: linear ramp from max_p to 1
//!      │                     ╱  │          between max_th and 2 * max_th)
//! max_p┤               ╱────┘   │
//!      │         ╱
//!    0 ┼────────┘
//!      └────────┬──────────┬──────────► avg
//!             min_th     max_th
//! ```
//!
//! Below `min_th` every packet is admitted. Above `max_th` (or `2 * max_th` in gentle mode) every
//! packet is dropped.

use rand::{rngs::StdRng, Rng, SeedableRng};
use tcsim_common::{Backlog, DataRate, SimTime};
use tracing::trace;

use crate::{Admission, AqmConfigError, AqmLaw, AqmReason, DequeueSource};

/// RED parameters. Thresholds are in packets, or in bytes when `byte_mode` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct RedConfig {
    pub min_th: f64,
    pub max_th: f64,
    /// Drop probability reached at `max_th`.
    pub max_p: f64,
    /// Weight of the newest sample in the moving average.
    pub weight: f64,
    /// Ramp the drop probability from `max_p` to 1 between `max_th` and `2 * max_th` instead of
    /// jumping to 1 at `max_th`.
    pub gentle: bool,
    /// Measure the queue and thresholds in bytes, and scale the drop probability by packet size.
    pub byte_mode: bool,
    /// Average packet size, used in byte mode and to age the average over idle periods.
    pub mean_pkt_size: u32,
    /// Rate at which the average decays while the queue sits idle.
    pub idle_link_rate: DataRate,
    /// Mark ECN-capable packets instead of dropping them.
    pub use_ecn: bool,
    /// Drop, rather than mark, above the forced-drop threshold.
    pub use_hard_drop: bool,
    /// Spread drops uniformly using the count of packets since the last drop.
    pub floyd_spacing: bool,
}

impl Default for RedConfig {
    fn default() -> Self {
        Self {
            min_th: 5.0,
            max_th: 15.0,
            max_p: 0.02,
            weight: 0.002,
            gentle: true,
            byte_mode: false,
            mean_pkt_size: 500,
            idle_link_rate: DataRate::from_bps(1_500_000),
            use_ecn: false,
            use_hard_drop: true,
            floyd_spacing: false,
        }
    }
}

impl RedConfig {
    pub const fn with_thresholds(mut self, min_th: f64, max_th: f64) -> Self {
        self.min_th = min_th;
        self.max_th = max_th;
        self
    }

    pub const fn with_max_p(mut self, max_p: f64) -> Self {
        self.max_p = max_p;
        self
    }

    pub const fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub const fn with_gentle(mut self, gentle: bool) -> Self {
        self.gentle = gentle;
        self
    }

    pub const fn with_byte_mode(mut self, byte_mode: bool) -> Self {
        self.byte_mode = byte_mode;
        self
    }

    pub const fn with_ecn(mut self, use_ecn: bool) -> Self {
        self.use_ecn = use_ecn;
        self
    }

    pub const fn with_hard_drop(mut self, use_hard_drop: bool) -> Self {
        self.use_hard_drop = use_hard_drop;
        self
    }

    pub const fn with_floyd_spacing(mut self, floyd_spacing: bool) -> Self {
        self.floyd_spacing = floyd_spacing;
        self
    }

    fn validate(&self) -> Result<(), AqmConfigError> {
        const LAW: &str = Red::NAME;
        if self.min_th.is_nan() || self.min_th < 0.0 {
            return Err(AqmConfigError::OutOfRange {
                law: LAW,
                name: "min_th",
                value: self.min_th,
                range: "[0, inf)",
            });
        }
        if self.max_th.is_nan() || self.min_th >= self.max_th {
            return Err(AqmConfigError::Thresholds { min_th: self.min_th, max_th: self.max_th });
        }
        if self.max_p <= 0.0 {
            return Err(AqmConfigError::not_positive(LAW, "max_p"));
        }
        AqmConfigError::check_range(LAW, "max_p", self.max_p, 0.0, 1.0, "(0, 1]")?;
        if self.weight <= 0.0 {
            return Err(AqmConfigError::not_positive(LAW, "weight"));
        }
        AqmConfigError::check_range(LAW, "weight", self.weight, 0.0, 1.0, "(0, 1]")?;
        if self.mean_pkt_size == 0 {
            return Err(AqmConfigError::not_positive(LAW, "mean_pkt_size"));
        }
        Ok(())
    }
}

/// RED control state.
#[derive(Debug, Clone)]
pub struct Red {
    config: RedConfig,
    /// Moving average of the queue length.
    avg: f64,
    /// Packets admitted since the last early drop.
    count: u32,
    /// Start of the current idle period, if the queue is empty.
    idle_since: Option<SimTime>,
    rng: StdRng,
}

impl Red {
    /// The current moving average of the queue length.
    pub const fn average(&self) -> f64 {
        self.avg
    }

    fn update_average(&mut self, qlen: f64, now: SimTime) {
        let w = self.config.weight;
        if let Some(since) = self.idle_since.take() {
            // Age the average as if `m` small packets had gone through an empty queue.
            let ptc = self.config.idle_link_rate.bytes_per_sec() as f64 /
                f64::from(self.config.mean_pkt_size);
            let m = (now - since).as_secs_f64() * ptc;
            self.avg *= (1.0 - w).powf(m);
        }
        self.avg += w * (qlen - self.avg);
    }

    fn base_probability(&self, len: u64) -> f64 {
        let RedConfig { min_th, max_th, max_p, .. } = self.config;
        let pb = if self.avg < max_th {
            max_p * (self.avg - min_th) / (max_th - min_th)
        } else {
            max_p + (1.0 - max_p) * (self.avg - max_th) / max_th
        };

        if self.config.byte_mode {
            pb * len as f64 / f64::from(self.config.mean_pkt_size)
        } else {
            pb
        }
    }

    fn verdict(&self, reason: AqmReason, ecn_capable: bool) -> Admission {
        let markable = self.config.use_ecn && ecn_capable;
        match reason {
            AqmReason::Forced if markable && !self.config.use_hard_drop => Admission::Mark(reason),
            AqmReason::Probabilistic if markable => Admission::Mark(reason),
            _ => Admission::Drop(reason),
        }
    }
}

impl AqmLaw for Red {
    type Config = RedConfig;

    const NAME: &'static str = "red";

    fn new(config: RedConfig, seed: u64) -> Result<Self, AqmConfigError> {
        config.validate()?;
        Ok(Self { config, avg: 0.0, count: 0, idle_since: None, rng: StdRng::seed_from_u64(seed) })
    }

    fn config(&self) -> &RedConfig {
        &self.config
    }

    fn on_enqueue(
        &mut self,
        backlog: Backlog,
        len: u64,
        ecn_capable: bool,
        now: SimTime,
    ) -> Admission {
        let qlen = if self.config.byte_mode { backlog.bytes } else { backlog.packets };
        self.update_average(qlen as f64, now);

        if self.avg < self.config.min_th {
            self.count = 0;
            return Admission::Admit;
        }

        let forced_th =
            if self.config.gentle { 2.0 * self.config.max_th } else { self.config.max_th };
        if self.avg >= forced_th {
            self.count = 0;
            trace!(avg = self.avg, "red forced drop");
            return self.verdict(AqmReason::Forced, ecn_capable);
        }

        self.count = self.count.saturating_add(1);
        let pb = self.base_probability(len);
        let pa = if self.config.floyd_spacing {
            let denom = 1.0 - f64::from(self.count) * pb;
            if denom <= 0.0 {
                1.0
            } else {
                pb / denom
            }
        } else {
            pb
        };

        if self.rng.gen::<f64>() < pa.clamp(0.0, 1.0) {
            self.count = 0;
            trace!(avg = self.avg, pa, "red early drop");
            return self.verdict(AqmReason::Probabilistic, ecn_capable);
        }

        Admission::Admit
    }

    fn dequeue<S: DequeueSource>(&mut self, source: &mut S, now: SimTime) -> Option<S::Item> {
        let head = source.pop(now);
        if source.backlog().is_empty() && self.idle_since.is_none() {
            self.idle_since = Some(now);
        }
        head.map(|head| head.item)
    }

    fn reset(&mut self, seed: u64) {
        self.avg = 0.0;
        self.count = 0;
        self.idle_since = None;
        self.rng = StdRng::seed_from_u64(seed);
    }
}
