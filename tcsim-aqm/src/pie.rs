//! Proportional Integral controller Enhanced (RFC 8033).
//!
//! PIE drops packets on arrival with a probability that is recomputed every `t_update`. The
//! update is a PI controller on the queueing delay:
//!
//! ```text
//!   p += alpha * (qdelay - target) + beta * (qdelay - qdelay_old)
//! ```
//!
//! with `alpha` and `beta` scaled down while `p` is small so the controller does not overshoot
//! at low drop rates. The queueing delay is either the sojourn time of the last departing packet,
//! or estimated with Little's law from the backlog and a measured departure rate.

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tcsim_common::{constants::MTU_ETHERNET, Backlog, SimTime};
use tracing::trace;

use crate::{Admission, AqmConfigError, AqmLaw, AqmReason, DequeueSource};

/// Queueing delay above which the probability gets an extra fixed boost every update.
const QDELAY_BOOST_THRESHOLD: Duration = Duration::from_millis(250);

/// Largest probability increase per update once `p` reaches 10%.
const MAX_PROB_STEP: f64 = 0.02;

#[derive(Debug, Clone, PartialEq)]
pub struct PieConfig {
    /// Target queueing delay.
    pub target: Duration,
    /// Probability update period.
    pub t_update: Duration,
    pub alpha: f64,
    pub beta: f64,
    /// Time after the queue becomes active during which no packet is dropped early.
    pub max_burst: Duration,
    /// Typical packet size. Queues of at most two of these are never dropped from.
    pub mean_pkt_size: u64,
    /// Estimate the delay from the departure rate (Little's law) instead of sojourn times.
    pub use_dq_rate_estimator: bool,
    /// Bytes that must depart before a departure rate sample is taken.
    pub dq_threshold: u64,
    /// Scale the drop probability by packet size.
    pub byte_mode: bool,
    /// Spread drops out with an accumulated probability instead of independent trials.
    pub use_derandomization: bool,
    /// Mark ECN-capable packets instead of dropping them.
    pub use_ecn: bool,
    /// Probability above which ECN-capable packets are dropped rather than marked.
    pub mark_ecn_threshold: f64,
    /// Cap probability increases at [`MAX_PROB_STEP`] once `p` is above 10%.
    pub cap_drop_adjustment: bool,
}

impl Default for PieConfig {
    fn default() -> Self {
        Self {
            target: Duration::from_millis(15),
            t_update: Duration::from_millis(15),
            alpha: 0.125,
            beta: 1.25,
            max_burst: Duration::from_millis(150),
            mean_pkt_size: MTU_ETHERNET,
            use_dq_rate_estimator: false,
            dq_threshold: 16 * 1024,
            byte_mode: false,
            use_derandomization: false,
            use_ecn: false,
            mark_ecn_threshold: 0.1,
            cap_drop_adjustment: true,
        }
    }
}

impl PieConfig {
    pub const fn with_target(mut self, target: Duration) -> Self {
        self.target = target;
        self
    }

    pub const fn with_t_update(mut self, t_update: Duration) -> Self {
        self.t_update = t_update;
        self
    }

    pub const fn with_max_burst(mut self, max_burst: Duration) -> Self {
        self.max_burst = max_burst;
        self
    }

    pub const fn with_dq_rate_estimator(mut self, enabled: bool) -> Self {
        self.use_dq_rate_estimator = enabled;
        self
    }

    pub const fn with_derandomization(mut self, enabled: bool) -> Self {
        self.use_derandomization = enabled;
        self
    }

    pub const fn with_ecn(mut self, use_ecn: bool) -> Self {
        self.use_ecn = use_ecn;
        self
    }

    fn validate(&self) -> Result<(), AqmConfigError> {
        const LAW: &str = Pie::NAME;
        if self.target.is_zero() {
            return Err(AqmConfigError::not_positive(LAW, "target"));
        }
        if self.t_update.is_zero() {
            return Err(AqmConfigError::not_positive(LAW, "t_update"));
        }
        if self.mean_pkt_size == 0 {
            return Err(AqmConfigError::not_positive(LAW, "mean_pkt_size"));
        }
        if self.dq_threshold == 0 {
            return Err(AqmConfigError::not_positive(LAW, "dq_threshold"));
        }
        AqmConfigError::check_range(LAW, "alpha", self.alpha, 0.0, 32.0, "[0, 32]")?;
        AqmConfigError::check_range(LAW, "beta", self.beta, 0.0, 32.0, "[0, 32]")?;
        AqmConfigError::check_range(
            LAW,
            "mark_ecn_threshold",
            self.mark_ecn_threshold,
            0.0,
            1.0,
            "[0, 1]",
        )
    }
}

/// Departure rate measurement, active while the queue holds at least `dq_threshold` bytes.
#[derive(Debug, Clone, Copy, Default)]
struct RateMeasurement {
    start: Option<SimTime>,
    count: u64,
}

#[derive(Debug, Clone)]
pub struct Pie {
    config: PieConfig,
    drop_prob: f64,
    /// Current delay estimate.
    qdelay: Duration,
    /// Delay estimate at the previous update.
    qdelay_old: Duration,
    burst_allowance: Duration,
    accu_prob: f64,
    measurement: RateMeasurement,
    /// Smoothed departure rate, in bytes per second.
    avg_dq_rate: f64,
    rng: StdRng,
}

impl Pie {
    /// The delay estimate used by the last update.
    pub const fn qdelay(&self) -> Duration {
        self.qdelay
    }

    pub const fn burst_allowance(&self) -> Duration {
        self.burst_allowance
    }

    /// The measured departure rate, in bytes per second.
    pub const fn departure_rate(&self) -> f64 {
        self.avg_dq_rate
    }

    /// Scales `alpha` and `beta` down while the probability is small (RFC 8033, section 4.2).
    fn scale(&self) -> f64 {
        match self.drop_prob {
            p if p < 0.000_001 => 1.0 / 2048.0,
            p if p < 0.000_01 => 1.0 / 512.0,
            p if p < 0.000_1 => 1.0 / 128.0,
            p if p < 0.001 => 1.0 / 32.0,
            p if p < 0.01 => 1.0 / 8.0,
            p if p < 0.1 => 1.0 / 2.0,
            _ => 1.0,
        }
    }

    fn update_probability(&mut self, backlog: Backlog) {
        let qdelay = if self.config.use_dq_rate_estimator {
            if self.avg_dq_rate > 0.0 {
                Duration::from_secs_f64(backlog.bytes as f64 / self.avg_dq_rate)
            } else {
                Duration::ZERO
            }
        } else if backlog.is_empty() {
            Duration::ZERO
        } else {
            self.qdelay
        };

        let target = self.config.target.as_secs_f64();
        let scale = self.scale();
        let mut delta = self.config.alpha * scale * (qdelay.as_secs_f64() - target) +
            self.config.beta * scale * (qdelay.as_secs_f64() - self.qdelay_old.as_secs_f64());

        if self.config.cap_drop_adjustment && self.drop_prob >= 0.1 && delta > MAX_PROB_STEP {
            delta = MAX_PROB_STEP;
        }
        if qdelay > QDELAY_BOOST_THRESHOLD {
            delta += MAX_PROB_STEP;
        }

        self.drop_prob = (self.drop_prob + delta).clamp(0.0, 1.0);

        if qdelay.is_zero() && self.qdelay_old.is_zero() {
            self.drop_prob -= self.drop_prob / 64.0;
        }

        self.burst_allowance = self.burst_allowance.saturating_sub(self.config.t_update);

        let half_target = self.config.target / 2;
        if self.drop_prob == 0.0 &&
            qdelay < half_target &&
            self.qdelay_old < half_target &&
            self.burst_allowance.is_zero()
        {
            self.burst_allowance = self.config.max_burst;
        }

        self.qdelay = qdelay;
        self.qdelay_old = qdelay;
        trace!(p = self.drop_prob, qdelay = ?qdelay, "pie probability update");
    }

    fn drop_early(&mut self, backlog: Backlog, len: u64) -> bool {
        if !self.burst_allowance.is_zero() {
            return false;
        }
        if self.qdelay_old < self.config.target / 2 && self.drop_prob < 0.2 {
            return false;
        }
        if backlog.bytes <= 2 * self.config.mean_pkt_size {
            return false;
        }

        let mut p = self.drop_prob;
        if self.config.byte_mode {
            p = p * len as f64 / self.config.mean_pkt_size as f64;
        }

        if self.config.use_derandomization {
            if p == 0.0 {
                self.accu_prob = 0.0;
            }
            self.accu_prob += p;
            if self.accu_prob < 0.85 {
                return false;
            }
            if self.accu_prob >= 8.5 {
                return true;
            }
        }

        self.rng.gen::<f64>() < p
    }

    fn measure_departure(&mut self, backlog_bytes: u64, len: u64, now: SimTime) {
        let threshold = self.config.dq_threshold;
        if self.measurement.start.is_none() && backlog_bytes >= threshold {
            self.measurement = RateMeasurement { start: Some(now), count: 0 };
        }

        let Some(start) = self.measurement.start else { return };
        self.measurement.count += len;
        if self.measurement.count < threshold {
            return;
        }

        let elapsed = (now - start).as_secs_f64();
        if elapsed > 0.0 {
            let rate = self.measurement.count as f64 / elapsed;
            self.avg_dq_rate = if self.avg_dq_rate == 0.0 {
                rate
            } else {
                self.avg_dq_rate * 7.0 / 8.0 + rate / 8.0
            };
        }

        self.measurement = if backlog_bytes >= threshold {
            RateMeasurement { start: Some(now), count: 0 }
        } else {
            RateMeasurement::default()
        };
    }
}

impl AqmLaw for Pie {
    type Config = PieConfig;

    const NAME: &'static str = "pie";

    fn new(config: PieConfig, seed: u64) -> Result<Self, AqmConfigError> {
        config.validate()?;
        Ok(Self {
            burst_allowance: config.max_burst,
            config,
            drop_prob: 0.0,
            qdelay: Duration::ZERO,
            qdelay_old: Duration::ZERO,
            accu_prob: 0.0,
            measurement: RateMeasurement::default(),
            avg_dq_rate: 0.0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn config(&self) -> &PieConfig {
        &self.config
    }

    fn on_enqueue(
        &mut self,
        backlog: Backlog,
        len: u64,
        ecn_capable: bool,
        _now: SimTime,
    ) -> Admission {
        if !self.drop_early(backlog, len) {
            return Admission::Admit;
        }

        self.accu_prob = 0.0;
        if self.config.use_ecn && ecn_capable && self.drop_prob <= self.config.mark_ecn_threshold
        {
            Admission::Mark(AqmReason::Probabilistic)
        } else {
            Admission::Drop(AqmReason::Probabilistic)
        }
    }

    fn dequeue<S: DequeueSource>(&mut self, source: &mut S, now: SimTime) -> Option<S::Item> {
        let head = source.pop(now)?;
        let backlog = source.backlog();

        if self.config.use_dq_rate_estimator {
            self.measure_departure(backlog.bytes, head.len, now);
        } else {
            self.qdelay = if backlog.is_empty() { Duration::ZERO } else { head.sojourn };
        }

        Some(head.item)
    }

    fn tick_interval(&self) -> Option<Duration> {
        Some(self.config.t_update)
    }

    fn tick(&mut self, backlog: Backlog, _now: SimTime) {
        self.update_probability(backlog);
    }

    fn reset(&mut self, seed: u64) {
        self.drop_prob = 0.0;
        self.qdelay = Duration::ZERO;
        self.qdelay_old = Duration::ZERO;
        self.burst_allowance = self.config.max_burst;
        self.accu_prob = 0.0;
        self.measurement = RateMeasurement::default();
        self.avg_dq_rate = 0.0;
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn drop_probability(&self) -> f64 {
        self.drop_prob
    }
}
