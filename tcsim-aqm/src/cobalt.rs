//! CoDel combined with BLUE, as used by CAKE.
//!
//! The CoDel half reacts to a standing queue by dropping at dequeue with the usual
//! `interval / sqrt(count)` schedule. The BLUE half keeps a drop probability that rises by
//! `increment` every time the queue overflows and falls by `decrement` every time it runs
//! empty, each at most once per `target`, and drops every departing packet with that
//! probability. BLUE takes over against unresponsive flows that CoDel alone cannot contain.

use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tcsim_common::{constants::MTU_ETHERNET, SimTime};
use tracing::trace;

use crate::{
    codel::CodelConfig, control_law, AqmConfigError, AqmLaw, AqmReason, DequeueSource, Head,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CobaltConfig {
    pub target: Duration,
    pub interval: Duration,
    /// Backlog, in bytes, at or below which the queue is never considered persistent.
    pub mtu: u64,
    /// BLUE probability increase on overflow.
    pub increment: f64,
    /// BLUE probability decrease when the queue runs empty.
    pub decrement: f64,
    /// Mark ECN-capable packets instead of dropping them on CoDel decisions.
    pub use_ecn: bool,
}

impl Default for CobaltConfig {
    fn default() -> Self {
        Self {
            target: Duration::from_millis(5),
            interval: Duration::from_millis(100),
            mtu: MTU_ETHERNET,
            increment: 1.0 / 256.0,
            decrement: 1.0 / 4096.0,
            use_ecn: false,
        }
    }
}

impl CobaltConfig {
    pub const fn with_target(mut self, target: Duration) -> Self {
        self.target = target;
        self
    }

    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub const fn with_blue(mut self, increment: f64, decrement: f64) -> Self {
        self.increment = increment;
        self.decrement = decrement;
        self
    }

    pub const fn with_ecn(mut self, use_ecn: bool) -> Self {
        self.use_ecn = use_ecn;
        self
    }

    fn validate(&self) -> Result<(), AqmConfigError> {
        const LAW: &str = Cobalt::NAME;
        CodelConfig {
            target: self.target,
            interval: self.interval,
            mtu: self.mtu,
            use_ecn: self.use_ecn,
        }
        .validate(LAW)?;
        AqmConfigError::check_range(LAW, "increment", self.increment, 0.0, 1.0, "[0, 1]")?;
        AqmConfigError::check_range(LAW, "decrement", self.decrement, 0.0, 1.0, "[0, 1]")
    }
}

#[derive(Debug, Clone)]
pub struct Cobalt {
    config: CobaltConfig,
    count: u32,
    dropping: bool,
    drop_next: SimTime,
    /// BLUE drop probability.
    p_drop: f64,
    /// Last BLUE probability change.
    blue_timer: Option<SimTime>,
    rng: StdRng,
}

impl Cobalt {
    pub const fn is_dropping(&self) -> bool {
        self.dropping
    }

    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Returns `true` if the BLUE probability may change at `now`.
    fn blue_due(&self, now: SimTime) -> bool {
        self.blue_timer.map_or(true, |last| now - last > self.config.target)
    }

    /// The queue ran empty: decay BLUE and relax the CoDel schedule.
    fn queue_empty(&mut self, now: SimTime) {
        if self.p_drop > 0.0 && self.blue_due(now) {
            self.p_drop = (self.p_drop - self.config.decrement).max(0.0);
            self.blue_timer = Some(now);
        }
        self.dropping = false;

        if self.count > 0 && now >= self.drop_next {
            self.count -= 1;
            self.drop_next = control_law(self.drop_next, self.config.interval, self.count);
        }
    }

    /// Decides the fate of `head`. Returns `true` if it must be dropped. Marks it instead when
    /// ECN is in use and the packet allows it.
    fn should_drop<S: DequeueSource>(
        &mut self,
        source: &mut S,
        head: &mut Head<S::Item>,
        now: SimTime,
    ) -> bool {
        let interval = self.config.interval;
        let over_target =
            head.sojourn > self.config.target && source.backlog().bytes > self.config.mtu;
        let mut next_due = self.count > 0 && now >= self.drop_next;
        let mut drop = false;

        if over_target {
            if !self.dropping {
                self.dropping = true;
                self.drop_next = control_law(now, interval, self.count);
            }
            if self.count == 0 {
                self.count = 1;
            }
        } else if self.dropping {
            self.dropping = false;
        }

        if next_due && self.dropping {
            drop = !(self.config.use_ecn &&
                source.mark(&mut head.item, AqmReason::Forced, now));
            self.count = self.count.saturating_add(1);
            self.drop_next = control_law(self.drop_next, interval, self.count);
        } else {
            while next_due {
                self.count -= 1;
                self.drop_next = control_law(self.drop_next, interval, self.count);
                next_due = self.count > 0 && now >= self.drop_next;
            }
        }

        // BLUE
        if self.p_drop > 0.0 && self.rng.gen::<f64>() < self.p_drop {
            drop = true;
        }

        // Overload: keep the schedule anchored to the present.
        if self.count == 0 {
            self.drop_next = now + interval;
        } else if now > self.drop_next && !drop {
            self.drop_next = now;
        }

        drop
    }

    fn reason(&self) -> AqmReason {
        if self.dropping {
            AqmReason::Forced
        } else {
            AqmReason::Probabilistic
        }
    }
}

impl AqmLaw for Cobalt {
    type Config = CobaltConfig;

    const NAME: &'static str = "cobalt";

    fn new(config: CobaltConfig, seed: u64) -> Result<Self, AqmConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            count: 0,
            dropping: false,
            drop_next: SimTime::ZERO,
            p_drop: 0.0,
            blue_timer: None,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn config(&self) -> &CobaltConfig {
        &self.config
    }

    fn dequeue<S: DequeueSource>(&mut self, source: &mut S, now: SimTime) -> Option<S::Item> {
        loop {
            let Some(mut head) = source.pop(now) else {
                self.queue_empty(now);
                return None;
            };

            if !self.should_drop(source, &mut head, now) {
                return Some(head.item);
            }

            let reason = self.reason();
            trace!(p_drop = self.p_drop, count = self.count, ?reason, "cobalt drop");
            source.drop_item(head.item, reason, now);
        }
    }

    fn on_overflow(&mut self, now: SimTime) {
        if self.blue_due(now) {
            self.p_drop = (self.p_drop + self.config.increment).min(1.0);
            self.blue_timer = Some(now);
            trace!(p_drop = self.p_drop, "cobalt blue increase");
        }
        self.dropping = true;
        self.drop_next = now;
        if self.count == 0 {
            self.count = 1;
        }
    }

    fn reset(&mut self, seed: u64) {
        self.count = 0;
        self.dropping = false;
        self.drop_next = SimTime::ZERO;
        self.p_drop = 0.0;
        self.blue_timer = None;
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn drop_probability(&self) -> f64 {
        self.p_drop
    }
}
