//! Controlled Delay (RFC 8289).
//!
//! CoDel looks at the sojourn time of each packet as it leaves the queue. Once the sojourn time
//! has stayed above `target` for a whole `interval`, it enters the dropping state and drops a
//! packet, then schedules the next drop `interval / sqrt(count)` later, so the drop rate grows
//! until the standing queue goes away. The dropping state ends as soon as a packet leaves with a
//! sojourn time below `target`, or the queue holds no more than one MTU.

use std::time::Duration;

use tcsim_common::{constants::MTU_ETHERNET, SimTime};
use tracing::trace;

use crate::{control_law, AqmConfigError, AqmLaw, AqmReason, DequeueSource, Head};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodelConfig {
    /// Acceptable standing queue delay.
    pub target: Duration,
    /// Width of the window in which the delay must dip below `target` at least once.
    pub interval: Duration,
    /// Backlog, in bytes, at or below which the queue is never considered persistent.
    pub mtu: u64,
    /// Mark ECN-capable packets instead of dropping them.
    pub use_ecn: bool,
}

impl Default for CodelConfig {
    fn default() -> Self {
        Self {
            target: Duration::from_millis(5),
            interval: Duration::from_millis(100),
            mtu: MTU_ETHERNET,
            use_ecn: false,
        }
    }
}

impl CodelConfig {
    pub const fn with_target(mut self, target: Duration) -> Self {
        self.target = target;
        self
    }

    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub const fn with_mtu(mut self, mtu: u64) -> Self {
        self.mtu = mtu;
        self
    }

    pub const fn with_ecn(mut self, use_ecn: bool) -> Self {
        self.use_ecn = use_ecn;
        self
    }

    pub(crate) fn validate(&self, law: &'static str) -> Result<(), AqmConfigError> {
        if self.target.is_zero() {
            return Err(AqmConfigError::not_positive(law, "target"));
        }
        if self.interval.is_zero() {
            return Err(AqmConfigError::not_positive(law, "interval"));
        }
        if self.mtu == 0 {
            return Err(AqmConfigError::not_positive(law, "mtu"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Codel {
    config: CodelConfig,
    /// When the sojourn time went (or will have gone) above target for a full interval.
    first_above_time: Option<SimTime>,
    /// When the next drop is due while dropping.
    drop_next: SimTime,
    /// Drops since entering the dropping state.
    count: u32,
    /// `count` when the dropping state was last entered.
    last_count: u32,
    dropping: bool,
}

impl Codel {
    pub const fn is_dropping(&self) -> bool {
        self.dropping
    }

    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Returns `true` once the sojourn time has been above target for a full interval.
    fn ok_to_drop(&mut self, sojourn: Duration, backlog_bytes: u64, now: SimTime) -> bool {
        if sojourn < self.config.target || backlog_bytes <= self.config.mtu {
            self.first_above_time = None;
            return false;
        }

        match self.first_above_time {
            Some(first_above_time) => now >= first_above_time,
            None => {
                self.first_above_time = Some(now + self.config.interval);
                false
            }
        }
    }

    fn pop<S: DequeueSource>(
        &mut self,
        source: &mut S,
        now: SimTime,
    ) -> Option<(Head<S::Item>, bool)> {
        match source.pop(now) {
            Some(head) => {
                let drop = self.ok_to_drop(head.sojourn, source.backlog().bytes, now);
                Some((head, drop))
            }
            None => {
                self.first_above_time = None;
                None
            }
        }
    }

    /// Drops or marks the head. Returns the head back if it was marked and should be sent.
    fn punish<S: DequeueSource>(
        &self,
        source: &mut S,
        mut head: Head<S::Item>,
        now: SimTime,
    ) -> Option<S::Item> {
        if self.config.use_ecn && source.mark(&mut head.item, AqmReason::Forced, now) {
            return Some(head.item);
        }
        source.drop_item(head.item, AqmReason::Forced, now);
        None
    }
}

impl AqmLaw for Codel {
    type Config = CodelConfig;

    const NAME: &'static str = "codel";

    fn new(config: CodelConfig, _seed: u64) -> Result<Self, AqmConfigError> {
        config.validate(Self::NAME)?;
        Ok(Self {
            config,
            first_above_time: None,
            drop_next: SimTime::ZERO,
            count: 0,
            last_count: 0,
            dropping: false,
        })
    }

    fn config(&self) -> &CodelConfig {
        &self.config
    }

    fn dequeue<S: DequeueSource>(&mut self, source: &mut S, now: SimTime) -> Option<S::Item> {
        let Some((mut head, drop)) = self.pop(source, now) else {
            self.dropping = false;
            return None;
        };

        if self.dropping {
            if !drop {
                trace!(sojourn = ?head.sojourn, "codel leaving dropping state");
                self.dropping = false;
                return Some(head.item);
            }

            while self.dropping && now >= self.drop_next {
                self.count = self.count.saturating_add(1);
                if let Some(marked) = self.punish(source, head, now) {
                    self.drop_next = control_law(self.drop_next, self.config.interval, self.count);
                    return Some(marked);
                }

                let Some((next, drop)) = self.pop(source, now) else {
                    self.dropping = false;
                    return None;
                };
                head = next;

                if drop {
                    self.drop_next = control_law(self.drop_next, self.config.interval, self.count);
                } else {
                    trace!(sojourn = ?head.sojourn, "codel leaving dropping state");
                    self.dropping = false;
                }
            }
            return Some(head.item);
        }

        if !drop {
            return Some(head.item);
        }

        let sent = match self.punish(source, head, now) {
            Some(marked) => Some(marked),
            None => self.pop(source, now).map(|(next, _)| next.item),
        };

        // Reuse the previous drop rate if the last dropping episode ended recently.
        self.dropping = true;
        let delta = self.count.saturating_sub(self.last_count);
        self.count = if delta > 1 && now - self.drop_next < 16 * self.config.interval {
            delta
        } else {
            1
        };
        self.last_count = self.count;
        self.drop_next = control_law(now, self.config.interval, self.count);
        trace!(count = self.count, drop_next = %self.drop_next, "codel entering dropping state");

        sent
    }

    fn reset(&mut self, _seed: u64) {
        self.first_above_time = None;
        self.drop_next = SimTime::ZERO;
        self.count = 0;
        self.last_count = 0;
        self.dropping = false;
    }
}
