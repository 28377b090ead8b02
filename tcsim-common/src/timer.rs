use std::time::Duration;

use crate::SimTime;

/// A scheduled re-invocation of a queue discipline.
///
/// The discipline hands out ticks, the event scheduler fires them at [`Tick::due`]. Every tick
/// carries the epoch of the discipline at the time it was handed out: a reset bumps the epoch, so
/// ticks scheduled before the reset are recognised as stale and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick {
    pub due: SimTime,
    pub epoch: u64,
}

/// A fixed-period timer that is polled rather than scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicTimer {
    period: Duration,
    next: Option<SimTime>,
}

impl PeriodicTimer {
    /// Creates a disarmed timer.
    pub const fn new(period: Duration) -> Self {
        Self { period, next: None }
    }

    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Arms the timer to fire one period after `now`.
    pub fn arm(&mut self, now: SimTime) {
        self.next = Some(now + self.period);
    }

    pub fn disarm(&mut self) {
        self.next = None;
    }

    /// When the timer fires next, if armed.
    pub const fn due(&self) -> Option<SimTime> {
        self.next
    }

    /// Fires the timer if it is due at `now`, re-arming it for the first period boundary after
    /// `now`. Returns the number of period boundaries passed since the last firing, zero if the
    /// timer was not due.
    pub fn fire(&mut self, now: SimTime) -> u32 {
        let Some(due) = self.next else { return 0 };
        if due > now {
            return 0;
        }

        let behind = (now - due).as_nanos() / self.period.as_nanos().max(1);
        let periods = u32::try_from(behind).map_or(u32::MAX, |behind| behind.saturating_add(1));
        let mut next = due + self.period * periods;
        if next <= now {
            next = now + self.period;
        }
        self.next = Some(next);
        periods
    }
}
