#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Active queue management control laws.
//!
//! A law owns only its control state. The queue it manages belongs to the caller and is exposed
//! to the law through [`DequeueSource`], so the same law drives a single-queue discipline or one
//! flow of a flow-queueing discipline.
//!
//! ```text
//!   enqueue ──► AqmLaw::on_enqueue ──► Admit / Mark / Drop
//!
//!   dequeue ──► AqmLaw::dequeue ──► pop ─┬─► return head
//!                     ▲                  └─► drop_item / mark, pop again
//!                     │
//!   timer   ──► AqmLaw::tick (PIE probability update)
//! ```
//!
//! Every law draws its randomness from a [`rand::rngs::StdRng`] seeded by the caller, and
//! [`AqmLaw::reset`] re-seeds it, so a replayed run makes identical decisions.

use std::{fmt, time::Duration};

use tcsim_common::{Backlog, SimTime};

pub mod cobalt;
pub use cobalt::{Cobalt, CobaltConfig};

pub mod codel;
pub use codel::{Codel, CodelConfig};

mod error;
pub use error::AqmConfigError;

pub mod pie;
pub use pie::{Pie, PieConfig};

pub mod red;
pub use red::{Red, RedConfig};

/// Why a law dropped or marked a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AqmReason {
    /// A random early decision.
    Probabilistic,
    /// A decision the law was forced into, e.g. RED above `max_th` or a CoDel drop.
    Forced,
}

/// Outcome of the admission check run on every arriving packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    /// Admit, but set the congestion-experienced codepoint first.
    Mark(AqmReason),
    Drop(AqmReason),
}

/// The packet at the head of the managed queue, as handed to a law at dequeue time.
#[derive(Debug)]
pub struct Head<T> {
    pub item: T,
    /// Wire length in bytes.
    pub len: u64,
    /// Time the packet spent queued.
    pub sojourn: Duration,
}

/// The queue a law manages at dequeue time.
pub trait DequeueSource {
    type Item;

    /// Removes the head of the queue.
    fn pop(&mut self, now: SimTime) -> Option<Head<Self::Item>>;

    /// Occupancy of the queue, not counting a popped head.
    fn backlog(&self) -> Backlog;

    /// Drops a popped packet, accounting for it as dropped after enqueue.
    fn drop_item(&mut self, item: Self::Item, reason: AqmReason, now: SimTime);

    /// Sets the congestion-experienced codepoint on a popped packet. Returns `false` if the
    /// packet is not ECN-capable, in which case the law drops it instead.
    fn mark(&mut self, item: &mut Self::Item, reason: AqmReason, now: SimTime) -> bool;
}

/// An AQM control law.
pub trait AqmLaw: fmt::Debug + Clone + Send + 'static {
    type Config: fmt::Debug + Clone + Default + Send + 'static;

    /// Short name used in logs and errors.
    const NAME: &'static str;

    /// Validates `config` and creates the law with its random generator seeded from `seed`.
    fn new(config: Self::Config, seed: u64) -> Result<Self, AqmConfigError>;

    fn config(&self) -> &Self::Config;

    /// Admission check for a packet of `len` bytes arriving at a queue holding `backlog`.
    fn on_enqueue(
        &mut self,
        _backlog: Backlog,
        _len: u64,
        _ecn_capable: bool,
        _now: SimTime,
    ) -> Admission {
        Admission::Admit
    }

    /// Picks the next packet to transmit from `source`, dropping or marking on the way.
    fn dequeue<S: DequeueSource>(&mut self, source: &mut S, now: SimTime) -> Option<S::Item>;

    /// Called when a packet was refused because the queue is full.
    fn on_overflow(&mut self, _now: SimTime) {}

    /// Period of [`AqmLaw::tick`], for laws that update their state on a timer.
    fn tick_interval(&self) -> Option<Duration> {
        None
    }

    /// Periodic update, called every [`AqmLaw::tick_interval`] with the queue occupancy.
    fn tick(&mut self, _backlog: Backlog, _now: SimTime) {}

    /// Clears all control state and re-seeds the random generator.
    fn reset(&mut self, seed: u64);

    /// The current probabilistic drop rate, for laws that keep one.
    fn drop_probability(&self) -> f64 {
        0.0
    }
}

/// Inverse-square-root control law shared by CoDel and Cobalt: the next drop is scheduled
/// `interval / sqrt(count)` after `t`.
#[inline]
pub(crate) fn control_law(t: SimTime, interval: Duration, count: u32) -> SimTime {
    t + interval.div_f64(f64::from(count.max(1)).sqrt())
}
