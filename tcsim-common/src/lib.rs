#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Shared building blocks for the tcsim crates.
//!
//! Everything in here is driven by an explicit [`SimTime`] supplied by the caller. Nothing reads a
//! wall clock, which keeps queue disciplines deterministic under a discrete-event scheduler.

mod limit;
pub use limit::{Backlog, LimitParseError, QueueLimit};

mod observer;
pub use observer::{Observers, Recorder};

mod time;
pub use time::{DataRate, SimTime};

mod timer;
pub use timer::{PeriodicTimer, Tick};

mod token_bucket;
pub use token_bucket::TokenBucket;

/// Mixes a 64-bit value with the splitmix64 finalizer.
///
/// Used to spread hash values before reducing them modulo a bucket count, and to derive
/// independent per-flow seeds from a single discipline seed.
#[inline]
pub const fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[allow(non_upper_case_globals)]
pub mod constants {
    pub const KiB: u64 = 1024;
    pub const MiB: u64 = 1024 * KiB;
    pub const GiB: u64 = 1024 * MiB;

    /// Ethernet MTU in bytes.
    pub const MTU_ETHERNET: u64 = 1500;

    /// Nanoseconds per second.
    pub const NANOS_PER_SEC: u64 = 1_000_000_000;
}
