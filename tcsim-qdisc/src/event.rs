use tcsim_common::{Backlog, SimTime};

use crate::{DropPhase, DropReason, MarkReason};

/// A trace event emitted by a queue discipline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEvent {
    pub at: SimTime,
    pub kind: QueueEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEventKind {
    /// The occupancy changed.
    BacklogChanged { old: Backlog, new: Backlog },
    Dropped { uid: u64, bytes: u64, reason: DropReason, phase: DropPhase },
    Marked { uid: u64, reason: MarkReason },
    /// The Bolt signal budget changed.
    SignalTokensChanged { old: u32, new: u32 },
    /// The Bolt proactive ramp-up token count changed.
    PruTokensChanged { old: u32, new: u32 },
    /// A Bolt backward signal was generated for the packet `uid`.
    SignalSent { uid: u64, queue_bytes: u64 },
}
