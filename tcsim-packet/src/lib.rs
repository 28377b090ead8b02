#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! The packet handle handed to queue disciplines, and the header fields they read or rewrite.
//!
//! Only the fields a queue discipline needs are modelled: the wire length, the five-tuple used
//! for flow classification, the ECN codepoint, the priority and transmit-queue selectors, and the
//! Bolt congestion-control header used by the datacenter signaling discipline.

use bytes::Bytes;

mod bolt;
pub use bolt::{BoltFlags, BoltHeader};

mod flow;
pub use flow::{FlowTuple, Protocol};

/// The two ECN bits of the IP header (RFC 3168).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Ecn {
    /// Not ECN-capable transport.
    #[default]
    NotEct,
    /// ECN-capable transport, codepoint 1.
    Ect1,
    /// ECN-capable transport, codepoint 0.
    Ect0,
    /// Congestion experienced.
    Ce,
}

impl Ecn {
    /// Returns `true` if the packet may be marked instead of dropped.
    #[inline]
    pub const fn is_capable(self) -> bool {
        !matches!(self, Self::NotEct)
    }
}

/// A packet travelling through a queue discipline.
///
/// `size` is the length on the wire and is what every byte counter uses. The optional payload is
/// carried through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Unique identifier assigned by the simulator.
    pub uid: u64,
    /// Length on the wire, in bytes.
    pub size: u32,
    /// Socket priority. The low four bits select a band through a priority map.
    pub priority: u8,
    /// Transmit queue selected by the device, used by multi-queue disciplines.
    pub tx_queue: u16,
    /// Five-tuple, if the packet carries a transport header the classifier understands.
    pub flow: Option<FlowTuple>,
    pub ecn: Ecn,
    /// Bolt header, present on Bolt transport packets only.
    pub bolt: Option<BoltHeader>,
    pub payload: Bytes,
}

impl Packet {
    /// Creates a packet with the given identifier and wire length and no headers.
    pub fn new(uid: u64, size: u32) -> Self {
        Self {
            uid,
            size,
            priority: 0,
            tx_queue: 0,
            flow: None,
            ecn: Ecn::NotEct,
            bolt: None,
            payload: Bytes::new(),
        }
    }

    /// The wire length as the `u64` every byte counter uses.
    #[inline]
    pub const fn wire_len(&self) -> u64 {
        self.size as u64
    }

    pub fn with_flow(mut self, flow: FlowTuple) -> Self {
        self.flow = Some(flow);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tx_queue(mut self, tx_queue: u16) -> Self {
        self.tx_queue = tx_queue;
        self
    }

    pub fn with_ecn(mut self, ecn: Ecn) -> Self {
        self.ecn = ecn;
        self
    }

    pub fn with_bolt(mut self, bolt: BoltHeader) -> Self {
        self.bolt = Some(bolt);
        self
    }

    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }
}
