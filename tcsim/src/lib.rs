#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Traffic-control queue disciplines for discrete-event network simulation.
//!
//! Re-exports the member crates: the shared building blocks of [`common`], the [`packet`] handle,
//! the AQM control laws of [`aqm`] and the disciplines themselves at the crate root.

pub use tcsim_aqm as aqm;
pub use tcsim_common as common;
pub use tcsim_packet as packet;

pub use tcsim_common::{Backlog, DataRate, QueueLimit, SimTime, Tick};
pub use tcsim_packet::{BoltFlags, BoltHeader, Ecn, FlowTuple, Packet, Protocol};
pub use tcsim_qdisc::*;
