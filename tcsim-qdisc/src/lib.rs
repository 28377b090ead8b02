#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Queue disciplines for a discrete-event network simulator.
//!
//! Every discipline implements [`QueueDisc`]: the simulator offers packets with
//! [`QueueDisc::enqueue`], pulls them with [`QueueDisc::dequeue`] when the device can transmit,
//! and delivers the periodic ticks a discipline asks for through [`QueueDisc::next_tick`].
//! Disciplines never read a clock; every call carries the simulation time.
//!
//! ```text
//!   enqueue ──► classify ──► admit (limit, AQM law) ──► queue(s) ──► dequeue
//!                                  │                        │
//!                                  └──── drops, marks ──────┴──► stats + events
//! ```
//!
//! Composite disciplines ([`Prio`], [`Mq`], [`Tbf`]) own child disciplines and fold their
//! children's drops and marks into their own statistics. Whole trees can be described with
//! [`QdiscConfig`] and built in one go.

mod aqm;
pub use aqm::{AqmConfig, AqmQueueDisc, CobaltQueueDisc, CodelQueueDisc, PieQueueDisc, RedQueueDisc};

mod bolt;
pub use bolt::{Bolt, BoltConfig, BoltSignal};

mod classifier;
pub use classifier::{Classifier, FlowHash, FlowId, PrioMap, SingleQueue, TxQueue};

mod config;
pub use config::QdiscConfig;

mod disc;
pub use disc::{QueueDisc, QueueDiscCore, Verdict};

mod error;
pub use error::ConfigError;

mod event;
pub use event::{QueueEvent, QueueEventKind};

mod fifo;
pub use fifo::{Fifo, FifoConfig, Overflow};

mod fq;
pub use fq::{FlowLaw, FqCobalt, FqCodel, FqConfig, FqPie, FqQueueDisc};

mod mq;
pub use mq::Mq;

mod pfifo_fast;
pub use pfifo_fast::{PfifoFast, PfifoFastConfig};

mod prio;
pub use prio::{Prio, PrioConfig};

mod queue;
pub use queue::{PacketQueue, QueueItem};

mod stats;
pub use stats::{Counter, DropPhase, DropReason, MarkReason, QueueDiscStats};

mod tbf;
pub use tbf::{Tbf, TbfConfig};

pub use tcsim_aqm::{CobaltConfig, CodelConfig, PieConfig, RedConfig};
