//! Flow queueing with a per-flow AQM law.
//!
//! Packets are hashed into flows, each with its own queue and its own instance of the law.
//! Flows are served by deficit round robin: a flow that just became active joins the new-flow
//! list, which is served before the old-flow list, so sparse flows see almost no queueing. A flow
//! that used up its quantum moves to the back of the old-flow list with a fresh quantum.
//!
//! Flow state lives in a slot arena. Slots are created on a flow's first packet and released
//! once the flow is serviced empty and leaves the lists. When `max_flows` slots are in use, an
//! arriving packet of a new flow evicts the oldest idle flow, or is dropped if every flow still
//! holds packets.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use tcsim_aqm::{Admission, AqmLaw, Cobalt, Codel, Pie};
use tcsim_common::{mix64, Backlog, PeriodicTimer, QueueLimit, SimTime};
use tracing::{debug, trace};

use crate::{
    aqm::Source, Classifier, ConfigError, DropReason, FlowHash, FlowId, PacketQueue, QueueDisc,
    QueueDiscCore, QueueItem, Verdict,
};

/// An AQM law that can manage the flows of a flow-queueing discipline.
pub trait FlowLaw: AqmLaw {
    /// Kind of the flow-queueing discipline built over this law.
    const FQ_KIND: &'static str;
}

impl FlowLaw for Codel {
    const FQ_KIND: &'static str = "fq_codel";
}

impl FlowLaw for Pie {
    const FQ_KIND: &'static str = "fq_pie";
}

impl FlowLaw for Cobalt {
    const FQ_KIND: &'static str = "fq_cobalt";
}

pub type FqCodel = FqQueueDisc<Codel>;
pub type FqPie = FqQueueDisc<Pie>;
pub type FqCobalt = FqQueueDisc<Cobalt>;

#[derive(Debug, Clone, PartialEq)]
pub struct FqConfig<C> {
    /// Limit over all flows.
    pub limit: QueueLimit,
    /// Number of hash buckets.
    pub flows: u32,
    /// Bytes a flow may send per round.
    pub quantum: u32,
    /// Most packets pushed out of the fattest flow to admit one arrival.
    pub drop_batch: u32,
    /// Most flows holding state at once.
    pub max_flows: usize,
    pub perturbation: u32,
    pub seed: u64,
    pub law: C,
}

impl<C: Default> Default for FqConfig<C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<C> FqConfig<C> {
    pub fn new(law: C) -> Self {
        Self {
            limit: QueueLimit::Packets(10_240),
            flows: 1024,
            quantum: 1514,
            drop_batch: 64,
            max_flows: 1024,
            perturbation: 0,
            seed: 0,
            law,
        }
    }

    pub fn with_limit(mut self, limit: QueueLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_flows(mut self, flows: u32) -> Self {
        self.flows = flows;
        self
    }

    pub fn with_quantum(mut self, quantum: u32) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn with_drop_batch(mut self, drop_batch: u32) -> Self {
        self.drop_batch = drop_batch;
        self
    }

    pub fn with_max_flows(mut self, max_flows: usize) -> Self {
        self.max_flows = max_flows;
        self
    }

    pub fn with_perturbation(mut self, perturbation: u32) -> Self {
        self.perturbation = perturbation;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowStatus {
    /// In neither list. Only ever seen on a flow created by the current arrival.
    Inactive,
    New,
    Old,
}

#[derive(Debug)]
struct Flow<L> {
    id: FlowId,
    queue: PacketQueue,
    deficit: i64,
    law: L,
    status: FlowStatus,
    last_active: SimTime,
}

/// A flow-queueing discipline over the per-flow law `L`.
#[derive(Debug)]
pub struct FqQueueDisc<L: FlowLaw> {
    core: QueueDiscCore,
    classifier: Box<dyn Classifier>,
    quantum: u32,
    drop_batch: u32,
    max_flows: usize,
    seed: u64,
    /// Cloned and re-seeded for every new flow.
    template: L,
    slots: Vec<Option<Flow<L>>>,
    free: Vec<usize>,
    index: FxHashMap<FlowId, usize>,
    new_flows: VecDeque<usize>,
    old_flows: VecDeque<usize>,
    timer: Option<PeriodicTimer>,
}

impl<L: FlowLaw> FqQueueDisc<L> {
    pub fn new(config: FqConfig<L::Config>) -> Result<Self, ConfigError> {
        let kind = L::FQ_KIND;
        for (name, value) in [
            ("quantum", config.quantum as usize),
            ("drop_batch", config.drop_batch as usize),
            ("max_flows", config.max_flows),
        ] {
            if value == 0 {
                return Err(ConfigError::zero(kind, name));
            }
        }
        let classifier = FlowHash::new(config.flows, config.perturbation)?;
        let template = L::new(config.law, config.seed)?;
        let timer = template.tick_interval().map(PeriodicTimer::new);

        let fq = Self {
            core: QueueDiscCore::new(kind, Some(config.limit)),
            classifier: Box::new(classifier),
            quantum: config.quantum,
            drop_batch: config.drop_batch,
            max_flows: config.max_flows,
            seed: config.seed,
            template,
            slots: Vec::new(),
            free: Vec::new(),
            index: FxHashMap::default(),
            new_flows: VecDeque::new(),
            old_flows: VecDeque::new(),
            timer,
        };
        fq.check_config()?;
        debug!(
            kind,
            limit = %config.limit,
            flows = config.flows,
            quantum = config.quantum,
            max_flows = config.max_flows,
            "created flow queueing disc"
        );
        Ok(fq)
    }

    /// Replaces the default five-tuple hash.
    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Number of flows holding state.
    pub fn flow_count(&self) -> usize {
        self.index.len()
    }

    /// Occupancy of flow `id`, if it holds state.
    pub fn flow_backlog(&self, id: FlowId) -> Option<Backlog> {
        self.index.get(&id).map(|&slot| self.flow(slot).queue.backlog())
    }

    /// The law of flow `id`, if it holds state.
    pub fn flow_law(&self, id: FlowId) -> Option<&L> {
        self.index.get(&id).map(|&slot| &self.flow(slot).law)
    }

    fn flow(&self, slot: usize) -> &Flow<L> {
        self.slots[slot].as_ref().expect("flow slot is vacant")
    }

    fn flow_mut(&mut self, slot: usize) -> &mut Flow<L> {
        self.slots[slot].as_mut().expect("flow slot is vacant")
    }

    /// Finds the slot of flow `id`, creating it if needed. Returns `None` if the flow table is
    /// full of busy flows.
    fn lookup_or_create(&mut self, id: FlowId, now: SimTime) -> Option<usize> {
        if let Some(&slot) = self.index.get(&id) {
            return Some(slot);
        }
        if self.index.len() >= self.max_flows && !self.evict_idle() {
            return None;
        }

        let mut law = self.template.clone();
        law.reset(self.seed ^ mix64(u64::from(id)));
        let flow = Flow {
            id,
            queue: PacketQueue::new(),
            deficit: 0,
            law,
            status: FlowStatus::Inactive,
            last_active: now,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(flow);
                slot
            }
            None => {
                self.slots.push(Some(flow));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        trace!(kind = self.core.kind(), flow = id, slot, "flow created");
        Some(slot)
    }

    /// Releases the idle flow that was active least recently. Returns `false` if every flow
    /// holds packets.
    fn evict_idle(&mut self) -> bool {
        let oldest = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, flow)| flow.as_ref().map(|flow| (slot, flow)))
            .filter(|(_, flow)| flow.queue.is_empty())
            .min_by_key(|(_, flow)| flow.last_active)
            .map(|(slot, _)| slot);

        let Some(slot) = oldest else { return false };
        self.new_flows.retain(|&s| s != slot);
        self.old_flows.retain(|&s| s != slot);
        trace!(kind = self.core.kind(), flow = self.flow(slot).id, "evicting idle flow");
        self.release(slot);
        true
    }

    /// Frees a slot. The flow must be empty and in neither list.
    fn release(&mut self, slot: usize) {
        let flow = self.slots[slot].take().expect("flow slot is vacant");
        assert!(flow.queue.is_empty(), "releasing flow {} with queued packets", flow.id);
        self.index.remove(&flow.id);
        self.free.push(slot);
        trace!(kind = self.core.kind(), flow = flow.id, slot, "flow released");
    }

    /// Releases a flow created for an arrival that was then refused.
    fn release_if_unused(&mut self, slot: usize) {
        let flow = self.flow(slot);
        if flow.status == FlowStatus::Inactive && flow.queue.is_empty() {
            self.release(slot);
        }
    }

    /// The flow holding the most bytes.
    fn fattest(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, flow)| flow.as_ref().map(|flow| (slot, flow.queue.backlog().bytes)))
            .filter(|&(_, bytes)| bytes > 0)
            .max_by_key(|&(_, bytes)| bytes)
            .map(|(slot, _)| slot)
    }

    /// Makes room for an arrival to flow `slot` by pushing packets out of the head of the
    /// fattest flow, until half of its bytes are gone or `drop_batch` packets were dropped.
    /// Returns `false` if the arrival's own flow is the fattest.
    fn push_out(&mut self, slot: usize, now: SimTime) -> bool {
        let Some(fattest) = self.fattest().filter(|&fattest| fattest != slot) else {
            return false;
        };

        let flow = self.slots[fattest].as_mut().expect("flow slot is vacant");
        let threshold = flow.queue.backlog().bytes / 2;
        let mut dropped = 0;
        let mut dropped_bytes = 0;
        while let Some(item) = flow.queue.pop_front() {
            dropped += 1;
            dropped_bytes += item.wire_len();
            self.core.drop_after_enqueue(item, DropReason::Overlimit, now);
            if dropped >= self.drop_batch || dropped_bytes >= threshold {
                break;
            }
        }
        flow.law.on_overflow(now);
        trace!(
            kind = self.core.kind(),
            flow = flow.id,
            dropped,
            dropped_bytes,
            "pushed out of fattest flow"
        );
        true
    }
}

impl<L: FlowLaw> QueueDisc for FqQueueDisc<L> {
    fn core(&self) -> &QueueDiscCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut QueueDiscCore {
        &mut self.core
    }

    fn do_enqueue(&mut self, mut item: QueueItem, now: SimTime) -> Verdict {
        let id = self.classifier.classify(&item);
        let Some(slot) = self.lookup_or_create(id, now) else {
            return self.core.drop_before_enqueue(&item, DropReason::FlowLimit, now);
        };
        let len = item.wire_len();

        let flow = self.slots[slot].as_mut().expect("flow slot is vacant");
        match flow.law.on_enqueue(flow.queue.backlog(), len, item.ecn.is_capable(), now) {
            Admission::Admit => {}
            Admission::Mark(reason) => {
                if !self.core.mark(&mut item, reason.into(), now) {
                    let verdict = self.core.drop_before_enqueue(&item, reason.into(), now);
                    self.release_if_unused(slot);
                    return verdict;
                }
            }
            Admission::Drop(reason) => {
                let verdict = self.core.drop_before_enqueue(&item, reason.into(), now);
                self.release_if_unused(slot);
                return verdict;
            }
        }

        if !self.core.fits(len) && (!self.push_out(slot, now) || !self.core.fits(len)) {
            self.flow_mut(slot).law.on_overflow(now);
            let verdict = self.core.drop_before_enqueue(&item, DropReason::CapacityExceeded, now);
            self.release_if_unused(slot);
            return verdict;
        }

        let quantum = i64::from(self.quantum);
        let flow = self.flow_mut(slot);
        flow.queue.push_back(item);
        flow.last_active = now;
        if flow.status == FlowStatus::Inactive {
            flow.status = FlowStatus::New;
            flow.deficit = quantum;
            self.new_flows.push_back(slot);
        }
        Verdict::Accepted
    }

    fn do_dequeue(&mut self, now: SimTime) -> Option<QueueItem> {
        loop {
            let (slot, from_new) = match (self.new_flows.front(), self.old_flows.front()) {
                (Some(&slot), _) => (slot, true),
                (None, Some(&slot)) => (slot, false),
                (None, None) => return None,
            };
            let quantum = i64::from(self.quantum);

            let flow = self.slots[slot].as_mut().expect("flow slot is vacant");
            if flow.deficit <= 0 {
                flow.deficit += quantum;
                flow.status = FlowStatus::Old;
                if from_new {
                    self.new_flows.pop_front();
                } else {
                    self.old_flows.pop_front();
                }
                self.old_flows.push_back(slot);
                continue;
            }

            let mut source = Source { queue: &mut flow.queue, core: &mut self.core };
            if let Some(item) = flow.law.dequeue(&mut source, now) {
                flow.deficit -= item.wire_len() as i64;
                flow.last_active = now;
                return Some(item);
            }

            // Serviced empty. A new flow gets one pass through the old list first, so that
            // it cannot starve the old flows by coming back as new.
            if from_new {
                self.new_flows.pop_front();
                if !self.old_flows.is_empty() {
                    flow.status = FlowStatus::Old;
                    self.old_flows.push_back(slot);
                    continue;
                }
            } else {
                self.old_flows.pop_front();
            }
            flow.status = FlowStatus::Inactive;
            self.release(slot);
        }
    }

    fn inner_backlog(&self) -> Backlog {
        self.slots.iter().flatten().map(|flow| flow.queue.backlog()).sum()
    }

    fn check_config(&self) -> Result<(), ConfigError> {
        self.core.check_limit()
    }

    fn do_reset(&mut self, now: SimTime) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.new_flows.clear();
        self.old_flows.clear();
        self.template.reset(self.seed);
        if let Some(timer) = &mut self.timer {
            timer.arm(now);
        }
    }

    fn next_due(&self) -> Option<SimTime> {
        self.timer.as_ref().and_then(PeriodicTimer::due)
    }

    fn on_tick(&mut self, now: SimTime) {
        if self.timer.as_mut().is_some_and(|timer| timer.fire(now) > 0) {
            for flow in self.slots.iter_mut().flatten() {
                flow.law.tick(flow.queue.backlog(), now);
            }
        }
    }
}
