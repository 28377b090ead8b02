use tcsim_common::{Backlog, SimTime};
use tracing::debug;

use crate::{
    disc::with_child, Classifier, ConfigError, DropPhase, Fifo, FifoConfig, PrioMap, QueueDisc,
    QueueDiscCore, QueueItem, Verdict,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrioConfig {
    /// Number of bands, each served by a default FIFO.
    pub bands: usize,
    pub priomap: [u8; 16],
}

impl Default for PrioConfig {
    fn default() -> Self {
        Self { bands: 3, priomap: PrioMap::DEFAULT }
    }
}

impl PrioConfig {
    pub fn with_bands(mut self, bands: usize) -> Self {
        self.bands = bands;
        self
    }

    pub fn with_priomap(mut self, priomap: [u8; 16]) -> Self {
        self.priomap = priomap;
        self
    }
}

/// Strict priority over child disciplines: a band is served only when every lower-numbered band
/// is empty.
#[derive(Debug)]
pub struct Prio {
    core: QueueDiscCore,
    priomap: PrioMap,
    children: Vec<Box<dyn QueueDisc>>,
}

impl Prio {
    /// Creates a PRIO discipline with a default FIFO in each band.
    pub fn new(config: PrioConfig) -> Result<Self, ConfigError> {
        let children = (0..config.bands)
            .map(|_| {
                Fifo::new(FifoConfig::default()).map(|fifo| Box::new(fifo) as Box<dyn QueueDisc>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::with_children(config.priomap, children)
    }

    /// Creates a PRIO discipline over the given children, band 0 first.
    pub fn with_children(
        priomap: [u8; 16],
        children: Vec<Box<dyn QueueDisc>>,
    ) -> Result<Self, ConfigError> {
        let priomap = PrioMap::new(priomap, children.len(), "prio")?;
        let prio = Self { core: QueueDiscCore::new("prio", None), priomap, children };
        prio.check_config()?;
        debug!(bands = prio.children.len(), "created prio");
        Ok(prio)
    }

    pub fn bands(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, band: usize) -> &dyn QueueDisc {
        self.children[band].as_ref()
    }
}

impl QueueDisc for Prio {
    fn core(&self) -> &QueueDiscCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut QueueDiscCore {
        &mut self.core
    }

    fn do_enqueue(&mut self, item: QueueItem, now: SimTime) -> Verdict {
        let band = self.priomap.classify(&item) as usize;
        let (uid, len) = (item.uid, item.wire_len());
        let verdict = with_child(&mut self.core, self.children[band].as_mut(), |child| {
            child.enqueue(item.into_packet(), now)
        });
        if let Verdict::Dropped(reason) = verdict {
            self.core.record_drop(uid, len, reason, DropPhase::BeforeEnqueue, now);
        }
        verdict
    }

    fn do_dequeue(&mut self, now: SimTime) -> Option<QueueItem> {
        for child in &mut self.children {
            let packet = with_child(&mut self.core, child.as_mut(), |child| child.dequeue(now));
            if let Some(packet) = packet {
                return Some(QueueItem::new(packet, now));
            }
        }
        None
    }

    fn inner_backlog(&self) -> Backlog {
        self.children.iter().map(|child| child.backlog()).sum()
    }

    fn check_config(&self) -> Result<(), ConfigError> {
        if self.children.is_empty() {
            return Err(ConfigError::NoBands { kind: "prio" });
        }
        self.children.iter().try_for_each(|child| child.check_config())
    }

    fn do_reset(&mut self, now: SimTime) {
        for child in &mut self.children {
            child.reset(now);
        }
    }

    fn next_due(&self) -> Option<SimTime> {
        self.children.iter().filter_map(|child| child.next_tick()).map(|tick| tick.due).min()
    }

    fn on_tick(&mut self, now: SimTime) {
        for child in &mut self.children {
            if let Some(tick) = child.next_tick().filter(|tick| tick.due <= now) {
                with_child(&mut self.core, child.as_mut(), |child| child.tick(tick, now));
            }
        }
    }

    fn next_wakeup(&self) -> Option<SimTime> {
        self.children.iter().filter_map(|child| child.next_wakeup()).min()
    }
}
