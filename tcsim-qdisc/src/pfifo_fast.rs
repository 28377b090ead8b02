use tcsim_common::{Backlog, QueueLimit, SimTime};
use tracing::debug;

use crate::{
    Classifier, ConfigError, DropReason, PacketQueue, PrioMap, QueueDisc, QueueDiscCore,
    QueueItem, Verdict,
};

const BANDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PfifoFastConfig {
    /// Packet limit shared by the three bands.
    pub limit: QueueLimit,
    pub priomap: [u8; 16],
}

impl Default for PfifoFastConfig {
    fn default() -> Self {
        Self { limit: QueueLimit::Packets(1000), priomap: PrioMap::DEFAULT }
    }
}

impl PfifoFastConfig {
    pub fn with_limit(mut self, limit: QueueLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_priomap(mut self, priomap: [u8; 16]) -> Self {
        self.priomap = priomap;
        self
    }
}

/// Three FIFO bands served in strict order, band 0 first.
#[derive(Debug)]
pub struct PfifoFast {
    core: QueueDiscCore,
    priomap: PrioMap,
    bands: [PacketQueue; BANDS],
}

impl PfifoFast {
    pub fn new(config: PfifoFastConfig) -> Result<Self, ConfigError> {
        let priomap = PrioMap::new(config.priomap, BANDS, "pfifo_fast")?;
        let disc = Self {
            core: QueueDiscCore::new("pfifo_fast", Some(config.limit)),
            priomap,
            bands: Default::default(),
        };
        disc.check_config()?;
        debug!(limit = %config.limit, "created pfifo_fast");
        Ok(disc)
    }

    /// Occupancy of one band.
    pub fn band_backlog(&self, band: usize) -> Backlog {
        self.bands[band].backlog()
    }
}

impl QueueDisc for PfifoFast {
    fn core(&self) -> &QueueDiscCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut QueueDiscCore {
        &mut self.core
    }

    fn do_enqueue(&mut self, item: QueueItem, now: SimTime) -> Verdict {
        if !self.core.fits(item.wire_len()) {
            return self.core.drop_before_enqueue(&item, DropReason::CapacityExceeded, now);
        }
        let band = self.priomap.classify(&item) as usize;
        self.bands[band].push_back(item);
        Verdict::Accepted
    }

    fn do_dequeue(&mut self, _now: SimTime) -> Option<QueueItem> {
        self.bands.iter_mut().find_map(PacketQueue::pop_front)
    }

    fn inner_backlog(&self) -> Backlog {
        self.bands.iter().map(PacketQueue::backlog).sum()
    }

    fn check_config(&self) -> Result<(), ConfigError> {
        self.core.require_packet_limit()
    }

    fn do_reset(&mut self, _now: SimTime) {
        for band in &mut self.bands {
            band.clear();
        }
    }
}
