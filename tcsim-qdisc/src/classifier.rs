use std::{
    fmt,
    hash::{Hash, Hasher},
};

use rustc_hash::FxHasher;
use tcsim_common::mix64;
use tcsim_packet::Packet;
use tracing::{trace, warn};

use crate::ConfigError;

/// Index of a flow, band or transmit queue within a discipline.
pub type FlowId = u32;

/// Maps a packet onto one of the queues of a discipline.
pub trait Classifier: fmt::Debug + Send {
    fn classify(&self, packet: &Packet) -> FlowId;
}

/// Puts every packet in queue 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleQueue;

impl Classifier for SingleQueue {
    #[inline]
    fn classify(&self, _packet: &Packet) -> FlowId {
        0
    }
}

/// Hashes the five-tuple into one of `buckets` flows.
///
/// The hash is deterministic: identical tuples and perturbation always land in the same bucket.
/// Packets without a five-tuple go to the `fallback` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowHash {
    buckets: u32,
    perturbation: u32,
    fallback: FlowId,
}

impl FlowHash {
    pub fn new(buckets: u32, perturbation: u32) -> Result<Self, ConfigError> {
        if buckets == 0 {
            return Err(ConfigError::zero("flow hash", "buckets"));
        }
        Ok(Self { buckets, perturbation, fallback: 0 })
    }

    /// Sets the bucket of packets without a five-tuple. Out of range values wrap around.
    pub fn with_fallback(mut self, fallback: FlowId) -> Self {
        self.fallback = fallback % self.buckets;
        self
    }

    pub const fn buckets(&self) -> u32 {
        self.buckets
    }
}

impl Classifier for FlowHash {
    fn classify(&self, packet: &Packet) -> FlowId {
        let Some(flow) = &packet.flow else {
            trace!(uid = packet.uid, bucket = self.fallback, "no five-tuple, using fallback");
            return self.fallback;
        };

        let mut hasher = FxHasher::default();
        self.perturbation.hash(&mut hasher);
        flow.hash(&mut hasher);
        (mix64(hasher.finish()) % u64::from(self.buckets)) as FlowId
    }
}

/// Maps the low four bits of the packet priority onto a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrioMap {
    map: [u8; 16],
}

impl PrioMap {
    /// The Linux default map over three bands.
    pub const DEFAULT: [u8; 16] = [1, 2, 2, 2, 1, 2, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1];

    /// Creates a map, failing if an entry points past the last of `bands` bands.
    pub fn new(map: [u8; 16], bands: usize, kind: &'static str) -> Result<Self, ConfigError> {
        if bands == 0 {
            return Err(ConfigError::NoBands { kind });
        }
        if let Some(&band) = map.iter().find(|&&band| usize::from(band) >= bands) {
            return Err(ConfigError::PriomapOutOfRange { kind, band, bands });
        }
        Ok(Self { map })
    }

    pub const fn map(&self) -> &[u8; 16] {
        &self.map
    }
}

impl Default for PrioMap {
    fn default() -> Self {
        Self { map: Self::DEFAULT }
    }
}

impl Classifier for PrioMap {
    #[inline]
    fn classify(&self, packet: &Packet) -> FlowId {
        FlowId::from(self.map[usize::from(packet.priority & 0x0f)])
    }
}

/// Uses the transmit queue chosen by the device. Out of range queues fall back to queue 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxQueue {
    queues: u16,
}

impl TxQueue {
    pub const fn new(queues: u16) -> Self {
        Self { queues }
    }
}

impl Classifier for TxQueue {
    fn classify(&self, packet: &Packet) -> FlowId {
        if packet.tx_queue < self.queues {
            return FlowId::from(packet.tx_queue);
        }
        warn!(
            uid = packet.uid,
            tx_queue = packet.tx_queue,
            queues = self.queues,
            "tx queue out of range, using queue 0"
        );
        0
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use rand::{rngs::StdRng, Rng, SeedableRng};
    use tcsim_packet::{FlowTuple, Protocol};

    use super::*;

    fn tcp(src: u32, src_port: u16, dst_port: u16) -> FlowTuple {
        FlowTuple::new(
            Protocol::Tcp,
            IpAddr::V4(Ipv4Addr::from(src)),
            src_port,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst_port,
        )
    }

    #[test]
    fn flow_hash_is_stable() {
        let hash = FlowHash::new(1024, 7).unwrap();
        let packet = Packet::new(1, 100).with_flow(tcp(0x0a00_0002, 40_000, 80));
        let again = Packet::new(2, 1_500).with_flow(tcp(0x0a00_0002, 40_000, 80));
        assert_eq!(hash.classify(&packet), hash.classify(&again));
        assert!(hash.classify(&packet) < 1024);

        let reseeded = FlowHash::new(1024, 8).unwrap();
        let moved = (0..64u16)
            .map(|port| Packet::new(0, 100).with_flow(tcp(1, port, 80)))
            .filter(|p| hash.classify(p) != reseeded.classify(p))
            .count();
        assert!(moved > 32, "perturbation moved only {moved} of 64 flows");
    }

    #[test]
    fn flow_hash_falls_back_without_tuple() {
        let hash = FlowHash::new(16, 0).unwrap().with_fallback(21);
        assert_eq!(hash.classify(&Packet::new(1, 100)), 5);
        assert!(FlowHash::new(0, 0).is_err());
    }

    #[test]
    fn flow_hash_is_uniform() {
        const BUCKETS: usize = 64;
        const SAMPLES: usize = 64_000;

        let hash = FlowHash::new(BUCKETS as u32, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts = [0u64; BUCKETS];
        for _ in 0..SAMPLES {
            let packet = Packet::new(0, 100).with_flow(tcp(rng.gen(), rng.gen(), rng.gen()));
            counts[hash.classify(&packet) as usize] += 1;
        }

        let expected = (SAMPLES / BUCKETS) as f64;
        let chi_square: f64 =
            counts.iter().map(|&c| (c as f64 - expected).powi(2) / expected).sum();
        // 63 degrees of freedom, p = 0.001
        assert!(chi_square < 103.4, "chi-square {chi_square}");
    }

    #[test]
    fn prio_map_uses_low_bits() {
        let map = PrioMap::default();
        assert_eq!(map.classify(&Packet::new(0, 100).with_priority(6)), 0);
        assert_eq!(map.classify(&Packet::new(0, 100).with_priority(0x10 | 6)), 0);
        assert_eq!(map.classify(&Packet::new(0, 100).with_priority(1)), 2);
        assert_eq!(map.classify(&Packet::new(0, 100)), 1);

        let err = PrioMap::new([3; 16], 3, "prio").unwrap_err();
        assert_eq!(err, ConfigError::PriomapOutOfRange { kind: "prio", band: 3, bands: 3 });
    }

    #[test]
    fn tx_queue_out_of_range_falls_back() {
        let classifier = TxQueue::new(4);
        assert_eq!(classifier.classify(&Packet::new(0, 100).with_tx_queue(3)), 3);
        assert_eq!(classifier.classify(&Packet::new(0, 100).with_tx_queue(4)), 0);
    }
}
