use std::{collections::HashSet, time::Duration};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tcsim::{
    AqmConfig, BoltConfig, BoltFlags, BoltHeader, CobaltConfig, CodelConfig, DataRate, Ecn,
    FifoConfig, FqConfig, Overflow, Packet, PfifoFastConfig, PieConfig, PrioConfig, Protocol,
    QdiscConfig, QueueDisc, QueueLimit, RedConfig, SimTime, TbfConfig,
};

use crate::{fire_ticks, tuple};

const SEEDS: u64 = 8;
const OPS: usize = 2_000;

fn trees() -> Vec<QdiscConfig> {
    let small = QueueLimit::Packets(60);
    vec![
        QdiscConfig::Fifo(FifoConfig::default().with_limit(QueueLimit::Packets(50))),
        QdiscConfig::Fifo(
            FifoConfig::default()
                .with_limit(QueueLimit::Bytes(40_000))
                .with_overflow(Overflow::DropHead),
        ),
        QdiscConfig::PfifoFast(PfifoFastConfig::default().with_limit(QueueLimit::Packets(50))),
        QdiscConfig::Prio { config: PrioConfig::default(), children: None },
        QdiscConfig::Mq { children: vec![QdiscConfig::Codel(AqmConfig::default()); 4] },
        QdiscConfig::Tbf {
            config: TbfConfig::default()
                .with_rate(DataRate::from_mbps(8))
                .with_burst(3_000)
                .with_peak_rate(DataRate::from_mbps(16), 1_500),
            child: Some(Box::new(QdiscConfig::FqCodel(
                FqConfig::default().with_limit(QueueLimit::Packets(100)),
            ))),
        },
        QdiscConfig::Red(AqmConfig::new(RedConfig::default().with_ecn(true)).with_limit(small)),
        QdiscConfig::Codel(AqmConfig::new(CodelConfig::default().with_ecn(true)).with_limit(small)),
        QdiscConfig::Pie(AqmConfig::new(PieConfig::default()).with_limit(small)),
        QdiscConfig::Cobalt(AqmConfig::new(CobaltConfig::default()).with_limit(small)),
        QdiscConfig::FqCodel(FqConfig::default().with_limit(QueueLimit::Packets(80))),
        QdiscConfig::FqPie(FqConfig::default().with_limit(QueueLimit::Bytes(60_000))),
        QdiscConfig::FqCobalt(
            FqConfig::default()
                .with_limit(QueueLimit::Packets(40))
                .with_flows(16)
                .with_max_flows(4)
                .with_drop_batch(3),
        ),
        QdiscConfig::Bolt(
            BoltConfig::default()
                .with_limit(QueueLimit::Packets(40))
                .with_link_rate(DataRate::from_mbps(100))
                .with_bts(true)
                .with_abs(true)
                .with_pru(true)
                .with_sm(true)
                .with_signal_budget(2, 1, Duration::from_micros(50)),
        ),
    ]
}

fn random_packet(rng: &mut impl Rng, uid: u64) -> Packet {
    let mut packet = Packet::new(uid, rng.gen_range(64..=1_500))
        .with_priority(rng.gen_range(0..16))
        .with_tx_queue(rng.gen_range(0..4))
        .with_ecn(if rng.gen_bool(0.5) { Ecn::Ect0 } else { Ecn::NotEct });
    if rng.gen_bool(0.9) {
        packet = packet.with_flow(tuple(Protocol::Bolt, rng.gen_range(1..=8), 1_000));
    }
    if rng.gen_bool(0.5) {
        let flags = [BoltFlags::EMPTY, BoltFlags::LAST, BoltFlags::INCWIN, BoltFlags::DECWIN];
        packet = packet.with_bolt(BoltHeader::new(BoltFlags::DATA | flags[rng.gen_range(0..4)]));
    }
    packet
}

/// Drives `q` with a random mix of operations and checks, from the outside, that no packet is
/// created, lost or duplicated and that the limit holds.
fn exercise(q: &mut dyn QueueDisc, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut now = SimTime::ZERO;
    q.run(now).unwrap();

    let mut offered = 0u64;
    let mut refused = HashSet::new();
    let mut delivered = HashSet::new();

    for uid in 0..OPS as u64 {
        now += Duration::from_micros(rng.gen_range(0..200));
        fire_ticks(q, now);

        match rng.gen_range(0..10) {
            0..=4 => {
                offered += 1;
                if q.enqueue(random_packet(&mut rng, uid), now).is_dropped() {
                    refused.insert(uid);
                }
            }
            5..=7 => {
                if let Some(packet) = q.dequeue(now) {
                    let uid = packet.uid;
                    assert!(delivered.insert(uid), "{}: {uid} sent twice", q.kind());
                }
            }
            8 => {
                let _ = q.peek(now);
            }
            _ => {
                if let Some(packet) = q.dequeue(now) {
                    q.requeue(packet, now);
                }
            }
        }

        let stats = q.stats();
        assert_eq!(q.backlog(), stats.implied_backlog(), "{}", q.kind());
        let dropped_on_arrival = stats.total_dropped_before_enqueue().packets;
        assert_eq!(offered, stats.enqueued().packets + dropped_on_arrival);
        assert_eq!(refused.len() as u64, dropped_on_arrival);
        assert_eq!(
            delivered.len() as u64,
            stats.dequeued().packets - stats.requeued().packets,
            "{}",
            q.kind()
        );
        if let Some(limit) = q.limit() {
            let backlog = q.backlog();
            assert!(!limit.exceeded_by(backlog), "{}: {backlog:?} over {limit}", q.kind());
        }
    }

    assert!(delivered.is_disjoint(&refused));
    assert!(!delivered.is_empty(), "{} never sent anything", q.kind());
}

#[test]
fn randomized_operations_conserve_packets() {
    let _ = tracing_subscriber::fmt::try_init();

    for tree in trees() {
        for seed in 0..SEEDS {
            let mut q = tree.clone().build().unwrap();
            exercise(q.as_mut(), seed);
        }
    }
}
