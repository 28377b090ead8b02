use rand::{rngs::StdRng, Rng, SeedableRng};
use tcsim::{
    common::Recorder, AqmConfig, CobaltConfig, FqConfig, Packet, PieConfig, Protocol, QdiscConfig,
    QueueDisc, QueueDiscStats, QueueEvent, QueueLimit, RedConfig, SimTime,
};

use crate::{fire_ticks, tuple};

/// Offers a fixed overload to `q`, returning what it reported.
fn replay(q: &mut dyn QueueDisc) -> (Vec<QueueEvent>, QueueDiscStats) {
    let recorder = Recorder::default();
    q.subscribe(Box::new(recorder.callback()));
    q.reset(SimTime::ZERO);

    let mut rng = StdRng::seed_from_u64(7);
    for uid in 0..3_000u64 {
        let now = SimTime::from_micros(uid * 100);
        fire_ticks(q, now);
        let flow = tuple(Protocol::Udp, rng.gen_range(1..=4), 1_000);
        let _ = q.enqueue(Packet::new(uid, rng.gen_range(500..=1_500)).with_flow(flow), now);
        if uid % 2 == 0 {
            let _ = q.dequeue(now);
        }
    }
    (recorder.take(), *q.stats())
}

#[test]
fn randomized_laws_replay_identically() {
    let _ = tracing_subscriber::fmt::try_init();

    let red = RedConfig::default().with_thresholds(5.0, 40.0).with_max_p(0.2);
    let trees = [
        QdiscConfig::Red(AqmConfig::new(red).with_seed(3).with_limit(QueueLimit::Packets(100))),
        QdiscConfig::Pie(AqmConfig::new(PieConfig::default()).with_seed(3)),
        QdiscConfig::FqCobalt(FqConfig::new(CobaltConfig::default()).with_seed(3)),
    ];

    for tree in trees {
        let mut first = tree.clone().build().unwrap();
        let (events, stats) = replay(first.as_mut());
        assert!(stats.total_dropped().packets > 0, "{} never dropped", first.kind());

        // after a reset, and on a fresh instance built from the same configuration
        assert_eq!(replay(first.as_mut()), (events.clone(), stats));
        let mut fresh = tree.build().unwrap();
        assert_eq!(replay(fresh.as_mut()), (events, stats));
    }
}
