use tcsim::{
    Classifier, CodelConfig, FlowId, FqCodel, FqConfig, Packet, Protocol, QueueDisc, SimTime,
};

use crate::tuple;

/// One flow per source port.
#[derive(Debug)]
struct ByPort;

impl Classifier for ByPort {
    fn classify(&self, packet: &Packet) -> FlowId {
        packet.flow.map_or(0, |flow| u32::from(flow.src_port))
    }
}

/// A sender ten times faster than the link shares it evenly with a sparse one.
#[test]
fn sparse_flow_keeps_its_share() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut q = FqCodel::new(FqConfig::new(CodelConfig::default()))
        .unwrap()
        .with_classifier(Box::new(ByPort));
    q.run(SimTime::ZERO).unwrap();

    let (heavy, sparse) = (tuple(Protocol::Udp, 1, 1), tuple(Protocol::Udp, 2, 2));
    let (mut a, mut b) = (0u64, 0u64);
    let mut uid = 0;
    for round in 0..500 {
        let now = SimTime::from_millis(round);
        for _ in 0..10 {
            let _ = q.enqueue(Packet::new(uid, 1_000).with_flow(heavy), now);
            uid += 1;
        }
        let _ = q.enqueue(Packet::new(uid, 1_000).with_flow(sparse), now);
        uid += 1;

        for _ in 0..2 {
            match q.dequeue(now).and_then(|p| p.flow).map(|flow| flow.src_port) {
                Some(1) => a += 1,
                Some(2) => b += 1,
                _ => {}
            }
        }
    }

    assert!(b >= 450, "sparse flow got {b} of 500");
    assert!(a as f64 <= 1.25 * b as f64, "heavy {a}, sparse {b}");
    // the heavy flow pays for its excess
    assert!(q.stats().total_dropped().packets > 0);
}
