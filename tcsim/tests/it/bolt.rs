use std::time::Duration;

use tcsim::{
    Bolt, BoltConfig, BoltFlags, BoltHeader, DataRate, Ecn, MarkReason, Packet, Protocol,
    QueueDisc, SimTime,
};

use crate::{fire_ticks, tuple};

/// Two senders overload a 10 Gbps bottleneck 2.4 times for 100 microseconds.
#[test]
fn bottleneck_signals_senders_within_budget() {
    let _ = tracing_subscriber::fmt::try_init();

    let rate = DataRate::from_gbps(10);
    let config = BoltConfig::default()
        .with_link_rate(rate)
        .with_bts(true)
        .with_signal_budget(4, 1, Duration::from_micros(1));
    let mut q = Bolt::new(config).unwrap();
    q.run(SimTime::ZERO).unwrap();

    let senders = [tuple(Protocol::Bolt, 1, 1000), tuple(Protocol::Bolt, 2, 1000)];
    let mut delivered = Vec::new();
    let mut signals = Vec::new();
    let mut ticks = 0;
    let mut next_tx = SimTime::ZERO;
    let mut uid = 0;

    for step in 0..3_000u64 {
        let now = SimTime::from_nanos(step * 100);
        if step % 10 == 0 && step < 1_000 {
            for flow in senders {
                let packet = Packet::new(uid, 1_500)
                    .with_flow(flow)
                    .with_ecn(Ecn::Ect0)
                    .with_bolt(BoltHeader::new(BoltFlags::DATA));
                assert!(q.enqueue(packet, now).is_accepted());
                uid += 1;
            }
        }
        ticks += fire_ticks(&mut q, now);
        signals.extend(q.take_signals());

        if next_tx <= now {
            if let Some(packet) = q.dequeue(now) {
                next_tx = now + rate.tx_time(packet.wire_len());
                delivered.push(packet);
            }
        }
    }

    assert_eq!(delivered.len(), 200);
    assert!(q.backlog().is_empty());

    // every signal goes back to one of the senders
    assert!(!signals.is_empty());
    for signal in &signals {
        let flow = signal.flow.unwrap();
        assert!(senders.iter().any(|sender| sender.reversed() == flow));
        assert!(signal.queue_bytes > q.config().cc_threshold);
        assert_eq!(signal.link_rate, rate);
    }
    assert_eq!(signals.len() as u64, q.signals_sent());
    assert!(q.signals_sent() <= 4 + ticks as u64);
    assert!(q.signals_suppressed() > 0);

    let decwin = delivered
        .iter()
        .filter(|p| p.bolt.is_some_and(|bolt| bolt.flags.contains(BoltFlags::DECWIN)))
        .count();
    assert_eq!(decwin, signals.len());

    let ce = delivered.iter().filter(|p| p.ecn == Ecn::Ce).count() as u64;
    assert!(ce > 0);
    assert_eq!(ce, q.stats().marked(MarkReason::CongestionThreshold).packets);
    let peak = delivered.iter().filter_map(|p| p.bolt).map(|bolt| bolt.queue_occupancy).max();
    assert!(peak.unwrap() > 100_000);
}
