//! A dumbbell: eight Bolt senders share a 10 Gbps bottleneck guarded by a Bolt queue.
//!
//! Senders start at line rate and react to the backward signals the queue sends them: every
//! signal halves the sender's rate, down to 1% of the link. A sender that went 10 microseconds
//! without a signal asks for more with `INCWIN`, and every request the queue grants adds 1% of
//! the link rate. The queue's statistics are printed at the end.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use bytes::Bytes;
use tcsim::{
    Bolt, BoltConfig, BoltFlags, BoltHeader, DataRate, Ecn, FlowTuple, MarkReason, Packet,
    Protocol, QueueDisc, SimTime,
};
use tracing::info;

const SENDERS: u8 = 8;
const MTU: u32 = 1_500;
const DURATION: Duration = Duration::from_millis(2);
const STEP: Duration = Duration::from_nanos(100);

struct Sender {
    flow: FlowTuple,
    rate: DataRate,
    next_send: SimTime,
    last_signal: SimTime,
    signals: u64,
}

fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let link = DataRate::from_gbps(10);
    let config = BoltConfig::default()
        .with_link_rate(link)
        .with_bts(true)
        .with_abs(true)
        .with_pru(true)
        .with_signal_budget(4, 1, Duration::from_micros(1));
    let mut queue = Bolt::new(config).expect("valid bolt configuration");
    queue.run(SimTime::ZERO).expect("bolt starts");

    let receiver = IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1));
    let mut senders: Vec<_> = (1..=SENDERS)
        .map(|host| Sender {
            flow: FlowTuple::new(
                Protocol::Bolt,
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)),
                4_000 + u16::from(host),
                receiver,
                80,
            ),
            rate: link,
            next_send: SimTime::ZERO,
            last_signal: SimTime::ZERO,
            signals: 0,
        })
        .collect();
    let by_tuple: HashMap<_, _> =
        senders.iter().enumerate().map(|(i, sender)| (sender.flow.reversed(), i)).collect();

    let payload = Bytes::from_static(&[0u8; 64]);
    let mut uid = 0;
    let mut next_tx = SimTime::ZERO;
    let mut delivered = 0u64;
    let end = SimTime::ZERO + DURATION;
    let mut now = SimTime::ZERO;

    while now < end {
        for sender in &mut senders {
            if sender.next_send > now {
                continue;
            }
            let mut flags = BoltFlags::DATA;
            if now.saturating_duration_since(sender.last_signal) >= Duration::from_micros(10) {
                flags.insert(BoltFlags::INCWIN);
            }
            let packet = Packet::new(uid, MTU)
                .with_flow(sender.flow)
                .with_ecn(Ecn::Ect0)
                .with_bolt(BoltHeader::new(flags))
                .with_payload(payload.clone());
            let _ = queue.enqueue(packet, now);
            uid += 1;
            sender.next_send = now + sender.rate.tx_time(u64::from(MTU));
        }

        while let Some(tick) = queue.next_tick().filter(|tick| tick.due <= now) {
            queue.tick(tick, now);
        }

        for signal in queue.take_signals() {
            let Some(&i) = signal.flow.as_ref().and_then(|flow| by_tuple.get(flow)) else {
                continue;
            };
            let sender = &mut senders[i];
            sender.rate = DataRate::from_bps((sender.rate.bps() / 2).max(link.bps() / 100));
            sender.last_signal = now;
            sender.signals += 1;
        }

        if next_tx <= now {
            if let Some(packet) = queue.dequeue(now) {
                next_tx = now + link.tx_time(packet.wire_len());
                delivered += 1;
                let grant = packet.bolt.is_some_and(|bolt| bolt.flags.contains(BoltFlags::INCWIN));
                if let Some(sender) = senders.iter_mut().find(|s| Some(s.flow) == packet.flow) {
                    if grant {
                        let rate = sender.rate.bps() + link.bps() / 100;
                        sender.rate = DataRate::from_bps(rate.min(link.bps()));
                    }
                }
            }
        }

        now += STEP;
    }

    let stats = queue.stats();
    info!(
        delivered,
        backlog = ?queue.backlog(),
        dropped = stats.total_dropped().packets,
        marked = stats.marked(MarkReason::CongestionThreshold).packets,
        signals_sent = queue.signals_sent(),
        signals_suppressed = queue.signals_suppressed(),
        "bottleneck"
    );
    for sender in &senders {
        info!(flow = ?sender.flow, rate = %sender.rate, signals = sender.signals, "sender");
    }
}
