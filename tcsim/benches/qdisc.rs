use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use criterion::{
    criterion_group, criterion_main, measurement::WallTime, BenchmarkGroup, BenchmarkId,
    Criterion, Throughput,
};
use pprof::criterion::Output;
use rand::{rngs::StdRng, Rng, SeedableRng};

use tcsim::{
    AqmConfig, BoltConfig, CodelConfig, FifoConfig, FlowTuple, FqConfig, Packet, PieConfig,
    Protocol, QdiscConfig, QueueDisc, QueueLimit, SimTime,
};

const N_PACKETS: usize = 10_000;

/// A packet trace spread over `flows` five-tuples, one packet every microsecond.
fn trace(flows: u16) -> Vec<Packet> {
    let mut rng = StdRng::seed_from_u64(42);
    let dst = IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1));
    (0..N_PACKETS as u64)
        .map(|uid| {
            let port = rng.gen_range(0..flows);
            let src = IpAddr::V4(Ipv4Addr::new(10, 0, 0, (port % 250) as u8 + 1));
            Packet::new(uid, rng.gen_range(64..=1_500))
                .with_flow(FlowTuple::new(Protocol::Udp, src, port, dst, 80))
        })
        .collect()
}

/// Offers the trace and pulls one packet for every two offered.
fn run(q: &mut dyn QueueDisc, packets: &[Packet]) {
    for (i, packet) in packets.iter().enumerate() {
        let now = SimTime::from_micros(i as u64);
        while let Some(tick) = q.next_tick().filter(|tick| tick.due <= now) {
            q.tick(tick, now);
        }
        let _ = q.enqueue(packet.clone(), now);
        if i % 2 == 0 {
            let _ = q.dequeue(now);
        }
    }
}

fn bench_tree(group: &mut BenchmarkGroup<'_, WallTime>, name: &str, tree: &QdiscConfig) {
    for flows in [1, 64, 1024] {
        let packets = trace(flows);
        group.throughput(Throughput::Elements(packets.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, flows), &packets, |b, packets| {
            b.iter_batched(
                || {
                    let mut q = tree.clone().build().unwrap();
                    q.run(SimTime::ZERO).unwrap();
                    q
                },
                |mut q| run(q.as_mut(), packets),
                criterion::BatchSize::SmallInput,
            );
        });
    }
}

fn qdisc_throughput(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt::try_init();

    let trees = [
        ("pfifo", QdiscConfig::Fifo(FifoConfig::default())),
        ("codel", QdiscConfig::Codel(AqmConfig::new(CodelConfig::default()))),
        ("pie", QdiscConfig::Pie(AqmConfig::new(PieConfig::default()))),
        ("fq_codel", QdiscConfig::FqCodel(FqConfig::default())),
        (
            "bolt",
            QdiscConfig::Bolt(
                BoltConfig::default().with_limit(QueueLimit::Packets(10_000)).with_bts(true),
            ),
        ),
    ];

    let mut group = c.benchmark_group("qdisc_enqueue_dequeue");
    group.sample_size(20);
    for (name, tree) in &trees {
        bench_tree(&mut group, name, tree);
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_secs(1))
        .with_profiler(pprof::criterion::PProfProfiler::new(100, Output::Flamegraph(None)));
    targets = qdisc_throughput
}

criterion_main!(benches);
