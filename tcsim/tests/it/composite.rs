use tcsim::{
    common::Recorder, DataRate, DropPhase, DropReason, FifoConfig, Mq, Packet, PrioConfig,
    QdiscConfig, QueueDisc, QueueEventKind, QueueLimit, SimTime, TbfConfig,
};

fn shaped_prio(limit: QueueLimit) -> Box<dyn QueueDisc> {
    let tbf = TbfConfig::default()
        .with_rate(DataRate::from_bytes_per_sec(1_000_000))
        .with_burst(1_500);
    let band = QdiscConfig::Fifo(FifoConfig::default().with_limit(limit));
    let tree = QdiscConfig::Tbf {
        config: tbf,
        child: Some(Box::new(QdiscConfig::Prio {
            config: PrioConfig::default(),
            children: Some(vec![band; 3]),
        })),
    };
    let mut q = tree.build().unwrap();
    q.run(SimTime::ZERO).unwrap();
    q
}

#[test]
fn shaper_releases_priority_order_at_rate() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut q = shaped_prio(QueueLimit::Packets(100));

    for uid in 0..5 {
        let _ = q.enqueue(Packet::new(uid, 1_000).with_priority(1), SimTime::ZERO);
    }
    assert_eq!(q.dequeue(SimTime::ZERO).map(|p| p.uid), Some(0));
    // 500 tokens left, 1000 needed at one byte per microsecond
    assert!(q.dequeue(SimTime::ZERO).is_none());
    assert_eq!(q.next_wakeup(), Some(SimTime::from_micros(500)));

    // the high priority arrival waits behind the head the shaper already looked at
    let _ = q.enqueue(Packet::new(100, 1_000).with_priority(6), SimTime::from_micros(100));
    assert_eq!(q.dequeue(SimTime::from_micros(500)).map(|p| p.uid), Some(1));
    assert!(q.dequeue(SimTime::from_micros(500)).is_none());
    assert_eq!(q.next_wakeup(), Some(SimTime::from_micros(1_500)));
    assert_eq!(q.dequeue(SimTime::from_micros(1_500)).map(|p| p.uid), Some(100));
    assert_eq!(q.backlog().packets, 3);
}

#[test]
fn nested_refusals_reach_the_root() {
    let mut q = shaped_prio(QueueLimit::Packets(2));
    let recorder = Recorder::default();
    q.subscribe(Box::new(recorder.callback()));

    for uid in 0..5 {
        let _ = q.enqueue(Packet::new(uid, 1_000), SimTime::ZERO);
    }
    assert_eq!(q.backlog().packets, 2);
    assert_eq!(q.stats().dropped_before_enqueue(DropReason::CapacityExceeded).packets, 3);

    let dropped: Vec<_> = recorder
        .events()
        .into_iter()
        .filter_map(|event| match event.kind {
            QueueEventKind::Dropped { uid, phase: DropPhase::BeforeEnqueue, .. } => Some(uid),
            _ => None,
        })
        .collect();
    assert_eq!(dropped, vec![2, 3, 4]);
}

#[test]
fn mq_queues_are_pulled_independently() {
    let mut mq = Mq::new(2).unwrap();
    mq.run(SimTime::ZERO).unwrap();
    for uid in 0..4u64 {
        let packet = Packet::new(uid, 100).with_tx_queue((uid % 2) as u16);
        assert!(mq.enqueue(packet, SimTime::ZERO).is_accepted());
    }

    let odd: Vec<_> = std::iter::from_fn(|| mq.dequeue_queue(1, SimTime::ZERO))
        .map(|p| p.uid)
        .collect();
    assert_eq!(odd, vec![1, 3]);
    assert_eq!(mq.child(0).backlog().packets, 2);
    assert_eq!(mq.backlog().packets, 2);
    assert_eq!(mq.stats().dequeued().packets, 2);
}
