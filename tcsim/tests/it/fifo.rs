use tcsim::{
    DropReason, FifoConfig, Overflow, Packet, PfifoFastConfig, QdiscConfig, QueueLimit, SimTime,
    Verdict,
};

#[test]
fn drop_head_keeps_the_newest() {
    let _ = tracing_subscriber::fmt::try_init();

    let config = FifoConfig::default()
        .with_limit(QueueLimit::Packets(3))
        .with_overflow(Overflow::DropHead);
    let mut q = QdiscConfig::Fifo(config).build().unwrap();
    q.run(SimTime::ZERO).unwrap();

    for uid in 0..5 {
        assert!(q.enqueue(Packet::new(uid, 100), SimTime::ZERO).is_accepted());
    }
    assert_eq!(q.stats().dropped_after_enqueue(DropReason::CapacityExceeded).packets, 2);

    let sent: Vec<_> = std::iter::from_fn(|| q.dequeue(SimTime::ZERO)).map(|p| p.uid).collect();
    assert_eq!(sent, vec![2, 3, 4]);
}

#[test]
fn byte_fifo_counts_bytes() {
    let mut q = QdiscConfig::Fifo(FifoConfig::default().with_limit(QueueLimit::Bytes(3_000)))
        .build()
        .unwrap();
    q.run(SimTime::ZERO).unwrap();
    assert_eq!(q.kind(), "bfifo");

    assert!(q.enqueue(Packet::new(0, 1_000), SimTime::ZERO).is_accepted());
    assert!(q.enqueue(Packet::new(1, 1_000), SimTime::ZERO).is_accepted());
    assert_eq!(
        q.enqueue(Packet::new(2, 1_500), SimTime::ZERO),
        Verdict::Dropped(DropReason::CapacityExceeded)
    );
    assert!(q.enqueue(Packet::new(3, 1_000), SimTime::ZERO).is_accepted());
    assert_eq!(q.backlog().bytes, 3_000);
}

#[test]
fn shrinking_the_limit_starts_over() {
    let mut q = QdiscConfig::Fifo(FifoConfig::default()).build().unwrap();
    q.run(SimTime::ZERO).unwrap();
    for uid in 0..10 {
        let _ = q.enqueue(Packet::new(uid, 100), SimTime::ZERO);
    }

    q.set_limit(QueueLimit::Packets(2), SimTime::from_millis(1)).unwrap();
    assert!(q.backlog().is_empty());
    assert_eq!(q.stats().enqueued().packets, 0);
    for uid in 10..13 {
        let _ = q.enqueue(Packet::new(uid, 100), SimTime::from_millis(1));
    }
    assert_eq!(q.backlog().packets, 2);
}

#[test]
fn pfifo_fast_serves_interactive_traffic_first() {
    let mut q = QdiscConfig::PfifoFast(PfifoFastConfig::default()).build().unwrap();
    q.run(SimTime::ZERO).unwrap();

    // bulk (priority 1, band 2), best effort (0, band 1), interactive (6, band 0)
    for (uid, priority) in [(0, 1), (1, 0), (2, 6), (3, 1), (4, 6)] {
        let _ = q.enqueue(Packet::new(uid, 100).with_priority(priority), SimTime::ZERO);
    }
    let sent: Vec<_> = std::iter::from_fn(|| q.dequeue(SimTime::ZERO)).map(|p| p.uid).collect();
    assert_eq!(sent, vec![2, 4, 1, 0, 3]);
}
