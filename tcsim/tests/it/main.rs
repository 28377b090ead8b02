use std::net::{IpAddr, Ipv4Addr};

use tcsim::{FlowTuple, Protocol, QueueDisc, SimTime};

mod bolt;
mod composite;
mod fairness;
mod fifo;
mod invariants;
mod replay;

/// A five-tuple from host `host` to a fixed receiver.
fn tuple(protocol: Protocol, host: u8, port: u16) -> FlowTuple {
    FlowTuple::new(
        protocol,
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, host)),
        port,
        IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1)),
        80,
    )
}

/// Delivers every tick due at `now`. Returns how many were delivered.
fn fire_ticks(q: &mut dyn QueueDisc, now: SimTime) -> usize {
    let mut fired = 0;
    while let Some(tick) = q.next_tick().filter(|tick| tick.due <= now) {
        q.tick(tick, now);
        fired += 1;
    }
    fired
}
