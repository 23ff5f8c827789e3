use std::sync::Arc;

use crate::base::behavior::*;
use crate::graph::EdgeRecord;
use crate::pipeline::crossbar::{Crossbar, CrossbarConfig, Packet};
use crate::pipeline::stage::WorkItem;

fn update(src: usize, dst: usize) -> Packet {
    let mut payload = WorkItem::for_vertex(src as u64);
    payload.edge = Some(EdgeRecord {
        dst: dst as u64,
        weight: 1.0,
    });
    Packet { src, dst, payload }
}

fn crossbar(lanes: usize) -> Crossbar {
    let config = CrossbarConfig {
        port_bandwidth: 1,
        ..CrossbarConfig::default()
    };
    Crossbar::new(Arc::new(config), lanes, 16).unwrap()
}

#[test]
fn two_senders_one_port_serialize() {
    let mut xbar = crossbar(2);
    xbar.try_send(update(0, 0)).unwrap();
    xbar.try_send(update(1, 0)).unwrap();

    xbar.tick_one();
    let first = xbar.receive(0).unwrap();
    assert!(xbar.receive(0).is_none());
    assert!(xbar.busy());
    assert_eq!(1, xbar.stats().contention_cycles);

    xbar.tick_one();
    let second = xbar.receive(0).unwrap();
    assert_ne!(first.src, second.src);
    assert!(!xbar.busy());
    assert_eq!(2, xbar.stats().packets_routed);
}

#[test]
fn arbitration_rotates_between_senders() {
    let mut xbar = crossbar(2);
    let mut winners = Vec::new();
    for _ in 0..2 {
        xbar.try_send(update(0, 1)).unwrap();
        xbar.try_send(update(1, 1)).unwrap();
    }
    for _ in 0..4 {
        xbar.tick_one();
        while let Some(packet) = xbar.receive(1) {
            winners.push(packet.src);
        }
    }
    assert_eq!(vec![0, 1, 0, 1], winners);
}

#[test]
fn distinct_ports_route_in_the_same_cycle() {
    let mut xbar = crossbar(2);
    xbar.try_send(update(0, 1)).unwrap();
    xbar.try_send(update(1, 0)).unwrap();
    xbar.tick_one();
    assert_eq!(1, xbar.receive(0).unwrap().src);
    assert_eq!(0, xbar.receive(1).unwrap().src);
    assert_eq!(0, xbar.stats().contention_cycles);
}

#[test]
fn full_port_holds_packets_in_ingress() {
    let config = CrossbarConfig {
        port_capacity: 1,
        ..CrossbarConfig::default()
    };
    let mut xbar = Crossbar::new(Arc::new(config), 1, 4).unwrap();
    xbar.try_send(update(0, 0)).unwrap();
    xbar.try_send(update(0, 0)).unwrap();
    xbar.tick_one();
    xbar.tick_one();
    assert!(xbar.receive(0).is_some());
    assert!(xbar.receive(0).is_none());
    xbar.tick_one();
    assert!(xbar.receive(0).is_some());
    assert!(!xbar.busy());
}
