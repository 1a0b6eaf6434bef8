//! Tests on closed ring roads, where a segment's downstream neighbour is
//! itself or an earlier segment of the loop.

use std::rc::Rc;

use roadnet_sim::routing::{add_join, add_lane_pair};
use roadnet_sim::{
    IdmModel, IdmParams, NetworkConfig, RoadNetwork, SafeGapModel, VehiclePrototype,
};

fn prototype() -> VehiclePrototype {
    VehiclePrototype {
        label: "car".to_owned(),
        length: 5.0,
        longitudinal: Rc::new(IdmModel::new(&IdmParams {
            desired_speed: 33.0,
            time_headway: 1.5,
            min_gap: 2.0,
            max_acceleration: 1.5,
            comf_deceleration: 2.0,
            vehicle_length: 5.0,
        })),
        lane_change: Rc::new(SafeGapModel::default()),
    }
}

/// A single segment linked to itself holds its vehicles forever.
#[test]
fn self_linked_segment_conserves_vehicles() {
    let mut net = RoadNetwork::new(NetworkConfig::default());
    let a = net.add_segment(300.0, 1);
    add_lane_pair(&mut net, (a, 1), (a, 1));
    net.finalize_topology();

    let proto = prototype();
    for pos in [30.0, 130.0, 230.0] {
        net.add_vehicle(a, 1, pos, 20.0, &proto);
    }
    for _ in 0..2500 {
        net.time_step(0.4);
        assert_eq!(net.vehicle_count(), 3);
        assert_eq!(net.segment(a).lane(1).vehicle_count(), 3);
    }
    assert_eq!(net.check_for_inconsistencies(), 0);
}

/// A two-segment loop conserves vehicles, and the front vehicle sees the
/// rear one across the wrap-around.
#[test]
fn two_segment_loop_wraps_the_leader_lookup() {
    let mut net = RoadNetwork::new(NetworkConfig::default());
    let a = net.add_segment(250.0, 1);
    let b = net.add_segment(250.0, 1);
    add_join(&mut net, a, b);
    add_join(&mut net, b, a);
    net.finalize_topology();

    let proto = prototype();
    // A stopped vehicle near the start of `a` and a fast one at the end
    // of `b`: the fast one must brake for it through the boundary.
    net.add_vehicle(a, 1, 20.0, 0.0, &proto);
    let follower = net.add_vehicle(b, 1, 240.0, 25.0, &proto);

    net.time_step(0.4);
    assert!(net.vehicle(follower).acc() < -1.0);

    for _ in 0..250 {
        net.time_step(0.4);
    }
    assert_eq!(net.vehicle_count(), 2);
    assert_eq!(net.check_for_inconsistencies(), 0);
}

/// Dense ring traffic neither loses nor duplicates vehicles over a long
/// run, and every lane stays sorted.
#[test]
fn dense_ring_stays_consistent() {
    let mut net = RoadNetwork::new(NetworkConfig::default());
    let a = net.add_segment(400.0, 2);
    let b = net.add_segment(400.0, 2);
    add_join(&mut net, a, b);
    add_join(&mut net, b, a);
    net.finalize_topology();

    let proto = prototype();
    let mut count = 0;
    for seg in [a, b] {
        for lane in 1..=2 {
            for i in 0..8 {
                net.add_vehicle(seg, lane, 20.0 + 45.0 * i as f64, 10.0, &proto);
                count += 1;
            }
        }
    }

    for _ in 0..1000 {
        net.time_step(0.4);
        assert_eq!(net.vehicle_count(), count);
    }
    for &id in net.segment_ids() {
        let segment = net.segment(id);
        for lane in segment.all_lanes() {
            let rears = lane
                .vehicle_ids()
                .iter()
                .map(|v| net.vehicle(*v).rear_pos())
                .collect::<Vec<_>>();
            assert!(rears.windows(2).all(|w| w[0] >= w[1]));
        }
    }
}
