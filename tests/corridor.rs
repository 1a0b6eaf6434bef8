//! Tests that simulate a corridor of joined road segments with a traffic
//! source at one end and a sink at the other.

use std::rc::Rc;

use roadnet_sim::routing::add_join;
use roadnet_sim::{
    IdmModel, IdmParams, InflowSeries, NetworkConfig, RoadNetwork, SafeGapModel, SegmentId,
    TrafficComposition, TrafficSource, VehiclePrototype,
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

fn corridor(lane_count: usize) -> (RoadNetwork, SegmentId, SegmentId) {
    let mut net = RoadNetwork::new(NetworkConfig::default());
    let a = net.add_segment(500.0, lane_count);
    let b = net.add_segment(500.0, lane_count);
    add_join(&mut net, a, b);
    net.set_sink(b);
    let source = TrafficSource::macroscopic(
        InflowSeries::constant(0.3, 25.0),
        TrafficComposition::single(prototype()),
    );
    net.set_traffic_source(a, source);
    net.finalize_topology();
    (net, a, b)
}

/// Every lane stays sorted by decreasing rear position after each step.
fn assert_sorted(net: &RoadNetwork) {
    for &id in net.segment_ids() {
        let segment = net.segment(id);
        for lane in segment.all_lanes() {
            let rears = lane
                .vehicle_ids()
                .iter()
                .map(|v| net.vehicle(*v).rear_pos())
                .collect::<Vec<_>>();
            assert!(
                rears.windows(2).all(|w| w[0] >= w[1]),
                "lane {} of segment {:?} is out of order: {:?}",
                lane.lane(),
                id,
                rears
            );
        }
    }
}

/// A vehicle's absolute position increases monotonically, also while it
/// crosses the segment boundary.
#[test]
fn vehicle_drives_forward_across_the_boundary() {
    let (mut net, a, b) = corridor(1);
    let vid = net.add_vehicle(a, 1, 480.0, 20.0, &prototype());

    let offset = |net: &RoadNetwork| {
        let vehicle = net.vehicle(vid);
        let base = if vehicle.segment() == b { 500.0 } else { 0.0 };
        base + vehicle.front_pos()
    };

    let mut pos = offset(&net);
    let mut crossed = false;
    for _ in 0..20 {
        net.time_step(0.4);
        let next_pos = offset(&net);
        assert!(next_pos > pos);
        pos = next_pos;
        crossed |= net.vehicle(vid).segment() == b;
    }
    assert!(crossed);
}

/// A vehicle is held by exactly one lane container at any instant.
#[test]
fn vehicles_are_never_duplicated() {
    let (mut net, _, _) = corridor(2);
    for _ in 0..500 {
        net.time_step(0.4);
        let held = net
            .segment_ids()
            .iter()
            .flat_map(|id| net.segment(*id).iter_vehicles())
            .count();
        assert_eq!(held, net.vehicle_count());
        assert_sorted(&net);
    }
}

/// Everything the source inserts is either still on the road or was
/// removed by the sink.
#[test]
fn source_and_sink_conserve_vehicles() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (mut net, a, b) = corridor(2);
    for _ in 0..1500 {
        net.time_step(0.4);
    }
    let entered = net.traffic_source(a).unwrap().total_entered();
    let removed = net.sink(b).unwrap().total_removed();
    assert!(entered > 100, "source inserted only {} vehicles", entered);
    assert!(removed > 0);
    assert_eq!(entered, removed + net.vehicle_count() as u64);
}

/// The sink's measured outflow approaches the demand after a warm-up.
#[test]
fn measured_outflow_follows_demand() {
    let (mut net, _, b) = corridor(1);
    // 10 simulated minutes at 0.3 veh/s demand.
    for _ in 0..1500 {
        net.time_step(0.4);
    }
    let outflow = net.sink(b).unwrap().measured_outflow();
    assert!(
        outflow > 0.2 && outflow < 0.4,
        "measured outflow {} veh/s is far from the demand",
        outflow
    );
}

/// With the log-and-continue policy an overlap is reported but both
/// vehicles stay in the simulation.
#[test]
fn crash_policy_continue_keeps_going() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut net = RoadNetwork::new(NetworkConfig::default());
    let a = net.add_segment(500.0, 1);
    net.finalize_topology();

    let proto = prototype();
    net.add_vehicle(a, 1, 100.0, 0.0, &proto);
    net.add_vehicle(a, 1, 97.0, 0.0, &proto);
    assert_eq!(net.check_for_inconsistencies(), 1);
    net.time_step(0.4);
    assert_eq!(net.vehicle_count(), 2);
}

/// A fast vehicle stuck behind a slow one changes onto the free lane.
#[test]
fn faster_vehicle_uses_the_other_lane() {
    let mut net = RoadNetwork::new(NetworkConfig::default());
    let a = net.add_segment(2000.0, 2);
    net.set_sink(a);
    net.finalize_topology();

    let proto = prototype();
    net.add_vehicle(a, 1, 500.0, 8.0, &proto);
    let fast = net.add_vehicle(a, 1, 400.0, 30.0, &proto);

    let mut changed = false;
    for _ in 0..200 {
        net.time_step(0.4);
        if net.vehicles().get(fast).map_or(true, |v| v.lane() == 2) {
            changed = true;
            break;
        }
    }
    assert!(changed, "the faster vehicle never left lane 1");
}
