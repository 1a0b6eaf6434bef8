use std::rc::Rc;
use std::time::Instant;

use roadnet_sim::routing::add_join;
use roadnet_sim::{
    IdmModel, IdmParams, InflowSeries, NetworkConfig, RoadNetwork, SafeGapModel,
    TrafficComposition, TrafficSource, VehiclePrototype,
};

fn main() {
    env_logger::init();

    let mut net = RoadNetwork::new(NetworkConfig::default());
    let a = net.add_segment(1000.0, 2);
    let b = net.add_segment(1500.0, 2);
    let c = net.add_segment(1000.0, 2);
    add_join(&mut net, a, b);
    add_join(&mut net, b, c);
    net.segment_mut(b).set_speed_limit(22.0);

    let car = VehiclePrototype {
        label: "car".to_owned(),
        length: 4.5,
        longitudinal: Rc::new(IdmModel::new(&IdmParams {
            desired_speed: 33.0,
            time_headway: 1.5,
            min_gap: 2.0,
            max_acceleration: 1.5,
            comf_deceleration: 2.0,
            vehicle_length: 4.5,
        })),
        lane_change: Rc::new(SafeGapModel::default()),
    };
    let truck = VehiclePrototype {
        label: "truck".to_owned(),
        length: 12.0,
        longitudinal: Rc::new(IdmModel::new(&IdmParams {
            desired_speed: 24.0,
            time_headway: 1.8,
            min_gap: 3.0,
            max_acceleration: 0.8,
            comf_deceleration: 1.5,
            vehicle_length: 12.0,
        })),
        lane_change: Rc::new(SafeGapModel::default()),
    };

    let series = InflowSeries::constant(0.4, 28.0);
    let composition = TrafficComposition::new(vec![(car, 0.85), (truck, 0.15)]);
    let source = TrafficSource::macroscopic(series, composition)
        .with_seed(42)
        .with_speed_jitter(0.1);
    net.set_traffic_source(a, source);
    net.set_sink(c);
    net.finalize_topology();

    println!("Simulating...");
    let dt = 0.4;
    let steps_per_minute = (60.0 / dt) as usize;
    for minute in 1..=30 {
        let start = Instant::now();
        for _ in 0..steps_per_minute {
            net.time_step(dt);
        }
        let inflow = net.traffic_source(a).map_or(0.0, |s| s.measured_inflow());
        let outflow = net.sink(c).map_or(0.0, |s| s.measured_outflow());
        println!(
            "t = {:4.0} min | {:4} vehicles | in {:.0} veh/h | out {:.0} veh/h | {:?}/min wall",
            minute,
            net.vehicle_count(),
            inflow * 3600.0,
            outflow * 3600.0,
            start.elapsed(),
        );
    }
}
