use crate::detector::TrafficDetector;
use crate::lane::LaneType;
use crate::segment::RoadSegment;
use crate::sink::{TrafficSink, MEASURING_INTERVAL};
use crate::source::TrafficSource;
use crate::vehicle::model::LaneContext;
use crate::vehicle::{Vehicle, VehiclePrototype, VehicleSnapshot};
use crate::{SegmentId, SegmentSet, VehicleId, VehicleSet, OVERTAKING_LANE};
use itertools::Itertools;
use log::error;
use slotmap::{Key, SlotMap, SparseSecondaryMap};
use smallvec::SmallVec;

/// What to do when two vehicles end up overlapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrashPolicy {
    /// Log a crash report and carry on.
    Continue,
    /// Log a crash report and terminate the process.
    Exit,
}

/// Configuration of a road network, passed at construction.
#[derive(Clone, Copy, Debug)]
pub struct NetworkConfig {
    pub crash_policy: CrashPolicy,
    /// The measuring interval of terminal sinks in s.
    pub sink_measuring_interval: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            crash_policy: CrashPolicy::Continue,
            sink_measuring_interval: MEASURING_INTERVAL,
        }
    }
}

/// A network of connected road segments and the vehicles travelling on them.
///
/// The network is built in two phases: first all segments are created and
/// wired up (see the [routing](crate::routing) utilities), then
/// [`finalize_topology`](Self::finalize_topology) derives the overtaking-lane
/// connectivity and enables stepping.
///
/// Each call to [`time_step`](Self::time_step) advances the simulation by one
/// tick of eight phases. Every phase completes across the whole network
/// before the next begins, so all per-vehicle decisions within a phase read
/// the same pre-update state regardless of segment iteration order.
pub struct RoadNetwork {
    segments: SegmentSet,
    vehicles: VehicleSet,
    /// The segments in insertion order; all phases iterate in this order.
    order: Vec<SegmentId>,
    sources: SparseSecondaryMap<SegmentId, TrafficSource>,
    ramps: SparseSecondaryMap<SegmentId, TrafficSource>,
    sinks: SparseSecondaryMap<SegmentId, TrafficSink>,
    detectors: SparseSecondaryMap<SegmentId, Vec<Box<dyn TrafficDetector>>>,
    config: NetworkConfig,
    /// The simulated time in s.
    time: f64,
    /// The number of completed timesteps.
    step: u64,
    finalized: bool,
}

impl Default for RoadNetwork {
    fn default() -> Self {
        Self::new(NetworkConfig::default())
    }
}

impl RoadNetwork {
    /// Creates an empty road network.
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            segments: SlotMap::with_key(),
            vehicles: SlotMap::with_key(),
            order: vec![],
            sources: SparseSecondaryMap::new(),
            ramps: SparseSecondaryMap::new(),
            sinks: SparseSecondaryMap::new(),
            detectors: SparseSecondaryMap::new(),
            config,
            time: 0.0,
            step: 0,
            finalized: false,
        }
    }

    /// The network's configuration.
    pub fn config(&self) -> NetworkConfig {
        self.config
    }

    /// The simulated time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// The number of completed timesteps.
    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Adds a road segment with the given length in m and lane count.
    pub fn add_segment(&mut self, length: f64, lane_count: usize) -> SegmentId {
        let id = self
            .segments
            .insert_with_key(|id| RoadSegment::new(id, length, lane_count));
        self.order.push(id);
        self.finalized = false;
        id
    }

    /// Gets the road segment with the given ID.
    pub fn segment(&self, id: SegmentId) -> &RoadSegment {
        &self.segments[id]
    }

    /// Gets the road segment with the given ID.
    pub fn segment_mut(&mut self, id: SegmentId) -> &mut RoadSegment {
        &mut self.segments[id]
    }

    /// The segment arena.
    pub fn segments(&self) -> &SegmentSet {
        &self.segments
    }

    pub(crate) fn segments_mut(&mut self) -> &mut SegmentSet {
        &mut self.segments
    }

    /// The segment IDs in insertion order.
    pub fn segment_ids(&self) -> &[SegmentId] {
        &self.order
    }

    /// Gets the vehicle with the given ID.
    pub fn vehicle(&self, id: VehicleId) -> &Vehicle {
        &self.vehicles[id]
    }

    /// The vehicle arena.
    pub fn vehicles(&self) -> &VehicleSet {
        &self.vehicles
    }

    /// The total number of vehicles in the network.
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Declares two segments as opposite-direction twins of the same road,
    /// enabling overtaking via the peer's carriageway.
    pub fn make_peers(&mut self, a: SegmentId, b: SegmentId) {
        assert_ne!(a, b, "a segment cannot be its own peer");
        self.segments[a].set_peer(b);
        self.segments[b].set_peer(a);
        self.finalized = false;
    }

    /// Derives the overtaking-lane connectivity from the inner-lane links
    /// and enables stepping. Must be called again after further segments
    /// are added or wired.
    pub fn finalize_topology(&mut self) {
        let mut links = Vec::with_capacity(self.order.len());
        for &id in &self.order {
            let inner = self.segments[id].lane(1);
            links.push((
                id,
                inner.sink().map(|(seg, _)| (seg, OVERTAKING_LANE)),
                inner.source().map(|(seg, _)| (seg, OVERTAKING_LANE)),
            ));
        }
        for (id, sink, source) in links {
            let lane = self.segments[id].lane_mut(OVERTAKING_LANE);
            lane.set_sink(sink);
            lane.set_source(source);
        }
        self.finalized = true;
    }

    /// Attaches a traffic source to the upstream end of a segment.
    /// Panics if the segment already has one.
    pub fn set_traffic_source(&mut self, segment: SegmentId, source: TrafficSource) {
        assert!(self.segments.contains_key(segment), "invalid segment ID");
        if self.sources.insert(segment, source).is_some() {
            panic!("segment {:?} already has a traffic source", segment);
        }
    }

    /// Gets the traffic source attached to a segment.
    pub fn traffic_source(&self, segment: SegmentId) -> Option<&TrafficSource> {
        self.sources.get(segment)
    }

    /// Gets the traffic source attached to a segment.
    pub fn traffic_source_mut(&mut self, segment: SegmentId) -> Option<&mut TrafficSource> {
        self.sources.get_mut(segment)
    }

    /// Attaches an on-ramp merging into a segment mid-way.
    /// Panics if the segment already has one.
    pub fn attach_ramp(&mut self, segment: SegmentId, ramp: TrafficSource) {
        assert!(self.segments.contains_key(segment), "invalid segment ID");
        if self.ramps.insert(segment, ramp).is_some() {
            panic!("segment {:?} already has a ramp", segment);
        }
    }

    /// Attaches a terminal sink to the downstream end of a segment: vehicles
    /// leaving an unlinked lane past the end are removed and counted.
    /// Panics if the segment already has one.
    pub fn set_sink(&mut self, segment: SegmentId) {
        assert!(self.segments.contains_key(segment), "invalid segment ID");
        let sink = TrafficSink::new(self.config.sink_measuring_interval);
        if self.sinks.insert(segment, sink).is_some() {
            panic!("segment {:?} already has a sink", segment);
        }
    }

    /// Gets the sink attached to a segment.
    pub fn sink(&self, segment: SegmentId) -> Option<&TrafficSink> {
        self.sinks.get(segment)
    }

    /// Attaches an external detector to a segment.
    pub fn add_detector(&mut self, segment: SegmentId, detector: Box<dyn TrafficDetector>) {
        assert!(self.segments.contains_key(segment), "invalid segment ID");
        self.detectors
            .entry(segment)
            .expect("invalid segment ID")
            .or_default()
            .push(detector);
    }

    /// Places a new vehicle on the network.
    pub fn add_vehicle(
        &mut self,
        segment: SegmentId,
        lane: usize,
        front_pos: f64,
        speed: f64,
        proto: &VehiclePrototype,
    ) -> VehicleId {
        let id = self.vehicles.insert_with_key(|id| {
            let mut vehicle = Vehicle::new(id, proto);
            vehicle.set_location(segment, lane, front_pos, speed);
            vehicle
        });
        self.segments[segment].lane_mut(lane).add_vehicle(&self.vehicles, id);
        id
    }

    /// Removes a vehicle from the network.
    pub fn remove_vehicle(&mut self, id: VehicleId) -> Option<Vehicle> {
        let vehicle = self.vehicles.remove(id)?;
        if let Some(segment) = self.segments.get_mut(vehicle.segment()) {
            segment.lane_mut(vehicle.lane()).remove_vehicle(id);
        }
        Some(vehicle)
    }

    /// Removes all vehicles from the network.
    pub fn clear_vehicles(&mut self) {
        self.vehicles.clear();
        for (_, segment) in &mut self.segments {
            for lane in 0..=segment.lane_count() {
                segment.lane_mut(lane).clear();
            }
        }
    }

    /// Removes all vehicles and resets the simulation clock. The topology
    /// and its boundary objects stay in place.
    pub fn clear(&mut self) {
        self.clear_vehicles();
        self.time = 0.0;
        self.step = 0;
    }

    /// Advances the simulation by one tick of `dt` seconds.
    pub fn time_step(&mut self, dt: f64) {
        assert!(
            self.finalized,
            "finalize_topology must be called before stepping"
        );

        // Phase 1: road conditions.
        for &id in &self.order {
            self.segments[id].update_road_conditions(dt, self.time);
        }

        // Phases 2 to 4: lane changes, accelerations, integration.
        self.make_lane_changes(dt);
        self.update_accelerations();
        for (_, vehicle) in &mut self.vehicles {
            vehicle.integrate(dt);
        }

        // Phase 5: crash detection.
        let crashes = self.check_for_inconsistencies();
        if crashes > 0 && self.config.crash_policy == CrashPolicy::Exit {
            error!(
                "stopping after {} crash report(s) at t = {:.1} s",
                crashes, self.time
            );
            std::process::exit(1);
        }

        // Phases 6 to 8: boundaries and measurement.
        self.out_flow(dt);
        self.in_flow(dt);
        self.update_detectors(dt);

        self.time += dt;
        self.step += 1;
        debug_assert!(self
            .order
            .iter()
            .all(|id| self.segments[*id].is_sorted(&self.vehicles)));
    }

    /// Phase 2: advances lane change timers and performs lane changes,
    /// including overtaking onto and back from the peer-road lane. Decisions
    /// for a segment are collected against unmodified state, then applied.
    fn make_lane_changes(&mut self, dt: f64) {
        for idx in 0..self.order.len() {
            let seg_id = self.order[idx];
            let mut moves: SmallVec<[(VehicleId, usize, f64); 4]> = SmallVec::new();

            let segment = &self.segments[seg_id];
            for lane in segment.all_lanes() {
                for &vid in lane.vehicle_ids() {
                    let vehicle = &self.vehicles[vid];
                    if vehicle.in_lane_change() {
                        continue;
                    }
                    let own = vehicle.snapshot();
                    let model = vehicle.lane_change_model();
                    if lane.lane() == OVERTAKING_LANE {
                        if model.consider_finish_overtaking(
                            &own,
                            segment,
                            &self.segments,
                            &self.vehicles,
                        ) {
                            moves.push((vid, 1, model.change_delay()));
                        }
                        continue;
                    }
                    if let Some(target) = model.consider_lane_change(
                        &own,
                        lane.lane(),
                        segment,
                        &self.segments,
                        &self.vehicles,
                    ) {
                        moves.push((vid, target, model.change_delay()));
                        continue;
                    }
                    if lane.lane() == 1
                        && segment.peer().is_some()
                        && model.consider_overtaking(&own, segment, &self.segments, &self.vehicles)
                    {
                        moves.push((vid, OVERTAKING_LANE, model.change_delay()));
                    }
                }
            }

            for (vid, target, delay) in moves {
                let old_lane = self.vehicles[vid].lane();
                let segment = &mut self.segments[seg_id];
                segment.lane_mut(old_lane).remove_vehicle(vid);
                let vehicle = &mut self.vehicles[vid];
                vehicle.set_lane(target);
                vehicle.begin_lane_change(delay);
                segment.lane_mut(target).add_vehicle(&self.vehicles, vid);
            }
        }

        // Timers tick down after decisions; a change that finishes now is
        // only re-queried next tick.
        for (_, vehicle) in &mut self.vehicles {
            vehicle.advance_lane_change(dt);
        }
    }

    /// Phase 3: computes all accelerations from the pre-update state and
    /// stages them on the vehicles.
    fn update_accelerations(&mut self) {
        let mut staged: Vec<(VehicleId, f64)> = Vec::with_capacity(self.vehicles.len());
        for &seg_id in &self.order {
            let segment = &self.segments[seg_id];
            let conditions = segment.conditions();
            for lane in segment.all_lanes() {
                let left_lane = (lane.lane() > 1).then(|| lane.lane() - 1);
                let ids = lane.vehicle_ids();
                for (i, &vid) in ids.iter().enumerate() {
                    let vehicle = &self.vehicles[vid];
                    let own = vehicle.snapshot();
                    let mut leader = if i > 0 {
                        Some(self.vehicles[ids[i - 1]].snapshot())
                    } else {
                        lane.front_vehicle_at(
                            own.rear_pos,
                            segment.length(),
                            &self.segments,
                            &self.vehicles,
                        )
                    };
                    // The end of an exit lane acts as a standing obstacle.
                    if let Some(end) = vehicle.exit_end_pos() {
                        if leader.map_or(true, |l| l.rear_pos > end) {
                            leader = Some(VehicleSnapshot {
                                id: VehicleId::null(),
                                front_pos: end,
                                rear_pos: end,
                                speed: 0.0,
                                length: 0.0,
                            });
                        }
                    }
                    let ctx = LaneContext {
                        speed_limit: conditions.speed_limit,
                        vel_adjust: vehicle.vel_adjust(),
                        left_lane,
                    };
                    let acc = vehicle
                        .longitudinal_model()
                        .acceleration(&own, leader.as_ref(), &ctx);
                    staged.push((vid, acc));
                }
            }
        }
        for (vid, acc) in staged {
            self.vehicles[vid].set_acc(acc);
        }
    }

    /// Phase 5: reports every pair of overlapping vehicles. Returns the
    /// number of crash reports.
    pub fn check_for_inconsistencies(&self) -> usize {
        let mut count = 0;
        for &seg_id in &self.order {
            let segment = &self.segments[seg_id];
            for lane in segment.all_lanes() {
                let ids = lane.vehicle_ids();
                for (i, (front, back)) in ids.iter().tuple_windows().enumerate() {
                    let net_gap = self.vehicles[*front].rear_pos() - self.vehicles[*back].front_pos();
                    if net_gap >= 0.0 {
                        continue;
                    }
                    count += 1;
                    error!(
                        "vehicles crashed in lane {} of segment {:?} at t = {:.1} s (net gap {:.2} m)",
                        lane.lane(),
                        seg_id,
                        self.time,
                        net_gap
                    );
                    let window = i.saturating_sub(2)..usize::min(i + 4, ids.len());
                    for vid in &ids[window] {
                        error!("  {:?}", self.vehicles[*vid]);
                    }
                }
            }
        }
        count
    }

    /// Phase 6: hands vehicles past the end of each segment to the linked
    /// lane segment, or removes them at a terminal sink.
    fn out_flow(&mut self, dt: f64) {
        for idx in 0..self.order.len() {
            let seg_id = self.order[idx];
            self.segments[seg_id].register_signal_points(self.time, &self.vehicles);

            let length = self.segments[seg_id].length();
            let lane_count = self.segments[seg_id].lane_count();
            let terminal = self.sinks.contains_key(seg_id);

            for lane_idx in 0..=lane_count {
                let link = self.segments[seg_id].lane(lane_idx).sink();
                if link.is_none() && !terminal {
                    continue;
                }
                let popped = self.segments[seg_id]
                    .lane_mut(lane_idx)
                    .pop_past_end(length, &self.vehicles);
                match link {
                    Some((dst, dst_lane)) => {
                        for vid in popped {
                            let vehicle = &mut self.vehicles[vid];
                            vehicle.translate(-length);
                            vehicle.set_segment_lane(dst, dst_lane);
                            let dst_seg = &mut self.segments[dst];
                            let exit_end = (dst_seg.lane(dst_lane).ty() == LaneType::Exit)
                                .then(|| dst_seg.length());
                            self.vehicles[vid].set_exit_end_pos(exit_end);
                            dst_seg.lane_mut(dst_lane).append_vehicle(&self.vehicles, vid);
                        }
                    }
                    None => {
                        for vid in popped {
                            if let Some(vehicle) = self.vehicles.remove(vid) {
                                if let Some(sink) = self.sinks.get_mut(seg_id) {
                                    sink.record_removal(&vehicle);
                                }
                            }
                        }
                    }
                }
            }
            if let Some(sink) = self.sinks.get_mut(seg_id) {
                sink.time_step(dt);
            }
        }
    }

    /// Phase 7: ticks traffic sources and ramps.
    fn in_flow(&mut self, dt: f64) {
        for idx in 0..self.order.len() {
            let seg_id = self.order[idx];
            if let Some(source) = self.sources.get_mut(seg_id) {
                source.time_step(dt, self.time, &mut self.segments[seg_id], &mut self.vehicles);
            }
            if let Some(ramp) = self.ramps.get_mut(seg_id) {
                ramp.time_step(dt, self.time, &mut self.segments[seg_id], &mut self.vehicles);
            }
            self.segments[seg_id].register_signal_points(self.time, &self.vehicles);
        }
    }

    /// Phase 8: ticks external detectors.
    fn update_detectors(&mut self, dt: f64) {
        for (seg_id, detectors) in self.detectors.iter_mut() {
            let segment = &self.segments[seg_id];
            for detector in detectors {
                detector.time_step(dt, self.time, segment, &self.vehicles);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::routing::{add_join, add_lane_pair};
    use crate::vehicle::test::test_prototype;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    #[should_panic]
    fn stepping_requires_finalized_topology() {
        let mut net = RoadNetwork::default();
        net.add_segment(500.0, 1);
        net.time_step(0.4);
    }

    #[test]
    fn vehicle_crosses_a_segment_boundary() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(100.0, 1);
        let b = net.add_segment(100.0, 1);
        add_join(&mut net, a, b);
        net.finalize_topology();

        let vid = net.add_vehicle(a, 1, 99.0, 10.0, &test_prototype());
        net.time_step(1.0);

        let vehicle = net.vehicle(vid);
        assert_eq!(vehicle.segment(), b);
        assert_eq!(net.segment(b).lane(1).vehicle_count(), 1);
        assert_eq!(net.segment(a).lane(1).vehicle_count(), 0);
        // The position is translated by the length of the first segment.
        assert!(vehicle.front_pos() > 5.0 && vehicle.front_pos() < 20.0);
        assert_eq!(net.vehicle_count(), 1);
    }

    #[test]
    fn ring_road_conserves_vehicles() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(200.0, 1);
        add_lane_pair(&mut net, (a, 1), (a, 1));
        net.finalize_topology();

        let proto = test_prototype();
        for pos in [20.0, 80.0, 140.0] {
            net.add_vehicle(a, 1, pos, 15.0, &proto);
        }
        for _ in 0..100 {
            net.time_step(0.4);
        }
        assert_eq!(net.vehicle_count(), 3);
        assert_eq!(net.segment(a).lane(1).vehicle_count(), 3);
    }

    #[test]
    fn overlap_is_reported_not_removed() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(500.0, 1);
        net.finalize_topology();

        let proto = test_prototype();
        net.add_vehicle(a, 1, 100.0, 0.0, &proto);
        net.add_vehicle(a, 1, 98.0, 0.0, &proto);
        assert_eq!(net.check_for_inconsistencies(), 1);
        assert_eq!(net.vehicle_count(), 2);
    }

    #[test]
    fn terminal_sink_removes_and_counts() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(50.0, 1);
        net.set_sink(a);
        net.finalize_topology();

        let vid = net.add_vehicle(a, 1, 49.0, 20.0, &test_prototype());
        net.time_step(1.0);
        assert!(net.vehicles().get(vid).is_none());
        assert_eq!(net.sink(a).unwrap().total_removed(), 1);
    }

    #[test]
    fn overtaking_lane_mirrors_inner_links() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(100.0, 1);
        let b = net.add_segment(100.0, 1);
        add_join(&mut net, a, b);
        net.finalize_topology();

        assert_eq!(
            net.segment(a).overtaking_lane().sink(),
            Some((b, OVERTAKING_LANE))
        );
        assert_eq!(
            net.segment(b).overtaking_lane().source(),
            Some((a, OVERTAKING_LANE))
        );
    }

    #[test]
    fn exit_lane_assigns_exit_end_pos() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(100.0, 1);
        let b = net.add_segment(80.0, 1);
        add_join(&mut net, a, b);
        net.segment_mut(b).lane_mut(1).set_ty(LaneType::Exit);
        net.finalize_topology();

        let vid = net.add_vehicle(a, 1, 99.5, 10.0, &test_prototype());
        net.time_step(1.0);
        let vehicle = net.vehicle(vid);
        assert_eq!(vehicle.segment(), b);
        assert_approx_eq!(vehicle.exit_end_pos().unwrap(), 80.0);
    }

    #[test]
    fn followers_react_across_the_boundary() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(100.0, 1);
        let b = net.add_segment(100.0, 1);
        add_join(&mut net, a, b);
        net.finalize_topology();

        let proto = test_prototype();
        // A stopped leader just past the boundary.
        net.add_vehicle(b, 1, 10.0, 0.0, &proto);
        let follower = net.add_vehicle(a, 1, 95.0, 20.0, &proto);
        net.time_step(0.4);
        assert!(net.vehicle(follower).acc() < -2.0);
    }
}
