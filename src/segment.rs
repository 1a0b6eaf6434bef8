use crate::detector::SignalPoint;
use crate::lane::{LaneSegment, LaneType};
use crate::vehicle::VehicleSnapshot;
use crate::{SegmentId, SegmentSet, VehicleId, VehicleSet, OVERTAKING_LANE};

/// The default speed limit of a road segment in m/s.
const DEFAULT_SPEED_LIMIT: f64 = 33.0;

/// The mutable per-segment road conditions, updated once per timestep by
/// the segment's road controllers.
#[derive(Clone, Copy, Debug)]
pub struct RoadConditions {
    /// The current speed limit in m/s.
    pub speed_limit: f64,
}

/// An external road-object controller, e.g. a variable speed limit or a
/// traffic light, ticked at the start of every timestep.
pub trait RoadController {
    fn time_step(&mut self, dt: f64, time: f64, conditions: &mut RoadConditions);
}

/// A unidirectional stretch of road with 1..N lanes and logical positions
/// in `0..length`.
///
/// Lanes are indexed `1..=lane_count`, with lane 1 the most inner lane.
/// Index 0 is the auxiliary overtaking lane, used for peer-road-based
/// overtaking manoeuvres; it carries no traffic unless a peer road is set.
pub struct RoadSegment {
    /// The segment ID.
    id: SegmentId,
    /// An optional external identifier.
    user_id: Option<String>,
    /// The length of the segment in m.
    length: f64,
    /// The number of real lanes.
    lane_count: usize,
    /// The lanes; index 0 is the overtaking lane.
    lanes: Vec<LaneSegment>,
    /// The opposite-direction twin enabling overtaking, if any.
    peer: Option<SegmentId>,
    /// The current road conditions.
    conditions: RoadConditions,
    /// The road-object controllers.
    controllers: Vec<Box<dyn RoadController>>,
    /// Flow-measurement points along the segment.
    signal_points: Vec<SignalPoint>,
}

impl RoadSegment {
    /// Creates a new road segment.
    pub(crate) fn new(id: SegmentId, length: f64, lane_count: usize) -> Self {
        assert!(length > 0.0, "road length must be positive");
        assert!(lane_count >= 1, "road segment must have atleast one lane");
        let lanes = (0..=lane_count)
            .map(|idx| {
                let ty = if idx == OVERTAKING_LANE {
                    LaneType::Restricted
                } else {
                    LaneType::Traffic
                };
                LaneSegment::new(idx, ty)
            })
            .collect();
        Self {
            id,
            user_id: None,
            length,
            lane_count,
            lanes,
            peer: None,
            conditions: RoadConditions {
                speed_limit: DEFAULT_SPEED_LIMIT,
            },
            controllers: vec![],
            signal_points: vec![],
        }
    }

    /// Gets the segment's ID.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Gets the segment's external identifier, if set.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Sets the segment's external identifier.
    pub fn set_user_id(&mut self, user_id: impl Into<String>) {
        self.user_id = Some(user_id.into());
    }

    /// The length of the segment in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The number of real lanes.
    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// The number of lanes of type [LaneType::Traffic].
    pub fn traffic_lane_count(&self) -> usize {
        self.real_lanes()
            .filter(|l| l.ty() == LaneType::Traffic)
            .count()
    }

    /// The opposite-direction twin segment, if any.
    pub fn peer(&self) -> Option<SegmentId> {
        self.peer
    }

    pub(crate) fn set_peer(&mut self, peer: SegmentId) {
        self.peer = Some(peer);
    }

    /// The current road conditions.
    pub fn conditions(&self) -> RoadConditions {
        self.conditions
    }

    /// Sets the segment's speed limit in m/s.
    pub fn set_speed_limit(&mut self, speed_limit: f64) {
        self.conditions.speed_limit = speed_limit;
    }

    /// Attaches a road-object controller to the segment.
    pub fn add_controller(&mut self, controller: Box<dyn RoadController>) {
        self.controllers.push(controller);
    }

    /// Gets the lane with the given index; 0 is the overtaking lane.
    pub fn lane(&self, lane: usize) -> &LaneSegment {
        assert!(
            lane <= self.lane_count,
            "invalid lane index {} for segment with {} lanes",
            lane,
            self.lane_count
        );
        &self.lanes[lane]
    }

    pub(crate) fn lane_mut(&mut self, lane: usize) -> &mut LaneSegment {
        assert!(
            lane <= self.lane_count,
            "invalid lane index {} for segment with {} lanes",
            lane,
            self.lane_count
        );
        &mut self.lanes[lane]
    }

    /// The auxiliary overtaking lane.
    pub fn overtaking_lane(&self) -> &LaneSegment {
        &self.lanes[OVERTAKING_LANE]
    }

    /// Iterates over the real lanes, inner-most first.
    pub fn real_lanes(&self) -> impl Iterator<Item = &LaneSegment> {
        self.lanes[1..].iter()
    }

    /// Iterates over all lanes including the overtaking lane.
    pub fn all_lanes(&self) -> impl Iterator<Item = &LaneSegment> {
        self.lanes.iter()
    }

    /// The total number of vehicles on the segment, including the
    /// overtaking lane.
    pub fn vehicle_count(&self) -> usize {
        self.lanes.iter().map(|l| l.vehicle_count()).sum()
    }

    /// Iterates over all vehicles on the segment, lane by lane,
    /// most downstream first within each lane.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.lanes.iter().flat_map(|l| l.vehicle_ids().iter().copied())
    }

    /// Finds the vehicles immediately ahead of and at-or-behind the given
    /// position in the given lane, crossing segment boundaries one hop.
    pub fn neighbours_in_lane(
        &self,
        lane: usize,
        pos: f64,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> (Option<VehicleSnapshot>, Option<VehicleSnapshot>) {
        let lane = self.lane(lane);
        let front = lane.front_vehicle_at(pos, self.length, segments, vehicles);
        let rear = lane.rear_vehicle_at(pos, segments, vehicles);
        (front, rear)
    }

    /// Adds a flow-measurement point at the given position.
    pub fn add_signal_point(&mut self, position: f64) {
        assert!(
            (0.0..=self.length).contains(&position),
            "signal point position {} outside segment of length {}",
            position,
            self.length
        );
        self.signal_points.push(SignalPoint::new(position));
    }

    /// The segment's flow-measurement points.
    pub fn signal_points(&self) -> &[SignalPoint] {
        &self.signal_points
    }

    /// Ticks the segment's road-object controllers.
    pub(crate) fn update_road_conditions(&mut self, dt: f64, time: f64) {
        for controller in &mut self.controllers {
            controller.time_step(dt, time, &mut self.conditions);
        }
    }

    /// Registers all vehicles on the segment with its signal points.
    pub(crate) fn register_signal_points(&mut self, time: f64, vehicles: &VehicleSet) {
        for point in &mut self.signal_points {
            let iter = self
                .lanes
                .iter()
                .flat_map(|l| l.vehicle_ids().iter())
                .map(|id| (*id, vehicles[*id].front_pos()));
            point.register_passing_vehicles(time, iter);
        }
    }

    /// Whether every lane's vehicles are sorted by non-increasing rear
    /// position. Only used by debug assertions.
    pub(crate) fn is_sorted(&self, vehicles: &VehicleSet) -> bool {
        self.lanes.iter().all(|l| l.is_sorted(vehicles))
    }
}
