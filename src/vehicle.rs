use self::lane_change::LaneChangeModel;
use self::model::LongitudinalModel;
use crate::{SegmentId, VehicleId};
use slotmap::Key;
use std::fmt;
use std::rc::Rc;

pub mod lane_change;
pub mod model;

/// A simulated vehicle.
///
/// A vehicle is held by exactly one lane container at any instant; all other
/// parts of the system refer to it by its [VehicleId] and resolve it through
/// the network's vehicle arena.
#[derive(Clone)]
pub struct Vehicle {
    /// The vehicle's ID.
    pub(crate) id: VehicleId,
    /// The road segment the vehicle is currently on.
    segment: SegmentId,
    /// The lane index, 1 = most inner, 0 = the overtaking lane.
    lane: usize,
    /// The position of the front bumper along the segment in m.
    front_pos: f64,
    /// The speed in m/s.
    speed: f64,
    /// The acceleration in m/s^2, staged by the model update.
    acc: f64,
    /// The vehicle length in m.
    length: f64,
    /// The vehicle type label.
    label: String,
    /// The desired-speed adjustment factor.
    vel_adjust: f64,
    /// The remaining segments of the vehicle's route, if routed.
    route: Vec<SegmentId>,
    /// The position at which the vehicle's exit lane ends, if it is
    /// travelling on an exit lane towards an identified exit road.
    exit_end_pos: Option<f64>,
    /// The remaining duration of an in-progress lane change in s.
    lane_change_timer: f64,
    /// The car-following model.
    longitudinal: Rc<dyn LongitudinalModel>,
    /// The lane change model.
    lane_change: Rc<dyn LaneChangeModel>,
}

/// A prototype from which vehicles are created, e.g. by a traffic source.
#[derive(Clone)]
pub struct VehiclePrototype {
    /// The vehicle type label.
    pub label: String,
    /// The vehicle length in m.
    pub length: f64,
    /// The car-following model shared by vehicles of this type.
    pub longitudinal: Rc<dyn LongitudinalModel>,
    /// The lane change model shared by vehicles of this type.
    pub lane_change: Rc<dyn LaneChangeModel>,
}

/// A read-only copy of a vehicle's kinematic state.
///
/// Cross-segment lookups return snapshots with translated positions rather
/// than live references, so a query across a segment boundary is safe even
/// when the neighbouring segment is the querying segment itself (ring roads).
#[derive(Clone, Copy, Debug)]
pub struct VehicleSnapshot {
    /// The vehicle's ID.
    pub id: VehicleId,
    /// The position of the front bumper in m.
    pub front_pos: f64,
    /// The position of the rear bumper in m.
    pub rear_pos: f64,
    /// The speed in m/s.
    pub speed: f64,
    /// The vehicle length in m.
    pub length: f64,
}

impl VehicleSnapshot {
    /// Returns the snapshot shifted by `dx` metres.
    pub fn translate(mut self, dx: f64) -> Self {
        self.front_pos += dx;
        self.rear_pos += dx;
        self
    }
}

impl Vehicle {
    /// Creates a new vehicle from a prototype. The vehicle has no location
    /// until [`set_location`](Self::set_location) is called.
    pub(crate) fn new(id: VehicleId, proto: &VehiclePrototype) -> Self {
        Self {
            id,
            segment: SegmentId::null(),
            lane: 0,
            front_pos: 0.0,
            speed: 0.0,
            acc: 0.0,
            length: proto.length,
            label: proto.label.clone(),
            vel_adjust: 1.0,
            route: vec![],
            exit_end_pos: None,
            lane_change_timer: 0.0,
            longitudinal: proto.longitudinal.clone(),
            lane_change: proto.lane_change.clone(),
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The ID of the road segment the vehicle is currently on.
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// The lane the vehicle is currently in. 1 is the most inner lane;
    /// 0 is the overtaking lane.
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// The position of the front bumper along the segment in m.
    pub fn front_pos(&self) -> f64 {
        self.front_pos
    }

    /// The position of the rear bumper along the segment in m.
    pub fn rear_pos(&self) -> f64 {
        self.front_pos - self.length
    }

    /// The vehicle's speed in m/s.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// The vehicle's acceleration in m/s^2.
    pub fn acc(&self) -> f64 {
        self.acc
    }

    /// The vehicle's length in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The vehicle type label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The desired-speed adjustment factor.
    pub fn vel_adjust(&self) -> f64 {
        self.vel_adjust
    }

    /// Sets the desired-speed adjustment factor, a scalar multiplied with
    /// the desired speed and speed limit when computing accelerations.
    pub fn set_vel_adjust(&mut self, factor: f64) {
        self.vel_adjust = factor;
    }

    /// The remaining segments of the vehicle's route.
    pub fn route(&self) -> &[SegmentId] {
        &self.route
    }

    /// Sets the vehicle's route.
    pub fn set_route(&mut self, route: Vec<SegmentId>) {
        self.route = route;
    }

    /// The position at which the vehicle's exit lane ends, if any.
    pub fn exit_end_pos(&self) -> Option<f64> {
        self.exit_end_pos
    }

    /// Whether the vehicle is mid lane change.
    pub fn in_lane_change(&self) -> bool {
        self.lane_change_timer > 0.0
    }

    /// Takes a read-only copy of the vehicle's kinematic state.
    pub fn snapshot(&self) -> VehicleSnapshot {
        VehicleSnapshot {
            id: self.id,
            front_pos: self.front_pos,
            rear_pos: self.rear_pos(),
            speed: self.speed,
            length: self.length,
        }
    }

    /// Gets the vehicle's car-following model.
    pub(crate) fn longitudinal_model(&self) -> &Rc<dyn LongitudinalModel> {
        &self.longitudinal
    }

    /// Gets the vehicle's lane change model.
    pub(crate) fn lane_change_model(&self) -> &Rc<dyn LaneChangeModel> {
        &self.lane_change
    }

    /// Places the vehicle on a segment and lane at the given position.
    pub(crate) fn set_location(
        &mut self,
        segment: SegmentId,
        lane: usize,
        front_pos: f64,
        speed: f64,
    ) {
        self.segment = segment;
        self.lane = lane;
        self.front_pos = front_pos;
        self.speed = speed;
    }

    /// Updates the vehicle's segment and lane after a hand-off.
    pub(crate) fn set_segment_lane(&mut self, segment: SegmentId, lane: usize) {
        self.segment = segment;
        self.lane = lane;
    }

    /// Moves the vehicle to a different lane on the same segment.
    pub(crate) fn set_lane(&mut self, lane: usize) {
        self.lane = lane;
    }

    /// Shifts the vehicle's position by `dx` metres.
    pub(crate) fn translate(&mut self, dx: f64) {
        self.front_pos += dx;
    }

    /// Stages the acceleration computed by the longitudinal model.
    pub(crate) fn set_acc(&mut self, acc: f64) {
        self.acc = acc;
    }

    pub(crate) fn set_exit_end_pos(&mut self, pos: Option<f64>) {
        self.exit_end_pos = pos;
    }

    /// Starts a lane change that completes after `delay` seconds.
    pub(crate) fn begin_lane_change(&mut self, delay: f64) {
        self.lane_change_timer = delay;
    }

    /// Advances an in-progress lane change.
    pub(crate) fn advance_lane_change(&mut self, dt: f64) {
        self.lane_change_timer = f64::max(self.lane_change_timer - dt, 0.0);
    }

    /// Integrates the vehicle's speed and position from its staged
    /// acceleration over the time step `dt`.
    pub(crate) fn integrate(&mut self, dt: f64) {
        let speed = f64::max(self.speed + dt * self.acc, 0.0);
        self.front_pos += 0.5 * (self.speed + speed) * dt;
        self.speed = speed;
    }
}

impl fmt::Debug for Vehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vehicle")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("segment", &self.segment)
            .field("lane", &self.lane)
            .field("front_pos", &self.front_pos)
            .field("rear_pos", &self.rear_pos())
            .field("speed", &self.speed)
            .field("acc", &self.acc)
            .finish()
    }
}
