use crate::segment::RoadSegment;
use crate::series::InflowSeries;
use crate::sink::MEASURING_INTERVAL;
use crate::util::rotated_range;
use crate::vehicle::{Vehicle, VehiclePrototype};
use crate::{SegmentId, VehicleSet};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

pub mod inflow_file;

/// The deceleration assumed when limiting entry speeds kinematically, in m/s^2.
const ENTRY_BRAKE_DECEL: f64 = 4.0;

/// Scaling applied to the flow-maximizing spacing to obtain the minimum
/// acceptable entry gap.
const ENTRY_GAP_SCALE: f64 = 0.8;

/// The clearance required on each side of a vehicle merging from a ramp, in m.
const RAMP_CLEARANCE: f64 = 4.0;

/// A single scheduled entry of a microscopic, file-driven traffic source.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MicroEntry {
    /// The scheduled entry time in s.
    pub time: f64,
    /// The vehicle type label.
    pub label: String,
    /// The entry lane, overriding the round-robin lane choice.
    pub lane: Option<usize>,
    /// The name of the route the vehicle follows.
    pub route: Option<String>,
    /// The entry speed in m/s, overriding the demand-series speed.
    pub speed: Option<f64>,
    /// The vehicle length in m, overriding the prototype length.
    pub length: Option<f64>,
    /// The statistical weight of the entry.
    pub weight: Option<f64>,
}

/// A weighted set of vehicle prototypes generated by a traffic source.
#[derive(Clone)]
pub struct TrafficComposition {
    entries: Vec<(VehiclePrototype, f64)>,
    total_weight: f64,
}

impl TrafficComposition {
    /// Creates a composition from prototypes and their weights.
    pub fn new(entries: Vec<(VehiclePrototype, f64)>) -> Self {
        if entries.is_empty() {
            panic!("Traffic composition must contain atleast one prototype");
        }
        if entries.iter().any(|(_, w)| *w <= 0.0) {
            panic!("Traffic composition weights must be positive");
        }
        let total_weight = entries.iter().map(|(_, w)| w).sum();
        Self {
            entries,
            total_weight,
        }
    }

    /// Creates a composition of a single prototype.
    pub fn single(prototype: VehiclePrototype) -> Self {
        Self::new(vec![(prototype, 1.0)])
    }

    /// Samples a prototype proportionally to its weight.
    fn sample(&self, rng: &mut StdRng) -> &VehiclePrototype {
        let mut x = rng.gen::<f64>() * self.total_weight;
        for (proto, weight) in &self.entries {
            x -= weight;
            if x <= 0.0 {
                return proto;
            }
        }
        &self.entries[self.entries.len() - 1].0
    }

    /// Finds the prototype with the given label.
    fn by_label(&self, label: &str) -> Option<&VehiclePrototype> {
        self.entries
            .iter()
            .map(|(proto, _)| proto)
            .find(|proto| proto.label == label)
    }
}

/// The variant-specific state of a traffic source.
pub enum SourceKind {
    /// Vehicles are generated from the demand series and the composition.
    Macroscopic,
    /// Vehicles are pulled from a time-ordered entry queue, e.g. parsed
    /// from a micro-inflow file. An entry whose insertion fails waits at
    /// the head of the queue for the next tick.
    Microscopic { pending: VecDeque<MicroEntry> },
}

/// An upstream boundary that injects vehicles into a road segment.
///
/// Fractional demand is accumulated into `n_wait`; whenever at least one
/// whole vehicle is queued, a single insertion is attempted per tick,
/// cycling through the lanes round-robin starting from the lane after the
/// last successful entry. Entry positions and speeds are chosen to avoid
/// seeding artificial shock waves: rounding fractional demand to whole
/// insertions per fixed timestep would periodically over- and under-insert
/// relative to the true demand, which can activate a phantom bottleneck, so
/// the entry point is allowed to float within roughly one spacing.
pub struct TrafficSource {
    series: InflowSeries,
    composition: TrafficComposition,
    kind: SourceKind,
    /// A mid-segment merge window; `None` enters at the upstream end.
    entry_window: Option<(f64, f64)>,
    /// Named routes assignable to entering vehicles.
    routes: FxHashMap<String, Vec<SegmentId>>,
    /// The fractional count of vehicles queued for entry.
    n_wait: f64,
    /// The 0-based index of the lane to try first, round-robin.
    next_lane: usize,
    /// The total number of vehicles inserted.
    total_entered: u64,
    /// Vehicles inserted within the current measuring window.
    window_count: u64,
    /// Elapsed time within the current measuring window in s.
    window_elapsed: f64,
    measuring_interval: f64,
    /// The inflow measured over the last complete window in veh/s.
    measured_inflow: f64,
    /// Desired-speed adjustment sampled for each generated vehicle.
    speed_jitter: Option<Normal<f64>>,
    rng: StdRng,
}

impl TrafficSource {
    /// Creates a macroscopic source generating vehicles from a demand series.
    pub fn macroscopic(series: InflowSeries, composition: TrafficComposition) -> Self {
        Self::build(series, composition, SourceKind::Macroscopic, None)
    }

    /// Creates a microscopic source replaying a time-ordered entry queue.
    /// The entries must be sorted by time.
    pub fn microscopic(
        series: InflowSeries,
        composition: TrafficComposition,
        entries: Vec<MicroEntry>,
    ) -> Self {
        if entries.windows(2).any(|w| w[0].time > w[1].time) {
            panic!("Micro-inflow entries must be sorted by time");
        }
        let kind = SourceKind::Microscopic {
            pending: entries.into(),
        };
        Self::build(series, composition, kind, None)
    }

    /// Creates a simple on-ramp merging vehicles into the outermost lane
    /// within the given window of positions.
    pub fn simple_ramp(
        series: InflowSeries,
        composition: TrafficComposition,
        window: (f64, f64),
    ) -> Self {
        if window.0 < 0.0 || window.1 <= window.0 {
            panic!("Ramp merge window must be a non-empty position range");
        }
        Self::build(series, composition, SourceKind::Macroscopic, Some(window))
    }

    fn build(
        series: InflowSeries,
        composition: TrafficComposition,
        kind: SourceKind,
        entry_window: Option<(f64, f64)>,
    ) -> Self {
        Self {
            series,
            composition,
            kind,
            entry_window,
            routes: FxHashMap::default(),
            n_wait: 0.0,
            next_lane: 0,
            total_entered: 0,
            window_count: 0,
            window_elapsed: 0.0,
            measuring_interval: MEASURING_INTERVAL,
            measured_inflow: 0.0,
            speed_jitter: None,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Seeds the source's random number generator.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Randomises the desired speed of generated vehicles by a factor
    /// sampled from a normal distribution with mean 1 and the given
    /// standard deviation, clamped to `0.75..=1.25`.
    pub fn with_speed_jitter(mut self, stddev: f64) -> Self {
        self.speed_jitter =
            Some(Normal::new(1.0, stddev).expect("Invalid standard deviation"));
        self
    }

    /// Registers a named route assignable to entering vehicles.
    pub fn add_route(&mut self, name: impl Into<String>, segments: Vec<SegmentId>) {
        self.routes.insert(name.into(), segments);
    }

    /// The demand series driving the source.
    pub fn series_mut(&mut self) -> &mut InflowSeries {
        &mut self.series
    }

    /// The total inflow over all lanes at time `t` in veh/s.
    pub fn total_inflow(&self, t: f64, lane_count: usize) -> f64 {
        f64::max(self.series.flow_per_lane(t), 0.0) * lane_count as f64
    }

    /// The number of whole vehicles currently queued for entry.
    pub fn queue_length(&self, time: f64) -> usize {
        match &self.kind {
            SourceKind::Macroscopic => self.n_wait as usize,
            SourceKind::Microscopic { pending } => {
                pending.iter().take_while(|e| e.time <= time).count()
            }
        }
    }

    /// The fractional count of vehicles queued for entry.
    pub fn n_wait(&self) -> f64 {
        self.n_wait
    }

    /// The total number of vehicles inserted by this source.
    pub fn total_entered(&self) -> u64 {
        self.total_entered
    }

    /// The inflow measured over the last complete window in veh/s.
    pub fn measured_inflow(&self) -> f64 {
        self.measured_inflow
    }

    /// Advances the source by one tick, inserting at most one vehicle.
    pub(crate) fn time_step(
        &mut self,
        dt: f64,
        time: f64,
        segment: &mut RoadSegment,
        vehicles: &mut VehicleSet,
    ) {
        self.window_elapsed += dt;
        if self.window_elapsed >= self.measuring_interval {
            self.measured_inflow = self.window_count as f64 / self.window_elapsed;
            self.window_count = 0;
            self.window_elapsed = 0.0;
        }

        match self.kind {
            SourceKind::Macroscopic => self.macro_step(dt, time, segment, vehicles),
            SourceKind::Microscopic { .. } => self.micro_step(time, segment, vehicles),
        }
    }

    fn macro_step(
        &mut self,
        dt: f64,
        time: f64,
        segment: &mut RoadSegment,
        vehicles: &mut VehicleSet,
    ) {
        self.n_wait += self.total_inflow(time, segment.lane_count()) * dt;
        if self.n_wait < 1.0 {
            return;
        }
        let proto = self.composition.sample(&mut self.rng).clone();
        let speed = self.series.speed(time);
        let flow = f64::max(self.series.flow_per_lane(time), 0.0);
        let entered = match self.entry_window {
            None => self.enter_round_robin(segment, vehicles, &proto, speed, flow, None),
            Some(window) => self.enter_in_window(segment, vehicles, &proto, speed, window),
        };
        if entered {
            self.n_wait -= 1.0;
        }
    }

    fn micro_step(&mut self, time: f64, segment: &mut RoadSegment, vehicles: &mut VehicleSet) {
        let entry = match &mut self.kind {
            SourceKind::Microscopic { pending } => {
                if pending.front().map_or(false, |e| e.time <= time) {
                    pending.pop_front()
                } else {
                    None
                }
            }
            SourceKind::Macroscopic => None,
        };
        let entry = match entry {
            Some(entry) => entry,
            None => return,
        };

        let mut proto = match self.composition.by_label(&entry.label) {
            Some(proto) => proto.clone(),
            None => self.composition.sample(&mut self.rng).clone(),
        };
        if let Some(length) = entry.length {
            proto.length = length;
        }
        let speed = entry.speed.unwrap_or_else(|| self.series.speed(time));
        let route = entry.route.as_deref().map(|name| {
            self.routes
                .get(name)
                .unwrap_or_else(|| panic!("unknown route `{}`", name))
                .clone()
        });

        let entered = match entry.lane {
            Some(lane) => self
                .try_enter(segment, vehicles, lane, &proto, speed, 0.0, route)
                .is_some(),
            None => self.enter_round_robin(segment, vehicles, &proto, speed, 0.0, route),
        };
        if !entered {
            if let SourceKind::Microscopic { pending } = &mut self.kind {
                pending.push_front(entry);
            }
        }
    }

    /// Tries each lane once, starting after the last successful entry lane.
    fn enter_round_robin(
        &mut self,
        segment: &mut RoadSegment,
        vehicles: &mut VehicleSet,
        proto: &VehiclePrototype,
        speed: f64,
        flow: f64,
        route: Option<Vec<SegmentId>>,
    ) -> bool {
        let lane_count = segment.lane_count();
        for i in rotated_range(lane_count, self.next_lane) {
            let lane = i + 1;
            if self
                .try_enter(segment, vehicles, lane, proto, speed, flow, route.clone())
                .is_some()
            {
                self.next_lane = (i + 1) % lane_count;
                return true;
            }
        }
        false
    }

    /// Attempts a single entry at the upstream end of the given lane.
    ///
    /// On an empty lane the vehicle enters at position 0 with the demand
    /// speed. Otherwise the gap to the most upstream vehicle must exceed a
    /// minimum derived from the model's flow-maximizing density (or, for
    /// cellular-automaton models, the leader's speed); the entry speed is
    /// limited by the leader and by kinematic braking, and the entry point
    /// floats between the demand-implied spacing and a safety offset.
    fn try_enter(
        &mut self,
        segment: &mut RoadSegment,
        vehicles: &mut VehicleSet,
        lane: usize,
        proto: &VehiclePrototype,
        demand_speed: f64,
        flow: f64,
        route: Option<Vec<SegmentId>>,
    ) -> Option<()> {
        if lane < 1 || lane > segment.lane_count() {
            panic!(
                "invalid entry lane {} for segment with {} lanes",
                lane,
                segment.lane_count()
            );
        }

        let (front_pos, speed) = match segment.lane(lane).rear_vehicle() {
            None => (0.0, demand_speed),
            Some(leader_id) => {
                let leader = vehicles[leader_id].snapshot();
                let net_gap = leader.rear_pos;
                let model = &proto.longitudinal;
                let min_gap = if model.is_cellular_automaton() {
                    leader.speed
                } else {
                    ENTRY_GAP_SCALE * model.flow_maximizing_inverse_density()
                };
                if net_gap < min_gap {
                    return None;
                }

                let v_eq = model.equilibrium_speed(1.0 / (net_gap + proto.length));
                let v_kin =
                    (leader.speed.powi(2) + 2.0 * ENTRY_BRAKE_DECEL * net_gap).sqrt();
                let speed = demand_speed
                    .min(1.5 * leader.speed)
                    .min(v_eq)
                    .min(v_kin);

                let spacing = if flow > 0.0 { speed / flow } else { f64::INFINITY };
                let latest = f64::max(net_gap - min_gap, 0.0);
                let front_pos = f64::max(leader.rear_pos - spacing, 0.0).min(latest);
                (front_pos, speed)
            }
        };

        self.insert_vehicle(segment, vehicles, lane, proto, front_pos, speed, route);
        Some(())
    }

    /// Attempts an entry into the largest free stretch of the outermost
    /// lane within the merge window.
    fn enter_in_window(
        &mut self,
        segment: &mut RoadSegment,
        vehicles: &mut VehicleSet,
        proto: &VehiclePrototype,
        demand_speed: f64,
        window: (f64, f64),
    ) -> bool {
        let lane = segment.lane_count();
        let required = proto.length + 2.0 * RAMP_CLEARANCE;

        // Free intervals between successive vehicles, clipped to the window.
        let mut bounds = vec![window.1];
        bounds.extend(
            segment
                .lane(lane)
                .vehicle_ids()
                .iter()
                .flat_map(|id| {
                    let v = &vehicles[*id];
                    [v.front_pos(), v.rear_pos()]
                }),
        );
        bounds.push(window.0);

        let mut best: Option<(f64, f64)> = None;
        for pair in bounds.chunks(2) {
            let (hi, lo) = (pair[0].min(window.1), pair[1].max(window.0));
            if hi <= lo {
                continue;
            }
            if best.map_or(true, |(bl, bh)| hi - lo > bh - bl) {
                best = Some((lo, hi));
            }
        }

        match best {
            Some((lo, hi)) if hi - lo >= required => {
                let front_pos = 0.5 * (lo + hi) + 0.5 * proto.length;
                let speed = f64::min(demand_speed, 0.5 * segment.conditions().speed_limit);
                self.insert_vehicle(segment, vehicles, lane, proto, front_pos, speed, None);
                true
            }
            _ => false,
        }
    }

    fn insert_vehicle(
        &mut self,
        segment: &mut RoadSegment,
        vehicles: &mut VehicleSet,
        lane: usize,
        proto: &VehiclePrototype,
        front_pos: f64,
        speed: f64,
        route: Option<Vec<SegmentId>>,
    ) {
        let vel_adjust = self
            .speed_jitter
            .map(|distr| distr.sample(&mut self.rng).clamp(0.75, 1.25))
            .unwrap_or(1.0);
        let segment_id = segment.id();
        let vid = vehicles.insert_with_key(|id| {
            let mut vehicle = Vehicle::new(id, proto);
            vehicle.set_location(segment_id, lane, front_pos, speed);
            vehicle.set_vel_adjust(vel_adjust);
            if let Some(route) = route {
                vehicle.set_route(route);
            }
            vehicle
        });
        segment.lane_mut(lane).add_vehicle(vehicles, vid);
        self.total_entered += 1;
        self.window_count += 1;
        debug!(
            "vehicle {:?} entered lane {} at {:.1} m with {:.1} m/s",
            vid, lane, front_pos, speed
        );
    }
}
