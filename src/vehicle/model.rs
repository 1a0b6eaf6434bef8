use crate::vehicle::VehicleSnapshot;

/// The maximum deceleration of all vehicles in m/s^2.
const MAX_DECEL: f64 = -9.0;

/// The number of bisection steps used to solve for the equilibrium speed.
const EQ_SPEED_ITERATIONS: usize = 40;

/// The number of density samples used to locate the flow maximum.
const FLOW_SCAN_SAMPLES: usize = 200;

/// Context passed to the longitudinal model alongside the vehicle's own state.
#[derive(Clone, Copy, Debug)]
pub struct LaneContext {
    /// The current speed limit of the road segment in m/s.
    pub speed_limit: f64,
    /// The vehicle's desired-speed adjustment factor.
    pub vel_adjust: f64,
    /// The index of the lane to the left of the vehicle's lane, if any.
    /// Asymmetric models may use this to bias their behaviour.
    pub left_lane: Option<usize>,
}

/// A car-following model that computes a vehicle's acceleration from its
/// local neighbourhood. Implementations must be pure functions of the
/// passed state; positions are never mutated through this trait.
pub trait LongitudinalModel {
    /// Computes the acceleration of `own` given its `leader`, in m/s^2.
    fn acceleration(
        &self,
        own: &VehicleSnapshot,
        leader: Option<&VehicleSnapshot>,
        ctx: &LaneContext,
    ) -> f64;

    /// The desired speed on an open road in m/s.
    fn desired_speed(&self) -> f64;

    /// The steady-state speed at the given density in veh/m.
    fn equilibrium_speed(&self, density: f64) -> f64;

    /// The inverse of the flow-maximizing density, in m.
    fn flow_maximizing_inverse_density(&self) -> f64;

    /// Whether the model updates on a coarse cellular-automaton grid.
    /// Boundary insertion uses a different gap criterion for these models.
    fn is_cellular_automaton(&self) -> bool {
        false
    }
}

/// The parameters of the intelligent driver model.
#[derive(Clone, Copy, Debug)]
pub struct IdmParams {
    /// The desired speed in m/s.
    pub desired_speed: f64,
    /// The desired gap to the vehicle ahead in seconds.
    pub time_headway: f64,
    /// The minimum gap between vehicles in m.
    pub min_gap: f64,
    /// The maximum acceleration in m/s^2.
    pub max_acceleration: f64,
    /// The comfortable deceleration in m/s^2, a positive number.
    pub comf_deceleration: f64,
    /// The vehicle length assumed by the fundamental diagram, in m.
    pub vehicle_length: f64,
}

/// The intelligent driver model.
#[derive(Clone, Debug)]
pub struct IdmModel {
    v0: f64,
    headway: f64,
    min_gap: f64,
    max_acc: f64,
    comf_dec: f64,
    veh_len: f64,
    /// Precomputed `1 / rho_qmax` in m.
    inv_rho_q_max: f64,
}

impl IdmModel {
    /// Creates a new model, precomputing its flow-maximizing density.
    pub fn new(params: &IdmParams) -> Self {
        let mut model = Self {
            v0: params.desired_speed,
            headway: params.time_headway,
            min_gap: params.min_gap,
            max_acc: params.max_acceleration,
            comf_dec: params.comf_deceleration,
            veh_len: params.vehicle_length,
            inv_rho_q_max: 0.0,
        };
        model.inv_rho_q_max = model.find_flow_maximum();
        model
    }

    /// Computes an acceleration using the intelligent driver model.
    fn idm(&self, net_dist: f64, my_vel: f64, their_vel: f64, v0: f64) -> f64 {
        if net_dist <= 0.0 {
            return MAX_DECEL;
        }
        let appr = my_vel - their_vel;
        let factor = 1. / (2. * (self.max_acc * self.comf_dec).sqrt());
        let ss = self.min_gap + (my_vel * self.headway) + (my_vel * appr * factor);
        let term = f64::max(ss, 0.0) / net_dist;
        let acc = self.max_acc * (1. - (my_vel / v0).powi(4) - (term * term));
        f64::max(acc, MAX_DECEL)
    }

    /// The effective desired speed after applying the context.
    fn effective_v0(&self, ctx: &LaneContext) -> f64 {
        f64::min(self.v0, ctx.speed_limit) * ctx.vel_adjust
    }

    /// Scans the fundamental diagram `q(rho) = rho * v_eq(rho)`
    /// for the density that maximizes flow.
    fn find_flow_maximum(&self) -> f64 {
        let rho_max = 1.0 / self.veh_len;
        let mut best = (rho_max, 0.0);
        for i in 1..FLOW_SCAN_SAMPLES {
            let rho = rho_max * (i as f64) / (FLOW_SCAN_SAMPLES as f64);
            let q = rho * self.equilibrium_speed(rho);
            if q > best.1 {
                best = (rho, q);
            }
        }
        1.0 / best.0
    }
}

impl LongitudinalModel for IdmModel {
    fn acceleration(
        &self,
        own: &VehicleSnapshot,
        leader: Option<&VehicleSnapshot>,
        ctx: &LaneContext,
    ) -> f64 {
        let v0 = self.effective_v0(ctx);
        match leader {
            Some(leader) => {
                let net_dist = leader.rear_pos - own.front_pos;
                self.idm(net_dist, own.speed, leader.speed, v0)
            }
            None => self.max_acc * (1. - (own.speed / v0).powi(4)),
        }
    }

    fn desired_speed(&self) -> f64 {
        self.v0
    }

    /// Solves `(v/v0)^4 + ((s0 + vT)/s)^2 = 1` for `v` by bisection,
    /// where `s` is the net gap implied by the density.
    fn equilibrium_speed(&self, density: f64) -> f64 {
        if density <= 0.0 {
            return self.v0;
        }
        let gap = 1.0 / density - self.veh_len;
        if gap <= self.min_gap {
            return 0.0;
        }
        let balance = |v: f64| {
            let ss = self.min_gap + v * self.headway;
            (v / self.v0).powi(4) + (ss / gap).powi(2)
        };
        let (mut lo, mut hi) = (0.0, self.v0);
        for _ in 0..EQ_SPEED_ITERATIONS {
            let mid = 0.5 * (lo + hi);
            if balance(mid) < 1.0 {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        0.5 * (lo + hi)
    }

    fn flow_maximizing_inverse_density(&self) -> f64 {
        self.inv_rho_q_max
    }
}
