use crate::util::lerp_extrapolate;

/// A single point of a demand time series.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DemandPoint {
    /// The time in s.
    pub time: f64,
    /// The inflow in veh/s per lane.
    pub flow_per_lane: f64,
    /// The entry speed in m/s.
    pub speed: f64,
}

/// A piecewise-linear demand time series describing the inflow and
/// entry speed at an upstream boundary.
///
/// Lookups between data points interpolate linearly; lookups outside the
/// data range extrapolate using the slope of the boundary segment.
#[derive(Clone, Debug)]
pub struct InflowSeries {
    points: Vec<DemandPoint>,
    /// Overrides the data points when set, for interactive control.
    constant_flow_per_lane: Option<f64>,
}

impl InflowSeries {
    /// Creates a demand series from data points, which must be
    /// non-empty and sorted by time.
    pub fn new(points: Vec<DemandPoint>) -> Self {
        if points.is_empty() {
            panic!("Inflow series must contain atleast one data point");
        }
        if points.windows(2).any(|w| w[0].time > w[1].time) {
            panic!("Inflow series data points must be sorted by time");
        }
        Self {
            points,
            constant_flow_per_lane: None,
        }
    }

    /// Creates a time-independent demand series.
    pub fn constant(flow_per_lane: f64, speed: f64) -> Self {
        Self::new(vec![DemandPoint {
            time: 0.0,
            flow_per_lane,
            speed,
        }])
    }

    /// Sets or clears a constant flow override, ignoring the data points.
    pub fn set_constant_flow_per_lane(&mut self, flow: Option<f64>) {
        self.constant_flow_per_lane = flow;
    }

    /// Gets the inflow at time `t` in veh/s per lane.
    pub fn flow_per_lane(&self, t: f64) -> f64 {
        if let Some(flow) = self.constant_flow_per_lane {
            return flow;
        }
        self.sample(t, |p| p.flow_per_lane)
    }

    /// Gets the entry speed at time `t` in m/s.
    pub fn speed(&self, t: f64) -> f64 {
        self.sample(t, |p| p.speed)
    }

    /// Interpolates the series at `t`, extrapolating with the
    /// boundary segment's slope outside the data range.
    fn sample(&self, t: f64, f: impl Fn(&DemandPoint) -> f64) -> f64 {
        let points = &self.points;
        if points.len() == 1 {
            return f(&points[0]);
        }
        let idx = points
            .windows(2)
            .position(|w| t < w[1].time)
            .unwrap_or(points.len() - 2);
        let (p0, p1) = (&points[idx], &points[idx + 1]);
        lerp_extrapolate(p0.time, f(p0), p1.time, f(p1), t)
    }
}
