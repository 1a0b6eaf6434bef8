use crate::vehicle::Vehicle;
use log::debug;

/// The default measuring interval for boundary flow measurement in s.
pub const MEASURING_INTERVAL: f64 = 60.0;

/// A terminal downstream boundary: removes vehicles that cross the end of
/// a road segment and measures the resulting outflow.
#[derive(Clone, Debug)]
pub struct TrafficSink {
    /// The total number of vehicles removed.
    total_removed: u64,
    /// Vehicles removed within the current measuring window.
    window_count: u64,
    /// Elapsed time within the current measuring window in s.
    window_elapsed: f64,
    /// The measuring interval in s.
    interval: f64,
    /// The outflow measured over the last complete window in veh/s.
    measured_outflow: f64,
}

impl Default for TrafficSink {
    fn default() -> Self {
        Self::new(MEASURING_INTERVAL)
    }
}

impl TrafficSink {
    /// Creates a sink measuring its outflow over the given interval.
    pub fn new(interval: f64) -> Self {
        assert!(interval > 0.0, "measuring interval must be positive");
        Self {
            total_removed: 0,
            window_count: 0,
            window_elapsed: 0.0,
            interval,
            measured_outflow: 0.0,
        }
    }

    /// The total number of vehicles removed by this sink.
    pub fn total_removed(&self) -> u64 {
        self.total_removed
    }

    /// The outflow measured over the last complete window in veh/s.
    pub fn measured_outflow(&self) -> f64 {
        self.measured_outflow
    }

    /// Records a vehicle removed at the boundary.
    pub(crate) fn record_removal(&mut self, vehicle: &Vehicle) {
        debug!("sink removed vehicle {:?}", vehicle.id());
        self.total_removed += 1;
        self.window_count += 1;
    }

    /// Advances the measuring window, converting the removal count into a
    /// flow rate every full interval.
    pub(crate) fn time_step(&mut self, dt: f64) {
        self.window_elapsed += dt;
        if self.window_elapsed >= self.interval {
            self.measured_outflow = self.window_count as f64 / self.window_elapsed;
            self.window_count = 0;
            self.window_elapsed = 0.0;
        }
    }
}
