pub use lane::{LaneLink, LaneSegment, LaneType};
pub use network::{CrashPolicy, NetworkConfig, RoadNetwork};
pub use segment::{RoadConditions, RoadController, RoadSegment};
pub use series::{DemandPoint, InflowSeries};
pub use sink::TrafficSink;
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use source::inflow_file::{read_micro_entries, InflowColumns, InflowFileError, TimeFormat};
pub use source::{MicroEntry, SourceKind, TrafficComposition, TrafficSource};
pub use vehicle::lane_change::{LaneChangeModel, SafeGapModel};
pub use vehicle::model::{IdmModel, IdmParams, LaneContext, LongitudinalModel};
pub use vehicle::{Vehicle, VehiclePrototype, VehicleSnapshot};

pub mod detector;
mod lane;
mod network;
pub mod routing;
mod segment;
mod series;
mod sink;
mod source;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of a [RoadSegment].
    pub struct SegmentId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
}

/// The arena holding all road segments in a network.
pub type SegmentSet = SlotMap<SegmentId, RoadSegment>;
/// The arena holding all vehicles in a network.
pub type VehicleSet = SlotMap<VehicleId, Vehicle>;

/// The lane index of the auxiliary overtaking lane.
pub const OVERTAKING_LANE: usize = 0;
