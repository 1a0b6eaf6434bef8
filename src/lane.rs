use crate::vehicle::VehicleSnapshot;
use crate::{SegmentId, SegmentSet, VehicleId, VehicleSet};
use smallvec::SmallVec;

/// The type of a lane, governing lane change eligibility and exit behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LaneType {
    Traffic,
    Entrance,
    Exit,
    Shoulder,
    Restricted,
    Bicycle,
}

impl LaneType {
    /// Whether general traffic may change into a lane of this type.
    pub fn accepts_lane_changes(&self) -> bool {
        matches!(self, LaneType::Traffic | LaneType::Exit)
    }
}

/// A link to a lane of a (possibly different, possibly the same) road segment.
pub type LaneLink = (SegmentId, usize);

/// One lane's vehicle store and connectivity within one road segment.
///
/// Vehicles are kept sorted by decreasing rear position: index 0 is the most
/// downstream (most advanced) vehicle. All lookups are binary searches on
/// this order, so every mutating operation must preserve it; the invariant
/// is checked by debug assertions only.
#[derive(Clone, Debug)]
pub struct LaneSegment {
    /// The lane index within the road segment.
    lane: usize,
    /// The lane type.
    ty: LaneType,
    /// The vehicles in the lane, sorted by decreasing rear position.
    vehicles: Vec<VehicleId>,
    /// The upstream neighbour lane, if any.
    source: Option<LaneLink>,
    /// The downstream neighbour lane, if any.
    sink: Option<LaneLink>,
}

impl LaneSegment {
    /// Creates an empty lane.
    pub(crate) fn new(lane: usize, ty: LaneType) -> Self {
        Self {
            lane,
            ty,
            vehicles: vec![],
            source: None,
            sink: None,
        }
    }

    /// The lane index within the road segment.
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// The lane type.
    pub fn ty(&self) -> LaneType {
        self.ty
    }

    /// Sets the lane type. An entrance lane has no downstream continuation,
    /// so setting [LaneType::Entrance] clears the sink link.
    pub fn set_ty(&mut self, ty: LaneType) {
        self.ty = ty;
        if ty == LaneType::Entrance {
            self.sink = None;
        }
    }

    /// The upstream neighbour lane.
    pub fn source(&self) -> Option<LaneLink> {
        self.source
    }

    /// The downstream neighbour lane.
    pub fn sink(&self) -> Option<LaneLink> {
        self.sink
    }

    pub(crate) fn set_source(&mut self, link: Option<LaneLink>) {
        self.source = link;
    }

    pub(crate) fn set_sink(&mut self, link: Option<LaneLink>) {
        self.sink = link;
    }

    /// The vehicles in the lane, most downstream first.
    pub fn vehicle_ids(&self) -> &[VehicleId] {
        &self.vehicles
    }

    /// The number of vehicles in the lane.
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Whether the lane holds no vehicles.
    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// The most downstream vehicle in the lane.
    pub fn front_vehicle(&self) -> Option<VehicleId> {
        self.vehicles.first().copied()
    }

    /// The most upstream vehicle in the lane.
    pub fn rear_vehicle(&self) -> Option<VehicleId> {
        self.vehicles.last().copied()
    }

    /// Inserts a vehicle at its sorted position, found by binary search on
    /// the rear position. Two vehicles at the exact same position indicate a
    /// modelling bug, asserted in debug builds.
    pub(crate) fn add_vehicle(&mut self, vehicles: &VehicleSet, id: VehicleId) {
        let rear = vehicles[id].rear_pos();
        let idx = self
            .vehicles
            .partition_point(|v| vehicles[*v].rear_pos() > rear);
        debug_assert!(
            idx >= self.vehicles.len() || vehicles[self.vehicles[idx]].rear_pos() < rear,
            "two vehicles at the same rear position {} in lane {}",
            rear,
            self.lane
        );
        self.vehicles.insert(idx, id);
    }

    /// Appends a vehicle at the upstream end in O(1). The caller must know
    /// the vehicle is the most upstream one, e.g. a vehicle continuing from
    /// the source lane segment.
    pub(crate) fn append_vehicle(&mut self, vehicles: &VehicleSet, id: VehicleId) {
        debug_assert!(
            self.vehicles
                .last()
                .map_or(true, |v| vehicles[*v].rear_pos() >= vehicles[id].rear_pos()),
            "appended vehicle is not the most upstream in lane {}",
            self.lane
        );
        self.vehicles.push(id);
    }

    /// Removes the vehicle with the given ID from the lane.
    pub(crate) fn remove_vehicle(&mut self, id: VehicleId) {
        if let Some(idx) = self.vehicles.iter().rposition(|v| *v == id) {
            self.vehicles.remove(idx);
        }
    }

    /// Removes all vehicles from the lane.
    pub(crate) fn clear(&mut self) {
        self.vehicles.clear();
    }

    /// Finds the vehicle immediately ahead of the hypothetical position
    /// `pos`, looking one hop into the sink lane segment when the query
    /// falls beyond the local vehicle list. `own_length` is the length of
    /// the lane's own road segment, used to translate cross-segment hits
    /// into the local frame.
    pub fn front_vehicle_at(
        &self,
        pos: f64,
        own_length: f64,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> Option<VehicleSnapshot> {
        let idx = self
            .vehicles
            .partition_point(|v| vehicles[*v].rear_pos() > pos);
        if idx > 0 {
            return Some(vehicles[self.vehicles[idx - 1]].snapshot());
        }
        let (seg, lane) = self.sink?;
        let next = segments.get(seg)?;
        let id = next.lane(lane).rear_vehicle()?;
        Some(vehicles[id].snapshot().translate(own_length))
    }

    /// Finds the vehicle at or behind the hypothetical position `pos`,
    /// looking one hop into the source lane segment when the query falls
    /// behind the local vehicle list.
    pub fn rear_vehicle_at(
        &self,
        pos: f64,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> Option<VehicleSnapshot> {
        let idx = self
            .vehicles
            .partition_point(|v| vehicles[*v].rear_pos() > pos);
        if idx < self.vehicles.len() {
            return Some(vehicles[self.vehicles[idx]].snapshot());
        }
        let (seg, lane) = self.source?;
        let prev = segments.get(seg)?;
        let id = prev.lane(lane).front_vehicle()?;
        Some(vehicles[id].snapshot().translate(-prev.length()))
    }

    /// Pops all vehicles whose rear position has passed the end of the
    /// segment, most downstream first.
    pub(crate) fn pop_past_end(
        &mut self,
        length: f64,
        vehicles: &VehicleSet,
    ) -> SmallVec<[VehicleId; 4]> {
        let count = self
            .vehicles
            .partition_point(|v| vehicles[*v].rear_pos() > length);
        self.vehicles.drain(..count).collect()
    }

    /// Whether the lane's vehicles are sorted by non-increasing rear
    /// position. Only used by debug assertions.
    pub(crate) fn is_sorted(&self, vehicles: &VehicleSet) -> bool {
        self.vehicles
            .windows(2)
            .all(|w| vehicles[w[0]].rear_pos() >= vehicles[w[1]].rear_pos())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vehicle::test::test_prototype;
    use crate::vehicle::Vehicle;
    use crate::SegmentId;
    use slotmap::{Key, SlotMap};

    fn make_lane(rears: &[f64]) -> (LaneSegment, VehicleSet) {
        let mut vehicles: VehicleSet = SlotMap::with_key();
        let mut lane = LaneSegment::new(1, LaneType::Traffic);
        let proto = test_prototype();
        for &rear in rears {
            let vid = vehicles.insert_with_key(|id| {
                let mut v = Vehicle::new(id, &proto);
                v.set_location(SegmentId::null(), 1, rear + proto.length, 0.0);
                v
            });
            lane.add_vehicle(&vehicles, vid);
        }
        (lane, vehicles)
    }

    #[test]
    fn add_vehicle_keeps_descending_order() {
        let (lane, vehicles) = make_lane(&[80.0, 120.0, 40.0]);
        let rears = lane
            .vehicle_ids()
            .iter()
            .map(|v| vehicles[*v].rear_pos())
            .collect::<Vec<_>>();
        assert_eq!(rears, vec![120.0, 80.0, 40.0]);
        assert!(lane.is_sorted(&vehicles));
    }

    #[test]
    fn front_and_rear_vehicle() {
        let (lane, vehicles) = make_lane(&[120.0, 80.0, 40.0]);
        assert_eq!(
            vehicles[lane.front_vehicle().unwrap()].rear_pos(),
            120.0
        );
        assert_eq!(vehicles[lane.rear_vehicle().unwrap()].rear_pos(), 40.0);
    }

    #[test]
    fn binary_search_lookup() {
        let (lane, vehicles) = make_lane(&[120.0, 80.0, 40.0]);
        let segments: SegmentSet = SlotMap::with_key();

        let front = lane.front_vehicle_at(60.0, 1000.0, &segments, &vehicles);
        assert_eq!(front.unwrap().rear_pos, 80.0);

        let rear = lane.rear_vehicle_at(60.0, &segments, &vehicles);
        assert_eq!(rear.unwrap().rear_pos, 40.0);
    }

    #[test]
    fn lookup_at_exact_position() {
        let (lane, vehicles) = make_lane(&[120.0, 80.0, 40.0]);
        let segments: SegmentSet = SlotMap::with_key();

        // A vehicle exactly at the queried position is "at-or-behind".
        let rear = lane.rear_vehicle_at(80.0, &segments, &vehicles);
        assert_eq!(rear.unwrap().rear_pos, 80.0);
        let front = lane.front_vehicle_at(80.0, 1000.0, &segments, &vehicles);
        assert_eq!(front.unwrap().rear_pos, 120.0);
    }

    #[test]
    fn lookup_misses_without_links() {
        let (lane, vehicles) = make_lane(&[120.0, 80.0, 40.0]);
        let segments: SegmentSet = SlotMap::with_key();

        assert!(lane
            .front_vehicle_at(130.0, 1000.0, &segments, &vehicles)
            .is_none());
        assert!(lane.rear_vehicle_at(30.0, &segments, &vehicles).is_none());
    }

    #[test]
    fn pop_past_end_takes_downstream_prefix() {
        let (mut lane, vehicles) = make_lane(&[120.0, 80.0, 40.0]);
        let popped = lane.pop_past_end(70.0, &vehicles);
        assert_eq!(popped.len(), 2);
        assert_eq!(vehicles[popped[0]].rear_pos(), 120.0);
        assert_eq!(vehicles[popped[1]].rear_pos(), 80.0);
        assert_eq!(lane.vehicle_count(), 1);
    }

    #[test]
    fn entrance_type_clears_sink() {
        let mut lane = LaneSegment::new(1, LaneType::Traffic);
        lane.set_sink(Some((SegmentId::null(), 1)));
        lane.set_ty(LaneType::Entrance);
        assert_eq!(lane.sink(), None);
    }
}
