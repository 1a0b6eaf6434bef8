use crate::lane::LaneType;
use crate::segment::RoadSegment;
use crate::vehicle::VehicleSnapshot;
use crate::{SegmentSet, VehicleSet};

/// A model that decides whether a vehicle changes lanes.
///
/// Decisions are only requested for vehicles that are not already mid-change;
/// an accepted change starts a delay of [`change_delay`](Self::change_delay)
/// seconds during which the vehicle is not re-queried.
pub trait LaneChangeModel {
    /// Considers a move to an adjacent lane.
    /// Returns the target lane index if the vehicle should change.
    fn consider_lane_change(
        &self,
        own: &VehicleSnapshot,
        lane: usize,
        segment: &RoadSegment,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> Option<usize>;

    /// Considers starting an overtaking manoeuvre onto the peer-road
    /// overtaking lane. Only called when the segment has a peer road.
    fn consider_overtaking(
        &self,
        own: &VehicleSnapshot,
        segment: &RoadSegment,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> bool;

    /// Considers finishing an overtaking manoeuvre by returning to lane 1.
    fn consider_finish_overtaking(
        &self,
        own: &VehicleSnapshot,
        segment: &RoadSegment,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> bool;

    /// The duration of an in-progress lane change in s.
    fn change_delay(&self) -> f64;
}

/// A gap-acceptance lane change model.
///
/// A change is accepted when both the gap to the new leader and the gap to
/// the new follower are safe, and either the new lane offers a clear
/// advantage or the current lane must be vacated (an entrance lane).
#[derive(Clone, Debug)]
pub struct SafeGapModel {
    /// The minimum acceptable net gap in m.
    pub min_gap: f64,
    /// The required time headway to the new leader and follower in s.
    pub safe_headway: f64,
    /// The gap gain in m required to make a discretionary change.
    pub advantage: f64,
    /// The lookahead within which a leader motivates a change, in m.
    pub lookahead: f64,
    /// The duration of a lane change in s.
    pub delay: f64,
    /// The time for which the opposing lane must be clear to overtake, in s.
    pub overtake_headway: f64,
    /// The minimum speed advantage over the leader to overtake, in m/s.
    pub min_speed_advantage: f64,
}

impl Default for SafeGapModel {
    fn default() -> Self {
        Self {
            min_gap: 2.0,
            safe_headway: 0.5,
            advantage: 10.0,
            lookahead: 100.0,
            delay: 3.0,
            overtake_headway: 10.0,
            min_speed_advantage: 2.0,
        }
    }
}

impl SafeGapModel {
    /// Whether the gaps to the prospective leader and follower are safe.
    fn gaps_are_safe(
        &self,
        own: &VehicleSnapshot,
        front: Option<&VehicleSnapshot>,
        rear: Option<&VehicleSnapshot>,
    ) -> bool {
        let lead_ok = front.map_or(true, |f| {
            f.rear_pos - own.front_pos >= self.min_gap + own.speed * self.safe_headway
        });
        let lag_ok = rear.map_or(true, |r| {
            own.rear_pos - r.front_pos >= self.min_gap + r.speed * self.safe_headway
        });
        lead_ok && lag_ok
    }

    /// The gap to the leader in the given lane, clamped to the lookahead.
    fn lead_gap(
        &self,
        own: &VehicleSnapshot,
        lane: usize,
        segment: &RoadSegment,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> f64 {
        let (front, _) = segment.neighbours_in_lane(lane, own.front_pos, segments, vehicles);
        front
            .map(|f| f.rear_pos - own.front_pos)
            .unwrap_or(self.lookahead)
            .min(self.lookahead)
    }
}

impl LaneChangeModel for SafeGapModel {
    fn consider_lane_change(
        &self,
        own: &VehicleSnapshot,
        lane: usize,
        segment: &RoadSegment,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> Option<usize> {
        let mandatory = segment.lane(lane).ty() == LaneType::Entrance;
        let own_gap = self.lead_gap(own, lane, segment, segments, vehicles);

        let candidates = [lane.checked_sub(1), lane.checked_add(1)];
        for target in candidates.into_iter().flatten() {
            if target < 1 || target > segment.lane_count() {
                continue;
            }
            if !segment.lane(target).ty().accepts_lane_changes() {
                continue;
            }
            let (front, rear) =
                segment.neighbours_in_lane(target, own.front_pos, segments, vehicles);
            if !self.gaps_are_safe(own, front.as_ref(), rear.as_ref()) {
                continue;
            }
            if mandatory {
                return Some(target);
            }
            let target_gap = self.lead_gap(own, target, segment, segments, vehicles);
            if target_gap >= own_gap + self.advantage {
                return Some(target);
            }
        }
        None
    }

    fn consider_overtaking(
        &self,
        own: &VehicleSnapshot,
        segment: &RoadSegment,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> bool {
        // Only overtake a close, noticeably slower leader.
        let (front, _) = segment.neighbours_in_lane(1, own.front_pos, segments, vehicles);
        let leader = match front {
            Some(leader) => leader,
            None => return false,
        };
        if leader.rear_pos - own.front_pos > self.lookahead {
            return false;
        }
        if own.speed - leader.speed < self.min_speed_advantage {
            return false;
        }

        // The opposing carriageway must be clear for the whole manoeuvre.
        let peer = match segment.peer().and_then(|id| segments.get(id)) {
            Some(peer) => peer,
            None => return false,
        };
        for vid in peer.iter_vehicles() {
            let oncoming = vehicles[vid].snapshot();
            // Map the oncoming vehicle into this segment's frame.
            let pos = peer.length() - oncoming.front_pos;
            if pos <= own.front_pos {
                continue;
            }
            let closing_dist = (own.speed + oncoming.speed) * self.overtake_headway;
            if pos - own.front_pos < closing_dist {
                return false;
            }
        }
        true
    }

    fn consider_finish_overtaking(
        &self,
        own: &VehicleSnapshot,
        segment: &RoadSegment,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
    ) -> bool {
        let (front, rear) = segment.neighbours_in_lane(1, own.front_pos, segments, vehicles);
        self.gaps_are_safe(own, front.as_ref(), rear.as_ref())
    }

    fn change_delay(&self) -> f64 {
        self.delay
    }
}
