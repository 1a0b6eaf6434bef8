//! Utilities for wiring road segments together and finding routes.

use crate::lane::LaneLink;
use crate::network::RoadNetwork;
use crate::SegmentId;
use pathfinding::prelude::dijkstra;

/// Links a lane of one segment to a lane of another, so that traffic flows
/// from `from` into `to`. Both segments may be the same, forming a ring.
///
/// Panics if a lane index is invalid or a segment ID is stale.
pub fn add_lane_pair(net: &mut RoadNetwork, from: LaneLink, to: LaneLink) {
    let (a, al) = from;
    let (b, bl) = to;
    if a == b {
        let seg = net.segment_mut(a);
        assert_valid_lane(al, seg.lane_count());
        assert_valid_lane(bl, seg.lane_count());
        seg.lane_mut(al).set_sink(Some(to));
        seg.lane_mut(bl).set_source(Some(from));
    } else {
        let [sa, sb] = net
            .segments_mut()
            .get_disjoint_mut([a, b])
            .expect("invalid segment ID");
        assert_valid_lane(al, sa.lane_count());
        assert_valid_lane(bl, sb.lane_count());
        sa.lane_mut(al).set_sink(Some(to));
        sb.lane_mut(bl).set_source(Some(from));
    }
}

/// Links several lane pairs at once.
pub fn add_lane_pairs(net: &mut RoadNetwork, pairs: &[(LaneLink, LaneLink)]) {
    for (from, to) in pairs {
        add_lane_pair(net, *from, *to);
    }
}

/// Joins two segments end to end, linking lanes with equal indices up to
/// the smaller traffic-lane count. Remaining lanes stay unlinked.
pub fn add_join(net: &mut RoadNetwork, from: SegmentId, to: SegmentId) {
    let count = usize::min(
        net.segment(from).traffic_lane_count(),
        net.segment(to).traffic_lane_count(),
    );
    for lane in 1..=count {
        add_lane_pair(net, (from, lane), (to, lane));
    }
}

/// Merges two segments into one. The first segment feeds the inner lanes
/// of the target, the second the outer lanes.
///
/// Panics unless the target has exactly the lanes of both inputs combined.
pub fn add_merge(net: &mut RoadNetwork, a: SegmentId, b: SegmentId, to: SegmentId) {
    let a_count = net.segment(a).lane_count();
    let b_count = net.segment(b).lane_count();
    assert_eq!(
        net.segment(to).lane_count(),
        a_count + b_count,
        "merge target must have the lanes of both inputs combined"
    );
    for lane in 1..=a_count {
        add_lane_pair(net, (a, lane), (to, lane));
    }
    for lane in 1..=b_count {
        add_lane_pair(net, (b, lane), (to, a_count + lane));
    }
}

/// Forks one segment into two. The inner lanes continue onto the first
/// target, the outer lanes onto the second.
///
/// Panics unless the source has exactly the lanes of both targets combined.
pub fn add_fork(net: &mut RoadNetwork, from: SegmentId, a: SegmentId, b: SegmentId) {
    let a_count = net.segment(a).lane_count();
    let b_count = net.segment(b).lane_count();
    assert_eq!(
        net.segment(from).lane_count(),
        a_count + b_count,
        "fork source must have the lanes of both targets combined"
    );
    for lane in 1..=a_count {
        add_lane_pair(net, (from, lane), (a, lane));
    }
    for lane in 1..=b_count {
        add_lane_pair(net, (from, a_count + lane), (b, lane));
    }
}

/// Finds the fastest route between two segments, following the downstream
/// lane links. The cost of entering a segment is its free-flow travel time
/// at the current speed limit. Returns the segments of the route including
/// both endpoints, or `None` if `to` is unreachable.
pub fn shortest_route(
    net: &RoadNetwork,
    from: SegmentId,
    to: SegmentId,
) -> Option<Vec<SegmentId>> {
    let successors = |id: &SegmentId| {
        let seg = net.segment(*id);
        let mut next: Vec<(SegmentId, usize)> = vec![];
        for lane in seg.real_lanes() {
            if let Some((sink, _)) = lane.sink() {
                if next.iter().any(|(s, _)| *s == sink) {
                    continue;
                }
                let dst = net.segment(sink);
                let cost = (10.0 * dst.length() / dst.conditions().speed_limit) as usize;
                next.push((sink, cost));
            }
        }
        next
    };
    let (path, _) = dijkstra(&from, successors, |id| *id == to)?;
    Some(path)
}

fn assert_valid_lane(lane: usize, lane_count: usize) {
    assert!(
        lane >= 1 && lane <= lane_count,
        "invalid lane index {} for segment with {} lanes",
        lane,
        lane_count
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::network::RoadNetwork;

    #[test]
    fn join_links_matching_lanes() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(500.0, 2);
        let b = net.add_segment(500.0, 3);
        add_join(&mut net, a, b);

        assert_eq!(net.segment(a).lane(1).sink(), Some((b, 1)));
        assert_eq!(net.segment(a).lane(2).sink(), Some((b, 2)));
        assert_eq!(net.segment(b).lane(1).source(), Some((a, 1)));
        assert_eq!(net.segment(b).lane(3).source(), None);
    }

    #[test]
    fn lane_pair_on_one_segment_forms_a_ring() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(500.0, 1);
        add_lane_pair(&mut net, (a, 1), (a, 1));

        assert_eq!(net.segment(a).lane(1).sink(), Some((a, 1)));
        assert_eq!(net.segment(a).lane(1).source(), Some((a, 1)));
    }

    #[test]
    fn merge_stacks_input_lanes() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(500.0, 2);
        let b = net.add_segment(500.0, 1);
        let to = net.add_segment(500.0, 3);
        add_merge(&mut net, a, b, to);

        assert_eq!(net.segment(a).lane(1).sink(), Some((to, 1)));
        assert_eq!(net.segment(a).lane(2).sink(), Some((to, 2)));
        assert_eq!(net.segment(b).lane(1).sink(), Some((to, 3)));
    }

    #[test]
    #[should_panic]
    fn merge_with_mismatched_lanes_panics() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(500.0, 2);
        let b = net.add_segment(500.0, 1);
        let to = net.add_segment(500.0, 2);
        add_merge(&mut net, a, b, to);
    }

    #[test]
    fn fork_splits_source_lanes() {
        let mut net = RoadNetwork::default();
        let from = net.add_segment(500.0, 3);
        let a = net.add_segment(500.0, 2);
        let b = net.add_segment(500.0, 1);
        add_fork(&mut net, from, a, b);

        assert_eq!(net.segment(from).lane(1).sink(), Some((a, 1)));
        assert_eq!(net.segment(from).lane(2).sink(), Some((a, 2)));
        assert_eq!(net.segment(from).lane(3).sink(), Some((b, 1)));
    }

    #[test]
    fn shortest_route_prefers_the_faster_path() {
        let mut net = RoadNetwork::default();
        let start = net.add_segment(500.0, 2);
        let slow = net.add_segment(500.0, 1);
        let fast = net.add_segment(500.0, 1);
        let end = net.add_segment(500.0, 2);
        net.segment_mut(slow).set_speed_limit(10.0);
        net.segment_mut(fast).set_speed_limit(30.0);
        add_lane_pair(&mut net, (start, 1), (slow, 1));
        add_lane_pair(&mut net, (start, 2), (fast, 1));
        add_lane_pair(&mut net, (slow, 1), (end, 1));
        add_lane_pair(&mut net, (fast, 1), (end, 2));

        let route = shortest_route(&net, start, end).unwrap();
        assert_eq!(route, vec![start, fast, end]);
    }

    #[test]
    fn unreachable_target_yields_no_route() {
        let mut net = RoadNetwork::default();
        let a = net.add_segment(500.0, 1);
        let b = net.add_segment(500.0, 1);
        assert!(shortest_route(&net, a, b).is_none());
    }
}
