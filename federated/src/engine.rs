//! C3: the tag-advance engine (spec §4.3). Pure, synchronous, and
//! independent of any socket or task — the RTI calls [`next_tag_advance`]
//! whenever a federate's `completed`/`next_event` bookkeeping changes, under
//! the federation mutex, and acts on the result (send a grant, or don't).

use rti_core::{FederateId, Tag};
use rti_tinymap::{KeySet, TinySecondaryMap};

use crate::graph::FederationGraph;
use crate::FederateState;

/// The two tag-valued fields the engine needs for one federate (spec §3
/// Federate record: `completed`, `next_event`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FederateTimes {
    pub completed: Tag,
    pub next_event: Tag,
}

impl Default for FederateTimes {
    fn default() -> Self {
        Self {
            completed: Tag::NEVER,
            next_event: Tag::FOREVER,
        }
    }
}

/// The largest tag a federate could safely be granted right now, or `None`
/// if it would not advance `target` past its already-completed tag (spec
/// §4.3: "TAG sent only if candidate > f.completed").
pub fn next_tag_advance(
    graph: &FederationGraph,
    times: &TinySecondaryMap<FederateId, FederateTimes>,
    states: &TinySecondaryMap<FederateId, FederateState>,
    target: FederateId,
) -> Option<Tag> {
    let f = times.get(target)?;
    let mut candidate = f.next_event;

    for &(upstream, delay) in graph.upstream_of(target) {
        if states.get(upstream) == Some(&FederateState::NotConnected) {
            // A disconnected federate will emit nothing further.
            continue;
        }
        let Some(u) = times.get(upstream) else {
            continue;
        };
        let u_completion = u.completed.extend(delay);
        if u_completion < candidate {
            let mut visited = KeySet::with_capacity(graph.len());
            visited.insert(target);
            let u_next =
                transitive_next_event(graph, times, states, upstream, candidate, &mut visited);
            if u_next <= candidate {
                candidate = u_completion;
            }
        }
    }

    (candidate > f.completed).then_some(candidate)
}

/// Recursively estimate the earliest tag `start` (or one of its own
/// upstreams, transitively) could produce an event at, bounded above by
/// `cap`. A federate already visited in this traversal, disconnected, or
/// with no information beyond `cap`, contributes `cap` rather than recursing
/// forever around a cycle (spec §4.3: "depth-bounded, visited-set").
fn transitive_next_event(
    graph: &FederationGraph,
    times: &TinySecondaryMap<FederateId, FederateTimes>,
    states: &TinySecondaryMap<FederateId, FederateState>,
    start: FederateId,
    cap: Tag,
    visited: &mut KeySet<FederateId>,
) -> Tag {
    if visited[start] {
        return cap;
    }
    visited.insert(start);

    let Some(t) = times.get(start) else {
        return cap;
    };

    let mut result = if t.next_event == Tag::NEVER {
        t.completed
    } else {
        t.next_event
    };

    if result >= cap {
        return cap;
    }

    for &(upstream, delay) in graph.upstream_of(start) {
        if states.get(upstream) == Some(&FederateState::NotConnected) {
            continue;
        }
        let Some(u) = times.get(upstream) else {
            continue;
        };
        let u_completion = u.completed.extend(delay);
        if u_completion < result {
            let u_next =
                transitive_next_event(graph, times, states, upstream, result, visited);
            if u_next <= result {
                result = u_completion;
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rti_core::{Interval, Timestamp};

    fn times_for(pairs: &[(Tag, Tag)]) -> TinySecondaryMap<FederateId, FederateTimes> {
        let mut map = TinySecondaryMap::with_capacity(pairs.len());
        for (i, &(completed, next_event)) in pairs.iter().enumerate() {
            map.insert(
                FederateId::from(i),
                FederateTimes {
                    completed,
                    next_event,
                },
            );
        }
        map
    }

    fn all_granted(n: usize) -> TinySecondaryMap<FederateId, FederateState> {
        let mut map = TinySecondaryMap::with_capacity(n);
        for i in 0..n {
            map.insert(FederateId::from(i), FederateState::Granted);
        }
        map
    }

    #[test]
    fn isolated_federate_advances_to_its_own_next_event() {
        let graph = FederationGraph::new(1);
        let a = FederateId::from(0);
        let times = times_for(&[(Tag::NEVER, Tag::new(Timestamp::from_nanos(5), 0))]);
        let states = all_granted(1);
        assert_eq!(
            next_tag_advance(&graph, &times, &states, a),
            Some(Tag::new(Timestamp::from_nanos(5), 0))
        );
    }

    #[test]
    fn no_advance_when_candidate_does_not_exceed_completed() {
        let graph = FederationGraph::new(1);
        let a = FederateId::from(0);
        let at5 = Tag::new(Timestamp::from_nanos(5), 0);
        let times = times_for(&[(at5, at5)]);
        let states = all_granted(1);
        assert_eq!(next_tag_advance(&graph, &times, &states, a), None);
    }

    #[test]
    fn downstream_federate_is_capped_by_upstream_completion_plus_delay() {
        let mut graph = FederationGraph::new(2);
        let (a, b) = (FederateId::from(0), FederateId::from(1));
        graph.add_edge(a, b, Interval::from_nanos(0));

        // a has completed tag 3 and has nothing else pending; b wants to run to 10.
        let times = times_for(&[
            (Tag::new(Timestamp::from_nanos(3), 0), Tag::NEVER),
            (Tag::NEVER, Tag::new(Timestamp::from_nanos(10), 0)),
        ]);
        let states = all_granted(2);
        assert_eq!(
            next_tag_advance(&graph, &times, &states, b),
            Some(Tag::new(Timestamp::from_nanos(3), 0))
        );
    }

    #[test]
    fn downstream_federate_not_capped_once_upstream_commits_to_a_later_event() {
        let mut graph = FederationGraph::new(2);
        let (a, b) = (FederateId::from(0), FederateId::from(1));
        graph.add_edge(a, b, Interval::from_nanos(0));

        // a has completed tag 3 but its own next_event (20) already exceeds
        // b's candidate (10), so b need not wait further on a.
        let times = times_for(&[
            (
                Tag::new(Timestamp::from_nanos(3), 0),
                Tag::new(Timestamp::from_nanos(20), 0),
            ),
            (Tag::NEVER, Tag::new(Timestamp::from_nanos(10), 0)),
        ]);
        let states = all_granted(2);
        assert_eq!(
            next_tag_advance(&graph, &times, &states, b),
            Some(Tag::new(Timestamp::from_nanos(10), 0))
        );
    }

    #[test]
    fn zero_delay_cycle_is_bounded_by_the_visited_set_not_infinite_recursion() {
        let mut graph = FederationGraph::new(2);
        let (a, b) = (FederateId::from(0), FederateId::from(1));
        graph.add_edge(a, b, Interval::ZERO);
        graph.add_edge(b, a, Interval::from_nanos(1));

        let times = times_for(&[
            (Tag::NEVER, Tag::new(Timestamp::from_nanos(1), 0)),
            (Tag::NEVER, Tag::new(Timestamp::from_nanos(1), 0)),
        ]);
        let states = all_granted(2);
        // Neither federate has completed anything yet, so neither can be
        // granted a tag advance past its own sentinel `completed`.
        assert_eq!(
            next_tag_advance(&graph, &times, &states, a),
            Some(Tag::new(Timestamp::from_nanos(1), 0))
        );
    }

    #[test]
    fn disconnected_upstream_id_does_not_panic() {
        let graph = FederationGraph::new(1);
        let a = FederateId::from(0);
        let times = times_for(&[(Tag::NEVER, Tag::new(Timestamp::from_nanos(1), 0))]);
        let states = all_granted(1);
        assert_eq!(
            next_tag_advance(&graph, &times, &states, a),
            Some(Tag::new(Timestamp::from_nanos(1), 0))
        );
    }

    #[test]
    fn not_connected_upstream_is_skipped_rather_than_capping_its_downstream() {
        let mut graph = FederationGraph::new(2);
        let (a, b) = (FederateId::from(0), FederateId::from(1));
        graph.add_edge(a, b, Interval::ZERO);

        // a completed tag 3 and then disconnected; b wants to run to 10. a
        // will emit nothing further, so b must not be capped at 3.
        let times = times_for(&[
            (Tag::new(Timestamp::from_nanos(3), 0), Tag::NEVER),
            (Tag::NEVER, Tag::new(Timestamp::from_nanos(10), 0)),
        ]);
        let mut states = all_granted(2);
        states.insert(a, FederateState::NotConnected);
        assert_eq!(
            next_tag_advance(&graph, &times, &states, b),
            Some(Tag::new(Timestamp::from_nanos(10), 0))
        );
    }
}
