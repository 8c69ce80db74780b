//! The federation's static dependency graph (spec §3, §4.3): which federates
//! feed events to which, and after how much delay. Fixed at startup from the
//! generated program's topology, never learned over the wire and never
//! mutated once the federation is admitted.

use rti_core::{FederateId, Interval};
use rti_tinymap::TinySecondaryMap;

/// An upstream edge: `(source federate, connection delay)`.
pub type UpstreamEdge = (FederateId, Interval);

#[derive(Debug, Clone, Default)]
pub struct FederationGraph {
    upstream: TinySecondaryMap<FederateId, Vec<UpstreamEdge>>,
    downstream: TinySecondaryMap<FederateId, Vec<FederateId>>,
}

impl FederationGraph {
    /// An empty graph over `n` federates with no connections between them.
    pub fn new(n: usize) -> Self {
        let mut upstream = TinySecondaryMap::with_capacity(n);
        let mut downstream = TinySecondaryMap::with_capacity(n);
        for i in 0..n {
            let id = FederateId::from(i);
            upstream.insert(id, Vec::new());
            downstream.insert(id, Vec::new());
        }
        Self {
            upstream,
            downstream,
        }
    }

    /// Record a connection `from -> to` with the given delay.
    pub fn add_edge(&mut self, from: FederateId, to: FederateId, delay: Interval) {
        self.upstream.get_mut(to).expect("federate id in range").push((from, delay));
        self.downstream.get_mut(from).expect("federate id in range").push(to);
    }

    pub fn upstream_of(&self, id: FederateId) -> &[UpstreamEdge] {
        self.upstream.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn downstream_of(&self, id: FederateId) -> &[FederateId] {
        self.downstream.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_upstream(&self, id: FederateId) -> bool {
        !self.upstream_of(id).is_empty()
    }

    pub fn has_downstream(&self, id: FederateId) -> bool {
        !self.downstream_of(id).is_empty()
    }

    pub fn len(&self) -> usize {
        self.upstream.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upstream.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolated_federates_have_no_neighbors() {
        let g = FederationGraph::new(2);
        assert!(!g.has_upstream(FederateId::from(0)));
        assert!(!g.has_downstream(FederateId::from(1)));
    }

    #[test]
    fn add_edge_populates_both_directions() {
        let mut g = FederationGraph::new(2);
        let a = FederateId::from(0);
        let b = FederateId::from(1);
        g.add_edge(a, b, Interval::ZERO);
        assert_eq!(g.upstream_of(b), &[(a, Interval::ZERO)]);
        assert_eq!(g.downstream_of(a), &[b]);
        assert!(!g.has_upstream(a));
        assert!(!g.has_downstream(b));
    }
}
