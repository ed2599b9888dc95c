use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::fmt;

use thiserror::Error;

use crate::network::LinkStateDatabase;
use crate::types::{Cost, SimulatedAddr};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("{0} is this router's own address")]
    SelfDestination(SimulatedAddr),
    #[error("{0} is not in the network")]
    NotInNetwork(SimulatedAddr),
    #[error("{0} is not reachable from this router")]
    NotReachable(SimulatedAddr),
}

/// A minimum-cost path from the local router. Renders as
/// `A ->(5) B ->(3) C`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortestPath {
    pub source: SimulatedAddr,
    /// `(hop, cost of the edge that reaches it)`, in order, ending at the
    /// destination.
    pub hops: Vec<(SimulatedAddr, Cost)>,
}

impl ShortestPath {
    pub fn destination(&self) -> SimulatedAddr {
        self.hops.last().map(|(hop, _)| *hop).unwrap_or(self.source)
    }

    pub fn total_cost(&self) -> u64 {
        self.hops.iter().map(|(_, cost)| u64::from(*cost)).sum()
    }

    pub fn nodes(&self) -> Vec<SimulatedAddr> {
        std::iter::once(self.source).chain(self.hops.iter().map(|(hop, _)| *hop)).collect()
    }
}

impl fmt::Display for ShortestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)?;
        for (hop, cost) in &self.hops {
            write!(f, " ->({cost}) {hop}")?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct State {
    cost: u64,
    router: SimulatedAddr,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap, lower address first on ties
        other.cost.cmp(&self.cost).then_with(|| other.router.cmp(&self.router))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Parent pointer: the previous hop and the cost of the edge from it.
type Parents = BTreeMap<SimulatedAddr, (SimulatedAddr, Cost)>;

/// Single-source Dijkstra over the graph implied by the LSDB. Nodes are the
/// stored origins; an edge is only followed when its far end is stored too.
pub fn calculate_distances(lsdb: &LinkStateDatabase, source: SimulatedAddr) -> (BTreeMap<SimulatedAddr, u64>, Parents) {
    let mut distances: BTreeMap<SimulatedAddr, u64> = BTreeMap::new();
    let mut parents = Parents::new();
    let mut visited = BTreeSet::new();
    let mut heap = BinaryHeap::new();

    if lsdb.contains(source) {
        distances.insert(source, 0);
        heap.push(State { cost: 0, router: source });
    }

    while let Some(State { cost, router }) = heap.pop() {
        if !visited.insert(router) {
            continue;
        }
        let Some(lsa) = lsdb.get(router) else {
            continue;
        };

        for link in lsa.links() {
            if visited.contains(&link.neighbor) || !lsdb.contains(link.neighbor) {
                continue;
            }
            let next = cost + u64::from(link.cost);
            if distances.get(&link.neighbor).is_none_or(|known| next < *known) {
                distances.insert(link.neighbor, next);
                parents.insert(link.neighbor, (router, link.cost));
                heap.push(State {
                    cost: next,
                    router: link.neighbor,
                });
            }
        }
    }

    (distances, parents)
}

/// Minimum-cost path from the LSDB's local router to `destination`.
pub fn shortest_path(lsdb: &LinkStateDatabase, destination: SimulatedAddr) -> Result<ShortestPath, PathError> {
    let source = lsdb.local();
    if destination == source {
        return Err(PathError::SelfDestination(destination));
    }
    if !lsdb.contains(destination) {
        return Err(PathError::NotInNetwork(destination));
    }

    let (_, parents) = calculate_distances(lsdb, source);
    if !parents.contains_key(&destination) {
        return Err(PathError::NotReachable(destination));
    }

    Ok(ShortestPath {
        source,
        hops: reconstruct_path(&parents, source, destination),
    })
}

fn reconstruct_path(parents: &Parents, source: SimulatedAddr, destination: SimulatedAddr) -> Vec<(SimulatedAddr, Cost)> {
    let mut hops = Vec::new();
    let mut current = destination;

    while current != source {
        match parents.get(&current) {
            Some((prev, cost)) => {
                hops.push((current, *cost));
                current = *prev;
            }
            None => break,
        }
    }

    hops.reverse();
    hops
}
