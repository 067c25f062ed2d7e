//! In-memory graph of known nodes and their observed adjacency.
//!
//! A topology is built incrementally by merging discovery results from
//! multiple peers; it is a best-effort snapshot, never a transactionally
//! consistent view of the cluster.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::device::DeviceCapabilities;

/// Opaque node identifier.
pub type NodeId = String;

/// Known nodes and the directed edges `a -> b` meaning "a has observed b as
/// a reachable peer".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    nodes: BTreeMap<NodeId, DeviceCapabilities>,
    peer_graph: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a node's capabilities. Last write wins on duplicate ids.
    pub fn update_node(&mut self, id: impl Into<NodeId>, capabilities: DeviceCapabilities) {
        self.nodes.insert(id.into(), capabilities);
    }

    /// Record a directed edge `a -> b`. Idempotent.
    pub fn add_edge(&mut self, a: impl Into<NodeId>, b: impl Into<NodeId>) {
        self.peer_graph.entry(a.into()).or_default().insert(b.into());
    }

    /// Fold another topology into this one: union of node maps (other wins
    /// on conflicts) and union of adjacency sets.
    pub fn merge(&mut self, other: Topology) {
        for (id, capabilities) in other.nodes {
            self.nodes.insert(id, capabilities);
        }
        for (id, peers) in other.peer_graph {
            self.peer_graph.entry(id).or_default().extend(peers);
        }
    }

    pub fn get_node(&self, id: &str) -> Option<&DeviceCapabilities> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Peers observed by the given node, if any.
    pub fn peers_of(&self, id: &str) -> Option<&BTreeSet<NodeId>> {
        self.peer_graph.get(id)
    }

    /// Whether the directed edge `a -> b` has been observed.
    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        self.peer_graph.get(a).is_some_and(|peers| peers.contains(b))
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.peer_graph.values().map(BTreeSet::len).sum()
    }

    /// Iterate over known nodes and their capabilities.
    pub fn nodes(&self) -> impl Iterator<Item = (&NodeId, &DeviceCapabilities)> {
        self.nodes.iter()
    }
}
