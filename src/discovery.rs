//! Distributed bounded-depth topology discovery.
//!
//! No single node holds global knowledge: each node answers a discovery
//! call with its own entry plus whatever it can learn by recursing into its
//! peers within the remaining depth budget. The `visited` set is a snapshot
//! taken at call issue time, not shared live across the cluster, so a node
//! can be reached twice through different branches; the merged result is a
//! best-effort view valid at call time.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::device::DeviceCapabilities;
use crate::network::PeerHandle;
use crate::topology::{NodeId, Topology};

/// Answer a discovery call on behalf of the local node.
///
/// Includes the local entry and edges to all known peers, then queries each
/// peer not already in `visited` with a decremented depth budget and merges
/// the results. A budget of zero returns only the local entry. Recursion
/// terminates on arbitrary (including cyclic) peer graphs because every hop
/// both shrinks the budget and grows the visited snapshot.
///
/// An unreachable peer is logged and skipped rather than failing the whole
/// pass; the caller gets the portion of the graph that answered.
pub async fn collect_topology(
    local_id: &str,
    local_capabilities: &DeviceCapabilities,
    peers: &[Arc<PeerHandle>],
    visited: &BTreeSet<NodeId>,
    max_depth: u32,
) -> Topology {
    let mut topology = Topology::new();
    topology.update_node(local_id, local_capabilities.clone());
    if max_depth == 0 {
        return topology;
    }

    for peer in peers {
        topology.add_edge(local_id, peer.id());
    }

    // Snapshot at issue time: mark ourselves and every peer we are about to
    // query so deeper branches do not circle back through them
    let previously_visited = visited.clone();
    let mut visited = visited.clone();
    visited.insert(local_id.to_string());
    visited.extend(peers.iter().map(|p| p.id().to_string()));

    for peer in peers {
        if previously_visited.contains(peer.id()) {
            continue;
        }
        match peer.collect_topology(&visited, max_depth - 1).await {
            Ok(remote) => topology.merge(remote),
            Err(e) => {
                tracing::warn!(
                    peer = %peer.id(),
                    error = %e,
                    "peer unreachable during discovery, skipping"
                );
            }
        }
    }

    topology
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_depth_returns_only_local_entry() {
        let caps = DeviceCapabilities::unknown();
        let peers = vec![Arc::new(PeerHandle::new(
            "b",
            "127.0.0.1:1",
            DeviceCapabilities::unknown(),
        ))];

        let topology = collect_topology("a", &caps, &peers, &BTreeSet::new(), 0).await;

        assert_eq!(topology.node_count(), 1);
        assert!(topology.contains_node("a"));
        assert_eq!(topology.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_no_peers_returns_local_entry() {
        let caps = DeviceCapabilities::unknown();
        let topology = collect_topology("a", &caps, &[], &BTreeSet::new(), 4).await;

        assert_eq!(topology.node_count(), 1);
        assert!(topology.contains_node("a"));
    }

    #[tokio::test]
    async fn test_visited_peers_not_queried() {
        let caps = DeviceCapabilities::unknown();
        // Peer address is unreachable; if it were queried the call would
        // burn retries, but a visited peer is skipped outright
        let peers = vec![Arc::new(PeerHandle::new(
            "b",
            "127.0.0.1:1",
            DeviceCapabilities::unknown(),
        ))];
        let visited: BTreeSet<NodeId> = ["b".to_string()].into();

        let started = std::time::Instant::now();
        let topology = collect_topology("a", &caps, &peers, &visited, 3).await;

        // The adjacency edge is still recorded even though b was not queried
        assert!(topology.has_edge("a", "b"));
        assert!(!topology.contains_node("b"));
        assert!(started.elapsed() < std::time::Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_unreachable_peer_skipped() {
        let caps = DeviceCapabilities::unknown();
        let peers = vec![Arc::new(PeerHandle::new(
            "dead",
            "127.0.0.1:1",
            DeviceCapabilities::unknown(),
        ))];

        let topology = collect_topology("a", &caps, &peers, &BTreeSet::new(), 2).await;

        // Local entry and the observed edge survive the failed query
        assert!(topology.contains_node("a"));
        assert!(topology.has_edge("a", "dead"));
        assert!(!topology.contains_node("dead"));
    }
}
