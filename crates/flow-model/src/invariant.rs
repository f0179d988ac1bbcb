//! Linear-chain invariant maintenance.
//!
//! A linearly recorded flow must satisfy `edges.len() == max(0, nodes - 1)`
//! with the last edge terminating at the last node. The check runs
//! continuously during recording; any violation is repaired by rebuilding a
//! purely linear edge set with [`rechain`]. Every auto-repair is logged so
//! silent data-model drift stays observable.

use std::collections::HashSet;

use tracing::warn;

use crate::model::{Edge, Node, DEFAULT_LABEL};

/// Check the strict linear-chain invariant over a recorded flow.
pub fn validate_linear_invariant(nodes: &[Node], edges: &[Edge]) -> bool {
    let expected = nodes.len().saturating_sub(1);
    if edges.len() != expected {
        return false;
    }
    if nodes.is_empty() {
        return true;
    }

    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in edges {
        if !ids.contains(edge.from.as_str()) || !ids.contains(edge.to.as_str()) {
            return false;
        }
    }

    match edges.last() {
        Some(last) => last.to == nodes[nodes.len() - 1].id,
        None => nodes.len() <= 1,
    }
}

/// Deterministic repair: rebuild a purely linear default-labelled edge set
/// following node array order.
pub fn rechain(nodes: &[Node]) -> Vec<Edge> {
    nodes
        .windows(2)
        .enumerate()
        .map(|(i, pair)| Edge {
            id: format!("edge-{}", i + 1),
            from: pair[0].id.clone(),
            to: pair[1].id.clone(),
            label: DEFAULT_LABEL.to_string(),
        })
        .collect()
}

/// Validate and repair in place. Returns true when a repair was applied.
pub fn ensure_linear_invariant(nodes: &[Node], edges: &mut Vec<Edge>) -> bool {
    if validate_linear_invariant(nodes, edges) {
        return false;
    }
    warn!(
        nodes = nodes.len(),
        edges = edges.len(),
        "flow invariant violated; rechaining edges"
    );
    *edges = rechain(nodes);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavigateConfig, NodeConfig};
    use crate::model::Node;

    fn node(id: &str) -> Node {
        Node::new(
            id,
            NodeConfig::Navigate(NavigateConfig {
                url: "https://example.com".into(),
            }),
        )
    }

    #[test]
    fn empty_and_single_node_flows_are_valid() {
        assert!(validate_linear_invariant(&[], &[]));
        assert!(validate_linear_invariant(&[node("a")], &[]));
    }

    #[test]
    fn detects_missing_edge() {
        let nodes = vec![node("a"), node("b")];
        assert!(!validate_linear_invariant(&nodes, &[]));
    }

    #[test]
    fn detects_last_edge_not_targeting_last_node() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![
            Edge::default_edge("e1", "a", "b"),
            Edge::default_edge("e2", "c", "b"),
        ];
        assert!(!validate_linear_invariant(&nodes, &edges));
    }

    #[test]
    fn detects_dangling_edge_endpoint() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![Edge::default_edge("e1", "a", "ghost")];
        assert!(!validate_linear_invariant(&nodes, &edges));
    }

    #[test]
    fn rechain_rebuilds_linear_chain() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = rechain(&nodes);
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].from, "a");
        assert_eq!(edges[0].to, "b");
        assert_eq!(edges[1].from, "b");
        assert_eq!(edges[1].to, "c");
        assert!(edges.iter().all(|e| e.is_default()));
        assert!(validate_linear_invariant(&nodes, &edges));
    }

    #[test]
    fn ensure_repairs_and_reports() {
        let nodes = vec![node("a"), node("b")];
        let mut edges = Vec::new();
        assert!(ensure_linear_invariant(&nodes, &mut edges));
        assert!(validate_linear_invariant(&nodes, &edges));
        // second pass is a no-op
        assert!(!ensure_linear_invariant(&nodes, &mut edges));
    }
}
