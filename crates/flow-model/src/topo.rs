//! Topological ordering along default edges.

use std::collections::{HashMap, VecDeque};

use crate::errors::ModelError;
use crate::model::{Edge, Node};

/// Order nodes topologically using default-labelled edges only.
///
/// Ties are broken by node array order, so a linear recording comes out in
/// recording order. Disabled nodes are kept in the order (the runner skips
/// them) because branch edges may still target them.
pub fn topological_order<'a>(nodes: &'a [Node], edges: &[Edge]) -> Result<Vec<&'a Node>, ModelError> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];

    for edge in edges.iter().filter(|e| e.is_default()) {
        let from = *index
            .get(edge.from.as_str())
            .ok_or_else(|| ModelError::UnknownNode(edge.from.clone()))?;
        let to = *index
            .get(edge.to.as_str())
            .ok_or_else(|| ModelError::UnknownNode(edge.to.clone()))?;
        adjacency[from].push(to);
        in_degree[to] += 1;
    }

    let mut ready: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(i) = ready.pop_front() {
        order.push(&nodes[i]);
        for &next in &adjacency[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = nodes
            .iter()
            .enumerate()
            .find(|(i, _)| in_degree[*i] > 0)
            .map(|(_, n)| n.id.clone())
            .unwrap_or_default();
        return Err(ModelError::CycleDetected(stuck));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavigateConfig, NodeConfig};
    use crate::model::{Edge, Node};

    fn node(id: &str) -> Node {
        Node::new(
            id,
            NodeConfig::Navigate(NavigateConfig {
                url: "https://example.com".into(),
            }),
        )
    }

    #[test]
    fn linear_chain_orders_in_recording_order() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let edges = vec![
            Edge::default_edge("e1", "a", "b"),
            Edge::default_edge("e2", "b", "c"),
        ];
        let order = topological_order(&nodes, &edges).unwrap();
        let ids: Vec<&str> = order.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn non_default_edges_do_not_constrain_order() {
        let nodes = vec![node("a"), node("b"), node("c")];
        let mut edges = vec![
            Edge::default_edge("e1", "a", "b"),
            Edge::default_edge("e2", "b", "c"),
        ];
        // a back-edge on a branch label must not create a cycle
        edges.push(Edge {
            id: "e3".into(),
            from: "c".into(),
            to: "a".into(),
            label: "case:retry".into(),
        });
        let order = topological_order(&nodes, &edges).unwrap();
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn cycle_in_default_edges_is_an_error() {
        let nodes = vec![node("a"), node("b")];
        let edges = vec![
            Edge::default_edge("e1", "a", "b"),
            Edge::default_edge("e2", "b", "a"),
        ];
        assert!(matches!(
            topological_order(&nodes, &edges),
            Err(ModelError::CycleDetected(_))
        ));
    }

    #[test]
    fn dangling_edge_is_an_error() {
        let nodes = vec![node("a")];
        let edges = vec![Edge::default_edge("e1", "a", "ghost")];
        assert!(matches!(
            topological_order(&nodes, &edges),
            Err(ModelError::UnknownNode(_))
        ));
    }
}
