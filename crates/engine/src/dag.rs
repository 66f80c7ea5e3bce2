//! DAG validation — run before persisting (publish) or executing a graph.
//!
//! Rules enforced:
//! 1. Node IDs are unique.
//! 2. Every edge references valid node IDs.
//! 3. The graph is acyclic (topological sort succeeds).
//! 4. A router node's outgoing edges only use handles that are one of its
//!    condition ids or its configured default.
//! 5. A sub-flow/map node's outgoing edges only use the `success`/`error`
//!    handles.
//!
//! Returns node IDs in topological order on success.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::{Graph, NodeDefinition};
use crate::EngineError;

pub const NODE_KIND_ROUTER: &str = "router";
pub const NODE_KIND_SUBFLOW: &str = "subflow";
pub const NODE_KIND_MAP: &str = "map";

pub fn validate_dag(graph: &Graph) -> Result<Vec<String>, EngineError> {
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &graph.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(EngineError::DuplicateNodeId(node.id.clone()));
        }
    }

    let node_set: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in &graph.edges {
        if !node_set.contains(edge.from.as_str()) {
            return Err(EngineError::UnknownNodeReference { node_id: edge.from.clone(), side: "from" });
        }
        if !node_set.contains(edge.to.as_str()) {
            return Err(EngineError::UnknownNodeReference { node_id: edge.to.clone(), side: "to" });
        }
    }

    validate_branch_handles(graph)?;

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for node in &graph.nodes {
        adjacency.entry(node.id.as_str()).or_default();
        in_degree.entry(node.id.as_str()).or_insert(0);
    }
    for edge in &graph.edges {
        adjacency.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
    }

    let mut queue: VecDeque<&str> = in_degree.iter().filter(|(_, &d)| d == 0).map(|(&id, _)| id).collect();
    let mut sorted: Vec<String> = Vec::with_capacity(graph.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id.to_owned());
        if let Some(neighbours) = adjacency.get(node_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    if sorted.len() != graph.nodes.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(sorted)
}

/// Nodes with no incoming edges — a run's initial dispatch frontier.
pub fn frontier_nodes(graph: &Graph) -> Vec<&NodeDefinition> {
    let has_incoming: HashSet<&str> = graph.edges.iter().map(|e| e.to.as_str()).collect();
    graph.nodes.iter().filter(|n| !has_incoming.contains(n.id.as_str())).collect()
}

fn validate_branch_handles(graph: &Graph) -> Result<(), EngineError> {
    for node in &graph.nodes {
        let outgoing: Vec<&crate::models::Edge> = graph.edges.iter().filter(|e| e.from == node.id).collect();

        match node.node_type.as_str() {
            NODE_KIND_ROUTER => {
                let allowed = router_handles(node);
                for edge in &outgoing {
                    let handle = edge.source_handle.clone().unwrap_or_default();
                    if !allowed.contains(&handle) {
                        return Err(EngineError::InvalidRouterHandle { node_id: node.id.clone(), handle });
                    }
                }
            }
            NODE_KIND_SUBFLOW | NODE_KIND_MAP => {
                for edge in &outgoing {
                    let handle = edge.source_handle.as_deref().unwrap_or("");
                    if handle != "success" && handle != "error" {
                        return Err(EngineError::InvalidBranchHandle {
                            node_id: node.id.clone(),
                            kind: node.node_type.clone(),
                            handle: handle.to_owned(),
                        });
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn router_handles(node: &NodeDefinition) -> HashSet<String> {
    let mut handles = HashSet::new();
    if let Some(conditions) = node.config.get("conditions").and_then(|v| v.as_array()) {
        for c in conditions {
            if let Some(id) = c.get("id").and_then(|v| v.as_str()) {
                handles.insert(id.to_owned());
            }
        }
    }
    if let Some(default) = node.config.get("default").and_then(|v| v.as_str()) {
        handles.insert(default.to_owned());
    }
    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Edge;
    use serde_json::json;

    fn node(id: &str, node_type: &str, config: serde_json::Value) -> NodeDefinition {
        NodeDefinition { id: id.into(), node_type: node_type.into(), config }
    }

    fn plain(id: &str) -> NodeDefinition {
        node(id, "http", serde_json::Value::Null)
    }

    fn edge(from: &str, to: &str) -> Edge {
        Edge { from: from.into(), to: to.into(), source_handle: None }
    }

    fn handled_edge(from: &str, to: &str, handle: &str) -> Edge {
        Edge { from: from.into(), to: to.into(), source_handle: Some(handle.into()) }
    }

    fn graph(nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> Graph {
        Graph { webhook_path: None, nodes, edges }
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        let g = graph(vec![plain("a"), plain("b"), plain("c")], vec![edge("a", "b"), edge("b", "c")]);
        let sorted = validate_dag(&g).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        let g = graph(
            vec![plain("a"), plain("b"), plain("c"), plain("d")],
            vec![edge("a", "b"), edge("a", "c"), edge("b", "d"), edge("c", "d")],
        );
        let sorted = validate_dag(&g).expect("should be valid");
        assert_eq!(sorted.first().unwrap(), "a");
        assert_eq!(sorted.last().unwrap(), "d");
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let g = graph(vec![plain("a"), plain("a")], vec![]);
        assert!(matches!(validate_dag(&g), Err(EngineError::DuplicateNodeId(id)) if id == "a"));
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let g = graph(vec![plain("a")], vec![edge("a", "ghost")]);
        assert!(matches!(validate_dag(&g), Err(EngineError::UnknownNodeReference { node_id, .. }) if node_id == "ghost"));
    }

    #[test]
    fn cycle_is_detected() {
        let g = graph(vec![plain("a"), plain("b"), plain("c")], vec![edge("a", "b"), edge("b", "c"), edge("c", "a")]);
        assert!(matches!(validate_dag(&g), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn single_node_no_edges_is_valid() {
        let g = graph(vec![plain("solo")], vec![]);
        assert_eq!(validate_dag(&g).expect("single node should be valid"), vec!["solo"]);
    }

    #[test]
    fn router_edge_with_unknown_handle_is_rejected() {
        let router = node("r", "router", json!({"conditions": [{"id": "yes", "expr": "true"}], "default": "no"}));
        let g = graph(vec![router, plain("x")], vec![handled_edge("r", "x", "maybe")]);
        assert!(matches!(validate_dag(&g), Err(EngineError::InvalidRouterHandle { node_id, handle }) if node_id == "r" && handle == "maybe"));
    }

    #[test]
    fn router_edge_on_configured_default_is_accepted() {
        let router = node("r", "router", json!({"conditions": [{"id": "yes", "expr": "true"}], "default": "no"}));
        let g = graph(vec![router, plain("x")], vec![handled_edge("r", "x", "no")]);
        assert!(validate_dag(&g).is_ok());
    }

    #[test]
    fn subflow_edge_without_success_or_error_handle_is_rejected() {
        let sub = node("s", "subflow", json!({"child_workflow_id": 1}));
        let g = graph(vec![sub, plain("x")], vec![edge("s", "x")]);
        assert!(matches!(validate_dag(&g), Err(EngineError::InvalidBranchHandle { node_id, .. }) if node_id == "s"));
    }

    #[test]
    fn frontier_nodes_are_the_roots() {
        let g = graph(vec![plain("a"), plain("b"), plain("c")], vec![edge("a", "c"), edge("b", "c")]);
        let mut ids: Vec<&str> = frontier_nodes(&g).iter().map(|n| n.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
