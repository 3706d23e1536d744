//! Graph Validator (C4): validates communication graphs and provides
//! predecessor/successor lookup. Cycles are allowed — the graph is merely a
//! reachability matrix, never a DAG (spec.md §9).

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;

/// One directed communication edge. `bidirectional` edges contribute to
/// both agents' predecessor and successor sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub bidirectional: bool,
}

impl GraphEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into(), label: None, bidirectional: false }
    }

    pub fn bidirectional(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self { from: from.into(), to: to.into(), label: None, bidirectional: true }
    }

    /// Whether this edge authorizes a message from `from` to `to`.
    fn authorizes(&self, from: &str, to: &str) -> bool {
        (self.from == from && self.to == to) || (self.bidirectional && self.from == to && self.to == from)
    }
}

/// Validate that every edge endpoint references a known agent id.
pub fn validate(edges: &[GraphEdge], agent_ids: &[&str]) -> Result<(), ValidationError> {
    for edge in edges {
        if !agent_ids.contains(&edge.from.as_str()) {
            return Err(ValidationError(format!(
                "graph edge references unknown agent '{}'",
                edge.from
            )));
        }
        if !agent_ids.contains(&edge.to.as_str()) {
            return Err(ValidationError(format!(
                "graph edge references unknown agent '{}'",
                edge.to
            )));
        }
    }
    Ok(())
}

/// Whether an edge (or a bidirectional edge in reverse) authorizes a direct
/// `from -> to` message, independent of orchestrator-broadcast or
/// self-message rules (those live in [`crate::message_bus`]).
pub fn edge_exists(edges: &[GraphEdge], from: &str, to: &str) -> bool {
    edges.iter().any(|edge| edge.authorizes(from, to))
}

/// Agents that have a direct edge (or bidirectional reverse edge) into `id`.
pub fn predecessors<'a>(edges: &'a [GraphEdge], id: &str) -> Vec<&'a str> {
    edges
        .iter()
        .filter_map(|edge| {
            if edge.to == id {
                Some(edge.from.as_str())
            } else if edge.bidirectional && edge.from == id {
                Some(edge.to.as_str())
            } else {
                None
            }
        })
        .collect()
}

/// Agents reachable by a direct edge (or bidirectional reverse edge) out of `id`.
pub fn successors<'a>(edges: &'a [GraphEdge], id: &str) -> Vec<&'a str> {
    edges
        .iter()
        .filter_map(|edge| {
            if edge.from == id {
                Some(edge.to.as_str())
            } else if edge.bidirectional && edge.to == id {
                Some(edge.from.as_str())
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_unknown_endpoints() {
        let edges = vec![GraphEdge::new("a", "z")];
        let err = validate(&edges, &["a", "b"]).unwrap_err();
        assert!(err.0.contains("z"));
    }

    #[test]
    fn cycles_are_accepted() {
        let edges = vec![GraphEdge::new("a", "b"), GraphEdge::new("b", "a")];
        assert!(validate(&edges, &["a", "b"]).is_ok());
    }

    #[test]
    fn bidirectional_edge_authorizes_both_directions() {
        let edges = vec![GraphEdge::bidirectional("o", "w1")];
        assert!(edge_exists(&edges, "o", "w1"));
        assert!(edge_exists(&edges, "w1", "o"));
        assert!(!edge_exists(&edges, "w1", "w2"));
    }

    #[test]
    fn predecessors_and_successors_include_bidirectional_reverse() {
        let edges = vec![GraphEdge::bidirectional("o", "w1"), GraphEdge::new("w1", "w2")];
        assert_eq!(predecessors(&edges, "o"), vec!["w1"]);
        assert_eq!(successors(&edges, "w2"), vec!["w1"]);
    }
}
