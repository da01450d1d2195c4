use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use weft_core::error::{Result, WeftError};
use weft_core::types::{NodeId, NodeStatus, PortMap};

use super::edge::Edge;
use super::node::{Node, NodeOutput};

/// A workflow graph: nodes plus directed edges, both kept in editor order.
///
/// Edge order matters: fan-in values are combined in edge-list order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Add a node.
    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add an edge.
    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| &n.id == id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.iter().map(|n| &n.id)
    }

    /// Edges targeting `id`, in edge-list order.
    pub fn incoming<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.target == id)
    }

    /// Edges leaving `id`, in edge-list order.
    pub fn outgoing<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| &e.source == id)
    }

    /// Check that node ids are unique and every edge endpoint exists.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(&node.id) {
                return Err(WeftError::InvalidGraph(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !seen.contains(endpoint) {
                    return Err(WeftError::InvalidGraph(format!(
                        "edge '{}' references unknown node '{}'",
                        edge.id, endpoint
                    )));
                }
            }
        }
        Ok(())
    }

    /// Return every node to idle and drop all outputs.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.status = NodeStatus::Idle;
            node.output = None;
            node.ports.clear();
        }
    }

    /// Record a node's status (and output, if given). Unknown ids are ignored.
    pub fn set_state(&mut self, id: &NodeId, status: NodeStatus, output: Option<NodeOutput>) {
        if let Some(node) = self.node_mut(id) {
            node.status = status;
            if output.is_some() {
                node.output = output;
            }
        }
    }

    /// Record the named outputs behind a node's output. Unknown ids are ignored.
    pub fn set_ports(&mut self, id: &NodeId, ports: PortMap) {
        if let Some(node) = self.node_mut(id) {
            node.ports = ports;
        }
    }

    /// Drop edges matching the predicate, returning them.
    pub fn remove_edges<F>(&mut self, mut predicate: F) -> Vec<Edge>
    where
        F: FnMut(&Edge) -> bool,
    {
        let (removed, kept): (Vec<Edge>, Vec<Edge>) =
            self.edges.drain(..).partition(|e| predicate(e));
        self.edges = kept;
        removed
    }
}
