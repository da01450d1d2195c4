use std::collections::HashMap;

use weft_core::types::{NodeId, PortMap};

use super::model::Graph;
use super::node::NodeOutput;

/// Address of a value in the run output store.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct OutputKey {
    pub node: NodeId,
    /// `None` addresses the node's primary output.
    pub port: Option<String>,
}

impl OutputKey {
    pub fn primary(node: impl Into<NodeId>) -> Self {
        Self {
            node: node.into(),
            port: None,
        }
    }

    pub fn port(node: impl Into<NodeId>, port: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            port: Some(port.into()),
        }
    }
}

impl std::fmt::Display for OutputKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.port {
            Some(port) => write!(f, "{}[{}]", self.node, port),
            None => write!(f, "{}", self.node),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Stored {
    primary: String,
    ports: PortMap,
}

/// Outputs of finished nodes for the current run.
///
/// Each node keeps its primary string plus any named ports it produced.
#[derive(Debug, Clone, Default)]
pub struct RunOutputStore {
    outputs: HashMap<NodeId, Stored>,
}

impl RunOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from outputs already present on the graph's nodes.
    pub fn from_graph(graph: &Graph) -> Self {
        let mut store = Self::new();
        for node in &graph.nodes {
            if let Some(output) = &node.output {
                store.record(&node.id, output, &node.ports);
            }
        }
        store
    }

    /// Record a finished node. `ports` carries the named outputs the node
    /// produced even when its visible output collapsed to one string.
    pub fn record(&mut self, node: &NodeId, output: &NodeOutput, ports: &PortMap) {
        let ports = match output {
            NodeOutput::Ports(map) if ports.is_empty() => map.clone(),
            _ => ports.clone(),
        };
        self.outputs.insert(
            node.clone(),
            Stored {
                primary: output.primary(),
                ports,
            },
        );
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.outputs.contains_key(node)
    }

    /// Look up a value.
    ///
    /// A port lookup on a node without named ports yields its primary output;
    /// on a node with ports it yields exactly that port or nothing.
    pub fn get(&self, key: &OutputKey) -> Option<&str> {
        let stored = self.outputs.get(&key.node)?;
        match &key.port {
            None => Some(&stored.primary),
            Some(_) if stored.ports.is_empty() => Some(&stored.primary),
            Some(port) => stored.ports.get(port).map(String::as_str),
        }
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}
