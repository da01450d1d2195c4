use serde::{Deserialize, Serialize};

use weft_core::types::NodeId;

/// A directed connection from one node's output to another node's input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    /// Source node id.
    pub source: NodeId,
    /// Target node id.
    pub target: NodeId,
    /// Named output port on the source; `None` means its primary output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port: Option<String>,
}

impl Edge {
    /// Create an edge reading the source's primary output.
    pub fn new(source: impl Into<NodeId>, target: impl Into<NodeId>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{}->{}", source, target),
            source,
            target,
            source_port: None,
        }
    }

    /// Create an edge reading one named port of the source.
    pub fn from_port(
        source: impl Into<NodeId>,
        port: impl Into<String>,
        target: impl Into<NodeId>,
    ) -> Self {
        let port = port.into();
        let mut edge = Self::new(source, target);
        edge.id = format!("{}:{}->{}", edge.source, port, edge.target);
        edge.source_port = Some(port);
        edge
    }

    /// Override the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_self_loop(&self) -> bool {
        self.source == self.target
    }
}
