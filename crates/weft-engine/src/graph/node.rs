use serde::{Deserialize, Serialize};

use weft_core::types::{NodeId, NodeStatus, PortMap, ToolInstance, JOIN_SEPARATOR};

use super::transform::TransformOp;

/// A node in the workflow graph.
///
/// The engine only reads `kind` and writes `status`/`output`; everything
/// else belongs to the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: NodeId,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Kind-specific configuration.
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<NodeOutput>,
    /// Named outputs behind `output`, kept even when it collapsed to one string.
    #[serde(default, skip_serializing_if = "PortMap::is_empty")]
    pub ports: PortMap,
}

/// The unit of work a node performs, with its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Literal text; falls back to the run's seed input when empty.
    Input {
        #[serde(default)]
        text: String,
    },
    /// One call to the agent-invocation collaborator.
    Agent {
        #[serde(default)]
        system_prompt: String,
        /// Template; `{input}` and `{prompt}` are substituted.
        #[serde(default = "default_user_prompt")]
        user_prompt: String,
        #[serde(default)]
        tools: Vec<ToolInstance>,
    },
    /// Pure local string operation.
    Transform { operation: TransformOp },
    /// Explicit fan-in point.
    Join,
    /// Terminal presentation node.
    Output,
    /// Delegated to the function executor.
    Function {
        #[serde(default)]
        config: serde_json::Value,
    },
    /// Delegated to the tool invoker.
    Tool {
        tool_id: String,
        #[serde(default)]
        config: serde_json::Value,
    },
}

fn default_user_prompt() -> String {
    "{input}".to_string()
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input",
            Self::Agent { .. } => "agent",
            Self::Transform { .. } => "transform",
            Self::Join => "join",
            Self::Output => "output",
            Self::Function { .. } => "function",
            Self::Tool { .. } => "tool",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A node's output: one string, or one string per named port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeOutput {
    Text(String),
    Ports(PortMap),
}

impl NodeOutput {
    /// The single-string view: port values are joined in the order reported.
    pub fn primary(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Ports(ports) => ports
                .values()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(JOIN_SEPARATOR),
        }
    }

    pub fn port(&self, port: &str) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Ports(ports) => ports.get(port).map(String::as_str),
        }
    }

    pub fn is_multi_port(&self) -> bool {
        matches!(self, Self::Ports(_))
    }
}

impl From<&str> for NodeOutput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl Node {
    /// Create a node with the given kind and no name.
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            kind,
            status: NodeStatus::Idle,
            output: None,
            ports: PortMap::new(),
        }
    }

    pub fn input(id: impl Into<NodeId>, text: impl Into<String>) -> Self {
        Self::new(id, NodeKind::Input { text: text.into() })
    }

    pub fn agent(
        id: impl Into<NodeId>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            NodeKind::Agent {
                system_prompt: system_prompt.into(),
                user_prompt: user_prompt.into(),
                tools: vec![],
            },
        )
    }

    pub fn transform(id: impl Into<NodeId>, operation: TransformOp) -> Self {
        Self::new(id, NodeKind::Transform { operation })
    }

    pub fn join(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::Join)
    }

    pub fn output(id: impl Into<NodeId>) -> Self {
        Self::new(id, NodeKind::Output)
    }

    pub fn function(id: impl Into<NodeId>, config: serde_json::Value) -> Self {
        Self::new(id, NodeKind::Function { config })
    }

    pub fn tool(id: impl Into<NodeId>, tool_id: impl Into<String>) -> Self {
        Self::new(
            id,
            NodeKind::Tool {
                tool_id: tool_id.into(),
                config: serde_json::Value::Null,
            },
        )
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Attach a tool instance (agent nodes only; ignored otherwise).
    pub fn with_tool(mut self, tool: ToolInstance) -> Self {
        if let NodeKind::Agent { tools, .. } = &mut self.kind {
            tools.push(tool);
        }
        self
    }

    /// The output as a single string, if the node has produced one.
    pub fn primary_output(&self) -> Option<String> {
        self.output.as_ref().map(NodeOutput::primary)
    }
}
