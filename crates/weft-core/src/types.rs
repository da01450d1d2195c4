use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator used wherever several node values collapse into one string.
pub const JOIN_SEPARATOR: &str = "\n\n---\n\n";

/// Input handed to source nodes when the run was started without a seed.
pub const NO_INPUT: &str = "No input provided";

/// Port name to value, in the order the collaborator reported them.
pub type PortMap = IndexMap<String, String>;

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node identifier, stable for the lifetime of a graph.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Execution status of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Running,
    #[serde(alias = "complete")]
    Success,
    Error,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Severity of a run log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Running,
    Success,
    Warning,
    Error,
}

/// One entry of the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

impl LogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            node_id: None,
        }
    }

    pub fn for_node(mut self, node_id: &NodeId) -> Self {
        self.node_id = Some(node_id.clone());
        self
    }
}

/// An attached tool instance passed along with an agent invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInstance {
    pub tool_id: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ToolInstance {
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }
}

/// Request sent to the agent-invocation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(default)]
    pub tools: Vec<ToolInstance>,
}

/// A side output produced by a tool during an agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub tool_id: String,
    #[serde(default)]
    pub output: serde_json::Value,
}

/// Response from the agent-invocation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub output: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_outputs: Vec<ToolOutput>,
}

impl AgentResponse {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            tool_outputs: vec![],
        }
    }
}

/// Response from the function executor (and the tool invoker).
///
/// `outputs` keys are port names; a single entry is the common case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub success: bool,
    #[serde(default)]
    pub outputs: PortMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FunctionResponse {
    pub fn ok(outputs: PortMap) -> Self {
        Self {
            success: true,
            outputs,
            error: None,
        }
    }

    pub fn single(port: impl Into<String>, value: impl Into<String>) -> Self {
        let mut outputs = PortMap::new();
        outputs.insert(port.into(), value.into());
        Self::ok(outputs)
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            outputs: PortMap::new(),
            error: Some(error.into()),
        }
    }
}

/// Which dependency resolver drove a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Staged,
    Readiness,
    SingleNode,
}

/// Run event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// A run started.
    RunStarted { run_id: RunId, strategy: Strategy },
    /// A node changed status.
    NodeStatus { node_id: NodeId, status: NodeStatus },
    /// A run log entry was appended.
    Log(LogEntry),
    /// The run finished (individual nodes may still have failed).
    RunComplete {
        run_id: RunId,
        succeeded: bool,
        total_elapsed_ms: u64,
    },
    /// The run aborted (structural failure or cancellation).
    RunFailed { run_id: RunId, error: String },
}
