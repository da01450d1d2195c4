use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeftError {
    // Collaborator errors
    #[error("Agent invocation failed: {0}")]
    AgentInvocation(String),

    #[error("Function execution failed: {0}")]
    FunctionExecution(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Node {node} timed out after {timeout_secs}s")]
    NodeTimeout { node: String, timeout_secs: u64 },

    #[error("Run cancelled")]
    Cancelled,

    // Graph errors
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error(
        "Unschedulable graph: no node can run, cycle or unresolved dependency among [{}]",
        .pending.join(", ")
    )]
    Unschedulable { pending: Vec<String> },

    // Transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WeftError>;
