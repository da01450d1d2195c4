use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Agent invocation: one prompt in, one completion out.
pub trait AgentInvoker: Send + Sync + 'static {
    /// Run the agent with the rendered prompts and attached tools.
    fn invoke(&self, request: AgentRequest) -> BoxFuture<'_, Result<AgentResponse>>;
}

/// Function executor: runs the body of a `function` node.
pub trait FunctionExecutor: Send + Sync + 'static {
    /// Execute with the node's configuration record and its resolved input.
    fn execute(
        &self,
        config: serde_json::Value,
        input: String,
    ) -> BoxFuture<'_, Result<FunctionResponse>>;
}

/// Tool invoker: runs a standalone `tool` node.
pub trait ToolInvoker: Send + Sync + 'static {
    /// Invoke the tool instance against the resolved input.
    fn invoke(&self, tool: ToolInstance, input: String) -> BoxFuture<'_, Result<FunctionResponse>>;
}
