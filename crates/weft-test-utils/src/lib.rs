//! Scripted collaborators for engine tests.
//!
//! Each mock records what it was asked to do so tests can assert on the
//! requests, and an execution trace (`start:<label>` / `end:<label>`) so
//! ordering between concurrent nodes can be checked.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use weft_core::error::{Result, WeftError};
use weft_core::traits::{AgentInvoker, FunctionExecutor, ToolInvoker};
use weft_core::types::{AgentRequest, AgentResponse, FunctionResponse, ToolInstance, ToolOutput};

/// Shared start/end trace across mocks.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Position of an event in the trace.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

enum AgentScript {
    Respond(String),
    Fail(String),
}

/// Agent collaborator keyed by system prompt.
///
/// Unscripted prompts echo the rendered user prompt back.
#[derive(Default)]
pub struct MockAgent {
    scripts: HashMap<String, AgentScript>,
    tool_outputs: HashMap<String, Vec<ToolOutput>>,
    delays: HashMap<String, Duration>,
    hang: Vec<String>,
    requests: Mutex<Vec<AgentRequest>>,
    trace: Trace,
}

impl MockAgent {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn respond(mut self, system_prompt: &str, output: &str) -> Self {
        self.scripts
            .insert(system_prompt.to_string(), AgentScript::Respond(output.to_string()));
        self
    }

    pub fn fail(mut self, system_prompt: &str, message: &str) -> Self {
        self.scripts
            .insert(system_prompt.to_string(), AgentScript::Fail(message.to_string()));
        self
    }

    pub fn with_tool_output(mut self, system_prompt: &str, tool_id: &str, output: &str) -> Self {
        self.tool_outputs
            .entry(system_prompt.to_string())
            .or_default()
            .push(ToolOutput {
                tool_id: tool_id.to_string(),
                output: serde_json::Value::String(output.to_string()),
            });
        self
    }

    pub fn with_delay(mut self, system_prompt: &str, delay_ms: u64) -> Self {
        self.delays
            .insert(system_prompt.to_string(), Duration::from_millis(delay_ms));
        self
    }

    /// Never answer for this system prompt.
    pub fn hang(mut self, system_prompt: &str) -> Self {
        self.hang.push(system_prompt.to_string());
        self
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl AgentInvoker for MockAgent {
    fn invoke(&self, request: AgentRequest) -> BoxFuture<'_, Result<AgentResponse>> {
        Box::pin(async move {
            let label = request.system_prompt.clone();
            self.requests.lock().unwrap().push(request.clone());
            self.trace.push(format!("start:{}", label));

            if self.hang.contains(&label) {
                futures::future::pending::<()>().await;
            }
            if let Some(delay) = self.delays.get(&label) {
                tokio::time::sleep(*delay).await;
            }

            let result = match self.scripts.get(&label) {
                Some(AgentScript::Fail(message)) => {
                    Err(WeftError::AgentInvocation(message.clone()))
                }
                Some(AgentScript::Respond(output)) => Ok(AgentResponse::text(output.clone())),
                None => Ok(AgentResponse::text(request.user_prompt.clone())),
            };
            self.trace.push(format!("end:{}", label));

            result.map(|mut response| {
                response.tool_outputs = self.tool_outputs.get(&label).cloned().unwrap_or_default();
                response
            })
        })
    }
}

/// Function executor keyed by the config's `name` field.
///
/// Unscripted functions echo the input on port `result`.
#[derive(Default)]
pub struct MockFunctions {
    scripts: HashMap<String, FunctionResponse>,
    calls: Mutex<Vec<(serde_json::Value, String)>>,
    trace: Trace,
}

impl MockFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, name: &str, response: FunctionResponse) -> Self {
        self.scripts.insert(name.to_string(), response);
        self
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }

    pub fn calls(&self) -> Vec<(serde_json::Value, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FunctionExecutor for MockFunctions {
    fn execute(
        &self,
        config: serde_json::Value,
        input: String,
    ) -> BoxFuture<'_, Result<FunctionResponse>> {
        Box::pin(async move {
            let name = config
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("echo")
                .to_string();
            self.trace.push(format!("start:{}", name));
            self.calls.lock().unwrap().push((config, input.clone()));
            let response = self
                .scripts
                .get(&name)
                .cloned()
                .unwrap_or_else(|| FunctionResponse::single("result", input));
            self.trace.push(format!("end:{}", name));
            Ok(response)
        })
    }
}

/// Tool invoker keyed by tool id.
#[derive(Default)]
pub struct MockTools {
    scripts: HashMap<String, FunctionResponse>,
    calls: Mutex<Vec<(ToolInstance, String)>>,
}

impl MockTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, tool_id: &str, response: FunctionResponse) -> Self {
        self.scripts.insert(tool_id.to_string(), response);
        self
    }

    pub fn calls(&self) -> Vec<(ToolInstance, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolInvoker for MockTools {
    fn invoke(&self, tool: ToolInstance, input: String) -> BoxFuture<'_, Result<FunctionResponse>> {
        Box::pin(async move {
            let response = self
                .scripts
                .get(&tool.tool_id)
                .cloned()
                .unwrap_or_else(|| FunctionResponse::single("result", input.clone()));
            self.calls.lock().unwrap().push((tool, input));
            Ok(response)
        })
    }
}

/// Temporary directory for log-file tests.
pub fn temp_log_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("create temp dir")
}
