use weft_core::error::{Result, WeftError};
use weft_core::traits::{AgentInvoker, FunctionExecutor, ToolInvoker};
use weft_core::types::{
    AgentRequest, FunctionResponse, NodeId, NodeStatus, PortMap, Severity, ToolInstance,
};

use super::node::{NodeKind, NodeOutput};
use super::resolve::{seed_or_default, ResolvedInput};
use crate::run_log::{truncate_str, RunLog};

/// Everything a node needs from its run while executing.
pub struct ExecContext<'a> {
    pub node_id: &'a NodeId,
    pub seed: &'a str,
    pub agent: &'a dyn AgentInvoker,
    pub functions: &'a dyn FunctionExecutor,
    pub tools: &'a dyn ToolInvoker,
    pub log: &'a RunLog,
}

/// What one node execution produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    /// `Success` or `Error`.
    pub status: NodeStatus,
    pub output: NodeOutput,
    /// Named outputs reported by function/tool collaborators.
    pub ports: PortMap,
}

impl Outcome {
    pub fn success(output: NodeOutput) -> Self {
        Self {
            status: NodeStatus::Success,
            output,
            ports: PortMap::new(),
        }
    }

    /// A failure carried as data: the error text becomes the node's output.
    pub fn failed(error: &WeftError) -> Self {
        Self {
            status: NodeStatus::Error,
            output: NodeOutput::Text(format!("Error: {}", error)),
            ports: PortMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == NodeStatus::Success
    }
}

impl NodeKind {
    /// Execute this node against its resolved input.
    ///
    /// Never fails: collaborator errors become an `Error` outcome.
    pub async fn execute(&self, ctx: &ExecContext<'_>, input: &ResolvedInput) -> Outcome {
        match self.try_execute(ctx, input).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::failed(&e),
        }
    }

    async fn try_execute(&self, ctx: &ExecContext<'_>, input: &ResolvedInput) -> Result<Outcome> {
        match self {
            Self::Input { text } => {
                let value = if text.is_empty() {
                    seed_or_default(ctx.seed)
                } else {
                    text.as_str()
                };
                Ok(Outcome::success(NodeOutput::Text(value.to_string())))
            }
            Self::Agent {
                system_prompt,
                user_prompt,
                tools,
            } => run_agent(ctx, system_prompt, user_prompt, tools, input).await,
            Self::Transform { operation } => {
                Ok(Outcome::success(NodeOutput::Text(operation.apply(&input.text))))
            }
            // Parts are joined with the same separator as fan-in resolution.
            Self::Join | Self::Output => Ok(Outcome::success(NodeOutput::Text(input.text.clone()))),
            Self::Function { config } => {
                let response = ctx
                    .functions
                    .execute(config.clone(), input.text.clone())
                    .await?;
                collect_ports(response, WeftError::FunctionExecution)
            }
            Self::Tool { tool_id, config } => {
                let tool = ToolInstance::new(tool_id.clone()).with_config(config.clone());
                let response = ctx.tools.invoke(tool, input.text.clone()).await?;
                collect_ports(response, |message| WeftError::ToolExecution {
                    tool: tool_id.clone(),
                    message,
                })
            }
        }
    }
}

async fn run_agent(
    ctx: &ExecContext<'_>,
    system_prompt: &str,
    user_prompt: &str,
    tools: &[ToolInstance],
    input: &ResolvedInput,
) -> Result<Outcome> {
    let template = if user_prompt.trim().is_empty() {
        "{input}"
    } else {
        user_prompt
    };
    let rendered = render_prompt(template, &input.text, ctx.seed);

    for tool in tools {
        ctx.log.node(
            Severity::Running,
            ctx.node_id,
            format!("Executing tool {}", tool.tool_id),
        );
    }

    let response = ctx
        .agent
        .invoke(AgentRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt: rendered,
            tools: tools.to_vec(),
        })
        .await?;

    for tool_output in &response.tool_outputs {
        let text = match &tool_output.output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        ctx.log.node(
            Severity::Info,
            ctx.node_id,
            format!(
                "Tool {} output: {}",
                tool_output.tool_id,
                truncate_str(&text, 500)
            ),
        );
    }

    Ok(Outcome::success(NodeOutput::Text(response.output)))
}

/// Turn a function/tool response into an outcome.
///
/// One entry becomes a plain string; several become a port map.
fn collect_ports<F>(response: FunctionResponse, to_error: F) -> Result<Outcome>
where
    F: FnOnce(String) -> WeftError,
{
    if !response.success {
        let message = response
            .error
            .unwrap_or_else(|| "reported failure without detail".to_string());
        return Err(to_error(message));
    }

    let output = match response.outputs.len() {
        0 => NodeOutput::Text(String::new()),
        1 => NodeOutput::Text(response.outputs.values().next().cloned().unwrap_or_default()),
        _ => NodeOutput::Ports(response.outputs.clone()),
    };
    Ok(Outcome {
        status: NodeStatus::Success,
        output,
        ports: response.outputs,
    })
}

/// Substitute `{input}` and `{prompt}` in one pass, so substituted text is
/// never re-scanned for placeholders.
pub fn render_prompt(template: &str, input: &str, prompt: &str) -> String {
    let mut out = String::with_capacity(template.len() + input.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix("{input}") {
            out.push_str(input);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{prompt}") {
            out.push_str(prompt);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}
