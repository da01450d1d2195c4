pub mod http;
pub mod retry;

use std::sync::Arc;

use weft_core::config::AppConfig;
use weft_core::error::Result;
use weft_core::traits::{AgentInvoker, FunctionExecutor, ToolInvoker};

pub use http::{Endpoint, HttpAgentClient, HttpFunctionClient, HttpToolClient, Unconfigured};
pub use retry::{with_retry, Retrying};

/// The three collaborators a workflow run talks to.
pub struct Collaborators {
    pub agent: Arc<dyn AgentInvoker>,
    pub functions: Arc<dyn FunctionExecutor>,
    pub tools: Arc<dyn ToolInvoker>,
}

/// Build HTTP collaborators from config. Sections left out of the config
/// yield a collaborator that fails every call.
pub fn create_collaborators(config: &AppConfig) -> Result<Collaborators> {
    let retry = config.retry.clone();

    let agent: Arc<dyn AgentInvoker> = match &config.agent {
        Some(endpoint) => Arc::new(Retrying::new(
            HttpAgentClient::new(endpoint.clone())?,
            retry.clone(),
        )),
        None => Arc::new(Unconfigured::new("agent")),
    };
    let functions: Arc<dyn FunctionExecutor> = match &config.functions {
        Some(endpoint) => Arc::new(Retrying::new(
            HttpFunctionClient::new(endpoint.clone())?,
            retry.clone(),
        )),
        None => Arc::new(Unconfigured::new("functions")),
    };
    let tools: Arc<dyn ToolInvoker> = match &config.tools {
        Some(endpoint) => Arc::new(Retrying::new(HttpToolClient::new(endpoint.clone())?, retry)),
        None => Arc::new(Unconfigured::new("tools")),
    };

    Ok(Collaborators {
        agent,
        functions,
        tools,
    })
}
