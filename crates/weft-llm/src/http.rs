use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use weft_core::config::EndpointConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::{AgentInvoker, FunctionExecutor, ToolInvoker};
use weft_core::types::{AgentRequest, AgentResponse, FunctionResponse, ToolInstance};

/// One configured collaborator endpoint: JSON in, JSON out.
#[derive(Clone)]
pub struct Endpoint {
    http: Client,
    config: EndpointConfig,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| WeftError::Http(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// POST `body` and decode the JSON reply.
    pub async fn post<B, R>(&self, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut request = self
            .http
            .post(&self.config.url)
            .header("content-type", "application/json")
            .json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        debug!(url = %self.config.url, "Sending collaborator request");
        let response = request.send().await.map_err(request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(WeftError::Http(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| WeftError::Http(format!("invalid response body: {}", e)))
    }
}

/// Tag transport failures so the retry layer can recognise them.
fn request_error(e: reqwest::Error) -> WeftError {
    if e.is_timeout() {
        WeftError::Http(format!("timeout: {}", e))
    } else if e.is_connect() {
        WeftError::Http(format!("connection failed: {}", e))
    } else {
        WeftError::Http(e.to_string())
    }
}

/// Agent collaborator over HTTP. Posts the `AgentRequest` as-is.
pub struct HttpAgentClient {
    endpoint: Endpoint,
}

impl HttpAgentClient {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config)?,
        })
    }
}

impl AgentInvoker for HttpAgentClient {
    fn invoke(&self, request: AgentRequest) -> BoxFuture<'_, Result<AgentResponse>> {
        Box::pin(async move {
            self.endpoint
                .post(&request)
                .await
                .map_err(|e| WeftError::AgentInvocation(e.to_string()))
        })
    }
}

#[derive(Serialize)]
struct FunctionCall<'a> {
    config: &'a serde_json::Value,
    input: &'a str,
}

/// Function executor over HTTP: `{config, input}` in, `FunctionResponse` out.
pub struct HttpFunctionClient {
    endpoint: Endpoint,
}

impl HttpFunctionClient {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config)?,
        })
    }
}

impl FunctionExecutor for HttpFunctionClient {
    fn execute(
        &self,
        config: serde_json::Value,
        input: String,
    ) -> BoxFuture<'_, Result<FunctionResponse>> {
        Box::pin(async move {
            self.endpoint
                .post(&FunctionCall {
                    config: &config,
                    input: &input,
                })
                .await
        })
    }
}

#[derive(Serialize)]
struct ToolCall<'a> {
    tool: &'a ToolInstance,
    input: &'a str,
}

/// Tool invoker over HTTP: `{tool, input}` in, `FunctionResponse` out.
pub struct HttpToolClient {
    endpoint: Endpoint,
}

impl HttpToolClient {
    pub fn new(config: EndpointConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config)?,
        })
    }
}

impl ToolInvoker for HttpToolClient {
    fn invoke(&self, tool: ToolInstance, input: String) -> BoxFuture<'_, Result<FunctionResponse>> {
        Box::pin(async move {
            self.endpoint
                .post(&ToolCall {
                    tool: &tool,
                    input: &input,
                })
                .await
        })
    }
}

/// Stand-in for a collaborator with no configured endpoint.
///
/// Every call fails, which surfaces as an error on the node that needed it.
#[derive(Debug, Clone, Copy)]
pub struct Unconfigured {
    section: &'static str,
}

impl Unconfigured {
    pub fn new(section: &'static str) -> Self {
        Self { section }
    }

    fn error(&self) -> WeftError {
        WeftError::Config(format!("no [{}] endpoint configured", self.section))
    }
}

impl AgentInvoker for Unconfigured {
    fn invoke(&self, _request: AgentRequest) -> BoxFuture<'_, Result<AgentResponse>> {
        Box::pin(async move { Err(self.error()) })
    }
}

impl FunctionExecutor for Unconfigured {
    fn execute(
        &self,
        _config: serde_json::Value,
        _input: String,
    ) -> BoxFuture<'_, Result<FunctionResponse>> {
        Box::pin(async move { Err(self.error()) })
    }
}

impl ToolInvoker for Unconfigured {
    fn invoke(&self, _tool: ToolInstance, _input: String) -> BoxFuture<'_, Result<FunctionResponse>> {
        Box::pin(async move { Err(self.error()) })
    }
}
