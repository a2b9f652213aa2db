use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rmcp::service::{RoleClient, RunningService, ServiceError};
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::ServiceExt;
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use crate::conversation::ToolSpec;
use crate::registry::{PlannedServer, ServerKind};

/// What a tool server returned for one call. `is_error` reflects the
/// server's own error flag; transport failures are reported as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallOutput {
    pub text: String,
    pub is_error: bool,
}

/// An open session with one tool server.
#[async_trait]
pub trait ToolConnection: Send + Sync {
    fn server_name(&self) -> &str;

    async fn list_tools(&self) -> Result<Vec<ToolSpec>>;

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>)
    -> Result<ToolCallOutput>;

    /// Ends the session. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, server: &PlannedServer) -> Result<Arc<dyn ToolConnection>>;
}

#[derive(Debug, Clone, Default)]
pub struct McpConnector {
    tool_timeout: Option<Duration>,
}

impl McpConnector {
    pub fn new(tool_timeout: Option<Duration>) -> Self {
        Self { tool_timeout }
    }
}

#[async_trait]
impl Connector for McpConnector {
    async fn open(&self, server: &PlannedServer) -> Result<Arc<dyn ToolConnection>> {
        let service = match &server.spec.kind {
            ServerKind::Launch { command, args, env } => {
                let mut cmd = tokio::process::Command::new(command);
                cmd.args(args).envs(env).kill_on_drop(true);
                let (transport, _stderr) = TokioChildProcess::builder(cmd)
                    .stderr(std::process::Stdio::null())
                    .spawn()
                    .with_context(|| {
                        format!(
                            "failed to launch tool server '{}' ({})",
                            server.key,
                            server.spec.describe()
                        )
                    })?;
                ().serve(transport).await.with_context(|| {
                    format!("tool server '{}' did not complete the MCP handshake", server.key)
                })?
            }
            ServerKind::Endpoint { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.as_str());
                ().serve(transport).await.with_context(|| {
                    format!("failed to connect to tool server '{}' at {}", server.key, url)
                })?
            }
        };

        tracing::info!(server = %server.key, target = %server.spec.describe(), "Tool server opened");
        Ok(Arc::new(McpConnection {
            name: server.key.clone(),
            tool_timeout: self.tool_timeout,
            service: RwLock::new(Some(service)),
        }))
    }
}

/// Calls share the read lock; `close` takes the write lock and removes the
/// service, so later calls fail instead of reaching a dead peer.
pub struct McpConnection {
    name: String,
    tool_timeout: Option<Duration>,
    service: RwLock<Option<RunningService<RoleClient, ()>>>,
}

impl McpConnection {
    fn closed(&self) -> anyhow::Error {
        anyhow!("connection to tool server '{}' is closed", self.name)
    }
}

#[async_trait]
impl ToolConnection for McpConnection {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| self.closed())?;
        let label = format!("tools/list on '{}'", self.name);
        let tools = run_with_timeout(service.list_all_tools(), self.tool_timeout, &label).await?;

        tools
            .into_iter()
            .map(|tool| tool_spec_from_value(serde_json::to_value(tool)?))
            .collect()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolCallOutput> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| self.closed())?;
        let params = serde_json::from_value(json!({ "name": name, "arguments": arguments }))
            .context("failed to build tool call request")?;
        let label = format!("tools/call '{}' on '{}'", name, self.name);
        let result = run_with_timeout(service.call_tool(params), self.tool_timeout, &label).await?;
        Ok(tool_output_from_value(serde_json::to_value(result)?))
    }

    async fn close(&self) -> Result<()> {
        let Some(service) = self.service.write().await.take() else {
            return Ok(());
        };
        service
            .cancel()
            .await
            .map(|_| ())
            .map_err(|err| anyhow!("failed to stop tool server '{}': {err}", self.name))
    }
}

async fn run_with_timeout<F, T>(fut: F, timeout: Option<Duration>, label: &str) -> Result<T>
where
    F: std::future::Future<Output = Result<T, ServiceError>>,
{
    match timeout {
        Some(duration) => tokio::time::timeout(duration, fut)
            .await
            .map_err(|_| anyhow!("timed out awaiting {label} after {duration:?}"))?
            .map_err(|err| anyhow!("{label} failed: {err}")),
        None => fut.await.map_err(|err| anyhow!("{label} failed: {err}")),
    }
}

fn tool_spec_from_value(value: Value) -> Result<ToolSpec> {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .context("tool listing entry has no name")?
        .to_string();
    let description = value
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let parameters = value
        .get("inputSchema")
        .filter(|schema| schema.is_object())
        .cloned()
        .unwrap_or_else(|| json!({ "type": "object", "properties": {} }));

    Ok(ToolSpec {
        name,
        description,
        parameters,
    })
}

/// Flattens a `tools/call` result into text a model can read.
fn tool_output_from_value(value: Value) -> ToolCallOutput {
    let is_error = value
        .get("isError")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut parts = Vec::new();
    if let Some(content) = value.get("content").and_then(Value::as_array) {
        for item in content {
            match item.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = item.get("text").and_then(Value::as_str) {
                        parts.push(text.to_string());
                    }
                }
                Some("resource") => {
                    let resource = item.get("resource");
                    if let Some(text) = resource.and_then(|r| r.get("text")).and_then(Value::as_str)
                    {
                        parts.push(text.to_string());
                    } else if let Some(uri) =
                        resource.and_then(|r| r.get("uri")).and_then(Value::as_str)
                    {
                        parts.push(format!("[resource: {uri}]"));
                    }
                }
                Some(other) => parts.push(format!("[{other} content omitted]")),
                None => {}
            }
        }
    }

    if parts.is_empty()
        && let Some(structured) = value.get("structuredContent").filter(|v| !v.is_null())
    {
        parts.push(structured.to_string());
    }

    ToolCallOutput {
        text: parts.join("\n"),
        is_error,
    }
}
