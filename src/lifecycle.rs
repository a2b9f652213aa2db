use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

use crate::conversation::ToolSpec;
use crate::delegation::DelegationError;
use crate::mcp::{Connector, ToolConnection};
use crate::registry::{PlannedServer, RegistryError};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to start tool server '{server}': {message}")]
    Connection { server: String, message: String },
    #[error(transparent)]
    Delegation(#[from] DelegationError),
}

/// A tool server that opened and reported its tools.
pub struct OpenedServer {
    pub planned: PlannedServer,
    pub connection: Arc<dyn ToolConnection>,
    pub tools: Vec<ToolSpec>,
}

/// Open tool-server connections in acquisition order.
///
/// Every connection is closed exactly once, in reverse order, by
/// [`ConnectionStack::close_all`]. A partially opened stack unwinds itself
/// before `open_all` returns its error.
#[derive(Default)]
pub struct ConnectionStack {
    entries: Vec<OpenedServer>,
}

impl ConnectionStack {
    pub async fn open_all(
        connector: &dyn Connector,
        plan: &[PlannedServer],
    ) -> Result<Self, StartupError> {
        let mut stack = Self::default();
        for planned in plan {
            match open_one(connector, planned).await {
                Ok(opened) => stack.entries.push(opened),
                Err(err) => {
                    tracing::warn!(server = %planned.key, error = %err, "Tool server failed to start");
                    if let Err(close_err) = stack.close_all().await {
                        tracing::warn!(error = %close_err, "Unwinding after startup failure was incomplete");
                    }
                    return Err(StartupError::Connection {
                        server: planned.key.clone(),
                        message: format!("{err:#}"),
                    });
                }
            }
        }
        Ok(stack)
    }

    pub fn servers(&self) -> &[OpenedServer] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closes every connection newest-first and empties the stack, so a
    /// second call does nothing. A failing close is logged and the rest
    /// still run; the failures are returned together.
    pub async fn close_all(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        while let Some(opened) = self.entries.pop() {
            let name = opened.planned.key;
            match opened.connection.close().await {
                Ok(()) => tracing::info!(server = %name, "Tool server closed"),
                Err(err) => {
                    tracing::warn!(server = %name, error = %err, "Tool server close failed");
                    failures.push(format!("{name}: {err:#}"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "failed to close tool servers cleanly: {}",
                failures.join("; ")
            ))
        }
    }
}

impl Drop for ConnectionStack {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            tracing::warn!(
                open = self.entries.len(),
                "Connection stack dropped without close_all; child processes are killed on drop"
            );
        }
    }
}

async fn open_one(connector: &dyn Connector, planned: &PlannedServer) -> Result<OpenedServer> {
    let connection = connector.open(planned).await?;
    match connection.list_tools().await {
        Ok(tools) => {
            tracing::info!(server = %planned.key, tools = tools.len(), "Tool server ready");
            Ok(OpenedServer {
                planned: planned.clone(),
                connection,
                tools,
            })
        }
        Err(err) => {
            // The connection opened, so it is ours to close before reporting.
            if let Err(close_err) = connection.close().await {
                tracing::warn!(server = %planned.key, error = %close_err, "Tool server close failed");
            }
            Err(err)
        }
    }
}
