pub mod apk;
mod scan;

pub(crate) use scan::read_text_capped;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::RuntimeConfig;
use crate::error::{ToolError, ToolErrorKind, ToolResult};
use crate::tool_registry::{ToolArgs, ToolRegistry};
use crate::toolchain::ApkToolchain;
use crate::workspace::WorkspaceManager;

/// Everything a handler may touch. Built once at startup and shared.
#[derive(Clone)]
pub struct ToolContext {
    pub workspace: Arc<WorkspaceManager>,
    pub toolchain: Arc<dyn ApkToolchain>,
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub structured: Value,
}

impl ToolOutput {
    pub fn new(text: impl Into<String>, structured: Value) -> Self {
        Self {
            text: text.into(),
            structured,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, ctx: &ToolContext, args: ToolArgs) -> ToolResult<ToolOutput>;

    /// Budget for the external process this handler may start. The dispatcher
    /// adds the configured grace on top for its own deadline.
    fn timeout(&self, runtime: &RuntimeConfig) -> Duration {
        runtime.default_timeout()
    }
}

pub fn build_registry() -> anyhow::Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    apk::register_all(&mut registry)?;
    Ok(registry)
}

/// Runs filesystem-heavy work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(label: &'static str, work: F) -> ToolResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ToolResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        ToolError::new(
            ToolErrorKind::Internal,
            format!("{label} worker failed: {err}"),
        )
    })?
}
