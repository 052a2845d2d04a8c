use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::process::ProcessRunner;
use crate::toolchain::{self, ApkToolchain, ApktoolCli};
use crate::tools::{self, ToolContext};
use crate::transport;
use crate::workspace::WorkspaceManager;

pub struct ServerRuntime {
    config: Config,
    workspace: Arc<WorkspaceManager>,
    toolchain: Arc<dyn ApkToolchain>,
    dispatcher: Arc<Dispatcher>,
}

impl ServerRuntime {
    pub fn new(config: Config) -> Result<Self> {
        let workspace = Arc::new(
            WorkspaceManager::new(&config.workspace.root).with_context(|| {
                format!(
                    "failed preparing workspace root {}",
                    config.workspace.root.display()
                )
            })?,
        );
        let runner = ProcessRunner::new(workspace.clone(), config.runtime.max_output_bytes);
        let toolchain: Arc<dyn ApkToolchain> = Arc::new(ApktoolCli::new(&config.toolchain, runner));
        let ctx = ToolContext {
            workspace: workspace.clone(),
            toolchain: toolchain.clone(),
            runtime: config.runtime.clone(),
        };
        let registry = tools::build_registry()?;
        let dispatcher = Arc::new(Dispatcher::new(registry, ctx));
        Ok(Self {
            config,
            workspace,
            toolchain,
            dispatcher,
        })
    }

    pub async fn run(self) -> Result<()> {
        info!(
            "starting apktool-mcp (workspace={}, apktool={}, aapt={}, workers={}, default_timeout_ms={}, decode_timeout_ms={}, build_timeout_ms={})",
            self.workspace.root().display(),
            self.config.toolchain.apktool_path,
            self.config.toolchain.aapt_path,
            self.config.runtime.max_concurrent_jobs,
            self.config.runtime.default_timeout_ms,
            self.config.runtime.decode_timeout_ms,
            self.config.runtime.build_timeout_ms
        );

        let probe_task = {
            let toolchain = self.toolchain.clone();
            let root = self.workspace.root().to_path_buf();
            let timeout = self.config.runtime.probe_timeout();
            tokio::spawn(async move {
                let report = toolchain::probe(toolchain.as_ref(), &root, timeout).await;
                if report.available {
                    info!(
                        "apktool available: {}",
                        report.version.as_deref().unwrap_or("unknown version")
                    );
                } else {
                    warn!(
                        "apktool unavailable, decode/build/framework tools will fail: {}",
                        report.detail
                    );
                }
            })
        };

        let serve = transport::serve(
            self.dispatcher.clone(),
            tokio::io::stdin(),
            tokio::io::stdout(),
        );
        let result = tokio::select! {
            res = serve => {
                info!("stdin closed, shutting down");
                res
            }
            _ = signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                Ok(())
            }
        };
        probe_task.abort();
        let _ = probe_task.await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::tests::temp_path;

    #[test]
    fn new_prepares_workspace_and_shares_it_with_the_dispatcher() {
        let mut cfg = Config::default();
        cfg.workspace.root = temp_path("runtime");
        let runtime = ServerRuntime::new(cfg).expect("runtime");
        assert!(runtime.workspace.root().is_dir());
        assert_eq!(runtime.dispatcher.workspace_root(), runtime.workspace.root());
    }
}
