use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::ToolchainConfig;
use crate::error::ToolResult;
use crate::process::{ProcessOutcome, ProcessRunner, ProcessSpec};

/// The operations the server ever asks of the external toolchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainOperation {
    Decode {
        apk: PathBuf,
        output: PathBuf,
        force: bool,
        no_resources: bool,
        no_sources: bool,
    },
    Build {
        source: PathBuf,
        output: Option<PathBuf>,
        force: bool,
    },
    InstallFramework {
        framework: PathBuf,
        tag: Option<String>,
    },
    Badging {
        apk: PathBuf,
    },
    Version,
}

impl ToolchainOperation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "decode",
            Self::Build { .. } => "build",
            Self::InstallFramework { .. } => "install_framework",
            Self::Badging { .. } => "badging",
            Self::Version => "version",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolchainInvocation {
    pub operation: ToolchainOperation,
    pub working_dir: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ToolchainRun {
    pub command_line: String,
    pub outcome: ProcessOutcome,
}

impl ToolchainRun {
    /// Successful runs pass through; failures and timeouts become the call's error.
    pub fn into_success(self) -> ToolResult<ProcessOutcome> {
        if self.outcome.succeeded() {
            Ok(self.outcome)
        } else {
            Err(self.outcome.into_error(&self.command_line))
        }
    }
}

#[async_trait]
pub trait ApkToolchain: Send + Sync {
    async fn execute(&self, invocation: ToolchainInvocation) -> ToolResult<ToolchainRun>;
}

/// Translates toolchain operations into `apktool` / `aapt` command lines.
pub struct ApktoolCli {
    apktool: String,
    aapt: String,
    framework_dir: Option<PathBuf>,
    runner: ProcessRunner,
}

impl ApktoolCli {
    pub fn new(cfg: &ToolchainConfig, runner: ProcessRunner) -> Self {
        Self {
            apktool: cfg.apktool_path.clone(),
            aapt: cfg.aapt_path.clone(),
            framework_dir: cfg.framework_dir.clone(),
            runner,
        }
    }

    pub fn command_for(&self, operation: &ToolchainOperation) -> (String, Vec<String>) {
        match operation {
            ToolchainOperation::Decode {
                apk,
                output,
                force,
                no_resources,
                no_sources,
            } => {
                let mut args = vec!["d".to_owned(), path_arg(apk)];
                if *force {
                    args.push("-f".to_owned());
                }
                if *no_resources {
                    args.push("-r".to_owned());
                }
                if *no_sources {
                    args.push("-s".to_owned());
                }
                self.push_framework_dir(&mut args);
                args.push("-o".to_owned());
                args.push(path_arg(output));
                (self.apktool.clone(), args)
            }
            ToolchainOperation::Build {
                source,
                output,
                force,
            } => {
                let mut args = vec!["b".to_owned(), path_arg(source)];
                if *force {
                    args.push("-f".to_owned());
                }
                self.push_framework_dir(&mut args);
                if let Some(output) = output {
                    args.push("-o".to_owned());
                    args.push(path_arg(output));
                }
                (self.apktool.clone(), args)
            }
            ToolchainOperation::InstallFramework { framework, tag } => {
                let mut args = vec!["if".to_owned(), path_arg(framework)];
                if let Some(tag) = tag {
                    args.push("-t".to_owned());
                    args.push(tag.clone());
                }
                self.push_framework_dir(&mut args);
                (self.apktool.clone(), args)
            }
            ToolchainOperation::Badging { apk } => (
                self.aapt.clone(),
                vec!["dump".to_owned(), "badging".to_owned(), path_arg(apk)],
            ),
            ToolchainOperation::Version => (self.apktool.clone(), vec!["--version".to_owned()]),
        }
    }

    fn push_framework_dir(&self, args: &mut Vec<String>) {
        if let Some(dir) = &self.framework_dir {
            args.push("-p".to_owned());
            args.push(path_arg(dir));
        }
    }
}

#[async_trait]
impl ApkToolchain for ApktoolCli {
    async fn execute(&self, invocation: ToolchainInvocation) -> ToolResult<ToolchainRun> {
        let (program, args) = self.command_for(&invocation.operation);
        let spec = ProcessSpec {
            program,
            args,
            working_dir: invocation.working_dir,
            timeout: invocation.timeout,
        };
        let command_line = spec.command_line();
        debug!("toolchain {}: {command_line}", invocation.operation.label());
        let outcome = self.runner.run(spec).await?;
        Ok(ToolchainRun {
            command_line,
            outcome,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ToolchainProbe {
    pub available: bool,
    pub version: Option<String>,
    pub detail: String,
}

/// Asks the toolchain for its version; never fails, only reports.
pub async fn probe(
    toolchain: &dyn ApkToolchain,
    working_dir: &Path,
    timeout: Duration,
) -> ToolchainProbe {
    let invocation = ToolchainInvocation {
        operation: ToolchainOperation::Version,
        working_dir: working_dir.to_path_buf(),
        timeout,
    };
    match toolchain.execute(invocation).await {
        Ok(run) if run.outcome.succeeded() => {
            let version = run
                .outcome
                .aggregated()
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(ToOwned::to_owned);
            ToolchainProbe {
                available: true,
                detail: format!("`{}` ok", run.command_line),
                version,
            }
        }
        Ok(run) => ToolchainProbe {
            available: false,
            version: None,
            detail: run.outcome.into_error(&run.command_line).message,
        },
        Err(err) => ToolchainProbe {
            available: false,
            version: None,
            detail: err.message,
        },
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
