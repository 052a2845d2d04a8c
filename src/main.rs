mod config;
mod dispatcher;
mod error;
mod process;
mod prompts;
mod protocol;
mod resources;
mod runtime;
mod tool_registry;
mod toolchain;
mod tools;
mod transport;
mod workspace;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use config::Config;
use serde::Serialize;
use tokio::process::Command;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "MCP server exposing apktool over stdio")]
struct Cli {
    /// Path to TOML config file.
    #[arg(
        long,
        global = true,
        env = "APKTOOL_MCP_CONFIG",
        default_value = "apktool-mcp.toml"
    )]
    config: PathBuf,

    /// Override the workspace root every tool path is confined to.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    /// Override the apktool executable.
    #[arg(long, global = true)]
    apktool: Option<String>,

    /// Log level filter, e.g. info,debug,trace. Logs go to stderr.
    #[arg(long, global = true, env = "APKTOOL_MCP_LOG", default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommand {
    /// Serve MCP over stdin/stdout (default).
    Serve,
    /// Check configuration, workspace and toolchain availability.
    Doctor(DoctorArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct DoctorArgs {
    /// Emit doctor output as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
struct DoctorReport {
    ok: bool,
    checks: Vec<DoctorCheck>,
}

#[derive(Debug, Clone, Serialize)]
struct DoctorCheck {
    id: String,
    status: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ToolAvailability {
    apktool: bool,
    aapt: bool,
    java: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log)?;

    let command = cli.command.clone().unwrap_or(CliCommand::Serve);
    match command {
        CliCommand::Serve => run_server(cli).await,
        CliCommand::Doctor(args) => run_doctor(&cli, args).await,
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut cfg = Config::load(&cli.config)?;
    cfg.apply_cli_overrides(cli.workspace.as_deref(), cli.apktool.as_deref());
    cfg.validate()?;
    Ok(cfg)
}

async fn run_server(cli: Cli) -> Result<()> {
    let cfg = load_config(&cli)?;
    let runtime = runtime::ServerRuntime::new(cfg)?;
    runtime.run().await
}

async fn run_doctor(cli: &Cli, args: DoctorArgs) -> Result<()> {
    let config_result = load_config(cli).map_err(|err| err.to_string());
    let tools = match &config_result {
        Ok(cfg) => {
            let wait = cfg.runtime.probe_timeout();
            let (apktool, aapt, java) = tokio::join!(
                command_available(&cfg.toolchain.apktool_path, "--version", wait),
                command_available(&cfg.toolchain.aapt_path, "version", wait),
                command_available(&cfg.toolchain.java_path, "-version", wait),
            );
            ToolAvailability {
                apktool,
                aapt,
                java,
            }
        }
        Err(_) => ToolAvailability::default(),
    };
    let report = build_doctor_report(config_result, &cli.config, tools);
    print_doctor_report(&report, args.json);
    if report.ok {
        return Ok(());
    }
    Err(anyhow!("doctor reported blocking issues"))
}

fn build_doctor_report(
    config_result: std::result::Result<Config, String>,
    config_path: &Path,
    tools: ToolAvailability,
) -> DoctorReport {
    let mut checks = Vec::new();

    let cfg = match config_result {
        Ok(cfg) => {
            let message = if config_path.exists() {
                format!("loaded {}", config_path.display())
            } else {
                format!("{} not found, using defaults", config_path.display())
            };
            checks.push(DoctorCheck {
                id: "config.load".to_owned(),
                status: "pass".to_owned(),
                message,
                detail: None,
            });
            cfg
        }
        Err(err) => {
            checks.push(DoctorCheck {
                id: "config.load".to_owned(),
                status: "fail".to_owned(),
                message: format!("failed to load {}", config_path.display()),
                detail: Some(err),
            });
            return DoctorReport { ok: false, checks };
        }
    };

    checks.push(workspace_check(&cfg.workspace.root));

    let binaries = [
        (
            "toolchain.apktool",
            &cfg.toolchain.apktool_path,
            tools.apktool,
            "fail",
            "required for decode_apk, build_apk and install_framework",
        ),
        (
            "toolchain.aapt",
            &cfg.toolchain.aapt_path,
            tools.aapt,
            "warn",
            "get_apk_info falls back to file metadata without it",
        ),
        (
            "toolchain.java",
            &cfg.toolchain.java_path,
            tools.java,
            "warn",
            "apktool needs a Java runtime",
        ),
    ];
    for (id, program, available, missing_status, detail) in binaries {
        checks.push(DoctorCheck {
            id: id.to_owned(),
            status: if available { "pass" } else { missing_status }.to_owned(),
            message: if available {
                format!("{program} is available")
            } else {
                format!("{program} is not available")
            },
            detail: Some(detail.to_owned()),
        });
    }

    let ok = checks.iter().all(|check| check.status != "fail");
    DoctorReport { ok, checks }
}

/// Inspects the root without creating it; `serve` creates a missing root.
fn workspace_check(root: &Path) -> DoctorCheck {
    let (status, message, detail) = match std::fs::metadata(root) {
        Ok(meta) if meta.is_dir() => match root.canonicalize() {
            Ok(resolved) => ("pass", resolved.display().to_string(), None),
            Err(err) => (
                "fail",
                format!("cannot resolve {}", root.display()),
                Some(err.to_string()),
            ),
        },
        Ok(_) => (
            "fail",
            format!("{} is not a directory", root.display()),
            None,
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => (
            "warn",
            format!("{} does not exist yet", root.display()),
            Some("serve creates it on startup".to_owned()),
        ),
        Err(err) => (
            "fail",
            format!("cannot use {}", root.display()),
            Some(err.to_string()),
        ),
    };
    DoctorCheck {
        id: "workspace.root".to_owned(),
        status: status.to_owned(),
        message,
        detail,
    }
}

fn print_doctor_report(report: &DoctorReport, json_output: bool) {
    if json_output {
        println!(
            "{}",
            serde_json::to_string_pretty(report)
                .unwrap_or_else(|_| "{\"ok\":false,\"checks\":[]}".to_owned())
        );
        return;
    }

    println!("doctor: {}", if report.ok { "ok" } else { "issues" });
    for check in &report.checks {
        let detail = check
            .detail
            .as_deref()
            .map(|value| format!(" ({value})"))
            .unwrap_or_default();
        println!(
            "[{}] {}: {}{}",
            check.status.to_uppercase(),
            check.id,
            check.message,
            detail
        );
    }
}

/// A binary that does not answer within `wait` counts as unavailable and is
/// killed when the child handle drops.
async fn command_available(program: &str, version_arg: &str, wait: Duration) -> bool {
    let child = Command::new(program)
        .arg(version_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();
    let Ok(mut child) = child else {
        return false;
    };
    let waited = tokio::time::timeout(wait, child.wait()).await;
    match waited {
        Ok(Ok(status)) => status.success(),
        Ok(Err(_)) => false,
        Err(_) => {
            let _ = child.start_kill();
            false
        }
    }
}

/// stdout carries the protocol, so logs always go to stderr.
fn init_logging(filter: &str) -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::tests::temp_path;

    #[test]
    fn cli_defaults_to_serve() {
        let cli = Cli::parse_from(["apktool-mcp"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log, "info");
    }

    #[test]
    fn cli_parses_doctor_command_and_global_overrides() {
        let cli = Cli::parse_from([
            "apktool-mcp",
            "doctor",
            "--json",
            "--workspace",
            "/srv/apks",
            "--apktool",
            "/opt/apktool/apktool",
        ]);
        match cli.command {
            Some(CliCommand::Doctor(args)) => assert!(args.json),
            _ => panic!("expected doctor command"),
        }
        assert_eq!(cli.workspace.as_deref(), Some(Path::new("/srv/apks")));
        assert_eq!(cli.apktool.as_deref(), Some("/opt/apktool/apktool"));
    }

    #[test]
    fn doctor_report_marks_config_load_failure_as_blocking() {
        let report = build_doctor_report(
            Err("invalid config".to_owned()),
            Path::new("apktool-mcp.toml"),
            ToolAvailability::default(),
        );
        assert!(!report.ok);
        assert!(report
            .checks
            .iter()
            .any(|check| check.id == "config.load" && check.status == "fail"));
    }

    #[test]
    fn doctor_report_fails_without_apktool_but_only_warns_for_aapt() {
        let mut cfg = Config::default();
        cfg.workspace.root = temp_path("doctor");
        std::fs::create_dir_all(&cfg.workspace.root).expect("workspace");
        let report = build_doctor_report(
            Ok(cfg.clone()),
            Path::new("apktool-mcp.toml"),
            ToolAvailability {
                apktool: false,
                aapt: false,
                java: true,
            },
        );
        assert!(!report.ok);
        assert!(report
            .checks
            .iter()
            .any(|check| check.id == "toolchain.aapt" && check.status == "warn"));

        let report = build_doctor_report(
            Ok(cfg),
            Path::new("apktool-mcp.toml"),
            ToolAvailability {
                apktool: true,
                aapt: false,
                java: true,
            },
        );
        assert!(report.ok);
        assert!(report
            .checks
            .iter()
            .any(|check| check.id == "workspace.root" && check.status == "pass"));
    }

    #[test]
    fn doctor_leaves_a_missing_workspace_root_alone() {
        let mut cfg = Config::default();
        cfg.workspace.root = temp_path("doctor-missing");
        let report = build_doctor_report(
            Ok(cfg.clone()),
            Path::new("apktool-mcp.toml"),
            ToolAvailability {
                apktool: true,
                aapt: true,
                java: true,
            },
        );
        assert!(report.ok);
        assert!(report
            .checks
            .iter()
            .any(|check| check.id == "workspace.root" && check.status == "warn"));
        assert!(!cfg.workspace.root.exists());
    }

    #[test]
    fn doctor_fails_when_workspace_root_is_a_file() {
        let root = temp_path("doctor-file");
        std::fs::write(&root, "not a dir").expect("file");
        let check = workspace_check(&root);
        assert_eq!(check.status, "fail");
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        assert!(
            !command_available(
                "/nonexistent/apktool-mcp-test-binary",
                "--version",
                Duration::from_secs(1)
            )
            .await
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hanging_binary_is_unavailable_after_the_wait() {
        use std::os::unix::fs::PermissionsExt;

        let dir = temp_path("doctor-hang");
        std::fs::create_dir_all(&dir).expect("dir");
        let script = dir.join("apktool");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").expect("script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).expect("chmod");

        let started = std::time::Instant::now();
        let available = command_available(
            &script.to_string_lossy(),
            "--version",
            Duration::from_millis(200),
        )
        .await;
        assert!(!available);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
