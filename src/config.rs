use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default = "default_apktool_path")]
    pub apktool_path: String,
    #[serde(default = "default_aapt_path")]
    pub aapt_path: String,
    #[serde(default = "default_java_path")]
    pub java_path: String,
    /// Where `apktool if` stores frameworks; apktool's own default when unset.
    #[serde(default)]
    pub framework_dir: Option<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            apktool_path: default_apktool_path(),
            aapt_path: default_aapt_path(),
            java_path: default_java_path(),
            framework_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_long_job_timeout_ms")]
    pub decode_timeout_ms: u64,
    #[serde(default = "default_long_job_timeout_ms")]
    pub build_timeout_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_timeout_grace_ms")]
    pub timeout_grace_ms: u64,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            decode_timeout_ms: default_long_job_timeout_ms(),
            build_timeout_ms: default_long_job_timeout_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            timeout_grace_ms: default_timeout_grace_ms(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_output_bytes: default_max_output_bytes(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl RuntimeConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_timeout_ms)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_millis(self.build_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn timeout_grace(&self) -> Duration {
        Duration::from_millis(self.timeout_grace_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed reading config file {}", path.display()))?;
            toml::from_str::<Config>(&text)
                .with_context(|| format!("failed parsing TOML config {}", path.display()))?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_cli_overrides(&mut self, workspace: Option<&Path>, apktool: Option<&str>) {
        if let Some(root) = workspace {
            self.workspace.root = root.to_path_buf();
        }
        if let Some(path) = apktool {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                self.toolchain.apktool_path = trimmed.to_owned();
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("APKTOOL_MCP_WORKSPACE") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                self.workspace.root = PathBuf::from(trimmed);
            }
        }
        if let Ok(v) = env::var("APKTOOL_MCP_APKTOOL_PATH") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                self.toolchain.apktool_path = trimmed.to_owned();
            }
        }
        if let Ok(v) = env::var("APKTOOL_MCP_AAPT_PATH") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                self.toolchain.aapt_path = trimmed.to_owned();
            }
        }
        if let Ok(v) = env::var("APKTOOL_MCP_JAVA_PATH") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                self.toolchain.java_path = trimmed.to_owned();
            }
        }
        if let Ok(v) = env::var("APKTOOL_MCP_FRAMEWORK_DIR") {
            let trimmed = v.trim();
            self.toolchain.framework_dir = if trimmed.is_empty() {
                None
            } else {
                Some(PathBuf::from(trimmed))
            };
        }
        if let Ok(v) = env::var("APKTOOL_MCP_DEFAULT_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.runtime.default_timeout_ms = n.max(100);
            }
        }
        if let Ok(v) = env::var("APKTOOL_MCP_DECODE_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.runtime.decode_timeout_ms = n.max(100);
            }
        }
        if let Ok(v) = env::var("APKTOOL_MCP_BUILD_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.runtime.build_timeout_ms = n.max(100);
            }
        }
        if let Ok(v) = env::var("APKTOOL_MCP_MAX_CONCURRENT_JOBS") {
            if let Ok(n) = v.parse::<usize>() {
                self.runtime.max_concurrent_jobs = n.max(1);
            }
        }
        if let Ok(v) = env::var("APKTOOL_MCP_MAX_OUTPUT_BYTES") {
            if let Ok(n) = v.parse::<usize>() {
                self.runtime.max_output_bytes = n.max(1024);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workspace.root.as_os_str().is_empty() {
            anyhow::bail!("workspace.root must not be empty");
        }
        if self.toolchain.apktool_path.trim().is_empty() {
            anyhow::bail!("toolchain.apktool_path must not be empty");
        }
        if self.toolchain.aapt_path.trim().is_empty() {
            anyhow::bail!("toolchain.aapt_path must not be empty");
        }
        if self.runtime.default_timeout_ms == 0 {
            anyhow::bail!("runtime.default_timeout_ms must be > 0");
        }
        if self.runtime.decode_timeout_ms == 0 {
            anyhow::bail!("runtime.decode_timeout_ms must be > 0");
        }
        if self.runtime.build_timeout_ms == 0 {
            anyhow::bail!("runtime.build_timeout_ms must be > 0");
        }
        if self.runtime.probe_timeout_ms == 0 {
            anyhow::bail!("runtime.probe_timeout_ms must be > 0");
        }
        if self.runtime.max_concurrent_jobs == 0 {
            anyhow::bail!("runtime.max_concurrent_jobs must be > 0");
        }
        if self.runtime.max_output_bytes == 0 {
            anyhow::bail!("runtime.max_output_bytes must be > 0");
        }
        if self.runtime.max_file_bytes == 0 {
            anyhow::bail!("runtime.max_file_bytes must be > 0");
        }
        Ok(())
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("./apktool-workspace")
}

fn default_apktool_path() -> String {
    "apktool".to_owned()
}

fn default_aapt_path() -> String {
    "aapt".to_owned()
}

fn default_java_path() -> String {
    "java".to_owned()
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_long_job_timeout_ms() -> u64 {
    600_000
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_timeout_grace_ms() -> u64 {
    5_000
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

fn default_max_file_bytes() -> u64 {
    4 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_remaining_fields_with_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[workspace]
root = "/srv/apks"

[runtime]
max_concurrent_jobs = 2
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.workspace.root, PathBuf::from("/srv/apks"));
        assert_eq!(cfg.runtime.max_concurrent_jobs, 2);
        assert_eq!(cfg.runtime.default_timeout_ms, 120_000);
        assert_eq!(cfg.toolchain.apktool_path, "apktool");
        assert!(cfg.toolchain.framework_dir.is_none());
        cfg.validate().expect("valid config");
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut cfg = Config::default();
        cfg.runtime.max_concurrent_jobs = 0;
        let err = cfg.validate().expect_err("zero workers must be rejected");
        assert!(err.to_string().contains("max_concurrent_jobs"));
    }

    #[test]
    fn cli_overrides_replace_workspace_and_apktool() {
        let mut cfg = Config::default();
        cfg.apply_cli_overrides(Some(Path::new("/tmp/ws")), Some(" /opt/apktool "));
        assert_eq!(cfg.workspace.root, PathBuf::from("/tmp/ws"));
        assert_eq!(cfg.toolchain.apktool_path, "/opt/apktool");

        cfg.apply_cli_overrides(None, Some("   "));
        assert_eq!(cfg.toolchain.apktool_path, "/opt/apktool");
    }
}
