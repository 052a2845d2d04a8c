use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ToolError, ToolErrorKind, ToolResult};

const MAX_JOB_PREFIX_CHARS: usize = 64;
const MAX_JOB_SUFFIX: usize = 10_000;

/// Sandbox boundary for every path the server touches.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: &Path) -> ToolResult<Self> {
        std::fs::create_dir_all(root).map_err(|err| {
            ToolError::io(format!("failed creating workspace root {}", root.display()), err)
        })?;
        let root = root.canonicalize().map_err(|err| {
            ToolError::io(
                format!("failed canonicalizing workspace root {}", root.display()),
                err,
            )
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `raw` (relative to the root, or absolute) and rejects anything
    /// that lands outside the root, including through symlinks.
    pub fn resolve(&self, raw: &str) -> ToolResult<PathBuf> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ToolError::schema("path must be a non-empty string"));
        }

        let candidate = if Path::new(trimmed).is_absolute() {
            PathBuf::from(trimmed)
        } else {
            self.root.join(trimmed)
        };
        let resolved = canonicalize_with_missing_segments(&normalize_lexically(&candidate))?;
        if !resolved.starts_with(&self.root) {
            return Err(ToolError::new(
                ToolErrorKind::PathEscape,
                format!(
                    "path `{}` escapes workspace root {}",
                    raw,
                    self.root.display()
                ),
            ));
        }
        Ok(resolved)
    }

    pub fn resolve_existing_file(&self, raw: &str, label: &str) -> ToolResult<PathBuf> {
        let resolved = self.resolve(raw)?;
        if !resolved.is_file() {
            return Err(ToolError::not_found(format!(
                "{label} not found: {}",
                self.display(&resolved)
            )));
        }
        Ok(resolved)
    }

    pub fn resolve_existing_dir(&self, raw: &str, label: &str) -> ToolResult<PathBuf> {
        let resolved = self.resolve(raw)?;
        if !resolved.is_dir() {
            return Err(ToolError::not_found(format!(
                "{label} not found: {}",
                self.display(&resolved)
            )));
        }
        Ok(resolved)
    }

    /// True when `path` (after canonicalization) lies under the root.
    pub fn contains(&self, path: &Path) -> bool {
        canonicalize_with_missing_segments(&normalize_lexically(path))
            .map(|resolved| resolved.starts_with(&self.root))
            .unwrap_or(false)
    }

    /// Allocates a fresh directory directly under the root. `create_dir` is the
    /// arbiter between concurrent callers: whoever loses a name moves on to the
    /// next suffix.
    pub fn create_job_dir(&self, prefix: &str) -> ToolResult<PathBuf> {
        let base = sanitize_job_prefix(prefix);
        for attempt in 0..MAX_JOB_SUFFIX {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };
            let path = self.root.join(&name);
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    debug!("allocated job directory {}", path.display());
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(ToolError::io(
                        format!("failed creating job directory {}", path.display()),
                        err,
                    ))
                }
            }
        }
        Err(ToolError::new(
            ToolErrorKind::Io,
            format!("no free job directory name for prefix `{base}`"),
        ))
    }

    /// Best-effort recursive removal. Never removes the root or anything
    /// outside it; failures are only logged.
    pub fn cleanup(&self, path: &Path) -> bool {
        let Ok(resolved) = canonicalize_with_missing_segments(&normalize_lexically(path)) else {
            warn!("cleanup skipped, unresolvable path {}", path.display());
            return false;
        };
        if resolved == self.root || !resolved.starts_with(&self.root) {
            warn!(
                "cleanup refused for {} (outside job area of {})",
                resolved.display(),
                self.root.display()
            );
            return false;
        }
        if !resolved.exists() {
            return true;
        }
        match std::fs::remove_dir_all(&resolved) {
            Ok(()) => {
                debug!("removed job directory {}", resolved.display());
                true
            }
            Err(err) => {
                warn!("failed removing {}: {err}", resolved.display());
                false
            }
        }
    }

    /// Root-relative, `/`-separated rendering for results and messages.
    pub fn display(&self, path: &Path) -> String {
        if let Ok(relative) = path.strip_prefix(&self.root) {
            let text = relative.to_string_lossy().to_string();
            if text.is_empty() {
                ".".to_owned()
            } else {
                text.replace('\\', "/")
            }
        } else {
            path.display().to_string()
        }
    }
}

fn sanitize_job_prefix(prefix: &str) -> String {
    let cleaned = prefix
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .take(MAX_JOB_PREFIX_CHARS)
        .collect::<String>();
    let cleaned = cleaned.trim_start_matches('.').to_owned();
    if cleaned.is_empty() {
        "job".to_owned()
    } else {
        cleaned
    }
}

/// Folds `.` and `..` without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonicalize_with_missing_segments(path: &Path) -> ToolResult<PathBuf> {
    let mut cursor = path.to_path_buf();
    let mut missing = Vec::<OsString>::new();
    loop {
        if cursor.exists() {
            let mut resolved = cursor.canonicalize().map_err(|err| {
                ToolError::io(format!("failed canonicalizing path {}", cursor.display()), err)
            })?;
            for part in missing.iter().rev() {
                resolved.push(part);
            }
            return Ok(resolved);
        }

        let file_name = cursor.file_name().ok_or_else(|| {
            ToolError::new(
                ToolErrorKind::Io,
                format!("unable to resolve parent path for {}", path.display()),
            )
        })?;
        missing.push(file_name.to_os_string());
        cursor = cursor.parent().map(Path::to_path_buf).ok_or_else(|| {
            ToolError::new(
                ToolErrorKind::Io,
                format!("unable to resolve parent path for {}", path.display()),
            )
        })?;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    pub(crate) fn temp_path(tag: &str) -> PathBuf {
        let mut root = std::env::temp_dir();
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        root.push(format!("apktool-mcp-{tag}-{stamp}"));
        root
    }

    fn workspace(tag: &str) -> WorkspaceManager {
        WorkspaceManager::new(&temp_path(tag)).expect("workspace")
    }

    #[test]
    fn resolve_keeps_relative_paths_under_root() {
        let ws = workspace("resolve-rel");
        let resolved = ws.resolve("apps/sample.apk").expect("resolve");
        assert!(resolved.starts_with(ws.root()));
        assert_eq!(ws.display(&resolved), "apps/sample.apk");
        assert_eq!(ws.display(&ws.resolve(".").expect("root")), ".");
    }

    #[test]
    fn resolve_rejects_paths_outside_root() {
        let ws = workspace("resolve-escape");
        for raw in ["../outside.apk", "a/../../outside", "/etc/passwd", "./x/./../../.."] {
            let err = ws.resolve(raw).expect_err(raw);
            assert_eq!(err.kind, ToolErrorKind::PathEscape, "{raw}");
        }
    }

    #[test]
    fn resolve_rejects_empty_path_as_schema_error() {
        let ws = workspace("resolve-empty");
        let err = ws.resolve("   ").expect_err("empty path");
        assert_eq!(err.kind, ToolErrorKind::Schema);
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_leading_outside_root() {
        let ws = workspace("resolve-symlink");
        let outside = temp_path("resolve-symlink-target");
        std::fs::create_dir_all(&outside).expect("outside dir");
        std::os::unix::fs::symlink(&outside, ws.root().join("link")).expect("symlink");
        let err = ws.resolve("link/secret.txt").expect_err("symlink escape");
        assert_eq!(err.kind, ToolErrorKind::PathEscape);
    }

    #[test]
    fn resolve_existing_dir_reports_not_found() {
        let ws = workspace("resolve-missing");
        let err = ws
            .resolve_existing_dir("decoded", "decompiled directory")
            .expect_err("missing dir");
        assert_eq!(err.kind, ToolErrorKind::NotFound);
    }

    #[test]
    fn create_job_dir_appends_suffix_on_collision() {
        let ws = workspace("job-suffix");
        let first = ws.create_job_dir("sample").expect("first");
        let second = ws.create_job_dir("sample").expect("second");
        assert_eq!(ws.display(&first), "sample");
        assert_eq!(ws.display(&second), "sample-1");
    }

    #[test]
    fn create_job_dir_sanitizes_prefix() {
        let ws = workspace("job-sanitize");
        let dir = ws.create_job_dir("../evil name").expect("job dir");
        assert!(dir.starts_with(ws.root()));
        assert_eq!(ws.display(&dir), "_evil_name");
        let fallback = ws.create_job_dir("...").expect("fallback");
        assert_eq!(ws.display(&fallback), "job");
    }

    #[test]
    fn create_job_dir_is_collision_free_across_threads() {
        let ws = Arc::new(workspace("job-concurrent"));
        let handles = (0..16)
            .map(|_| {
                let ws = ws.clone();
                std::thread::spawn(move || ws.create_job_dir("app").expect("job dir"))
            })
            .collect::<Vec<_>>();
        let dirs = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect::<HashSet<_>>();
        assert_eq!(dirs.len(), 16);
        assert!(dirs.iter().all(|dir| dir.is_dir()));
    }

    #[test]
    fn cleanup_removes_job_dirs_but_never_the_root() {
        let ws = workspace("cleanup");
        let job = ws.create_job_dir("tmp").expect("job");
        std::fs::write(job.join("file.txt"), "x").expect("write");
        assert!(ws.cleanup(&job));
        assert!(!job.exists());
        assert!(!ws.cleanup(ws.root()));
        assert!(ws.root().exists());
        assert!(!ws.cleanup(Path::new("/")));
    }
}
