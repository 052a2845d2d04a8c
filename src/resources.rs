use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::error::{ToolError, ToolErrorKind, ToolResult};
use crate::tools::run_blocking;
use crate::workspace::WorkspaceManager;

pub const RESOURCE_SCHEME: &str = "apktool";
const RESOURCE_HOST: &str = "apk";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Manifest,
    ApktoolYml,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Manifest, ResourceKind::ApktoolYml];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manifest => "manifest",
            Self::ApktoolYml => "apktool_yml",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Manifest => "AndroidManifest.xml",
            Self::ApktoolYml => "apktool.yml",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Manifest => "application/xml",
            Self::ApktoolYml => "application/yaml",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
    }
}

/// `apktool://apk/<apk_name>/<kind>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUri {
    pub apk: String,
    pub kind: ResourceKind,
}

impl ResourceUri {
    pub fn new(apk: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            apk: apk.into(),
            kind,
        }
    }

    pub fn parse(raw: &str) -> ToolResult<Self> {
        let unsupported = |reason: &str| {
            ToolError::new(
                ToolErrorKind::UnsupportedResource,
                format!("unsupported resource uri `{raw}`: {reason}"),
            )
        };

        if raw.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(unsupported("dot segments are not allowed"));
        }
        let url = Url::parse(raw).map_err(|err| unsupported(&err.to_string()))?;
        if url.scheme() != RESOURCE_SCHEME {
            return Err(unsupported("expected the apktool scheme"));
        }
        if url.host_str() != Some(RESOURCE_HOST) {
            return Err(unsupported("expected apktool://apk/<name>/<kind>"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(unsupported("query and fragment are not allowed"));
        }

        let segments = url
            .path_segments()
            .map(|segments| segments.collect::<Vec<_>>())
            .unwrap_or_default();
        let [apk, kind] = segments.as_slice() else {
            return Err(unsupported("expected apktool://apk/<name>/<kind>"));
        };
        if !is_plain_component(apk) {
            return Err(unsupported("apk name must be a single plain path component"));
        }
        let kind = ResourceKind::parse(kind)
            .ok_or_else(|| unsupported("kind must be `manifest` or `apktool_yml`"))?;
        Ok(Self::new(*apk, kind))
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{RESOURCE_SCHEME}://{RESOURCE_HOST}/{}/{}",
            self.apk,
            self.kind.as_str()
        )
    }
}

/// Names that can appear verbatim in a resource URI and as one directory.
pub fn is_plain_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

pub struct ResourceProvider {
    workspace: Arc<WorkspaceManager>,
    max_file_bytes: u64,
}

impl ResourceProvider {
    pub fn new(workspace: Arc<WorkspaceManager>, max_file_bytes: u64) -> Self {
        Self {
            workspace,
            max_file_bytes,
        }
    }

    /// One manifest and one apktool.yml resource per decoded directory
    /// directly under the workspace root.
    pub async fn list(&self) -> ToolResult<Vec<ResourceDescriptor>> {
        let root = self.workspace.root().to_path_buf();
        let mut names = run_blocking("resource listing", move || {
            let entries = std::fs::read_dir(&root)
                .map_err(|err| ToolError::io(format!("failed listing {}", root.display()), err))?;
            Ok(entries
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().map(|ty| ty.is_dir()).unwrap_or(false))
                .filter_map(|entry| entry.file_name().into_string().ok())
                .filter(|name| is_plain_component(name))
                .filter(|name| {
                    let dir = root.join(name);
                    ResourceKind::ALL
                        .iter()
                        .any(|kind| dir.join(kind.file_name()).is_file())
                })
                .collect::<Vec<_>>())
        })
        .await?;
        names.sort();

        Ok(names
            .into_iter()
            .flat_map(|name| {
                ResourceKind::ALL.into_iter().map(move |kind| ResourceDescriptor {
                    uri: ResourceUri::new(name.clone(), kind).to_string(),
                    name: format!("{name} - {}", kind.file_name()),
                    description: format!("{} of the decoded `{name}` directory", kind.file_name()),
                    mime_type: kind.mime_type().to_owned(),
                })
            })
            .collect())
    }

    pub async fn read(&self, raw_uri: &str) -> ToolResult<ResourceContents> {
        let uri = ResourceUri::parse(raw_uri)?;
        let path = self.path_for(&uri)?;
        if !path.is_file() {
            return Err(ToolError::not_found(format!(
                "resource not found: {raw_uri} ({} does not exist)",
                self.workspace.display(&path)
            )));
        }
        let limit = self.max_file_bytes;
        let (text, truncated) = run_blocking("resource read", move || {
            crate::tools::read_text_capped(&path, limit)
        })
        .await?;
        if truncated {
            tracing::warn!("resource {raw_uri} truncated to {limit} bytes");
        }
        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: uri.kind.mime_type().to_owned(),
            text,
        })
    }

    fn path_for(&self, uri: &ResourceUri) -> ToolResult<PathBuf> {
        self.workspace
            .resolve(&format!("{}/{}", uri.apk, uri.kind.file_name()))
    }
}
