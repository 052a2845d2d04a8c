//! The apktool tool catalog. Each handler turns validated [`ToolArgs`] into
//! its own argument struct first, then works only with resolved workspace
//! paths and the [`ApkToolchain`](crate::toolchain::ApkToolchain) capability.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use async_trait::async_trait;
use regex::RegexBuilder;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::scan::{self, StringResource};
use super::{run_blocking, ToolContext, ToolHandler, ToolOutput};
use crate::config::RuntimeConfig;
use crate::error::{ToolError, ToolErrorKind, ToolResult};
use crate::resources::{is_plain_component, ResourceKind, ResourceUri};
use crate::tool_registry::{ParamSpec, ToolArgs, ToolDescriptor, ToolRegistry};
use crate::toolchain::{ToolchainInvocation, ToolchainOperation, ToolchainRun};

const MAX_SMALI_RESULTS: usize = 5_000;
const HASH_CHUNK_BYTES: usize = 64 * 1024;

pub fn register_all(registry: &mut ToolRegistry) -> anyhow::Result<()> {
    registry.register(DecodeApk::descriptor(), Arc::new(DecodeApk))?;
    registry.register(BuildApk::descriptor(), Arc::new(BuildApk))?;
    registry.register(InstallFramework::descriptor(), Arc::new(InstallFramework))?;
    registry.register(AnalyzeManifest::descriptor(), Arc::new(AnalyzeManifest))?;
    registry.register(ExtractStrings::descriptor(), Arc::new(ExtractStrings))?;
    registry.register(ListPermissions::descriptor(), Arc::new(ListPermissions))?;
    registry.register(
        FindSmaliReferences::descriptor(),
        Arc::new(FindSmaliReferences),
    )?;
    registry.register(GetApkInfo::descriptor(), Arc::new(GetApkInfo))?;
    Ok(())
}

fn result_schema(properties: Value) -> Value {
    json!({ "type": "object", "properties": properties })
}

fn to_json<T: Serialize>(value: &T) -> ToolResult<Value> {
    serde_json::to_value(value).map_err(|err| {
        ToolError::new(
            ToolErrorKind::Internal,
            format!("failed encoding result: {err}"),
        )
    })
}

fn invocation(
    ctx: &ToolContext,
    operation: ToolchainOperation,
    timeout: Duration,
) -> ToolchainInvocation {
    ToolchainInvocation {
        operation,
        working_dir: ctx.workspace.root().to_path_buf(),
        timeout,
    }
}

fn with_tool_output(headline: String, tool_output: &str) -> String {
    let tool_output = tool_output.trim_end();
    if tool_output.is_empty() {
        headline
    } else {
        format!("{headline}\n\nOutput:\n{tool_output}")
    }
}

/// Re-checks a path derived from an already resolved directory so a symlink
/// planted inside a decoded tree cannot lead outside the root.
fn resolve_derived(ctx: &ToolContext, path: &Path) -> ToolResult<PathBuf> {
    ctx.workspace.resolve(&path.to_string_lossy())
}

async fn read_manifest(ctx: &ToolContext, decoded: &Path) -> ToolResult<(String, bool)> {
    let manifest = resolve_derived(ctx, &decoded.join(ResourceKind::Manifest.file_name()))?;
    if !manifest.is_file() {
        return Err(ToolError::not_found(format!(
            "AndroidManifest.xml not found in {}",
            ctx.workspace.display(decoded)
        )));
    }
    let limit = ctx.runtime.max_file_bytes;
    run_blocking("manifest read", move || scan::read_text_capped(&manifest, limit)).await
}

/// Resource URIs for a decoded directory sitting directly under the root.
fn resource_uris(ctx: &ToolContext, decoded: &Path) -> Vec<String> {
    let Some(name) = decoded
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| is_plain_component(name))
    else {
        return Vec::new();
    };
    if decoded.parent() != Some(ctx.workspace.root()) {
        return Vec::new();
    }
    ResourceKind::ALL
        .into_iter()
        .filter(|kind| decoded.join(kind.file_name()).is_file())
        .map(|kind| ResourceUri::new(name, kind).to_string())
        .collect()
}

pub struct DecodeApk;

struct DecodeArgs {
    apk_path: String,
    output_dir: Option<String>,
    force: bool,
    no_res: bool,
    no_src: bool,
}

impl DecodeArgs {
    fn from_args(args: &ToolArgs) -> ToolResult<Self> {
        Ok(Self {
            apk_path: args.string("apk_path")?,
            output_dir: args.opt_string("output_dir"),
            force: args.flag("force"),
            no_res: args.flag("no_res"),
            no_src: args.flag("no_src"),
        })
    }
}

impl DecodeApk {
    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "decode_apk",
            description: "Decompile an APK file to extract resources, manifest, and smali code",
            params: vec![
                ParamSpec::required_string(
                    "apk_path",
                    "Path to the APK file, relative to the workspace",
                ),
                ParamSpec::optional_string(
                    "output_dir",
                    "Output directory; a fresh directory named after the APK is allocated when omitted",
                ),
                ParamSpec::flag("force", "Overwrite an existing output directory", false),
                ParamSpec::flag("no_res", "Do not decode resources", false),
                ParamSpec::flag("no_src", "Do not decode sources", false),
            ],
            result: result_schema(json!({
                "outputDir": { "type": "string" },
                "allocated": { "type": "boolean" },
                "manifestPresent": { "type": "boolean" },
                "apktoolYmlPresent": { "type": "boolean" },
                "resources": { "type": "array", "items": { "type": "string" } },
                "toolOutput": { "type": "string" },
                "durationMs": { "type": "integer" },
                "pid": { "type": ["integer", "null"] },
            })),
        }
    }
}

#[async_trait]
impl ToolHandler for DecodeApk {
    async fn execute(&self, ctx: &ToolContext, args: ToolArgs) -> ToolResult<ToolOutput> {
        let args = DecodeArgs::from_args(&args)?;
        let apk = ctx.workspace.resolve_existing_file(&args.apk_path, "APK file")?;
        let (output, allocated) = match &args.output_dir {
            Some(raw) => {
                let output = ctx.workspace.resolve(raw)?;
                if output.as_path() == ctx.workspace.root() {
                    return Err(ToolError::schema(
                        "output_dir must name a directory below the workspace root",
                    ));
                }
                if apk.starts_with(&output) {
                    return Err(ToolError::schema(
                        "output_dir must not contain the APK being decoded",
                    ));
                }
                (output, false)
            }
            None => (ctx.workspace.create_job_dir(&apk_stem(&apk))?, true),
        };

        // An allocated directory already exists, so apktool needs -f.
        let operation = ToolchainOperation::Decode {
            apk: apk.clone(),
            output: output.clone(),
            force: args.force || allocated,
            no_resources: args.no_res,
            no_sources: args.no_src,
        };
        let run = ctx
            .toolchain
            .execute(invocation(ctx, operation, self.timeout(&ctx.runtime)))
            .await
            .and_then(ToolchainRun::into_success);
        let outcome = match run {
            Ok(outcome) => outcome,
            Err(err) => {
                if allocated {
                    ctx.workspace.cleanup(&output);
                }
                return Err(err);
            }
        };

        let output_dir = ctx.workspace.display(&output);
        let manifest_present = output.join(ResourceKind::Manifest.file_name()).is_file();
        let yml_present = output.join(ResourceKind::ApktoolYml.file_name()).is_file();
        let tool_output = outcome.aggregated();
        info!(
            "decoded {} into {output_dir} in {}ms",
            ctx.workspace.display(&apk),
            outcome.duration_ms
        );

        Ok(ToolOutput::new(
            with_tool_output(
                format!("Successfully decompiled APK to: {output_dir}"),
                &tool_output,
            ),
            json!({
                "outputDir": output_dir,
                "allocated": allocated,
                "manifestPresent": manifest_present,
                "apktoolYmlPresent": yml_present,
                "resources": resource_uris(ctx, &output),
                "toolOutput": tool_output,
                "durationMs": outcome.duration_ms,
                "truncated": outcome.truncated,
                "pid": outcome.pid,
            }),
        ))
    }

    fn timeout(&self, runtime: &RuntimeConfig) -> Duration {
        runtime.decode_timeout()
    }
}

fn apk_stem(apk: &Path) -> String {
    apk.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("apk")
        .to_owned()
}

pub struct BuildApk;

struct BuildArgs {
    source_dir: String,
    output_apk: Option<String>,
    force: bool,
}

impl BuildArgs {
    fn from_args(args: &ToolArgs) -> ToolResult<Self> {
        Ok(Self {
            source_dir: args.string("source_dir")?,
            output_apk: args.opt_string("output_apk"),
            force: args.flag("force"),
        })
    }
}

impl BuildApk {
    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "build_apk",
            description: "Rebuild an APK from a decompiled directory",
            params: vec![
                ParamSpec::required_string("source_dir", "Path to the decompiled APK directory"),
                ParamSpec::optional_string(
                    "output_apk",
                    "Output APK path (default: <source_dir>/dist/<name>.apk)",
                ),
                ParamSpec::flag(
                    "force",
                    "Skip apktool's change detection and rebuild everything",
                    false,
                ),
            ],
            result: result_schema(json!({
                "outputApk": { "type": "string" },
                "outputPresent": { "type": "boolean" },
                "toolOutput": { "type": "string" },
                "durationMs": { "type": "integer" },
                "pid": { "type": ["integer", "null"] },
            })),
        }
    }
}

#[async_trait]
impl ToolHandler for BuildApk {
    async fn execute(&self, ctx: &ToolContext, args: ToolArgs) -> ToolResult<ToolOutput> {
        let args = BuildArgs::from_args(&args)?;
        let source = ctx
            .workspace
            .resolve_existing_dir(&args.source_dir, "source directory")?;
        let output = args
            .output_apk
            .as_deref()
            .map(|raw| ctx.workspace.resolve(raw))
            .transpose()?;
        if let Some(parent) = output.as_deref().and_then(Path::parent) {
            std::fs::create_dir_all(parent).map_err(|err| {
                ToolError::io(format!("failed creating {}", ctx.workspace.display(parent)), err)
            })?;
        }
        let expected = output
            .clone()
            .unwrap_or_else(|| default_build_output(&source));

        let operation = ToolchainOperation::Build {
            source: source.clone(),
            output,
            force: args.force,
        };
        let outcome = ctx
            .toolchain
            .execute(invocation(ctx, operation, self.timeout(&ctx.runtime)))
            .await
            .and_then(ToolchainRun::into_success)?;

        let output_apk = ctx.workspace.display(&expected);
        let tool_output = outcome.aggregated();
        info!(
            "built {} from {} in {}ms",
            output_apk,
            ctx.workspace.display(&source),
            outcome.duration_ms
        );
        Ok(ToolOutput::new(
            with_tool_output(format!("Successfully built APK: {output_apk}"), &tool_output),
            json!({
                "outputApk": output_apk,
                "outputPresent": expected.is_file(),
                "toolOutput": tool_output,
                "durationMs": outcome.duration_ms,
                "truncated": outcome.truncated,
                "pid": outcome.pid,
            }),
        ))
    }

    fn timeout(&self, runtime: &RuntimeConfig) -> Duration {
        runtime.build_timeout()
    }
}

fn default_build_output(source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("app");
    source.join("dist").join(format!("{name}.apk"))
}

pub struct InstallFramework;

struct InstallFrameworkArgs {
    framework_apk: String,
    framework_id: Option<String>,
}

impl InstallFrameworkArgs {
    fn from_args(args: &ToolArgs) -> ToolResult<Self> {
        let framework_id = args.opt_string("framework_id");
        if let Some(tag) = &framework_id {
            if !is_plain_component(tag) {
                return Err(ToolError::schema(format!(
                    "framework_id `{tag}` may only contain letters, digits, `-`, `_` and `.`"
                )));
            }
        }
        Ok(Self {
            framework_apk: args.string("framework_apk")?,
            framework_id,
        })
    }
}

impl InstallFramework {
    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "install_framework",
            description: "Install a framework APK for decoding system or OEM apps",
            params: vec![
                ParamSpec::required_string("framework_apk", "Path to the framework APK"),
                ParamSpec::optional_string("framework_id", "Tag to store the framework under"),
            ],
            result: result_schema(json!({
                "framework": { "type": "string" },
                "frameworkId": { "type": ["string", "null"] },
                "toolOutput": { "type": "string" },
            })),
        }
    }
}

#[async_trait]
impl ToolHandler for InstallFramework {
    async fn execute(&self, ctx: &ToolContext, args: ToolArgs) -> ToolResult<ToolOutput> {
        let args = InstallFrameworkArgs::from_args(&args)?;
        let framework = ctx
            .workspace
            .resolve_existing_file(&args.framework_apk, "framework APK")?;
        let operation = ToolchainOperation::InstallFramework {
            framework: framework.clone(),
            tag: args.framework_id.clone(),
        };
        let outcome = ctx
            .toolchain
            .execute(invocation(ctx, operation, self.timeout(&ctx.runtime)))
            .await
            .and_then(ToolchainRun::into_success)?;

        let shown = ctx.workspace.display(&framework);
        let tool_output = outcome.aggregated();
        info!("installed framework {shown}");
        Ok(ToolOutput::new(
            with_tool_output(format!("Successfully installed framework: {shown}"), &tool_output),
            json!({
                "framework": shown,
                "frameworkId": args.framework_id,
                "toolOutput": tool_output,
                "durationMs": outcome.duration_ms,
            }),
        ))
    }
}

pub struct AnalyzeManifest;

struct DecodedDirArgs {
    decompiled_dir: String,
}

impl DecodedDirArgs {
    fn from_args(args: &ToolArgs) -> ToolResult<Self> {
        Ok(Self {
            decompiled_dir: args.string("decompiled_dir")?,
        })
    }

    fn resolve(&self, ctx: &ToolContext) -> ToolResult<PathBuf> {
        ctx.workspace
            .resolve_existing_dir(&self.decompiled_dir, "decompiled directory")
    }
}

fn decompiled_dir_param() -> ParamSpec {
    ParamSpec::required_string("decompiled_dir", "Path to the decompiled APK directory")
}

impl AnalyzeManifest {
    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "analyze_manifest",
            description: "Analyze AndroidManifest.xml for package, components, and permissions",
            params: vec![decompiled_dir_param()],
            result: result_schema(json!({
                "package": { "type": ["string", "null"] },
                "activities": { "type": "array", "items": { "type": "string" } },
                "services": { "type": "array", "items": { "type": "string" } },
                "receivers": { "type": "array", "items": { "type": "string" } },
                "providers": { "type": "array", "items": { "type": "string" } },
                "permissions": { "type": "array", "items": { "type": "string" } },
                "manifest": { "type": "string" },
            })),
        }
    }
}

#[async_trait]
impl ToolHandler for AnalyzeManifest {
    async fn execute(&self, ctx: &ToolContext, args: ToolArgs) -> ToolResult<ToolOutput> {
        let decoded = DecodedDirArgs::from_args(&args)?.resolve(ctx)?;
        let (manifest, truncated) = read_manifest(ctx, &decoded).await?;
        let summary = scan::analyze_manifest(&manifest);

        let mut text = String::from("Manifest Analysis:\n\n");
        if summary.is_empty() {
            text.push_str("No package, component, or permission declarations found.");
        } else {
            text.push_str(&summary.key_lines.join("\n"));
        }
        text.push_str("\n\nFull Manifest:\n");
        text.push_str(&manifest);

        let mut structured = to_json(&summary)?;
        structured["decompiledDir"] = json!(ctx.workspace.display(&decoded));
        structured["manifest"] = json!(manifest);
        structured["truncated"] = json!(truncated);
        Ok(ToolOutput::new(text, structured))
    }
}

pub struct ExtractStrings;

struct ExtractStringsArgs {
    decoded: DecodedDirArgs,
    locale: Option<String>,
}

impl ExtractStringsArgs {
    fn from_args(args: &ToolArgs) -> ToolResult<Self> {
        let locale = args.opt_string("locale");
        if let Some(locale) = &locale {
            let valid = locale
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '+' | '_'));
            if !valid {
                return Err(ToolError::schema(format!(
                    "locale `{locale}` is not a resource qualifier such as `fr` or `pt-rBR`"
                )));
            }
        }
        Ok(Self {
            decoded: DecodedDirArgs::from_args(args)?,
            locale,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StringFile {
    file: String,
    locale: String,
    count: usize,
    truncated: bool,
    strings: Vec<StringResource>,
    #[serde(skip)]
    content: String,
}

impl ExtractStrings {
    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "extract_strings",
            description: "Extract string resources from a decompiled APK",
            params: vec![
                decompiled_dir_param(),
                ParamSpec::optional_string(
                    "locale",
                    "Locale qualifier (e.g. 'en', 'es'); all values* directories when omitted",
                ),
            ],
            result: result_schema(json!({
                "locale": { "type": ["string", "null"] },
                "files": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file": { "type": "string" },
                            "locale": { "type": "string" },
                            "count": { "type": "integer" },
                            "strings": { "type": "array" },
                        },
                    },
                },
            })),
        }
    }
}

#[async_trait]
impl ToolHandler for ExtractStrings {
    async fn execute(&self, ctx: &ToolContext, args: ToolArgs) -> ToolResult<ToolOutput> {
        let args = ExtractStringsArgs::from_args(&args)?;
        let decoded = args.decoded.resolve(ctx)?;
        let res = resolve_derived(ctx, &decoded.join("res"))?;
        if !res.is_dir() {
            return Err(ToolError::not_found(format!(
                "resources directory not found: {}",
                ctx.workspace.display(&res)
            )));
        }

        let limit = ctx.runtime.max_file_bytes;
        let locale = args.locale.clone();
        let base = decoded.clone();
        let files = run_blocking("string extraction", move || {
            let mut files = Vec::new();
            for (qualifier, path) in scan::string_files(&res, locale.as_deref())? {
                let (content, truncated) = scan::read_text_capped(&path, limit)?;
                let strings = scan::parse_strings_xml(&content);
                files.push(StringFile {
                    file: scan::relative_display(&base, &path),
                    locale: qualifier,
                    count: strings.len(),
                    truncated,
                    strings,
                    content,
                });
            }
            Ok(files)
        })
        .await?;

        let text = if files.is_empty() {
            match &args.locale {
                Some(locale) => format!("No string files found for locale: {locale}"),
                None => "No string files found".to_owned(),
            }
        } else {
            files
                .iter()
                .map(|file| format!("=== {} ===\n{}", file.file, file.content.trim_end()))
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        debug!(
            "extracted {} string files from {}",
            files.len(),
            ctx.workspace.display(&decoded)
        );
        Ok(ToolOutput::new(
            text,
            json!({
                "decompiledDir": ctx.workspace.display(&decoded),
                "locale": args.locale,
                "files": to_json(&files)?,
            }),
        ))
    }
}

pub struct ListPermissions;

impl ListPermissions {
    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "list_permissions",
            description: "List all permissions requested by the APK",
            params: vec![decompiled_dir_param()],
            result: result_schema(json!({
                "count": { "type": "integer" },
                "permissions": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "dangerous": { "type": "boolean" },
                        },
                    },
                },
                "lines": { "type": "array", "items": { "type": "string" } },
            })),
        }
    }
}

#[async_trait]
impl ToolHandler for ListPermissions {
    async fn execute(&self, ctx: &ToolContext, args: ToolArgs) -> ToolResult<ToolOutput> {
        let decoded = DecodedDirArgs::from_args(&args)?.resolve(ctx)?;
        let (manifest, _) = read_manifest(ctx, &decoded).await?;
        let (permissions, lines) = scan::list_permissions(&manifest);

        let text = if permissions.is_empty() {
            "No permissions found in AndroidManifest.xml".to_owned()
        } else {
            let names = permissions
                .iter()
                .map(|entry| {
                    if entry.dangerous {
                        format!("{} (dangerous)", entry.name)
                    } else {
                        entry.name.clone()
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "Found {} permissions:\n\n{names}\n\nManifest lines:\n{}",
                permissions.len(),
                lines.join("\n")
            )
        };
        let dangerous = permissions.iter().filter(|entry| entry.dangerous).count();
        Ok(ToolOutput::new(
            text,
            json!({
                "decompiledDir": ctx.workspace.display(&decoded),
                "count": permissions.len(),
                "dangerousCount": dangerous,
                "permissions": to_json(&permissions)?,
                "lines": lines,
            }),
        ))
    }
}

pub struct FindSmaliReferences;

struct FindSmaliArgs {
    decoded: DecodedDirArgs,
    pattern: String,
    case_sensitive: bool,
    regex: bool,
    max_results: usize,
}

impl FindSmaliArgs {
    fn from_args(args: &ToolArgs) -> ToolResult<Self> {
        let max_results = args
            .integer("max_results")
            .and_then(|value| usize::try_from(value).ok())
            .unwrap_or(50)
            .min(MAX_SMALI_RESULTS);
        Ok(Self {
            decoded: DecodedDirArgs::from_args(args)?,
            pattern: args.string("pattern")?,
            case_sensitive: args.flag("case_sensitive"),
            regex: args.flag("regex"),
            max_results,
        })
    }
}

impl FindSmaliReferences {
    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "find_smali_references",
            description: "Search for specific patterns in smali code",
            params: vec![
                decompiled_dir_param(),
                ParamSpec::required_string(
                    "pattern",
                    "Text to search for (class names, method calls, strings)",
                ),
                ParamSpec::flag("case_sensitive", "Match case exactly", true),
                ParamSpec::flag("regex", "Treat the pattern as a regular expression", false),
                ParamSpec::integer("max_results", "Maximum number of matches to return", 50, 1),
            ],
            result: result_schema(json!({
                "totalMatches": { "type": "integer" },
                "truncated": { "type": "boolean" },
                "matches": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file": { "type": "string" },
                            "line": { "type": "integer" },
                            "text": { "type": "string" },
                        },
                    },
                },
            })),
        }
    }
}

#[async_trait]
impl ToolHandler for FindSmaliReferences {
    async fn execute(&self, ctx: &ToolContext, args: ToolArgs) -> ToolResult<ToolOutput> {
        let args = FindSmaliArgs::from_args(&args)?;
        let decoded = args.decoded.resolve(ctx)?;
        let source = if args.regex {
            args.pattern.clone()
        } else {
            regex::escape(&args.pattern)
        };
        let matcher = RegexBuilder::new(&source)
            .case_insensitive(!args.case_sensitive)
            .build()
            .map_err(|err| {
                ToolError::schema(format!("invalid pattern `{}`: {err}", args.pattern))
            })?;

        let root = decoded.clone();
        let max_results = args.max_results;
        let search =
            run_blocking("smali search", move || scan::search_smali(&root, &matcher, max_results))
                .await?;

        let text = if search.smali_dirs.is_empty() {
            format!(
                "No smali directories found in {}",
                ctx.workspace.display(&decoded)
            )
        } else if search.total_matches == 0 {
            format!("Pattern '{}' not found in smali code", args.pattern)
        } else {
            let mut text = format!(
                "Found {} matches for '{}':\n\n",
                search.total_matches, args.pattern
            );
            let lines = search
                .matches
                .iter()
                .map(|hit| format!("{}:{}: {}", hit.file, hit.line, hit.text))
                .collect::<Vec<_>>();
            text.push_str(&lines.join("\n"));
            if search.truncated() {
                text.push_str(&format!(
                    "\n\n(showing first {} of {})",
                    search.matches.len(),
                    search.total_matches
                ));
            }
            text
        };

        let mut structured = to_json(&search)?;
        structured["decompiledDir"] = json!(ctx.workspace.display(&decoded));
        structured["pattern"] = json!(args.pattern);
        structured["truncated"] = json!(search.truncated());
        Ok(ToolOutput::new(text, structured))
    }
}

pub struct GetApkInfo;

struct ApkInfoArgs {
    apk_path: String,
}

impl ApkInfoArgs {
    fn from_args(args: &ToolArgs) -> ToolResult<Self> {
        Ok(Self {
            apk_path: args.string("apk_path")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileFacts {
    size_bytes: u64,
    modified_unix: Option<u64>,
    sha256: String,
}

fn file_facts(path: &Path) -> ToolResult<FileFacts> {
    let metadata = std::fs::metadata(path)
        .map_err(|err| {
            ToolError::io(format!("failed reading metadata of {}", path.display()), err)
        })?;
    let modified_unix = metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs());

    let mut file = std::fs::File::open(path)
        .map_err(|err| ToolError::io(format!("failed opening {}", path.display()), err))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; HASH_CHUNK_BYTES];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| ToolError::io(format!("failed hashing {}", path.display()), err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let digest = hasher.finalize();

    Ok(FileFacts {
        size_bytes: metadata.len(),
        modified_unix,
        sha256: format!("{digest:x}"),
    })
}

impl GetApkInfo {
    fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "get_apk_info",
            description: "Get basic information about an APK file",
            params: vec![ParamSpec::required_string("apk_path", "Path to the APK file")],
            result: result_schema(json!({
                "source": { "type": "string", "enum": ["aapt", "file_metadata"] },
                "badging": { "type": "object" },
                "file": {
                    "type": "object",
                    "properties": {
                        "sizeBytes": { "type": "integer" },
                        "modifiedUnix": { "type": ["integer", "null"] },
                        "sha256": { "type": "string" },
                    },
                },
            })),
        }
    }
}

#[async_trait]
impl ToolHandler for GetApkInfo {
    async fn execute(&self, ctx: &ToolContext, args: ToolArgs) -> ToolResult<ToolOutput> {
        let args = ApkInfoArgs::from_args(&args)?;
        let apk = ctx.workspace.resolve_existing_file(&args.apk_path, "APK file")?;
        let shown = ctx.workspace.display(&apk);

        let operation = ToolchainOperation::Badging { apk: apk.clone() };
        let badging = match ctx
            .toolchain
            .execute(invocation(ctx, operation, self.timeout(&ctx.runtime)))
            .await
            .and_then(ToolchainRun::into_success)
        {
            Ok(outcome) => Ok(outcome.stdout),
            Err(err)
                if matches!(err.kind, ToolErrorKind::ExternalTool | ToolErrorKind::TimedOut) =>
            {
                debug!("badging unavailable for {shown}: {}", err.message);
                Err(err)
            }
            Err(err) => return Err(err),
        };

        let path = apk.clone();
        let facts = run_blocking("apk hashing", move || file_facts(&path)).await?;

        match badging {
            Ok(stdout) => Ok(ToolOutput::new(
                format!("APK Information:\n\n{}", stdout.trim_end()),
                json!({
                    "apk": shown,
                    "source": "aapt",
                    "badging": scan::parse_badging(&stdout),
                    "file": to_json(&facts)?,
                }),
            )),
            Err(err) => {
                let modified = facts
                    .modified_unix
                    .map(|secs| format!("{secs} (unix seconds)"))
                    .unwrap_or_else(|| "unknown".to_owned());
                Ok(ToolOutput::new(
                    format!(
                        "APK File Information:\n- Path: {shown}\n- Size: {} bytes\n- Modified: {modified}\n- SHA-256: {}\n\nNote: aapt not available for detailed analysis",
                        facts.size_bytes, facts.sha256
                    ),
                    json!({
                        "apk": shown,
                        "source": "file_metadata",
                        "file": to_json(&facts)?,
                        "aaptError": err.message,
                    }),
                ))
            }
        }
    }
}
