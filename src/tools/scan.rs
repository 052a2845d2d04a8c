//! Text scanning over apktool's decoded output. Nothing here understands the
//! APK format itself; it only reads the files apktool wrote.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ToolError, ToolResult};

/// Runtime permissions Android classifies with protection level `dangerous`.
const DANGEROUS_PERMISSIONS: &[&str] = &[
    "android.permission.ACCESS_BACKGROUND_LOCATION",
    "android.permission.ACCESS_COARSE_LOCATION",
    "android.permission.ACCESS_FINE_LOCATION",
    "android.permission.ACCESS_MEDIA_LOCATION",
    "android.permission.ACTIVITY_RECOGNITION",
    "android.permission.ANSWER_PHONE_CALLS",
    "android.permission.BLUETOOTH_ADVERTISE",
    "android.permission.BLUETOOTH_CONNECT",
    "android.permission.BLUETOOTH_SCAN",
    "android.permission.BODY_SENSORS",
    "android.permission.BODY_SENSORS_BACKGROUND",
    "android.permission.CALL_PHONE",
    "android.permission.CAMERA",
    "android.permission.GET_ACCOUNTS",
    "android.permission.NEARBY_WIFI_DEVICES",
    "android.permission.POST_NOTIFICATIONS",
    "android.permission.PROCESS_OUTGOING_CALLS",
    "android.permission.READ_CALENDAR",
    "android.permission.READ_CALL_LOG",
    "android.permission.READ_CONTACTS",
    "android.permission.READ_EXTERNAL_STORAGE",
    "android.permission.READ_MEDIA_AUDIO",
    "android.permission.READ_MEDIA_IMAGES",
    "android.permission.READ_MEDIA_VIDEO",
    "android.permission.READ_PHONE_NUMBERS",
    "android.permission.READ_PHONE_STATE",
    "android.permission.READ_SMS",
    "android.permission.RECEIVE_MMS",
    "android.permission.RECEIVE_SMS",
    "android.permission.RECEIVE_WAP_PUSH",
    "android.permission.RECORD_AUDIO",
    "android.permission.SEND_SMS",
    "android.permission.USE_SIP",
    "android.permission.WRITE_CALENDAR",
    "android.permission.WRITE_CALL_LOG",
    "android.permission.WRITE_CONTACTS",
    "android.permission.WRITE_EXTERNAL_STORAGE",
];

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    pub package: Option<String>,
    pub version_code: Option<String>,
    pub version_name: Option<String>,
    pub activities: Vec<String>,
    pub services: Vec<String>,
    pub receivers: Vec<String>,
    pub providers: Vec<String>,
    pub permissions: Vec<String>,
    pub key_lines: Vec<String>,
}

impl ManifestSummary {
    pub fn is_empty(&self) -> bool {
        self.package.is_none()
            && self.activities.is_empty()
            && self.services.is_empty()
            && self.receivers.is_empty()
            && self.providers.is_empty()
            && self.permissions.is_empty()
    }
}

pub fn analyze_manifest(text: &str) -> ManifestSummary {
    let mut summary = ManifestSummary::default();
    for raw in text.lines() {
        let line = strip_xml_declaration(raw.trim());
        let Some(element) = element_name(line) else {
            continue;
        };
        let name = extract_attr(line, "android:name");
        match element {
            "manifest" => {
                summary.package = extract_attr(line, "package");
                summary.version_code = extract_attr(line, "android:versionCode");
                summary.version_name = extract_attr(line, "android:versionName");
                summary.key_lines.push(format!("Package: {line}"));
            }
            "activity" | "activity-alias" => {
                summary.activities.extend(name);
                summary.key_lines.push(format!("Activity: {line}"));
            }
            "service" => {
                summary.services.extend(name);
                summary.key_lines.push(format!("Service: {line}"));
            }
            "receiver" => {
                summary.receivers.extend(name);
                summary.key_lines.push(format!("Receiver: {line}"));
            }
            "provider" => {
                summary.providers.extend(name);
                summary.key_lines.push(format!("Provider: {line}"));
            }
            "uses-permission" | "uses-permission-sdk-23" => {
                summary.permissions.extend(name);
                summary.key_lines.push(format!("Permission: {line}"));
            }
            _ => {}
        }
    }
    summary
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    pub name: String,
    pub dangerous: bool,
}

/// `uses-permission` names in sorted order, plus the raw lines they came from.
pub fn list_permissions(text: &str) -> (Vec<PermissionEntry>, Vec<String>) {
    let mut names = BTreeSet::new();
    let mut lines = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if !line.contains("uses-permission") {
            continue;
        }
        lines.push(line.to_owned());
        if let Some(name) = extract_attr(line, "android:name") {
            names.insert(name);
        }
    }
    let entries = names
        .into_iter()
        .map(|name| PermissionEntry {
            dangerous: DANGEROUS_PERMISSIONS.contains(&name.as_str()),
            name,
        })
        .collect();
    (entries, lines)
}

#[derive(Debug, Clone, Serialize)]
pub struct StringResource {
    pub name: String,
    pub value: String,
}

pub fn parse_strings_xml(text: &str) -> Vec<StringResource> {
    let mut out = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if !line.starts_with("<string ") {
            continue;
        }
        let Some(name) = extract_attr(line, "name") else {
            continue;
        };
        let value = line
            .find('>')
            .map(|start| &line[start + 1..])
            .map(|rest| rest.strip_suffix("</string>").unwrap_or(rest))
            .filter(|_| !line.ends_with("/>"))
            .unwrap_or_default();
        out.push(StringResource {
            name,
            value: value.to_owned(),
        });
    }
    out
}

/// Picks the well-known fields out of `aapt dump badging` output.
pub fn parse_badging(text: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for raw in text.lines() {
        let line = raw.trim();
        if let Some(rest) = line.strip_prefix("package:") {
            for key in ["name", "versionCode", "versionName", "compileSdkVersion"] {
                if let Some(value) = extract_quoted(rest, key, '\'') {
                    let field = if key == "name" { "package" } else { key };
                    out.insert(field.to_owned(), Value::String(value));
                }
            }
            continue;
        }
        for (prefix, field) in [
            ("sdkVersion:", "minSdkVersion"),
            ("targetSdkVersion:", "targetSdkVersion"),
            ("application-label:", "label"),
            ("launchable-activity:", "launchableActivity"),
        ] {
            if let Some(rest) = line.strip_prefix(prefix) {
                let value = if field == "launchableActivity" {
                    extract_quoted(rest, "name", '\'')
                } else {
                    Some(rest.trim().trim_matches('\'').to_owned())
                };
                if let Some(value) = value.filter(|value| !value.is_empty()) {
                    out.insert(field.to_owned(), Value::String(value));
                }
            }
        }
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct SmaliMatch {
    pub file: String,
    pub line: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SmaliSearch {
    pub smali_dirs: Vec<String>,
    pub files_scanned: usize,
    pub total_matches: usize,
    pub matches: Vec<SmaliMatch>,
}

impl SmaliSearch {
    pub fn truncated(&self) -> bool {
        self.total_matches > self.matches.len()
    }
}

/// Scans every `smali*` directory of a decoded tree. Unreadable files are
/// skipped; matches beyond `max_results` are counted but not kept.
pub fn search_smali(
    decoded: &Path,
    matcher: &Regex,
    max_results: usize,
) -> ToolResult<SmaliSearch> {
    let mut search = SmaliSearch::default();
    let entries = std::fs::read_dir(decoded).map_err(|err| {
        ToolError::io(format!("failed listing {}", decoded.display()), err)
    })?;
    let mut roots = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|ty| ty.is_dir()))
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("smali"))
        })
        .collect::<Vec<_>>();
    roots.sort();

    for root in &roots {
        search.smali_dirs.push(relative_display(decoded, root));
        for file in collect_files_with_extension(root, "smali")? {
            let Ok(content) = std::fs::read_to_string(&file) else {
                continue;
            };
            search.files_scanned += 1;
            for (index, line) in content.lines().enumerate() {
                if !matcher.is_match(line) {
                    continue;
                }
                search.total_matches += 1;
                if search.matches.len() < max_results {
                    search.matches.push(SmaliMatch {
                        file: relative_display(decoded, &file),
                        line: index + 1,
                        text: line.trim().to_owned(),
                    });
                }
            }
        }
    }
    Ok(search)
}

fn collect_files_with_extension(root: &Path, extension: &str) -> ToolResult<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(&current)
            .map_err(|err| ToolError::io(format!("failed listing {}", current.display()), err))?;
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            if file_type.is_file()
                && path
                    .extension()
                    .and_then(|value| value.to_str())
                    .is_some_and(|value| value.eq_ignore_ascii_case(extension))
            {
                out.push(path);
            }
        }
    }

    out.sort();
    Ok(out)
}

/// `strings.xml` files under `res/values*` (or only `res/values-<locale>`),
/// sorted, with the locale each one belongs to. Symlinks are not followed.
pub fn string_files(res: &Path, locale: Option<&str>) -> ToolResult<Vec<(String, PathBuf)>> {
    let entries = std::fs::read_dir(res)
        .map_err(|err| ToolError::io(format!("failed listing {}", res.display()), err))?;
    let mut out = Vec::new();
    for entry in entries.filter_map(Result::ok) {
        if !entry.file_type().is_ok_and(|ty| ty.is_dir()) {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let qualifier = match name.strip_prefix("values") {
            Some("") => "default",
            Some(rest) => match rest.strip_prefix('-') {
                Some(rest) => rest,
                None => continue,
            },
            None => continue,
        };
        if locale.is_some_and(|wanted| wanted != qualifier) {
            continue;
        }
        let path = entry.path().join("strings.xml");
        if std::fs::symlink_metadata(&path).is_ok_and(|meta| meta.is_file()) {
            out.push((qualifier.to_owned(), path));
        }
    }
    out.sort_by(|left, right| left.1.cmp(&right.1));
    Ok(out)
}

/// Reads at most `limit` bytes of a UTF-8 (lossy) text file.
pub fn read_text_capped(path: &Path, limit: u64) -> ToolResult<(String, bool)> {
    let file = std::fs::File::open(path)
        .map_err(|err| ToolError::io(format!("failed opening {}", path.display()), err))?;
    let mut data = Vec::new();
    file.take(limit.saturating_add(1))
        .read_to_end(&mut data)
        .map_err(|err| ToolError::io(format!("failed reading {}", path.display()), err))?;
    let truncated = data.len() as u64 > limit;
    if truncated {
        data.truncate(limit as usize);
    }
    Ok((String::from_utf8_lossy(&data).to_string(), truncated))
}

pub fn relative_display(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// apktool writes the XML declaration and `<manifest>` on the same line.
fn strip_xml_declaration(line: &str) -> &str {
    match line.strip_prefix("<?") {
        Some(rest) => rest.find("?>").map(|end| rest[end + 2..].trim_start()).unwrap_or(""),
        None => line,
    }
}

fn element_name(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('<')?;
    if rest.starts_with('/') || rest.starts_with('?') || rest.starts_with('!') {
        return None;
    }
    let end = rest
        .find(|ch: char| ch.is_whitespace() || ch == '>' || ch == '/')
        .unwrap_or(rest.len());
    let name = &rest[..end];
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn extract_attr(line: &str, attr: &str) -> Option<String> {
    let mut search_from = 0;
    while let Some(offset) = line[search_from..].find(attr) {
        let start = search_from + offset;
        let preceded_ok = start == 0
            || line[..start]
                .chars()
                .next_back()
                .is_some_and(char::is_whitespace);
        let after = &line[start + attr.len()..];
        if preceded_ok {
            if let Some(value) = after.strip_prefix("=\"") {
                return value.find('"').map(|end| value[..end].to_owned());
            }
        }
        search_from = start + attr.len();
    }
    None
}

fn extract_quoted(text: &str, key: &str, quote: char) -> Option<String> {
    let marker = format!("{key}={quote}");
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find(&marker) {
        let start = search_from + offset;
        let preceded_ok = start == 0
            || text[..start]
                .chars()
                .next_back()
                .is_some_and(char::is_whitespace);
        if preceded_ok {
            let value = &text[start + marker.len()..];
            return value.find(quote).map(|end| value[..end].to_owned());
        }
        search_from = start + marker.len();
    }
    None
}
