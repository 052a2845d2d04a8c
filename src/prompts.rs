use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ToolError, ToolResult};

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PromptArgument {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    #[serde(skip)]
    pub default: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub arguments: &'static [PromptArgument],
    /// Body with `{argument}` substitution points.
    pub body: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedPrompt {
    pub description: String,
    pub messages: Vec<PromptMessage>,
}

const APK_PATH: PromptArgument = PromptArgument {
    name: "apk_path",
    description: "Path to the APK file inside the workspace",
    required: true,
    default: None,
};

const TEMPLATES: &[PromptTemplate] = &[
    PromptTemplate {
        name: "analyze_security",
        description: "Analyze an APK for potential security issues",
        arguments: &[APK_PATH],
        body: "Perform a thorough security review of the APK at {apk_path}.

Work through these steps:
1. Decompile it with decode_apk.
2. Inspect declared components and exported entry points with analyze_manifest.
3. Run list_permissions and call out the dangerous ones.
4. Use find_smali_references to look for:
   - cryptography usage (javax/crypto, weak modes such as ECB)
   - network calls and hard-coded endpoints
   - file system reads and writes
   - sensitive platform APIs
5. Search for embedded secrets such as API keys, tokens or credentials.
6. Assess the exposed components for exploitable behaviour.

Report:
- an overall risk level (Low, Medium or High)
- each finding with the evidence that supports it
- concrete mitigations
",
    },
    PromptTemplate {
        name: "privacy_audit",
        description: "Audit an APK for privacy-relevant permissions and data collection",
        arguments: &[APK_PATH],
        body: "Run a privacy audit of the APK at {apk_path}.

Cover the following:
1. Decompile it with decode_apk.
2. Enumerate requested permissions with list_permissions.
3. Trace data collection in the smali code with find_smali_references.
4. Identify bundled third-party SDKs (analytics, ads, crash reporting).
5. List network endpoints the app talks to.
6. Look for consent screens and privacy policy references in extract_strings output.

Produce a report describing:
- which kinds of personal data are collected
- what is shared with third parties
- how user consent is obtained
- notable gaps against GDPR and CCPA expectations
",
    },
    PromptTemplate {
        name: "reverse_engineer_guide",
        description: "Step-by-step guide for reverse engineering an APK",
        arguments: &[
            APK_PATH,
            PromptArgument {
                name: "target_feature",
                description: "Feature to focus the analysis on",
                required: false,
                default: Some("general functionality"),
            },
        ],
        body: "Write a reverse engineering guide for the APK at {apk_path}.
Focus: {target_feature}

Explain step by step how to:
1. Decompile the APK and get oriented in the output layout.
2. Read the app architecture out of AndroidManifest.xml.
3. Find the main components and entry points.
4. Locate and follow the smali code behind the focus area.
5. Use resources (strings, layouts, assets) as navigation aids.
6. Plan modifications, if any are needed.
7. Rebuild with build_apk and verify the result.

Name the exact apktool commands and the files worth opening at each step.
",
    },
];

/// Static prompt table; rendering is pure string substitution.
#[derive(Debug, Clone, Copy)]
pub struct PromptCatalog {
    templates: &'static [PromptTemplate],
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self {
            templates: TEMPLATES,
        }
    }
}

impl PromptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<Value> {
        self.templates
            .iter()
            .map(|template| {
                serde_json::json!({
                    "name": template.name,
                    "description": template.description,
                    "arguments": template.arguments,
                })
            })
            .collect()
    }

    pub fn get(&self, name: &str, arguments: &Map<String, Value>) -> ToolResult<RenderedPrompt> {
        let template = self
            .templates
            .iter()
            .find(|template| template.name == name)
            .ok_or_else(|| ToolError::not_found(format!("unknown prompt `{name}`")))?;

        let mut values = Vec::with_capacity(template.arguments.len());
        for argument in template.arguments {
            let provided = match arguments.get(argument.name) {
                None | Some(Value::Null) => None,
                Some(Value::String(value)) => Some(value.trim().to_owned()),
                Some(Value::Number(value)) => Some(value.to_string()),
                Some(Value::Bool(value)) => Some(value.to_string()),
                Some(_) => {
                    return Err(ToolError::schema(format!(
                        "prompt argument `{}` must be a string",
                        argument.name
                    )))
                }
            }
            .filter(|value| !value.is_empty());

            let value = match (provided, argument.default) {
                (Some(value), _) => value,
                (None, Some(default)) => default.to_owned(),
                (None, None) if argument.required => {
                    return Err(ToolError::schema(format!(
                        "missing required prompt argument `{}`",
                        argument.name
                    )))
                }
                (None, None) => String::new(),
            };
            values.push((argument.name, value));
        }
        let text = render(template.body, &values);

        Ok(RenderedPrompt {
            description: template.description.to_owned(),
            messages: vec![PromptMessage {
                role: "user",
                content: serde_json::json!({ "type": "text", "text": text }),
            }],
        })
    }
}

/// Single pass over `body`; substituted values are never scanned again.
fn render(body: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            values
                .iter()
                .find(|(name, _)| *name == &after[..close])
                .map(|(name, value)| (name.len(), value))
        });
        match value {
            Some((len, value)) => {
                out.push_str(value);
                rest = &after[len + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
