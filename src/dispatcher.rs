use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{ToolError, ToolErrorKind};
use crate::prompts::PromptCatalog;
use crate::protocol::{
    Request, Response, RpcError, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::resources::{ResourceKind, ResourceProvider, RESOURCE_SCHEME};
use crate::tool_registry::ToolRegistry;
use crate::tools::{ToolContext, ToolOutput};

pub const SERVER_NAME: &str = "apktool-mcp";
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Received,
    Validated,
    Executing,
    Succeeded,
    Failed,
    TimedOut,
    Responded,
}

impl CallState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Executing => "executing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Responded => "responded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    TimedOut,
    Failed,
}

/// Bookkeeping for one `tools/call`, owned by the dispatcher for the call's
/// lifetime only.
#[derive(Debug)]
struct JobHandle {
    call_id: String,
    tool: String,
    workspace_path: Option<String>,
    pid: Option<u32>,
    started: Instant,
    deadline: Option<Instant>,
    status: JobStatus,
    state: CallState,
}

impl JobHandle {
    fn new(call_id: String, tool: String) -> Self {
        debug!("call {call_id} `{tool}`: received");
        Self {
            call_id,
            tool,
            workspace_path: None,
            pid: None,
            started: Instant::now(),
            deadline: None,
            status: JobStatus::Pending,
            state: CallState::Received,
        }
    }

    fn transition(&mut self, next: CallState) {
        debug!(
            "call {} `{}`: {} -> {}",
            self.call_id,
            self.tool,
            self.state.as_str(),
            next.as_str()
        );
        self.state = next;
        self.status = match next {
            CallState::Received | CallState::Validated => JobStatus::Pending,
            CallState::Executing => JobStatus::Running,
            CallState::Succeeded => JobStatus::Completed,
            CallState::Failed => JobStatus::Failed,
            CallState::TimedOut => JobStatus::TimedOut,
            CallState::Responded => self.status,
        };
    }

    fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    fn succeed(mut self, output: ToolOutput) -> Value {
        self.workspace_path = output
            .structured
            .get("outputDir")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);
        self.pid = output
            .structured
            .get("pid")
            .and_then(Value::as_u64)
            .and_then(|pid| u32::try_from(pid).ok());
        self.transition(CallState::Succeeded);
        let location = self
            .workspace_path
            .as_deref()
            .map(|path| format!(" ({path})"))
            .unwrap_or_default();
        let process = self.pid.map(|pid| format!(" pid={pid}")).unwrap_or_default();
        info!(
            "call {} `{}` succeeded in {}ms{location}{process}",
            self.call_id,
            self.tool,
            self.elapsed_ms()
        );
        self.transition(CallState::Responded);
        json!({
            "content": [{ "type": "text", "text": output.text }],
            "structuredContent": output.structured,
            "isError": false,
        })
    }

    fn fail(mut self, err: ToolError) -> Value {
        let next = if err.kind == ToolErrorKind::TimedOut {
            CallState::TimedOut
        } else {
            CallState::Failed
        };
        self.transition(next);
        let overran = self
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline);
        warn!(
            "call {} `{}` {} after {}ms{}: {err}",
            self.call_id,
            self.tool,
            next.as_str(),
            self.elapsed_ms(),
            if overran { " (past deadline)" } else { "" }
        );
        self.transition(CallState::Responded);
        tool_error_result(&err)
    }
}

pub fn tool_error_result(err: &ToolError) -> Value {
    json!({
        "content": [{ "type": "text", "text": err.to_string() }],
        "structuredContent": { "error": err.to_value() },
        "isError": true,
    })
}

/// Routes every protocol method. Shared behind an `Arc` by the transport,
/// which calls [`Dispatcher::handle`] from one task per request.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    resources: ResourceProvider,
    prompts: PromptCatalog,
    permits: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
}

impl Dispatcher {
    pub fn new(registry: ToolRegistry, ctx: ToolContext) -> Self {
        let resources = ResourceProvider::new(ctx.workspace.clone(), ctx.runtime.max_file_bytes);
        let permits = Arc::new(Semaphore::new(ctx.runtime.max_concurrent_jobs.max(1)));
        Self {
            registry: Arc::new(registry),
            ctx,
            resources,
            prompts: PromptCatalog::new(),
            permits,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    #[cfg(test)]
    pub fn workspace_root(&self) -> &std::path::Path {
        self.ctx.workspace.root()
    }

    /// `None` for notifications, which never get a response.
    pub async fn handle(&self, request: Request) -> Option<Response> {
        let Some(id) = request.id.clone() else {
            self.notification(&request);
            return None;
        };
        let outcome = match request.method.as_str() {
            "initialize" => self.initialize(&request),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(&id, &request).await,
            "resources/list" => self.list_resources().await,
            "resources/templates/list" => Ok(list_resource_templates()),
            "resources/read" => self.read_resource(&request).await,
            "prompts/list" => Ok(json!({ "prompts": self.prompts.list() })),
            "prompts/get" => self.get_prompt(&request),
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        };
        Some(match outcome {
            Ok(result) => Response::ok(id, result),
            Err(err) => {
                debug!("{} failed with {}: {}", request.method, err.code, err.message);
                Response::err(id, err)
            }
        })
    }

    fn notification(&self, request: &Request) {
        match request.method.as_str() {
            "notifications/initialized" => info!("client initialized"),
            "notifications/cancelled" => {
                debug!("ignoring cancellation notice {}", request.params)
            }
            other => debug!("ignoring notification {other}"),
        }
    }

    fn initialize(&self, request: &Request) -> Result<Value, RpcError> {
        let params = request.params_object()?;
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .filter(|version| !version.trim().is_empty())
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        if let Some(client) = params.get("clientInfo") {
            let client_name = client.get("name").and_then(Value::as_str).unwrap_or("unknown");
            let client_version = client.get("version").and_then(Value::as_str).unwrap_or("");
            info!("initialize from {client_name} {client_version} (protocol {protocol_version})");
        }
        Ok(json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "subscribe": false, "listChanged": false },
                "prompts": { "listChanged": false },
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "instructions": format!(
                "Wraps apktool. Paths are relative to the workspace root {}; decode an APK first, then inspect it with the analysis tools or read apktool://apk/<name>/manifest.",
                self.ctx.workspace.root().display()
            ),
        }))
    }

    fn list_tools(&self) -> Value {
        let tools = self
            .registry
            .list_descriptors()
            .into_iter()
            .map(|descriptor| descriptor.to_value())
            .collect::<Vec<_>>();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, id: &Value, request: &Request) -> Result<Value, RpcError> {
        let params = request.params_object()?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "tools/call requires a `name` string"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let call_id = id.to_string();
        let job = JobHandle::new(call_id.clone(), name.to_owned());
        if !self.in_flight.lock().await.insert(call_id.clone()) {
            return Ok(job.fail(ToolError::new(
                ToolErrorKind::DuplicateCall,
                format!("call id {call_id} is already in flight"),
            )));
        }
        let result = self.run_call(job, name, &arguments).await;
        self.in_flight.lock().await.remove(&call_id);
        Ok(result)
    }

    async fn run_call(&self, mut job: JobHandle, name: &str, arguments: &Value) -> Value {
        let args = match self.registry.validate(name, arguments) {
            Ok(args) => args,
            Err(err) => return job.fail(err),
        };
        let Some(handler) = self.registry.handler(name) else {
            return job.fail(ToolError::new(
                ToolErrorKind::UnknownTool,
                format!("unknown tool `{name}`"),
            ));
        };
        job.transition(CallState::Validated);

        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return job.fail(ToolError::new(
                    ToolErrorKind::Internal,
                    "worker pool is shut down",
                ))
            }
        };

        let budget = handler.timeout(&self.ctx.runtime) + self.ctx.runtime.timeout_grace();
        job.deadline = Some(Instant::now() + budget);
        job.transition(CallState::Executing);

        let ctx = self.ctx.clone();
        let task = tokio::spawn(async move { handler.execute(&ctx, args).await });
        let abort = task.abort_handle();
        match tokio::time::timeout(budget, task).await {
            Ok(Ok(Ok(output))) => job.succeed(output),
            Ok(Ok(Err(err))) => job.fail(err),
            Ok(Err(join_err)) if join_err.is_panic() => job.fail(ToolError::new(
                ToolErrorKind::Internal,
                format!("tool `{name}` panicked"),
            )),
            Ok(Err(join_err)) => job.fail(ToolError::new(
                ToolErrorKind::Internal,
                format!("tool `{name}` was cancelled: {join_err}"),
            )),
            Err(_) => {
                // Dropping the aborted task drops the child, and kill_on_drop reaps it.
                abort.abort();
                job.fail(ToolError::new(
                    ToolErrorKind::TimedOut,
                    format!(
                        "tool `{name}` exceeded its deadline of {}ms",
                        budget.as_millis()
                    ),
                ))
            }
        }
    }

    async fn list_resources(&self) -> Result<Value, RpcError> {
        let resources = self.resources.list().await?;
        Ok(json!({ "resources": resources }))
    }

    async fn read_resource(&self, request: &Request) -> Result<Value, RpcError> {
        let params = request.params_object()?;
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RpcError::new(INVALID_PARAMS, "resources/read requires a `uri` string")
            })?;
        let contents = self.resources.read(uri).await?;
        Ok(json!({ "contents": [contents] }))
    }

    fn get_prompt(&self, request: &Request) -> Result<Value, RpcError> {
        let params = request.params_object()?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "prompts/get requires a `name` string"))?;
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(RpcError::new(
                    INVALID_PARAMS,
                    "prompt arguments must be an object",
                ))
            }
        };
        let rendered = self.prompts.get(name, &arguments)?;
        serde_json::to_value(rendered)
            .map_err(|err| RpcError::new(INTERNAL_ERROR, format!("failed encoding prompt: {err}")))
    }
}

fn list_resource_templates() -> Value {
    let templates = ResourceKind::ALL
        .into_iter()
        .map(|kind| {
            json!({
                "uriTemplate": format!("{RESOURCE_SCHEME}://apk/{{apk_name}}/{}", kind.as_str()),
                "name": kind.file_name(),
                "mimeType": kind.mime_type(),
            })
        })
        .collect::<Vec<_>>();
    json!({ "resourceTemplates": templates })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::error::ToolResult;
    use crate::protocol::parse_line;
    use crate::tool_registry::{ParamSpec, ToolArgs, ToolDescriptor};
    use crate::tools::apk::tests::{context, FakeToolchain};
    use crate::tools::{build_registry, ToolHandler};

    fn dispatcher(tag: &str) -> (Dispatcher, Arc<FakeToolchain>) {
        let fake = Arc::new(FakeToolchain::default());
        let ctx = context(tag, fake.clone());
        (
            Dispatcher::new(build_registry().expect("registry"), ctx),
            fake,
        )
    }

    async fn send(dispatcher: &Dispatcher, line: &str) -> Response {
        let request = parse_line(line).expect("valid request");
        dispatcher.handle(request).await.expect("response")
    }

    fn result(response: Response) -> Value {
        assert!(response.error.is_none(), "unexpected error {:?}", response.error);
        response.result.expect("result")
    }

    #[tokio::test]
    async fn initialize_echoes_protocol_version() {
        let (dispatcher, _) = dispatcher("dispatch-init");
        let value = result(
            send(
                &dispatcher,
                r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","clientInfo":{"name":"inspector","version":"1"}}}"#,
            )
            .await,
        );
        assert_eq!(value["protocolVersion"], "2025-03-26");
        assert_eq!(value["serverInfo"]["name"], SERVER_NAME);
        assert!(value["capabilities"]["prompts"].is_object());

        let value =
            result(send(&dispatcher, r#"{"jsonrpc":"2.0","id":2,"method":"initialize"}"#).await);
        assert_eq!(value["protocolVersion"], DEFAULT_PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn notifications_get_no_response_and_unknown_methods_fail() {
        let (dispatcher, _) = dispatcher("dispatch-notify");
        let note =
            parse_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).expect("note");
        assert!(dispatcher.handle(note).await.is_none());

        let response =
            send(&dispatcher, r#"{"jsonrpc":"2.0","id":"x","method":"tools/delete"}"#).await;
        assert_eq!(response.error.expect("error").code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn tools_list_exposes_schemas() {
        let (dispatcher, _) = dispatcher("dispatch-list");
        let value =
            result(send(&dispatcher, r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).await);
        let tools = value["tools"].as_array().expect("tools");
        assert_eq!(tools.len(), 8);
        assert_eq!(tools[0]["name"], "decode_apk");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["apk_path"]));
        assert_eq!(tools[0]["inputSchema"]["additionalProperties"], false);
    }

    #[tokio::test]
    async fn schema_failures_are_tool_errors_without_spawning() {
        let (dispatcher, fake) = dispatcher("dispatch-schema");
        let value = result(
            send(
                &dispatcher,
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"decode_apk","arguments":{}}}"#,
            )
            .await,
        );
        assert_eq!(value["isError"], true);
        assert_eq!(value["structuredContent"]["error"]["kind"], "schema_error");
        assert!(value["content"][0]["text"]
            .as_str()
            .expect("text")
            .starts_with("schema_error: "));

        let value = result(
            send(
                &dispatcher,
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"explode_apk"}}"#,
            )
            .await,
        );
        assert_eq!(value["structuredContent"]["error"]["kind"], "unknown_tool");
        assert!(fake.operations().is_empty());

        let response = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"arguments":{}}}"#,
        )
        .await;
        assert_eq!(response.error.expect("error").code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn decode_then_read_resource_scenario() {
        let (dispatcher, _) = dispatcher("dispatch-scenario");
        std::fs::write(dispatcher.ctx.workspace.root().join("sample.apk"), "PK").expect("apk");

        let response = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":1,"method":"resources/read","params":{"uri":"apktool://apk/sample/apktool_yml"}}"#,
        )
        .await;
        let error = response.error.expect("not decoded yet");
        assert_eq!(error.code, -32002);

        let value = result(
            send(
                &dispatcher,
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"decode_apk","arguments":{"apk_path":"sample.apk"}}}"#,
            )
            .await,
        );
        assert_eq!(value["isError"], false);
        assert_eq!(value["structuredContent"]["outputDir"], "sample");

        let value = result(
            send(&dispatcher, r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#).await,
        );
        assert_eq!(value["resources"].as_array().expect("resources").len(), 2);

        let value = result(
            send(
                &dispatcher,
                r#"{"jsonrpc":"2.0","id":4,"method":"resources/read","params":{"uri":"apktool://apk/sample/apktool_yml"}}"#,
            )
            .await,
        );
        assert_eq!(value["contents"][0]["mimeType"], "application/yaml");
        assert_eq!(value["contents"][0]["text"], "version: 2.9.3\n");

        let response = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":5,"method":"resources/read","params":{"uri":"apktool://apk/sample/dex"}}"#,
        )
        .await;
        assert_eq!(response.error.expect("unsupported").code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn prompts_round_through_protocol() {
        let (dispatcher, _) = dispatcher("dispatch-prompts");
        let value = result(
            send(&dispatcher, r#"{"jsonrpc":"2.0","id":1,"method":"prompts/list"}"#).await,
        );
        assert_eq!(value["prompts"].as_array().expect("prompts").len(), 3);

        let value = result(
            send(
                &dispatcher,
                r#"{"jsonrpc":"2.0","id":2,"method":"prompts/get","params":{"name":"privacy_audit","arguments":{"apk_path":"app.apk"}}}"#,
            )
            .await,
        );
        assert_eq!(value["messages"][0]["role"], "user");

        let response = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":3,"method":"prompts/get","params":{"name":"nope"}}"#,
        )
        .await;
        assert_eq!(response.error.expect("error").code, -32002);
        let response = send(
            &dispatcher,
            r#"{"jsonrpc":"2.0","id":4,"method":"prompts/get","params":{"name":"privacy_audit"}}"#,
        )
        .await;
        assert_eq!(response.error.expect("error").code, INVALID_PARAMS);
    }

    struct Scripted {
        behaviour: Behaviour,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Sleep(Duration),
        Panic,
        Hang,
    }

    #[async_trait]
    impl ToolHandler for Scripted {
        async fn execute(&self, _ctx: &ToolContext, _args: ToolArgs) -> ToolResult<ToolOutput> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Sleep(delay) => tokio::time::sleep(delay).await,
                Behaviour::Panic => panic!("scripted handler failure"),
                Behaviour::Hang => tokio::time::sleep(Duration::from_secs(30)).await,
            }
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(ToolOutput::new("done", json!({})))
        }

        fn timeout(&self, _runtime: &RuntimeConfig) -> Duration {
            match self.behaviour {
                Behaviour::Hang => Duration::from_millis(20),
                _ => Duration::from_secs(5),
            }
        }
    }

    fn scripted_dispatcher(
        tag: &str,
        behaviour: Behaviour,
        max_jobs: usize,
    ) -> (Arc<Dispatcher>, Arc<AtomicUsize>) {
        let mut ctx = context(tag, Arc::new(FakeToolchain::default()));
        ctx.runtime = RuntimeConfig {
            max_concurrent_jobs: max_jobs,
            timeout_grace_ms: 30,
            ..RuntimeConfig::default()
        };
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDescriptor {
                    name: "scripted",
                    description: "test handler",
                    params: vec![ParamSpec::optional_string("note", "ignored")],
                    result: json!({ "type": "object" }),
                },
                Arc::new(Scripted {
                    behaviour,
                    running: Arc::new(AtomicUsize::new(0)),
                    peak: peak.clone(),
                }),
            )
            .expect("register");
        (Arc::new(Dispatcher::new(registry, ctx)), peak)
    }

    fn scripted_call(id: u32) -> String {
        format!(
            r#"{{"jsonrpc":"2.0","id":{id},"method":"tools/call","params":{{"name":"scripted"}}}}"#
        )
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error() {
        let (dispatcher, _) = scripted_dispatcher("dispatch-panic", Behaviour::Panic, 2);
        let value = result(send(&dispatcher, &scripted_call(1)).await);
        assert_eq!(value["isError"], true);
        assert_eq!(value["structuredContent"]["error"]["kind"], "internal_error");

        let value = result(send(&dispatcher, r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).await);
        assert_eq!(value, json!({}));
    }

    #[tokio::test]
    async fn outer_deadline_resolves_timed_out() {
        let (dispatcher, _) = scripted_dispatcher("dispatch-deadline", Behaviour::Hang, 2);
        let started = Instant::now();
        let value = result(send(&dispatcher, &scripted_call(1)).await);
        assert_eq!(value["structuredContent"]["error"]["kind"], "timed_out");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn duplicate_in_flight_call_id_is_rejected() {
        let (dispatcher, _) = scripted_dispatcher(
            "dispatch-duplicate",
            Behaviour::Sleep(Duration::from_millis(100)),
            2,
        );
        let first = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { send(&dispatcher, &scripted_call(9)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = result(send(&dispatcher, &scripted_call(9)).await);
        assert_eq!(second["structuredContent"]["error"]["kind"], "duplicate_call");

        let first = result(first.await.expect("join"));
        assert_eq!(first["isError"], false);

        let again = result(send(&dispatcher, &scripted_call(9)).await);
        assert_eq!(again["isError"], false);
    }

    #[tokio::test]
    async fn worker_pool_bounds_concurrent_handlers() {
        let (dispatcher, peak) =
            scripted_dispatcher("dispatch-pool", Behaviour::Sleep(Duration::from_millis(15)), 1);
        let handles = (1..=3)
            .map(|id| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { send(&dispatcher, &scripted_call(id)).await })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            let value = result(handle.await.expect("join"));
            assert_eq!(value["isError"], false);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
