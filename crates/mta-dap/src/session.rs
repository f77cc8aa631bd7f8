//! DAP request handling for one debug session.
//!
//! Requests are dispatched in arrival order from the request loop. Anything that talks to
//! the backend runs on its own task and answers the request when the backend does, so a slow
//! backend never stalls the request loop. Backend acknowledgements may therefore arrive in
//! any order relative to later requests and to poller ticks.

use std::ops::ControlFlow;
use std::sync::Arc;

use mta_config::BackendConfig;
use mta_debug_api::{BackendClient, ResourceInfo, ResumeMode};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::breakpoints::{Breakpoint, BreakpointRegistry};
use crate::context::ContextStore;
use crate::dap::codec::sanitize_json_error_message;
use crate::dap::messages::Request;
use crate::dap::sender::DapSender;
use crate::error::{AdapterError, AdapterResult};
use crate::handles::{ScopeKind, ScopeRef, VariableHandles};
use crate::paths::{file_name, PathTranslator};
use crate::poller::Poller;
use crate::schedule::ScheduledTask;

/// The only stack frame ever reported.
pub const FRAME_ID: i64 = 0;

/// What the request loop does after a request was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

fn to_backend_line(line: i64, lines_start_at1: bool) -> i64 {
    if lines_start_at1 {
        line.saturating_sub(1)
    } else {
        line
    }
}

fn to_client_line(line: i64, lines_start_at1: bool) -> i64 {
    if lines_start_at1 {
        line.saturating_add(1)
    } else {
        line
    }
}

fn arguments<T: DeserializeOwned + Default>(request: &Request) -> AdapterResult<T> {
    if request.arguments.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(request.arguments.clone()).map_err(|err| {
        AdapterError::invalid_arguments(
            &request.command,
            sanitize_json_error_message(&err.to_string()),
        )
    })
}

fn required<T>(request: &Request, value: Option<T>, name: &str) -> AdapterResult<T> {
    value.ok_or_else(|| AdapterError::invalid_arguments(&request.command, format!("{name} is required")))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InitializeArguments {
    lines_start_at1: Option<bool>,
    columns_start_at1: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LaunchArguments {
    serverpath: Option<String>,
    stop_on_entry: bool,
    trace: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SourceArguments {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SourceBreakpoint {
    line: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SetBreakpointsArguments {
    source: SourceArguments,
    breakpoints: Option<Vec<SourceBreakpoint>>,
    lines: Option<Vec<i64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ThreadArguments {
    thread_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ScopesArguments {
    frame_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VariablesArguments {
    variables_reference: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EvaluateArguments {
    expression: Option<String>,
}

struct LaunchState {
    server_path: String,
    entry_mode: ResumeMode,
    /// Answered once the first context has attached and resumed.
    pending_response: Option<Request>,
}

struct SessionState {
    lines_start_at1: bool,
    columns_start_at1: bool,
    breakpoints: BreakpointRegistry,
    handles: VariableHandles,
    paths: Option<PathTranslator>,
    resource_name: Option<String>,
    launch: Option<LaunchState>,
    initialized_sent: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            lines_start_at1: true,
            columns_start_at1: true,
            breakpoints: BreakpointRegistry::default(),
            handles: VariableHandles::default(),
            paths: None,
            resource_name: None,
            launch: None,
            initialized_sent: false,
        }
    }
}

#[derive(Default)]
struct SessionTasks {
    attach: Vec<ScheduledTask>,
    poller: Option<ScheduledTask>,
    shut_down: bool,
}

pub struct Session {
    config: BackendConfig,
    client: BackendClient,
    sender: DapSender,
    contexts: Arc<Mutex<ContextStore>>,
    state: Mutex<SessionState>,
    tasks: Mutex<SessionTasks>,
    /// Serializes backend breakpoint syncs so a global clear never races another sync.
    breakpoint_sync: tokio::sync::Mutex<()>,
}

impl Session {
    pub fn new(config: BackendConfig, sender: DapSender) -> AdapterResult<Arc<Self>> {
        let client = BackendClient::new(config.url.clone(), config.request_timeout())?;
        let contexts = Arc::new(Mutex::new(ContextStore::new(config.contexts)));
        Ok(Arc::new(Self {
            config,
            client,
            sender,
            contexts,
            state: Mutex::new(SessionState::default()),
            tasks: Mutex::new(SessionTasks::default()),
            breakpoint_sync: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn handle(self: &Arc<Self>, request: Request) -> Flow {
        let result = match request.command.as_str() {
            "initialize" => self.initialize(&request),
            "launch" => self.launch(&request),
            "configurationDone" => {
                self.sender.respond(&request, None);
                Ok(())
            }
            "restart" => self.restart(&request),
            "setBreakpoints" => self.set_breakpoints(&request),
            "threads" => self.threads(&request),
            "stackTrace" => self.stack_trace(&request),
            "scopes" => self.scopes(&request),
            "variables" => self.variables(&request),
            "continue" => self.resume(&request, ResumeMode::Resume),
            "next" => self.resume(&request, ResumeMode::StepOver),
            "stepIn" => self.resume(&request, ResumeMode::StepInto),
            "evaluate" => self.evaluate(&request),
            "disconnect" | "terminate" => {
                self.shutdown();
                self.sender.respond(&request, None);
                self.sender.event("terminated", None);
                return if request.command == "disconnect" {
                    Flow::Exit
                } else {
                    Flow::Continue
                };
            }
            _ => {
                self.sender.send_response(
                    &request,
                    true,
                    None,
                    Some(format!("unhandled request {}", request.command)),
                );
                Ok(())
            }
        };

        if let Err(err) = result {
            tracing::debug!(target: "mta_dap", command = %request.command, error = %err, "request failed");
            self.sender.respond_error(&request, err.to_string());
        }
        Flow::Continue
    }

    /// Stops the attach loops and the poller. Later attach attempts are ignored.
    pub fn shutdown(&self) {
        let (attach, poller) = {
            let mut tasks = self.tasks.lock();
            tasks.shut_down = true;
            (std::mem::take(&mut tasks.attach), tasks.poller.take())
        };
        for task in attach.iter().chain(poller.iter()) {
            task.cancel();
        }
    }

    fn initialize(&self, request: &Request) -> AdapterResult<()> {
        let args: InitializeArguments = arguments(request)?;
        {
            let mut state = self.state.lock();
            state.lines_start_at1 = args.lines_start_at1.unwrap_or(true);
            state.columns_start_at1 = args.columns_start_at1.unwrap_or(true);
        }

        self.sender.respond(
            request,
            Some(json!({
                "supportsConfigurationDoneRequest": true,
                "supportsRestartRequest": true,
                "supportsTerminateRequest": true,
                "supportsEvaluateForHovers": false,
                "supportsSetVariable": false,
                "supportsStepBack": false,
                "supportsConditionalBreakpoints": false,
            })),
        );
        Ok(())
    }

    fn launch(self: &Arc<Self>, request: &Request) -> AdapterResult<()> {
        let args: LaunchArguments = arguments(request)?;
        let server_path = args.serverpath.filter(|path| !path.trim().is_empty());
        let server_path = required(request, server_path, "serverpath")?;
        let entry_mode = if args.stop_on_entry {
            ResumeMode::StepInto
        } else {
            ResumeMode::Resume
        };

        {
            let mut state = self.state.lock();
            if state.launch.is_some() {
                return Err(AdapterError::AlreadyLaunched);
            }
            state.launch = Some(LaunchState {
                server_path: server_path.clone(),
                entry_mode,
                pending_response: Some(request.clone()),
            });
        }
        self.sender.set_trace(args.trace);
        tracing::info!(
            target: "mta_dap",
            server_path = %server_path,
            stop_on_entry = args.stop_on_entry,
            "waiting for the backend to report the debugged resource"
        );

        let targets: Vec<i64> = self.contexts.lock().iter().map(|ctx| ctx.thread_id).collect();
        let loops: Vec<ScheduledTask> = targets
            .into_iter()
            .map(|thread_id| self.spawn_attach_loop(thread_id))
            .collect();

        let mut tasks = self.tasks.lock();
        if tasks.shut_down {
            return Ok(());
        }
        tasks.attach.extend(loops);
        Ok(())
    }

    /// Polls `get_info` for one context until the resource has started, then attaches.
    fn spawn_attach_loop(self: &Arc<Self>, thread_id: i64) -> ScheduledTask {
        let session = Arc::clone(self);
        ScheduledTask::every(self.config.launch_retry_interval(), move || {
            let session = session.clone();
            async move {
                let suffix = session.contexts.lock().get(thread_id).map(|ctx| ctx.suffix);
                let Some(suffix) = suffix else {
                    return ControlFlow::Break(());
                };
                match session.client.info(suffix).await {
                    Ok(info) if info.is_ready() => {
                        session.attach(thread_id, info).await;
                        ControlFlow::Break(())
                    }
                    Ok(_) => {
                        tracing::trace!(target: "mta_dap", thread_id, "resource not started yet");
                        ControlFlow::Continue(())
                    }
                    Err(err) if err.is_transient() => {
                        tracing::debug!(target: "mta_dap", thread_id, error = %err, "backend not reachable yet");
                        ControlFlow::Continue(())
                    }
                    Err(err) => {
                        tracing::warn!(target: "mta_dap", thread_id, error = %err, "unexpected resource info reply; retrying");
                        ControlFlow::Continue(())
                    }
                }
            }
        })
    }

    async fn attach(self: &Arc<Self>, thread_id: i64, info: ResourceInfo) {
        let resource_name = info.resource_name.unwrap_or_default();
        let resource_path = info.resource_path.unwrap_or_default();

        let attached = {
            let mut state = self.state.lock();
            match state.launch.as_ref() {
                Some(launch) => {
                    let entry_mode = launch.entry_mode;
                    let server_path = launch.server_path.clone();
                    let installed_paths = state.paths.is_none();
                    if installed_paths {
                        state.paths = Some(PathTranslator::new(
                            &server_path,
                            &self.config.resources_subdir,
                            &resource_path,
                        ));
                        state.resource_name = Some(resource_name.clone());
                    }
                    let send_initialized = !std::mem::replace(&mut state.initialized_sent, true);
                    Some((entry_mode, installed_paths, send_initialized))
                }
                None => None,
            }
        };
        let Some((entry_mode, installed_paths, send_initialized)) = attached else {
            return;
        };
        if self.tasks.lock().shut_down {
            return;
        }

        let context_name = self
            .contexts
            .lock()
            .get(thread_id)
            .map_or("Unknown", |ctx| ctx.name);
        tracing::info!(
            target: "mta_dap",
            thread_id,
            resource = %resource_name,
            resource_path = %resource_path,
            "attached to backend context"
        );

        self.ensure_poller();
        if send_initialized {
            self.sender.event("initialized", None);
        }
        self.sender.console(&format!(
            "Attached to {context_name} context of resource '{resource_name}'"
        ));
        if installed_paths {
            self.spawn_breakpoint_sync();
        }

        let suffix = self.contexts.lock().begin_command(thread_id);
        let Some(suffix) = suffix else {
            return;
        };
        let result = self.client.set_resume_mode(suffix, entry_mode).await;
        self.contexts.lock().finish_command(thread_id);

        let pending = self
            .state
            .lock()
            .launch
            .as_mut()
            .and_then(|launch| launch.pending_response.take());
        match (result, pending) {
            (Ok(()), Some(request)) => self.sender.respond(&request, None),
            (Ok(()), None) => {}
            (Err(err), Some(request)) => {
                tracing::warn!(target: "mta_dap", thread_id, error = %err, "post-attach resume failed");
                self.sender.respond_error(
                    &request,
                    format!("failed to resume the {context_name} context: {err}"),
                );
            }
            (Err(err), None) => {
                tracing::warn!(target: "mta_dap", thread_id, error = %err, "post-attach resume failed");
            }
        }
    }

    fn ensure_poller(&self) {
        let mut tasks = self.tasks.lock();
        if tasks.shut_down || tasks.poller.is_some() {
            return;
        }
        let poller = Poller::new(
            self.client.clone(),
            self.contexts.clone(),
            self.sender.clone(),
        );
        tasks.poller = Some(poller.spawn(self.config.poll_interval()));
    }

    fn spawn_breakpoint_sync(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.sync_breakpoints().await });
    }

    /// Replaces the backend's breakpoints with every breakpoint the registry holds.
    ///
    /// The backend only supports a global clear, so each sync re-sends all files.
    async fn sync_breakpoints(&self) {
        let _order = self.breakpoint_sync.lock().await;

        let plan: Option<Vec<(String, i64)>> = {
            let state = self.state.lock();
            state.paths.as_ref().map(|paths| {
                state
                    .breakpoints
                    .iter()
                    .map(|bp| {
                        (
                            paths.to_relative(&bp.source_path),
                            to_backend_line(bp.line, state.lines_start_at1),
                        )
                    })
                    .collect()
            })
        };
        let Some(plan) = plan else {
            return;
        };

        if let Err(err) = self.client.clear_breakpoints().await {
            tracing::warn!(target: "mta_dap", error = %err, "failed to clear backend breakpoints");
            return;
        }
        for (file, line) in &plan {
            if let Err(err) = self.client.set_breakpoint(file, *line).await {
                tracing::warn!(target: "mta_dap", file = %file, line, error = %err, "failed to set backend breakpoint");
            }
        }
        tracing::debug!(target: "mta_dap", count = plan.len(), "synced breakpoints to backend");
    }

    fn set_breakpoints(self: &Arc<Self>, request: &Request) -> AdapterResult<()> {
        let args: SetBreakpointsArguments = arguments(request)?;
        let source_path = args.source.path.filter(|path| !path.is_empty());
        let source_path = required(request, source_path, "source.path")?;
        let lines: Vec<i64> = match (args.breakpoints, args.lines) {
            (Some(breakpoints), _) => breakpoints.into_iter().map(|bp| bp.line).collect(),
            (None, Some(lines)) => lines,
            (None, None) => Vec::new(),
        };

        let (breakpoints, attached) = {
            let mut state = self.state.lock();
            let breakpoints = state.breakpoints.replace(&source_path, &lines);
            (breakpoints, state.paths.is_some())
        };
        let body: Vec<Value> = breakpoints.iter().map(Breakpoint::to_dap).collect();
        self.sender.respond(request, Some(json!({ "breakpoints": body })));

        if attached {
            self.spawn_breakpoint_sync();
        } else {
            tracing::debug!(target: "mta_dap", source = %source_path, "recorded breakpoints before attach");
        }
        Ok(())
    }

    fn threads(&self, request: &Request) -> AdapterResult<()> {
        let threads: Vec<Value> = self
            .contexts
            .lock()
            .iter()
            .map(|ctx| json!({ "id": ctx.thread_id, "name": ctx.name }))
            .collect();
        self.sender.respond(request, Some(json!({ "threads": threads })));
        Ok(())
    }

    /// One synthetic frame at the context's last pause location. Before the context has
    /// paused for the first time there is no location and the frame list is empty.
    fn stack_trace(&self, request: &Request) -> AdapterResult<()> {
        let args: ThreadArguments = arguments(request)?;
        let thread_id = required(request, args.thread_id, "threadId")?;
        let (paths, lines_start_at1, columns_start_at1) = {
            let state = self.state.lock();
            (
                state.paths.clone(),
                state.lines_start_at1,
                state.columns_start_at1,
            )
        };

        let column = if columns_start_at1 { 1 } else { 0 };

        let frames: Vec<Value> = {
            let mut contexts = self.contexts.lock();
            let ctx = contexts
                .get(thread_id)
                .ok_or(AdapterError::UnknownThread(thread_id))?;
            let frames = match (&ctx.current_file, ctx.current_line) {
                (Some(file), Some(line)) => {
                    let path = paths
                        .as_ref()
                        .map_or_else(|| file.clone(), |paths| paths.frame_path(file));
                    vec![json!({
                        "id": FRAME_ID,
                        "name": format!("Frame {FRAME_ID}"),
                        "source": { "name": file_name(&path), "path": path },
                        "line": to_client_line(line, lines_start_at1),
                        "column": column,
                    })]
                }
                _ => Vec::new(),
            };
            contexts.set_current_thread(thread_id);
            frames
        };

        let total = frames.len();
        self.sender.respond(
            request,
            Some(json!({ "stackFrames": frames, "totalFrames": total })),
        );
        Ok(())
    }

    fn scopes(&self, request: &Request) -> AdapterResult<()> {
        let args: ScopesArguments = arguments(request)?;
        let frame_id = args.frame_id.unwrap_or(FRAME_ID);

        let scopes: Vec<Value> = {
            let mut state = self.state.lock();
            ScopeKind::ALL
                .iter()
                .map(|&kind| {
                    let reference = state.handles.alloc(ScopeRef { kind, frame_id });
                    json!({
                        "name": kind.label(),
                        "variablesReference": reference,
                        "expensive": false,
                    })
                })
                .collect()
        };
        self.sender.respond(request, Some(json!({ "scopes": scopes })));
        Ok(())
    }

    fn variables(&self, request: &Request) -> AdapterResult<()> {
        let args: VariablesArguments = arguments(request)?;
        let reference = required(request, args.variables_reference, "variablesReference")?;
        let scope = self.state.lock().handles.get(reference).copied();
        let scope = scope.ok_or(AdapterError::UnknownVariablesReference(reference))?;

        // Resolved through the thread of the last stackTrace, not the scope's frame.
        let variables: Vec<Value> = self
            .contexts
            .lock()
            .current()
            .map(|ctx| {
                ctx.variables(scope.kind)
                    .iter()
                    .map(|(name, value)| {
                        json!({
                            "name": name,
                            "value": value.rendered(),
                            "type": value.type_name(),
                            "variablesReference": 0,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.sender
            .respond(request, Some(json!({ "variables": variables })));
        Ok(())
    }

    fn resume(self: &Arc<Self>, request: &Request, mode: ResumeMode) -> AdapterResult<()> {
        let args: ThreadArguments = arguments(request)?;
        let thread_id = required(request, args.thread_id, "threadId")?;
        let suffix = self.contexts.lock().begin_command(thread_id);
        let suffix = suffix.ok_or(AdapterError::UnknownThread(thread_id))?;
        tracing::debug!(target: "mta_dap", thread_id, ?mode, "setting resume mode");

        let session = Arc::clone(self);
        let request = request.clone();
        tokio::spawn(async move {
            let result = session.client.set_resume_mode(suffix, mode).await;
            session.contexts.lock().finish_command(thread_id);
            match result {
                Ok(()) => {
                    let body = (mode == ResumeMode::Resume)
                        .then(|| json!({ "allThreadsContinued": false }));
                    session.sender.respond(&request, body);
                }
                Err(err) => {
                    tracing::warn!(target: "mta_dap", thread_id, ?mode, error = %err, "failed to set resume mode");
                    session
                        .sender
                        .respond_error(&request, format!("failed to set resume mode: {err}"));
                }
            }
        });
        Ok(())
    }

    /// Submits the expression, waits the configured delay and reads the result once. When
    /// the result is not available by then, the request is left unanswered.
    fn evaluate(self: &Arc<Self>, request: &Request) -> AdapterResult<()> {
        let args: EvaluateArguments = arguments(request)?;
        let expression = required(request, args.expression, "expression")?;
        let delay = self.config.eval_result_delay();

        let session = Arc::clone(self);
        let request = request.clone();
        tokio::spawn(async move {
            if let Err(err) = session.client.set_pending_eval(&expression).await {
                tracing::warn!(target: "mta_dap", error = %err, "failed to submit expression");
            }
            tokio::time::sleep(delay).await;
            match session.client.eval_result().await {
                Ok(result) => session.sender.respond(
                    &request,
                    Some(json!({ "result": result, "variablesReference": 0 })),
                ),
                Err(err) => {
                    tracing::warn!(target: "mta_dap", error = %err, "evaluation result not available; dropping response");
                }
            }
        });
        Ok(())
    }

    fn restart(self: &Arc<Self>, request: &Request) -> AdapterResult<()> {
        let resource_name = self.state.lock().resource_name.clone();
        let resource_name = resource_name.ok_or(AdapterError::NotLaunched)?;

        let session = Arc::clone(self);
        let request = request.clone();
        tokio::spawn(async move {
            let command = format!("restart {resource_name}");
            match session.client.server_command(&command).await {
                Ok(()) => session.sender.respond(&request, None),
                Err(err) => {
                    tracing::warn!(target: "mta_dap", error = %err, "restart command failed");
                    session
                        .sender
                        .respond_error(&request, format!("failed to restart resource: {err}"));
                }
            }
        });
        Ok(())
    }
}
