//! In-process stand-in for the backend, used by unit and integration tests.
//!
//! It serves the same endpoints as the real backend and keeps the state the script side
//! would normally fill in (resource info, pause snapshots, evaluation results), so tests
//! can drive a paused context without a running game server.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::types::ResumeMode;

/// Snapshot the script side reports when a context pauses.
#[derive(Debug, Clone, Default)]
pub struct MockSnapshot {
    /// File relative to the resources root, e.g. `debug/server.lua`.
    pub current_file: String,
    /// 0-based line.
    pub current_line: i64,
    pub local_variables: Map<String, Value>,
    pub upvalue_variables: Map<String, Value>,
    pub global_variables: Map<String, Value>,
}

impl MockSnapshot {
    pub fn at(current_file: impl Into<String>, current_line: i64) -> Self {
        Self {
            current_file: current_file.into(),
            current_line,
            ..Self::default()
        }
    }

    pub fn with_local(mut self, name: &str, value: Value) -> Self {
        self.local_variables.insert(name.to_owned(), value);
        self
    }

    pub fn with_upvalue(mut self, name: &str, value: Value) -> Self {
        self.upvalue_variables.insert(name.to_owned(), value);
        self
    }

    pub fn with_global(mut self, name: &str, value: Value) -> Self {
        self.global_variables.insert(name.to_owned(), value);
        self
    }

    /// Snapshot fields posted by the script side along with a `set_resume_mode` on pause.
    fn from_body(body: &Value) -> Option<Self> {
        let current_file = body.get("current_file")?.as_str()?.to_owned();
        let current_line = body.get("current_line")?.as_i64()?;
        let map = |key: &str| match body.get(key) {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        Some(Self {
            current_file,
            current_line,
            local_variables: map("local_variables"),
            upvalue_variables: map("upvalue_variables"),
            global_variables: map("global_variables"),
        })
    }
}

/// Breakpoint traffic in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointOp {
    Set { file: String, line: i64 },
    Remove { file: String, line: i64 },
    Clear,
}

#[derive(Debug, Default)]
struct ContextState {
    info: Option<(String, String)>,
    resume_mode: u8,
    snapshot: Option<MockSnapshot>,
    resume_mode_calls: Vec<ResumeMode>,
    info_requests: usize,
    resume_polls: usize,
}

#[derive(Debug, Default)]
struct State {
    contexts: HashMap<String, ContextState>,
    breakpoints: Vec<(String, i64)>,
    breakpoint_ops: Vec<BreakpointOp>,
    pending_eval: Option<String>,
    submitted_evals: Vec<String>,
    eval_result: Option<String>,
    commands: Vec<String>,
    unavailable: bool,
    failing: HashSet<String>,
}

impl State {
    fn context(&mut self, suffix: &str) -> &mut ContextState {
        self.contexts.entry(suffix.to_owned()).or_default()
    }
}

/// A tiny HTTP backend bound to an ephemeral localhost port.
///
/// Dropping it stops the server.
pub struct MockBackend {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    pub async fn spawn() -> io::Result<Self> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let state = Arc::new(Mutex::new(State::default()));
        let shutdown = CancellationToken::new();

        let svc_state = state.clone();
        let make_svc = make_service_fn(move |_conn| {
            let state = svc_state.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(state.clone(), req)))
            }
        });

        let server = Server::from_tcp(listener)
            .map_err(io::Error::other)?
            .serve(make_svc);
        let token = shutdown.clone();
        tokio::spawn(async move {
            let graceful = server.with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(err) = graceful.await {
                tracing::debug!(target: "mta_debug_api::mock", error = %err, "mock backend stopped");
            }
        });

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).expect("socket address forms a valid url")
    }

    /// Makes `get_info<suffix>` report a started resource.
    pub fn set_info(&self, suffix: &str, resource_name: &str, resource_path: &str) {
        self.state.lock().context(suffix).info =
            Some((resource_name.to_owned(), resource_path.to_owned()));
    }

    /// Simulates the script side pausing the context.
    pub fn pause(&self, suffix: &str, snapshot: MockSnapshot) {
        let mut state = self.state.lock();
        let ctx = state.context(suffix);
        ctx.resume_mode = ResumeMode::Paused.code();
        ctx.snapshot = Some(snapshot);
    }

    pub fn resume_mode(&self, suffix: &str) -> Option<ResumeMode> {
        let state = self.state.lock();
        let ctx = state.contexts.get(suffix)?;
        ResumeMode::try_from(ctx.resume_mode).ok()
    }

    /// Resume modes posted by the adapter for the context, oldest first.
    pub fn resume_mode_calls(&self, suffix: &str) -> Vec<ResumeMode> {
        self.state
            .lock()
            .contexts
            .get(suffix)
            .map(|ctx| ctx.resume_mode_calls.clone())
            .unwrap_or_default()
    }

    pub fn info_requests(&self, suffix: &str) -> usize {
        self.state
            .lock()
            .contexts
            .get(suffix)
            .map_or(0, |ctx| ctx.info_requests)
    }

    pub fn resume_polls(&self, suffix: &str) -> usize {
        self.state
            .lock()
            .contexts
            .get(suffix)
            .map_or(0, |ctx| ctx.resume_polls)
    }

    /// Breakpoints currently installed, in insertion order.
    pub fn breakpoints(&self) -> Vec<(String, i64)> {
        self.state.lock().breakpoints.clone()
    }

    pub fn breakpoint_ops(&self) -> Vec<BreakpointOp> {
        self.state.lock().breakpoint_ops.clone()
    }

    pub fn clear_breakpoint_calls(&self) -> usize {
        self.state
            .lock()
            .breakpoint_ops
            .iter()
            .filter(|op| matches!(op, BreakpointOp::Clear))
            .count()
    }

    /// Expressions posted through `set_pending_eval`, oldest first.
    pub fn submitted_evals(&self) -> Vec<String> {
        self.state.lock().submitted_evals.clone()
    }

    /// Value the next `get_eval_result` returns. It is consumed by that read.
    pub fn set_eval_result(&self, result: &str) {
        self.state.lock().eval_result = Some(result.to_owned());
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// While set, every endpoint replies `503 Service Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Makes one `/MTADebug/<endpoint>` reply `500 Internal Server Error` until reset.
    pub fn set_failing(&self, endpoint: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(endpoint.to_owned());
        } else {
            state.failing.remove(endpoint);
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn json_response(status: StatusCode, body: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn status_only(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Splits `get_info_server` into (`get_info`, `_server`).
fn split_suffix<'a>(endpoint: &'a str, name: &str) -> Option<&'a str> {
    let suffix = endpoint.strip_prefix(name)?;
    matches!(suffix, "" | "_server" | "_client").then_some(suffix)
}

async fn handle(state: Arc<Mutex<State>>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(_) => return Ok(status_only(StatusCode::BAD_REQUEST)),
    };
    let body: Value = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(_) => return Ok(status_only(StatusCode::BAD_REQUEST)),
        }
    };

    let mut state = state.lock();
    if state.unavailable {
        return Ok(status_only(StatusCode::SERVICE_UNAVAILABLE));
    }

    if path == "/MTAServer/command" && method == Method::POST {
        let Some(command) = body.get("command").and_then(Value::as_str) else {
            return Ok(status_only(StatusCode::BAD_REQUEST));
        };
        state.commands.push(command.to_owned());
        return Ok(json_response(StatusCode::OK, body));
    }

    let Some(endpoint) = path.strip_prefix("/MTADebug/") else {
        return Ok(status_only(StatusCode::NOT_FOUND));
    };
    if state.failing.contains(endpoint) {
        return Ok(status_only(StatusCode::INTERNAL_SERVER_ERROR));
    }

    let response = match (&method, endpoint) {
        (&Method::GET, ep) if split_suffix(ep, "get_info").is_some() => {
            let suffix = split_suffix(ep, "get_info").unwrap_or_default();
            let ctx = state.context(suffix);
            ctx.info_requests += 1;
            match &ctx.info {
                Some((name, path)) => json_response(
                    StatusCode::OK,
                    json!({"resource_name": name, "resource_path": path}),
                ),
                None => json_response(StatusCode::OK, json!({})),
            }
        }
        (&Method::POST, ep) if split_suffix(ep, "set_info").is_some() => {
            let suffix = split_suffix(ep, "set_info").unwrap_or_default();
            let name = body.get("resource_name").and_then(Value::as_str);
            let path = body.get("resource_path").and_then(Value::as_str);
            match (name, path) {
                (Some(name), Some(path)) => {
                    state.context(suffix).info = Some((name.to_owned(), path.to_owned()));
                    json_response(StatusCode::OK, body)
                }
                _ => status_only(StatusCode::BAD_REQUEST),
            }
        }
        (&Method::GET, ep) if split_suffix(ep, "get_resume_mode").is_some() => {
            let suffix = split_suffix(ep, "get_resume_mode").unwrap_or_default();
            let ctx = state.context(suffix);
            ctx.resume_polls += 1;
            let mut reply = json!({"resume_mode": ctx.resume_mode});
            if let Some(snapshot) = &ctx.snapshot {
                reply["current_file"] = json!(snapshot.current_file);
                reply["current_line"] = json!(snapshot.current_line);
                reply["local_variables"] = Value::Object(snapshot.local_variables.clone());
                reply["upvalue_variables"] = Value::Object(snapshot.upvalue_variables.clone());
                reply["global_variables"] = Value::Object(snapshot.global_variables.clone());
            }
            json_response(StatusCode::OK, reply)
        }
        (&Method::POST, ep) if split_suffix(ep, "set_resume_mode").is_some() => {
            let suffix = split_suffix(ep, "set_resume_mode").unwrap_or_default();
            let mode = body
                .get("resume_mode")
                .and_then(Value::as_u64)
                .and_then(|code| u8::try_from(code).ok())
                .and_then(|code| ResumeMode::try_from(code).ok());
            match mode {
                Some(mode) => {
                    let snapshot = MockSnapshot::from_body(&body);
                    let ctx = state.context(suffix);
                    ctx.resume_mode = mode.code();
                    ctx.resume_mode_calls.push(mode);
                    if snapshot.is_some() {
                        ctx.snapshot = snapshot;
                    }
                    json_response(StatusCode::OK, json!({"resume_mode": mode.code()}))
                }
                None => status_only(StatusCode::BAD_REQUEST),
            }
        }
        (&Method::POST, "set_breakpoint") | (&Method::POST, "remove_breakpoint") => {
            let file = body.get("file").and_then(Value::as_str).map(str::to_owned);
            let line = body.get("line").and_then(Value::as_i64);
            let (Some(file), Some(line)) = (file, line) else {
                return Ok(status_only(StatusCode::BAD_REQUEST));
            };
            if endpoint == "set_breakpoint" {
                state.breakpoints.push((file.clone(), line));
                state.breakpoint_ops.push(BreakpointOp::Set { file, line });
            } else {
                state.breakpoints.retain(|(f, l)| !(f == &file && *l == line));
                state.breakpoint_ops.push(BreakpointOp::Remove { file, line });
            }
            json_response(StatusCode::OK, body)
        }
        (&Method::GET, "get_breakpoints") => {
            let list: Vec<Value> = state
                .breakpoints
                .iter()
                .map(|(file, line)| json!({"file": file, "line": line}))
                .collect();
            json_response(StatusCode::OK, Value::Array(list))
        }
        (&Method::GET | &Method::POST, "clear_breakpoints") => {
            state.breakpoints.clear();
            state.breakpoint_ops.push(BreakpointOp::Clear);
            json_response(StatusCode::OK, json!({}))
        }
        (&Method::POST, "set_pending_eval") => {
            let Some(expr) = body.get("pending_eval").and_then(Value::as_str) else {
                return Ok(status_only(StatusCode::BAD_REQUEST));
            };
            state.pending_eval = Some(expr.to_owned());
            state.submitted_evals.push(expr.to_owned());
            json_response(StatusCode::OK, body)
        }
        (&Method::GET, "get_pending_eval") => {
            let pending = state.pending_eval.take().unwrap_or_default();
            json_response(StatusCode::OK, json!({"pending_eval": pending}))
        }
        (&Method::POST, "set_eval_result") => {
            let Some(result) = body.get("eval_result").and_then(Value::as_str) else {
                return Ok(status_only(StatusCode::BAD_REQUEST));
            };
            state.eval_result = Some(result.to_owned());
            json_response(StatusCode::OK, body)
        }
        (&Method::GET, "get_eval_result") => match state.eval_result.take() {
            Some(result) => json_response(StatusCode::OK, json!({"eval_result": result})),
            None => status_only(StatusCode::NOT_FOUND),
        },
        _ => status_only(StatusCode::NOT_FOUND),
    };

    Ok(response)
}
