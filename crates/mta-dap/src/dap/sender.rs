use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::messages::{make_event, make_response, Request};

/// Cloneable handle that numbers and queues outbound DAP messages.
///
/// All responses and events share one sequence counter and one channel, drained by the
/// writer task that owns the output stream.
#[derive(Clone, Debug)]
pub struct DapSender {
    tx: mpsc::UnboundedSender<Value>,
    seq: Arc<AtomicI64>,
    trace: Arc<AtomicBool>,
}

impl DapSender {
    pub fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            tx,
            seq: Arc::new(AtomicI64::new(1)),
            trace: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enables protocol tracing on target `mta_dap::protocol`.
    pub fn set_trace(&self, enabled: bool) {
        self.trace.store(enabled, Ordering::Relaxed);
    }

    pub fn is_tracing(&self) -> bool {
        self.trace.load(Ordering::Relaxed)
    }

    pub fn trace_inbound(&self, request: &Request) {
        if self.is_tracing() {
            tracing::info!(
                target: "mta_dap::protocol",
                direction = "in",
                seq = request.seq,
                command = %request.command,
                arguments = %request.arguments,
            );
        }
    }

    pub fn respond(&self, request: &Request, body: Option<Value>) {
        self.send_response(request, true, body, None);
    }

    pub fn respond_error(&self, request: &Request, message: impl Into<String>) {
        self.send_response(request, false, None, Some(message.into()));
    }

    pub fn send_response(
        &self,
        request: &Request,
        success: bool,
        body: Option<Value>,
        message: Option<String>,
    ) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let response = make_response(seq, request, success, body, message);
        self.send(serde_json::to_value(response).unwrap_or_else(|_| json!({})));
    }

    pub fn event(&self, event: impl Into<String>, body: Option<Value>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let event = make_event(seq, event, body);
        self.send(serde_json::to_value(event).unwrap_or_else(|_| json!({})));
    }

    /// Emits a `console` output event. A trailing newline is appended when missing.
    pub fn console(&self, text: &str) {
        let mut output = text.to_string();
        if !output.ends_with('\n') {
            output.push('\n');
        }
        self.event(
            "output",
            Some(json!({"category": "console", "output": output})),
        );
    }

    fn send(&self, message: Value) {
        if self.is_tracing() {
            tracing::info!(target: "mta_dap::protocol", direction = "out", message = %message);
        }
        if self.tx.send(message).is_err() {
            tracing::debug!(target: "mta_dap", "dropping outbound DAP message; writer is gone");
        }
    }
}
