//! Execution contexts (game server and game client) and their pause snapshots.

use mta_config::ContextLayout;
use mta_debug_api::{ResumeMode, ResumeState, VariableMap};

use crate::handles::ScopeKind;

pub const SERVER_THREAD_ID: i64 = 1;
pub const CLIENT_THREAD_ID: i64 = 2;

/// One debuggable target, presented to the editor as a thread.
#[derive(Debug, Clone)]
pub struct DebugContext {
    pub thread_id: i64,
    pub name: &'static str,
    /// Appended to context-specific backend endpoints.
    pub suffix: &'static str,
    pub current_file: Option<String>,
    /// 0-based, as reported by the backend.
    pub current_line: Option<i64>,
    /// `false` while the last pause snapshot is current.
    pub running: bool,
    pub local_variables: VariableMap,
    pub upvalue_variables: VariableMap,
    pub global_variables: VariableMap,
    epoch: u64,
    in_flight: u32,
}

impl DebugContext {
    fn new(thread_id: i64, name: &'static str, suffix: &'static str) -> Self {
        Self {
            thread_id,
            name,
            suffix,
            current_file: None,
            current_line: None,
            running: false,
            local_variables: VariableMap::new(),
            upvalue_variables: VariableMap::new(),
            global_variables: VariableMap::new(),
            epoch: 0,
            in_flight: 0,
        }
    }

    pub fn variables(&self, kind: ScopeKind) -> &VariableMap {
        match kind {
            ScopeKind::Local => &self.local_variables,
            ScopeKind::Closure => &self.upvalue_variables,
            ScopeKind::Global => &self.global_variables,
        }
    }
}

/// A context the poller should query, captured before the request goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTarget {
    pub thread_id: i64,
    pub suffix: &'static str,
    epoch: u64,
}

#[derive(Debug)]
pub struct ContextStore {
    contexts: Vec<DebugContext>,
    current_thread: Option<i64>,
}

impl ContextStore {
    pub fn new(layout: ContextLayout) -> Self {
        let contexts = match layout {
            ContextLayout::Single => vec![DebugContext::new(SERVER_THREAD_ID, "Server", "")],
            ContextLayout::ServerAndClient => vec![
                DebugContext::new(SERVER_THREAD_ID, "Server", "_server"),
                DebugContext::new(CLIENT_THREAD_ID, "Client", "_client"),
            ],
        };
        Self {
            contexts,
            current_thread: None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DebugContext> {
        self.contexts.iter()
    }

    pub fn get(&self, thread_id: i64) -> Option<&DebugContext> {
        self.contexts.iter().find(|ctx| ctx.thread_id == thread_id)
    }

    fn get_mut(&mut self, thread_id: i64) -> Option<&mut DebugContext> {
        self.contexts.iter_mut().find(|ctx| ctx.thread_id == thread_id)
    }

    /// Remembers the thread whose variables later `variables` requests read.
    pub fn set_current_thread(&mut self, thread_id: i64) {
        self.current_thread = Some(thread_id);
    }

    /// The last thread passed to [`ContextStore::set_current_thread`], or the first context.
    pub fn current(&self) -> Option<&DebugContext> {
        match self.current_thread {
            Some(thread_id) => self.get(thread_id),
            None => self.contexts.first(),
        }
    }

    /// Marks the context running before a resume or step command is sent, and invalidates
    /// polls already in flight. Returns the context's endpoint suffix.
    pub fn begin_command(&mut self, thread_id: i64) -> Option<&'static str> {
        let ctx = self.get_mut(thread_id)?;
        ctx.running = true;
        ctx.epoch += 1;
        ctx.in_flight += 1;
        Some(ctx.suffix)
    }

    /// Called once the backend answered (or failed) a command started with
    /// [`ContextStore::begin_command`]. Polls issued while it was outstanding are discarded.
    pub fn finish_command(&mut self, thread_id: i64) {
        if let Some(ctx) = self.get_mut(thread_id) {
            ctx.in_flight = ctx.in_flight.saturating_sub(1);
            ctx.epoch += 1;
        }
    }

    /// Running contexts. Paused ones already reported their stop.
    pub fn poll_targets(&self) -> Vec<PollTarget> {
        self.contexts
            .iter()
            .filter(|ctx| ctx.running)
            .map(|ctx| PollTarget {
                thread_id: ctx.thread_id,
                suffix: ctx.suffix,
                epoch: ctx.epoch,
            })
            .collect()
    }

    /// Applies a poll result. Returns `true` when the context just transitioned to paused,
    /// i.e. exactly once per pause.
    pub fn observe(&mut self, target: &PollTarget, state: ResumeState) -> bool {
        let Some(ctx) = self.get_mut(target.thread_id) else {
            return false;
        };
        if state.resume_mode != ResumeMode::Paused
            || !ctx.running
            || ctx.in_flight > 0
            || ctx.epoch != target.epoch
        {
            return false;
        }

        ctx.current_file = state.current_file;
        ctx.current_line = state.current_line;
        ctx.local_variables = state.local_variables;
        ctx.upvalue_variables = state.upvalue_variables;
        ctx.global_variables = state.global_variables;
        ctx.running = false;
        true
    }
}
