use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use mta_debug_api::BackendClient;
use parking_lot::Mutex;
use serde_json::json;

use crate::context::ContextStore;
use crate::dap::sender::DapSender;
use crate::schedule::ScheduledTask;

/// Turns the backend's polled run state into `stopped` events.
#[derive(Clone)]
pub struct Poller {
    client: BackendClient,
    contexts: Arc<Mutex<ContextStore>>,
    sender: DapSender,
}

impl Poller {
    pub fn new(client: BackendClient, contexts: Arc<Mutex<ContextStore>>, sender: DapSender) -> Self {
        Self {
            client,
            contexts,
            sender,
        }
    }

    pub fn spawn(self, period: Duration) -> ScheduledTask {
        tracing::debug!(target: "mta_dap", period_ms = period.as_millis() as u64, "starting backend poller");
        ScheduledTask::every(period, move || {
            let poller = self.clone();
            async move {
                poller.poll_once().await;
                ControlFlow::Continue(())
            }
        })
    }

    /// Queries every running context once. Returns the number of `stopped` events emitted.
    pub async fn poll_once(&self) -> usize {
        let targets = self.contexts.lock().poll_targets();
        let mut stops = 0;

        for target in targets {
            let state = match self.client.resume_state(target.suffix).await {
                Ok(state) => state,
                Err(err) => {
                    tracing::debug!(
                        target: "mta_dap",
                        thread_id = target.thread_id,
                        error = %err,
                        "resume state poll failed; retrying next tick"
                    );
                    continue;
                }
            };

            let stopped = self.contexts.lock().observe(&target, state);
            if stopped {
                tracing::debug!(target: "mta_dap", thread_id = target.thread_id, "context paused");
                self.sender.event(
                    "stopped",
                    Some(json!({
                        "reason": "breakpoint",
                        "threadId": target.thread_id,
                        "allThreadsStopped": false,
                    })),
                );
                stops += 1;
            }
        }

        stops
    }
}
