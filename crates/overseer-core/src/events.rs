use std::sync::Mutex;
use strum_macros::Display;
use tracing::info;

use overseer_types::Key;

/// Advisory lifecycle events emitted as a ToolCall transitions. The state
/// machine writes them and never reads them back.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum ToolCallEvent {
    AwaitingHumanApproval,
    HumanLayerRequestSent,
    DelegatingToSubAgent,
    SubAgentCompleted,
    SubAgentFailed,
    ExecutionSucceeded,
    ExecutionFailed,
    AwaitingHumanContact,
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, key: &Key, event: ToolCallEvent);
}

/// Production recorder: events land in the log stream.
#[derive(Debug, Default)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn record(&self, key: &Key, event: ToolCallEvent) {
        info!(target: "toolcall.events", tool_call = %key, event = %event, "Event");
    }
}

/// Buffering recorder for tests to observe emission order.
#[derive(Debug, Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<(Key, ToolCallEvent)>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<(Key, ToolCallEvent)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events_for(&self, key: &Key) -> Vec<ToolCallEvent> {
        self.recorded()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, e)| e)
            .collect()
    }
}

impl EventRecorder for MemoryEventRecorder {
    fn record(&self, key: &Key, event: ToolCallEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((key.clone(), event));
    }
}
