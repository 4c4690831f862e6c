use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use overseer_types::{
    LABEL_PARENT_TOOL_CALL, LabelSelector, Lifecycle, TaskPhase, ToolCall, ToolCallStatus,
    ToolInvocation,
};

use crate::approval::ApprovalCoordinator;
use crate::config::ControllerConfig;
use crate::events::{EventRecorder, ToolCallEvent};
use crate::executor::{ExecuteError, Execution, INVALID_ARGUMENTS_DETAIL, ToolExecutor, parse_arguments};
use crate::humanlayer::{ApprovalStatus, ContactStatus};
use crate::store::ObjectStore;

/// When to look at this ToolCall again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Terminal; never again.
    None,
    /// More work is ready right now.
    Immediate,
    /// Waiting on an external party; back off.
    After(Duration),
}

/// One reconciliation step: the status to commit (if any) and the requeue
/// directive. The reconciler commits; the machine never writes.
#[derive(Debug, Clone)]
pub struct Step {
    pub next: Option<ToolCallStatus>,
    pub requeue: Requeue,
}

impl Step {
    fn done() -> Self {
        Self {
            next: None,
            requeue: Requeue::None,
        }
    }

    fn wait(interval: Duration) -> Self {
        Self {
            next: None,
            requeue: Requeue::After(interval),
        }
    }

    fn commit(status: ToolCallStatus, requeue: Requeue) -> Self {
        Self {
            next: Some(status),
            requeue,
        }
    }
}

/// Canonical wording recorded when a human denies a tool. Shared by the
/// poll and webhook verdict paths.
pub fn denial_result(tool: &str, comment: &str) -> String {
    format!("User denied `{tool}` with feedback: {comment}")
}

/// Status for a call whose approval verdict came back positive. Shared by
/// the poll and webhook verdict paths.
pub fn approved_status(tool_call: &ToolCall) -> ToolCallStatus {
    let mut status = advance(tool_call, Lifecycle::ApprovedReady);
    status.status_detail = Some("Approved; executing tool".to_string());
    status
}

/// Status for a call whose approval verdict came back negative.
pub fn rejected_status(tool_call: &ToolCall, comment: &str) -> ToolCallStatus {
    let mut status = advance(tool_call, Lifecycle::Rejected);
    status.result = Some(denial_result(&tool_call.spec.tool_ref.name, comment));
    status.status_detail = Some("Tool call rejected by human reviewer".to_string());
    status
}

/// Clones the current status and moves it to `lifecycle`, stamping
/// `completion_time` on terminal entry. Existing fields are never cleared,
/// so a non-terminal write cannot lose `completion_time` or the span.
fn advance(tool_call: &ToolCall, lifecycle: Lifecycle) -> ToolCallStatus {
    let mut status = tool_call.status.clone();
    let (phase, code) = lifecycle.project();
    status.phase = phase;
    status.status = code;
    if lifecycle.is_terminal() {
        status.completion_time = Some(Utc::now());
    }
    status
}

/// The authoritative transition function: maps the observed `(phase,
/// status)` pair plus collaborator answers to the next persisted status and
/// a requeue directive. Pure with respect to the ToolCall: all writes
/// happen in the reconciler.
pub struct StateMachine {
    store: Arc<dyn ObjectStore>,
    executor: ToolExecutor,
    approvals: ApprovalCoordinator,
    events: Arc<dyn EventRecorder>,
    config: ControllerConfig,
}

impl StateMachine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        executor: ToolExecutor,
        approvals: ApprovalCoordinator,
        events: Arc<dyn EventRecorder>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            approvals,
            events,
            config,
        }
    }

    pub async fn process(&self, tool_call: &ToolCall) -> Step {
        let Some(lifecycle) = Lifecycle::of(&tool_call.status) else {
            warn!(
                tool_call = %tool_call.meta.key(),
                phase = ?tool_call.status.phase,
                status = ?tool_call.status.status,
                "Observed a phase/status pair outside the lifecycle graph"
            );
            return self.fail(
                tool_call,
                format!(
                    "unrecognized phase/status pair ({:?}, {:?})",
                    tool_call.status.phase, tool_call.status.status
                ),
                None,
            );
        };

        if lifecycle.is_terminal() {
            debug!(tool_call = %tool_call.meta.key(), "Terminal; finalizing span");
            return Step::done();
        }

        match lifecycle {
            Lifecycle::Uninitialized => self.initialize(tool_call),
            Lifecycle::Pending => self.setup(tool_call),
            Lifecycle::Ready => self.route(tool_call).await,
            Lifecycle::AwaitingApproval => self.check_approval(tool_call).await,
            Lifecycle::ApprovedReady => self.execute_approved(tool_call).await,
            Lifecycle::AwaitingSubAgent => self.check_sub_agent(tool_call).await,
            Lifecycle::AwaitingHumanReply => self.check_contact(tool_call).await,
            Lifecycle::Succeeded
            | Lifecycle::Rejected
            | Lifecycle::Failed
            | Lifecycle::ApprovalRequestFailed
            | Lifecycle::ContactRequestFailed => Step::done(),
        }
    }

    /// `(∅, ∅)` with a span: stamp `start_time` and enter the graph.
    fn initialize(&self, tool_call: &ToolCall) -> Step {
        let mut status = advance(tool_call, Lifecycle::Pending);
        status.start_time = Some(Utc::now());
        Step::commit(status, Requeue::Immediate)
    }

    fn setup(&self, tool_call: &ToolCall) -> Step {
        Step::commit(advance(tool_call, Lifecycle::Ready), Requeue::Immediate)
    }

    /// `(Pending, Ready)`: decide between the approval gate, a
    /// human-contact request, and direct execution.
    async fn route(&self, tool_call: &ToolCall) -> Step {
        // Fail fast on unparseable arguments before any external side
        // effect; every strategy needs them.
        if let Err(error) = parse_arguments(&tool_call.spec.arguments) {
            return self.fail(
                tool_call,
                error.to_string(),
                Some(INVALID_ARGUMENTS_DETAIL.to_string()),
            );
        }

        let channel = match self.approvals.needs_approval(tool_call).await {
            Ok(channel) => channel,
            Err(error) if error.is_transient() => {
                warn!(tool_call = %tool_call.meta.key(), %error, "Transient failure checking approval gate");
                return Step::wait(self.config.transport_backoff);
            }
            Err(error) => return self.approval_request_failed(tool_call, &error.to_string()),
        };

        if let Some(channel) = channel {
            return match self.approvals.request_approval(tool_call, &channel).await {
                Ok(external_call_id) => {
                    self.record(tool_call, ToolCallEvent::AwaitingHumanApproval);
                    self.record(tool_call, ToolCallEvent::HumanLayerRequestSent);
                    let mut status = advance(tool_call, Lifecycle::AwaitingApproval);
                    status.external_call_id = Some(external_call_id);
                    status.status_detail = Some("Awaiting human approval".to_string());
                    Step::commit(status, Requeue::After(self.config.poll_interval))
                }
                Err(error) => self.approval_request_failed(tool_call, &error.to_string()),
            };
        }

        if matches!(
            ToolInvocation::parse(&tool_call.spec),
            ToolInvocation::HumanContact { .. }
        ) {
            return self.request_contact(tool_call).await;
        }

        match self.executor.execute(tool_call).await {
            Ok(execution) => self.apply_execution(tool_call, execution),
            Err(error) => self.apply_execute_error(tool_call, &error),
        }
    }

    async fn request_contact(&self, tool_call: &ToolCall) -> Step {
        match self.executor.execute(tool_call).await {
            Ok(Execution::ContactRequested {
                external_call_id,
                result,
            }) => {
                self.record(tool_call, ToolCallEvent::AwaitingHumanContact);
                self.record(tool_call, ToolCallEvent::HumanLayerRequestSent);
                let mut status = advance(tool_call, Lifecycle::AwaitingHumanReply);
                status.external_call_id = Some(external_call_id);
                status.status_detail = Some(result);
                Step::commit(status, Requeue::After(self.config.poll_interval))
            }
            Ok(execution) => self.apply_execution(tool_call, execution),
            Err(error) => self.apply_execute_error(tool_call, &error),
        }
    }

    /// `(AwaitingHumanApproval, Ready)`: poll for the verdict.
    async fn check_approval(&self, tool_call: &ToolCall) -> Step {
        let Some(external_call_id) = tool_call.status.external_call_id.clone() else {
            return self.approval_request_failed(
                tool_call,
                "awaiting approval without an external call id",
            );
        };

        let channel = match self.approvals.needs_approval(tool_call).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                return self.approval_request_failed(
                    tool_call,
                    "approval channel is no longer configured on the tool server",
                );
            }
            Err(error) if error.is_transient() => {
                return Step::wait(self.config.transport_backoff);
            }
            Err(error) => return self.approval_request_failed(tool_call, &error.to_string()),
        };

        match self
            .approvals
            .poll_approval(tool_call, &channel, &external_call_id)
            .await
        {
            Ok(ApprovalStatus::Pending) => Step::wait(self.config.poll_interval),
            Ok(ApprovalStatus::Approved) => {
                Step::commit(approved_status(tool_call), Requeue::Immediate)
            }
            Ok(ApprovalStatus::Rejected { comment }) => {
                Step::commit(rejected_status(tool_call, &comment), Requeue::None)
            }
            Err(error) if error.is_transient() => {
                warn!(tool_call = %tool_call.meta.key(), %error, "Transient failure polling approval");
                Step::wait(self.config.transport_backoff)
            }
            Err(error) => self.approval_request_failed(tool_call, &error.to_string()),
        }
    }

    /// `(ReadyToExecuteApprovedTool, Ready)`: the human said yes; run it.
    async fn execute_approved(&self, tool_call: &ToolCall) -> Step {
        match self.executor.execute(tool_call).await {
            Ok(execution) => self.apply_execution(tool_call, execution),
            Err(error) => self.apply_execute_error(tool_call, &error),
        }
    }

    /// `(AwaitingSubAgent, Ready)`: watch the delegated child task.
    async fn check_sub_agent(&self, tool_call: &ToolCall) -> Step {
        let selector =
            LabelSelector::matching(LABEL_PARENT_TOOL_CALL, tool_call.meta.name.clone());
        let tasks = match self
            .store
            .list_tasks(&tool_call.meta.namespace, &selector)
            .await
        {
            Ok(tasks) => tasks,
            Err(error) => {
                warn!(tool_call = %tool_call.meta.key(), %error, "Failed listing child tasks");
                return Step::wait(self.config.transport_backoff);
            }
        };

        // Ties go to the oldest child; the rest are ignored.
        let Some(child) = tasks
            .into_iter()
            .min_by_key(|task| task.meta.creation_timestamp)
        else {
            return self.fail(
                tool_call,
                "delegated child task not found".to_string(),
                None,
            );
        };

        match child.status.phase {
            Some(TaskPhase::FinalAnswer) => {
                self.record(tool_call, ToolCallEvent::SubAgentCompleted);
                self.succeed(tool_call, child.status.output.unwrap_or_default())
            }
            Some(TaskPhase::Failed) => {
                self.record(tool_call, ToolCallEvent::SubAgentFailed);
                let child_error = child
                    .status
                    .error
                    .unwrap_or_else(|| "sub-agent task failed without detail".to_string());
                let mut status = advance(tool_call, Lifecycle::Failed);
                status.error = Some(child_error.clone());
                status.result = Some(format!("Sub-agent task failed: {child_error}"));
                Step::commit(status, Requeue::None)
            }
            _ => Step::wait(self.config.poll_interval),
        }
    }

    /// `(AwaitingHumanInput, Ready)`: poll for the human's reply.
    async fn check_contact(&self, tool_call: &ToolCall) -> Step {
        let Some(external_call_id) = tool_call.status.external_call_id.clone() else {
            return self.contact_request_failed(
                tool_call,
                "awaiting human input without an external call id",
            );
        };

        match self
            .approvals
            .poll_contact(tool_call, &external_call_id)
            .await
        {
            Ok(ContactStatus::Pending) => Step::wait(self.config.poll_interval),
            Ok(ContactStatus::Replied { text }) => {
                self.record(tool_call, ToolCallEvent::ExecutionSucceeded);
                self.succeed(tool_call, text)
            }
            Err(error) if error.is_transient() => {
                warn!(tool_call = %tool_call.meta.key(), %error, "Transient failure polling human contact");
                Step::wait(self.config.transport_backoff)
            }
            Err(error) => self.contact_request_failed(tool_call, &error.to_string()),
        }
    }

    fn apply_execution(&self, tool_call: &ToolCall, execution: Execution) -> Step {
        match execution {
            Execution::Completed { result } => {
                self.record(tool_call, ToolCallEvent::ExecutionSucceeded);
                self.succeed(tool_call, result)
            }
            Execution::Delegated { result, .. } => {
                self.record(tool_call, ToolCallEvent::DelegatingToSubAgent);
                let mut status = advance(tool_call, Lifecycle::AwaitingSubAgent);
                status.status_detail = Some(result);
                Step::commit(status, Requeue::After(self.config.poll_interval))
            }
            Execution::ContactRequested {
                external_call_id,
                result,
            } => {
                self.record(tool_call, ToolCallEvent::AwaitingHumanContact);
                self.record(tool_call, ToolCallEvent::HumanLayerRequestSent);
                let mut status = advance(tool_call, Lifecycle::AwaitingHumanReply);
                status.external_call_id = Some(external_call_id);
                status.status_detail = Some(result);
                Step::commit(status, Requeue::After(self.config.poll_interval))
            }
        }
    }

    fn apply_execute_error(&self, tool_call: &ToolCall, error: &ExecuteError) -> Step {
        if error.is_transient() {
            warn!(tool_call = %tool_call.meta.key(), %error, "Transient execution failure");
            return Step::wait(self.config.transport_backoff);
        }
        if error.is_contact_failure() {
            return self.contact_request_failed(tool_call, &error.to_string());
        }
        match error {
            ExecuteError::InvalidArguments { .. } => self.fail(
                tool_call,
                error.to_string(),
                Some(INVALID_ARGUMENTS_DETAIL.to_string()),
            ),
            _ => self.fail(tool_call, error.to_string(), None),
        }
    }

    fn succeed(&self, tool_call: &ToolCall, result: String) -> Step {
        let mut status = advance(tool_call, Lifecycle::Succeeded);
        status.result = Some(result);
        Step::commit(status, Requeue::None)
    }

    fn fail(&self, tool_call: &ToolCall, error: String, detail: Option<String>) -> Step {
        self.record(tool_call, ToolCallEvent::ExecutionFailed);
        let mut status = advance(tool_call, Lifecycle::Failed);
        status.error = Some(error);
        if detail.is_some() {
            status.status_detail = detail;
        }
        Step::commit(status, Requeue::None)
    }

    fn approval_request_failed(&self, tool_call: &ToolCall, error: &str) -> Step {
        self.record(tool_call, ToolCallEvent::ExecutionFailed);
        let mut status = advance(tool_call, Lifecycle::ApprovalRequestFailed);
        status.error = Some(error.to_string());
        status.status_detail = Some("Failed requesting human approval".to_string());
        Step::commit(status, Requeue::None)
    }

    fn contact_request_failed(&self, tool_call: &ToolCall, error: &str) -> Step {
        self.record(tool_call, ToolCallEvent::ExecutionFailed);
        let mut status = advance(tool_call, Lifecycle::ContactRequestFailed);
        status.error = Some(error.to_string());
        status.status_detail = Some("Failed requesting human input".to_string());
        Step::commit(status, Requeue::None)
    }

    fn record(&self, tool_call: &ToolCall, event: ToolCallEvent) {
        self.events.record(&tool_call.meta.key(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventRecorder;
    use crate::humanlayer::HumanLayerError;
    use crate::store::InMemoryStore;
    use crate::test_utils::{
        ScriptedHumanLayer, ScriptedToolCaller, ready_slack_channel, secret_with, tool_call_named,
        tool_server,
    };
    use overseer_types::{Phase, SpanContext, StatusCode, ToolType};
    use rstest::rstest;

    struct Harness {
        store: Arc<InMemoryStore>,
        machine: StateMachine,
        events: Arc<MemoryEventRecorder>,
        humanlayer: ScriptedHumanLayer,
    }

    fn harness(caller: ScriptedToolCaller, humanlayer: ScriptedHumanLayer) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(MemoryEventRecorder::new());
        let store_dyn: Arc<dyn ObjectStore> = store.clone();
        let hl = Arc::new(humanlayer.clone());
        let machine = StateMachine::new(
            store_dyn.clone(),
            ToolExecutor::new(store_dyn.clone(), Arc::new(caller), hl.clone()),
            ApprovalCoordinator::new(store_dyn, hl),
            events.clone(),
            ControllerConfig::default(),
        );
        Harness {
            store,
            machine,
            events,
            humanlayer,
        }
    }

    fn with_span(mut tool_call: overseer_types::ToolCall) -> overseer_types::ToolCall {
        tool_call.status.span_context = Some(SpanContext::from_bytes([1; 16], [2; 8]));
        tool_call
    }

    fn at(
        mut tool_call: overseer_types::ToolCall,
        lifecycle: Lifecycle,
    ) -> overseer_types::ToolCall {
        let (phase, status) = lifecycle.project();
        tool_call.status.phase = phase;
        tool_call.status.status = status;
        tool_call
    }

    #[tokio::test]
    async fn uninitialized_moves_to_pending_with_start_time() {
        let h = harness(
            ScriptedToolCaller::returning("ok"),
            ScriptedHumanLayer::new(),
        );
        let tc = with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}"));

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(next.phase, Some(Phase::Pending));
        assert_eq!(next.status, Some(StatusCode::Pending));
        assert!(next.start_time.is_some());
        assert_eq!(step.requeue, Requeue::Immediate);
    }

    #[tokio::test]
    async fn pending_moves_to_ready() {
        let h = harness(
            ScriptedToolCaller::returning("ok"),
            ScriptedHumanLayer::new(),
        );
        let tc = at(
            with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
            Lifecycle::Pending,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Ready));
        assert_eq!(step.requeue, Requeue::Immediate);
    }

    #[rstest]
    #[case(Lifecycle::Succeeded)]
    #[case(Lifecycle::Rejected)]
    #[case(Lifecycle::Failed)]
    #[case(Lifecycle::ApprovalRequestFailed)]
    #[case(Lifecycle::ContactRequestFailed)]
    #[tokio::test]
    async fn terminal_states_are_no_ops(#[case] lifecycle: Lifecycle) {
        let h = harness(
            ScriptedToolCaller::returning("ok"),
            ScriptedHumanLayer::new(),
        );
        let tc = at(
            with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
            lifecycle,
        );

        let step = h.machine.process(&tc).await;
        assert!(step.next.is_none(), "terminal states are sticky");
        assert_eq!(step.requeue, Requeue::None);
    }

    #[tokio::test]
    async fn off_graph_pair_fails_permanently() {
        let h = harness(
            ScriptedToolCaller::returning("ok"),
            ScriptedHumanLayer::new(),
        );
        let mut tc = with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}"));
        tc.status.phase = Some(Phase::Succeeded);
        tc.status.status = Some(StatusCode::Ready);

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Failed));
        assert!(next.completion_time.is_some());
    }

    #[tokio::test]
    async fn ready_remote_without_gate_executes_directly() {
        let h = harness(
            ScriptedToolCaller::returning("5"),
            ScriptedHumanLayer::new(),
        );
        h.store.put_tool_server(tool_server("default", "srv", None));

        let tc = at(
            with_span(tool_call_named(
                "tc-1",
                "srv__add",
                ToolType::Remote,
                r#"{"a":2,"b":3}"#,
            )),
            Lifecycle::Ready,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Succeeded));
        assert_eq!(next.result.as_deref(), Some("5"));
        assert!(next.completion_time.is_some());
        assert_eq!(step.requeue, Requeue::None);
        assert_eq!(
            h.events.events_for(&tc.meta.key()),
            vec![ToolCallEvent::ExecutionSucceeded]
        );
    }

    #[tokio::test]
    async fn ready_remote_with_gate_requests_approval() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new().with_approval_call_id("hl-abc"),
        );
        h.store
            .put_tool_server(tool_server("default", "srv", Some("slack-cc")));
        h.store
            .put_contact_channel(ready_slack_channel("default", "slack-cc", "hl-creds"));
        h.store
            .put_secret(secret_with("default", "hl-creds", "api-key", b"k"));

        let tc = at(
            with_span(tool_call_named(
                "tc-1",
                "srv__add",
                ToolType::Remote,
                r#"{"a":7,"b":8}"#,
            )),
            Lifecycle::Ready,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::AwaitingApproval));
        assert_eq!(next.external_call_id.as_deref(), Some("hl-abc"));
        assert_eq!(
            step.requeue,
            Requeue::After(ControllerConfig::default().poll_interval)
        );
        assert_eq!(
            h.events.events_for(&tc.meta.key()),
            vec![
                ToolCallEvent::AwaitingHumanApproval,
                ToolCallEvent::HumanLayerRequestSent,
            ]
        );
    }

    #[tokio::test]
    async fn approval_request_failure_is_terminal() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new().with_approval_request_error(HumanLayerError::transport(
                "service returned 500 Internal Server Error",
            )),
        );
        h.store
            .put_tool_server(tool_server("default", "srv", Some("slack-cc")));
        h.store
            .put_contact_channel(ready_slack_channel("default", "slack-cc", "hl-creds"));
        h.store
            .put_secret(secret_with("default", "hl-creds", "api-key", b"k"));

        let tc = at(
            with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
            Lifecycle::Ready,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(
            Lifecycle::of(&next),
            Some(Lifecycle::ApprovalRequestFailed)
        );
        assert!(next.completion_time.is_some());
        assert_eq!(step.requeue, Requeue::None);
    }

    #[tokio::test]
    async fn invalid_arguments_fail_before_any_side_effect() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );
        h.store.put_tool_server(tool_server("default", "srv", None));

        let tc = at(
            with_span(tool_call_named(
                "tc-1",
                "srv__add",
                ToolType::Remote,
                "not json",
            )),
            Lifecycle::Ready,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Failed));
        assert_eq!(
            next.status_detail.as_deref(),
            Some(INVALID_ARGUMENTS_DETAIL)
        );
        assert!(h.humanlayer.approval_requests().is_empty());
    }

    #[tokio::test]
    async fn approval_poll_pending_backs_off() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );
        h.store
            .put_tool_server(tool_server("default", "srv", Some("slack-cc")));
        h.store
            .put_contact_channel(ready_slack_channel("default", "slack-cc", "hl-creds"));
        h.store
            .put_secret(secret_with("default", "hl-creds", "api-key", b"k"));

        let mut tc = at(
            with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
            Lifecycle::AwaitingApproval,
        );
        tc.status.external_call_id = Some("hl-abc".to_string());

        let step = h.machine.process(&tc).await;
        assert!(step.next.is_none());
        assert_eq!(
            step.requeue,
            Requeue::After(ControllerConfig::default().poll_interval)
        );
        assert_eq!(h.humanlayer.approval_polls(), vec!["hl-abc".to_string()]);
    }

    #[tokio::test]
    async fn approval_poll_transport_error_backs_off_longer() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );
        h.humanlayer
            .push_approval_status(Err(HumanLayerError::transport("connection reset")));
        h.store
            .put_tool_server(tool_server("default", "srv", Some("slack-cc")));
        h.store
            .put_contact_channel(ready_slack_channel("default", "slack-cc", "hl-creds"));
        h.store
            .put_secret(secret_with("default", "hl-creds", "api-key", b"k"));

        let mut tc = at(
            with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
            Lifecycle::AwaitingApproval,
        );
        tc.status.external_call_id = Some("hl-abc".to_string());

        let step = h.machine.process(&tc).await;
        assert!(step.next.is_none(), "transport errors leave status alone");
        assert_eq!(
            step.requeue,
            Requeue::After(ControllerConfig::default().transport_backoff)
        );
    }

    #[tokio::test]
    async fn approval_approved_moves_to_approved_ready() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );
        h.humanlayer.push_approval_status(Ok(ApprovalStatus::Approved));
        h.store
            .put_tool_server(tool_server("default", "srv", Some("slack-cc")));
        h.store
            .put_contact_channel(ready_slack_channel("default", "slack-cc", "hl-creds"));
        h.store
            .put_secret(secret_with("default", "hl-creds", "api-key", b"k"));

        let mut tc = at(
            with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
            Lifecycle::AwaitingApproval,
        );
        tc.status.external_call_id = Some("hl-abc".to_string());

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::ApprovedReady));
        assert_eq!(step.requeue, Requeue::Immediate);
    }

    #[tokio::test]
    async fn approval_rejected_preserves_the_comment() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );
        h.humanlayer.push_approval_status(Ok(ApprovalStatus::Rejected {
            comment: "no".to_string(),
        }));
        h.store
            .put_tool_server(tool_server("default", "srv", Some("slack-cc")));
        h.store
            .put_contact_channel(ready_slack_channel("default", "slack-cc", "hl-creds"));
        h.store
            .put_secret(secret_with("default", "hl-creds", "api-key", b"k"));

        let mut tc = at(
            with_span(tool_call_named("tc-1", "srv__tool", ToolType::Remote, "{}")),
            Lifecycle::AwaitingApproval,
        );
        tc.status.external_call_id = Some("hl-abc".to_string());

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Rejected));
        assert_eq!(
            next.result.as_deref(),
            Some("User denied `srv__tool` with feedback: no")
        );
        assert!(next.completion_time.is_some());
        assert_eq!(step.requeue, Requeue::None);
    }

    #[tokio::test]
    async fn awaiting_approval_without_call_id_is_an_error() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );
        let tc = at(
            with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
            Lifecycle::AwaitingApproval,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(
            Lifecycle::of(&next),
            Some(Lifecycle::ApprovalRequestFailed)
        );
    }

    #[tokio::test]
    async fn approved_ready_executes_the_remote_tool() {
        let h = harness(
            ScriptedToolCaller::returning("15"),
            ScriptedHumanLayer::new(),
        );
        h.store
            .put_tool_server(tool_server("default", "srv", Some("slack-cc")));

        let mut tc = at(
            with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
            Lifecycle::ApprovedReady,
        );
        tc.status.external_call_id = Some("hl-abc".to_string());

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Succeeded));
        assert_eq!(next.result.as_deref(), Some("15"));
    }

    #[tokio::test]
    async fn approved_execution_failure_is_terminal() {
        let h = harness(
            ScriptedToolCaller::failing("boom"),
            ScriptedHumanLayer::new(),
        );
        let tc = at(
            with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
            Lifecycle::ApprovedReady,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Failed));
        assert_eq!(
            h.events.events_for(&tc.meta.key()),
            vec![ToolCallEvent::ExecutionFailed]
        );
    }

    #[tokio::test]
    async fn transient_transport_during_execution_retries_without_status_change() {
        let h = harness(
            ScriptedToolCaller::transport_failing("connection refused"),
            ScriptedHumanLayer::new(),
        );
        h.store.put_tool_server(tool_server("default", "srv", None));

        let tc = at(
            with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
            Lifecycle::Ready,
        );

        let step = h.machine.process(&tc).await;
        assert!(step.next.is_none());
        assert_eq!(
            step.requeue,
            Requeue::After(ControllerConfig::default().transport_backoff)
        );
    }

    #[tokio::test]
    async fn ready_delegate_creates_child_and_awaits() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );

        let tc = at(
            with_span(tool_call_named(
                "tc-1",
                "delegate_to_agent__sub",
                ToolType::Delegate,
                r#"{"message":"go"}"#,
            )),
            Lifecycle::Ready,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::AwaitingSubAgent));
        assert_eq!(
            step.requeue,
            Requeue::After(ControllerConfig::default().poll_interval)
        );
        assert_eq!(
            h.events.events_for(&tc.meta.key()),
            vec![ToolCallEvent::DelegatingToSubAgent]
        );

        let tasks = h
            .store
            .list_tasks(
                "default",
                &LabelSelector::matching(LABEL_PARENT_TOOL_CALL, "tc-1"),
            )
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].spec.user_message, "go");
        assert_eq!(tasks[0].spec.agent_ref, "sub");
    }

    #[tokio::test]
    async fn awaiting_sub_agent_without_child_fails() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );
        let tc = at(
            with_span(tool_call_named(
                "tc-1",
                "delegate_to_agent__sub",
                ToolType::Delegate,
                r#"{"message":"go"}"#,
            )),
            Lifecycle::AwaitingSubAgent,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Failed));
    }

    #[tokio::test]
    async fn earliest_child_task_wins_ties() {
        use overseer_types::{ObjectMeta, Task, TaskSpec, TaskStatus};

        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );

        let mut older = Task {
            meta: ObjectMeta::new("default", "delegate-tc-1-a")
                .with_label(LABEL_PARENT_TOOL_CALL, "tc-1"),
            spec: TaskSpec {
                agent_ref: "sub".to_string(),
                user_message: "go".to_string(),
            },
            status: TaskStatus {
                phase: Some(TaskPhase::FinalAnswer),
                output: Some("from older".to_string()),
                ..Default::default()
            },
        };
        older.meta.creation_timestamp = Utc::now() - chrono::Duration::minutes(5);
        h.store.put_task(older);

        h.store.put_task(Task {
            meta: ObjectMeta::new("default", "delegate-tc-1-b")
                .with_label(LABEL_PARENT_TOOL_CALL, "tc-1"),
            spec: TaskSpec {
                agent_ref: "sub".to_string(),
                user_message: "go".to_string(),
            },
            status: TaskStatus {
                phase: Some(TaskPhase::Failed),
                error: Some("from newer".to_string()),
                ..Default::default()
            },
        });

        let tc = at(
            with_span(tool_call_named(
                "tc-1",
                "delegate_to_agent__sub",
                ToolType::Delegate,
                r#"{"message":"go"}"#,
            )),
            Lifecycle::AwaitingSubAgent,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Succeeded));
        assert_eq!(next.result.as_deref(), Some("from older"));
    }

    #[tokio::test]
    async fn contact_reply_completes_the_call() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );
        h.humanlayer.push_contact_status(Ok(ContactStatus::Replied {
            text: "ship it".to_string(),
        }));
        h.store
            .put_contact_channel(ready_slack_channel("default", "slack-cc", "hl-creds"));
        h.store
            .put_secret(secret_with("default", "hl-creds", "api-key", b"k"));

        let mut tc = at(
            with_span(tool_call_named(
                "tc-1",
                "slack-cc__ask",
                ToolType::HumanContact,
                r#"{"message":"ok to deploy?"}"#,
            )),
            Lifecycle::AwaitingHumanReply,
        );
        tc.status.external_call_id = Some("hl-contact-1".to_string());

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Succeeded));
        assert_eq!(next.result.as_deref(), Some("ship it"));
        assert_eq!(h.humanlayer.contact_polls(), vec!["hl-contact-1".to_string()]);
    }

    #[tokio::test]
    async fn ready_human_contact_requests_and_awaits() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new().with_contact_call_id("hl-55"),
        );
        h.store
            .put_contact_channel(ready_slack_channel("default", "slack-cc", "hl-creds"));
        h.store
            .put_secret(secret_with("default", "hl-creds", "api-key", b"k"));

        let tc = at(
            with_span(tool_call_named(
                "tc-1",
                "slack-cc__ask",
                ToolType::HumanContact,
                r#"{"message":"question"}"#,
            )),
            Lifecycle::Ready,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::AwaitingHumanReply));
        assert_eq!(next.external_call_id.as_deref(), Some("hl-55"));
        assert_eq!(
            h.events.events_for(&tc.meta.key()),
            vec![
                ToolCallEvent::AwaitingHumanContact,
                ToolCallEvent::HumanLayerRequestSent,
            ]
        );
    }

    #[tokio::test]
    async fn contact_request_failure_is_terminal() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new()
                .with_contact_request_error(HumanLayerError::transport("502 Bad Gateway")),
        );
        h.store
            .put_contact_channel(ready_slack_channel("default", "slack-cc", "hl-creds"));
        h.store
            .put_secret(secret_with("default", "hl-creds", "api-key", b"k"));

        let tc = at(
            with_span(tool_call_named(
                "tc-1",
                "slack-cc__ask",
                ToolType::HumanContact,
                r#"{"message":"question"}"#,
            )),
            Lifecycle::Ready,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::ContactRequestFailed));
        assert_eq!(step.requeue, Requeue::None);
    }

    #[tokio::test]
    async fn unknown_tool_type_fails_permanently() {
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );
        let tc = at(
            with_span(tool_call_named("tc-1", "mystery", ToolType::Unspecified, "{}")),
            Lifecycle::Ready,
        );

        let step = h.machine.process(&tc).await;
        let next = step.next.unwrap();
        assert_eq!(Lifecycle::of(&next), Some(Lifecycle::Failed));
        assert_eq!(step.requeue, Requeue::None);
    }

    #[tokio::test]
    async fn non_terminal_steps_always_requeue() {
        // Requeue discipline: every non-terminal outcome schedules another
        // look at the record.
        let h = harness(
            ScriptedToolCaller::returning("unused"),
            ScriptedHumanLayer::new(),
        );
        h.store
            .put_tool_server(tool_server("default", "srv", Some("slack-cc")));
        h.store
            .put_contact_channel(ready_slack_channel("default", "slack-cc", "hl-creds"));
        h.store
            .put_secret(secret_with("default", "hl-creds", "api-key", b"k"));

        for lifecycle in [Lifecycle::Uninitialized, Lifecycle::Pending, Lifecycle::Ready] {
            let tc = at(
                with_span(tool_call_named("tc-1", "srv__add", ToolType::Remote, "{}")),
                lifecycle,
            );
            let step = h.machine.process(&tc).await;
            if step
                .next
                .as_ref()
                .is_none_or(|next| !next.is_terminal())
            {
                assert_ne!(step.requeue, Requeue::None, "stalled at {lifecycle:?}");
            }
        }
    }
}
