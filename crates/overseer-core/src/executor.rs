use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use overseer_types::{
    Key, LABEL_PARENT_TOOL_CALL, ObjectMeta, Task, TaskSpec, ToolCall, ToolInvocation,
    delegate_task_name,
};

use crate::caller::{ToolCaller, ToolCallerError};
use crate::contact::{self, ContactError};
use crate::humanlayer::{HumanLayerConfig, HumanLayerError, HumanLayerFactory, http};
use crate::store::{ObjectStore, StoreError};

/// Wording used when the arguments string fails to parse as a JSON object.
pub const INVALID_ARGUMENTS_DETAIL: &str = "Invalid arguments JSON";

/// What an execution attempt produced. The state machine turns this into
/// the next status; the executor itself never writes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// The tool ran to completion.
    Completed { result: String },
    /// A child Task now exists (or already existed) for the sub-agent.
    Delegated { child_task: String, result: String },
    /// The human-layer request is in flight; poll with the returned id.
    ContactRequested {
        external_call_id: String,
        result: String,
    },
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("Invalid arguments JSON: {message}")]
    InvalidArguments { message: String },

    #[error("missing required argument {name:?}")]
    MissingArgument { name: &'static str },

    #[error("no execution strategy for tool ref {tool_ref:?}")]
    UnknownTool { tool_ref: String },

    #[error("task {task} exists but belongs to another tool call")]
    DelegateConflict { task: String },

    #[error(transparent)]
    Tool(#[from] ToolCallerError),

    #[error(transparent)]
    Contact(#[from] ContactError),

    #[error("human-layer contact request failed: {0}")]
    ContactRequest(#[from] HumanLayerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExecuteError {
    /// Transient failures are requeued without a status change; everything
    /// else maps to a terminal phase.
    pub fn is_transient(&self) -> bool {
        match self {
            ExecuteError::Tool(e) => e.is_transient(),
            ExecuteError::Store(e) => e.is_transient(),
            ExecuteError::Contact(e) => e.is_transient(),
            _ => false,
        }
    }

    /// True for failures that belong to the human-contact request path and
    /// should land in `ErrorRequestingHumanInput` rather than `Failed`.
    pub fn is_contact_failure(&self) -> bool {
        matches!(
            self,
            ExecuteError::Contact(_) | ExecuteError::ContactRequest(_)
        )
    }
}

/// Stateless dispatch of a ToolCall to one of the four execution
/// strategies. Errors bubble to the state machine.
#[derive(Clone)]
pub struct ToolExecutor {
    store: Arc<dyn ObjectStore>,
    caller: Arc<dyn ToolCaller>,
    humanlayer: Arc<dyn HumanLayerFactory>,
}

impl ToolExecutor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        caller: Arc<dyn ToolCaller>,
        humanlayer: Arc<dyn HumanLayerFactory>,
    ) -> Self {
        Self {
            store,
            caller,
            humanlayer,
        }
    }

    #[instrument(skip(self, tool_call), fields(tool_call = %tool_call.meta.key(), tool_ref = %tool_call.spec.tool_ref.name))]
    pub async fn execute(&self, tool_call: &ToolCall) -> Result<Execution, ExecuteError> {
        match ToolInvocation::parse(&tool_call.spec) {
            ToolInvocation::Remote { server, tool } => {
                self.execute_remote(tool_call, &server, &tool).await
            }
            ToolInvocation::Delegate { agent } => self.execute_delegate(tool_call, &agent).await,
            ToolInvocation::HumanContact { channel } => {
                self.execute_human_contact(tool_call, &channel).await
            }
            ToolInvocation::Unknown { tool_ref } => Err(ExecuteError::UnknownTool { tool_ref }),
        }
    }

    async fn execute_remote(
        &self,
        tool_call: &ToolCall,
        server: &str,
        tool: &str,
    ) -> Result<Execution, ExecuteError> {
        let args = parse_arguments(&tool_call.spec.arguments)?;

        debug!(target: "tool_executor", %server, %tool, "Calling remote tool");
        let result = self.caller.call_tool(server, tool, &args).await?;

        Ok(Execution::Completed { result })
    }

    async fn execute_delegate(
        &self,
        tool_call: &ToolCall,
        agent: &str,
    ) -> Result<Execution, ExecuteError> {
        let args = parse_arguments(&tool_call.spec.arguments)?;
        let message = require_message(&args)?;

        let child_name = delegate_task_name(&tool_call.meta.name, agent);
        self.ensure_child_task(tool_call, agent, message, &child_name)
            .await?;

        Ok(Execution::Delegated {
            child_task: child_name.clone(),
            result: format!("Delegated to agent {agent} via task {child_name}"),
        })
    }

    /// Idempotent child-task creation. Reconciliation can re-enter this
    /// after a crash between create and status write, and two reconcilers
    /// can race the create; both paths must converge on the same task.
    async fn ensure_child_task(
        &self,
        tool_call: &ToolCall,
        agent: &str,
        message: &str,
        child_name: &str,
    ) -> Result<(), ExecuteError> {
        let key = Key::new(tool_call.meta.namespace.clone(), child_name);

        if let Some(verdict) = self.adopt_existing(&key, tool_call).await? {
            return verdict;
        }

        let task = Task {
            meta: ObjectMeta::new(tool_call.meta.namespace.clone(), child_name)
                .with_label(LABEL_PARENT_TOOL_CALL, tool_call.meta.name.clone()),
            spec: TaskSpec {
                agent_ref: agent.to_string(),
                user_message: message.to_string(),
            },
            status: Default::default(),
        };

        match self.store.create_task(task).await {
            Ok(_) => {
                debug!(target: "tool_executor", child_task = %key, "Created child task");
                Ok(())
            }
            Err(StoreError::AlreadyExists { .. }) => {
                // Lost the create race; whoever won must carry our label.
                match self.adopt_existing(&key, tool_call).await? {
                    Some(verdict) => verdict,
                    None => Err(ExecuteError::DelegateConflict {
                        task: key.to_string(),
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Checks an existing task for ownership. `Some(Ok(()))` means adopt,
    /// `Some(Err)` means conflict, `None` means the task does not exist.
    async fn adopt_existing(
        &self,
        key: &Key,
        tool_call: &ToolCall,
    ) -> Result<Option<Result<(), ExecuteError>>, ExecuteError> {
        let Some(existing) = self.store.get_task(key).await? else {
            return Ok(None);
        };

        if existing.meta.label(LABEL_PARENT_TOOL_CALL) == Some(tool_call.meta.name.as_str()) {
            debug!(target: "tool_executor", child_task = %key, "Adopting existing child task");
            Ok(Some(Ok(())))
        } else {
            Ok(Some(Err(ExecuteError::DelegateConflict {
                task: key.to_string(),
            })))
        }
    }

    async fn execute_human_contact(
        &self,
        tool_call: &ToolCall,
        channel_name: &str,
    ) -> Result<Execution, ExecuteError> {
        let args = parse_arguments(&tool_call.spec.arguments)?;
        let message = require_message(&args)?;

        let channel =
            contact::resolve_channel(&self.store, &tool_call.meta.namespace, channel_name).await?;
        let api_key =
            contact::resolve_api_key(&self.store, &tool_call.meta.namespace, &channel).await?;

        let client = self.humanlayer.client(HumanLayerConfig {
            channel: channel.spec.clone(),
            run_id: tool_call.meta.name.clone(),
            call_id: http::generate_call_id(),
            api_key,
        });

        let external_call_id = client.request_human_contact(message).await?;

        Ok(Execution::ContactRequested {
            result: format!("Human contact requested, call ID: {external_call_id}"),
            external_call_id,
        })
    }
}

/// Parses the spec's arguments string as a JSON object.
pub fn parse_arguments(
    arguments: &str,
) -> Result<serde_json::Map<String, serde_json::Value>, ExecuteError> {
    let value: serde_json::Value =
        serde_json::from_str(arguments).map_err(|e| ExecuteError::InvalidArguments {
            message: e.to_string(),
        })?;

    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(ExecuteError::InvalidArguments {
            message: format!("expected a JSON object, got {other}"),
        }),
    }
}

fn require_message(
    args: &serde_json::Map<String, serde_json::Value>,
) -> Result<&str, ExecuteError> {
    args.get("message")
        .and_then(serde_json::Value::as_str)
        .ok_or(ExecuteError::MissingArgument { name: "message" })
}
