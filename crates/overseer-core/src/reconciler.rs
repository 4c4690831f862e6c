use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use overseer_types::{Key, LABEL_PARENT_TASK, SpanContext, ToolCall};

use crate::config::ControllerConfig;
use crate::machine::{Requeue, StateMachine};
use crate::store::{ObjectStore, StoreError};
use crate::trace::Tracer;

/// Drives one work item through load → span attach → process → commit.
///
/// This is the only component that writes ToolCall status. Everything else
/// returns values; on a version conflict the write is dropped and the next
/// work item picks up whatever state won.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    machine: StateMachine,
    tracer: Tracer,
    config: ControllerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        machine: StateMachine,
        tracer: Tracer,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            machine,
            tracer,
            config,
        }
    }

    pub async fn reconcile(&self, key: &Key) -> Requeue {
        let tool_call = match self.store.get_tool_call(key).await {
            Ok(Some(tool_call)) => tool_call,
            Ok(None) => {
                debug!(%key, "ToolCall no longer exists; dropping work item");
                return Requeue::None;
            }
            Err(error) => {
                warn!(%key, %error, "Failed loading ToolCall");
                return Requeue::After(self.config.transport_backoff);
            }
        };

        // First non-terminal reconciliation mints the root span; the record
        // then carries the same trace for its whole lifetime.
        if tool_call.status.span_context.is_none() && !tool_call.status.is_terminal() {
            return self.assign_span(tool_call).await;
        }

        let step = match &tool_call.status.span_context {
            Some(context) => {
                let span = self.tracer.attach(&tool_call.meta.name, context);
                self.machine.process(&tool_call).instrument(span).await
            }
            None => self.machine.process(&tool_call).await,
        };

        let Some(next) = step.next else {
            return step.requeue;
        };

        let observed_version = tool_call.meta.resource_version;
        let mut latest = match self.store.get_tool_call(key).await {
            Ok(Some(latest)) => latest,
            Ok(None) => return Requeue::None,
            Err(error) => {
                warn!(%key, %error, "Failed re-fetching ToolCall before status write");
                return Requeue::After(self.config.transport_backoff);
            }
        };

        if latest.meta.resource_version != observed_version {
            debug!(%key, "Record changed during reconciliation; dropping update");
            return Requeue::None;
        }

        latest.status = next;
        match self.store.update_tool_call_status(latest).await {
            Ok(_) => step.requeue,
            Err(StoreError::Conflict { .. }) => {
                debug!(%key, "Lost the status write; dropping update");
                Requeue::None
            }
            Err(error) => {
                warn!(%key, %error, "Failed writing ToolCall status");
                Requeue::After(self.config.transport_backoff)
            }
        }
    }

    async fn assign_span(&self, mut tool_call: ToolCall) -> Requeue {
        let parent = self.parent_span(&tool_call).await;
        let context = self.tracer.root_span(parent.as_ref());
        debug!(
            tool_call = %tool_call.meta.key(),
            trace_id = %context.trace_id,
            span_id = %context.span_id,
            "Assigned root span"
        );

        tool_call.status.span_context = Some(context);
        match self.store.update_tool_call_status(tool_call).await {
            Ok(_) => Requeue::Immediate,
            Err(StoreError::Conflict { .. }) => Requeue::None,
            Err(error) => {
                warn!(%error, "Failed persisting span context");
                Requeue::After(self.config.transport_backoff)
            }
        }
    }

    /// Best effort: the parent Task's span makes this ToolCall's span a
    /// child in the same trace. Lookup failures mean a detached span.
    async fn parent_span(&self, tool_call: &ToolCall) -> Option<SpanContext> {
        let parent_name = tool_call
            .meta
            .label(LABEL_PARENT_TASK)
            .map(str::to_string)
            .or_else(|| {
                let label = &tool_call.spec.parent_task_label;
                (!label.is_empty()).then(|| label.clone())
            })?;

        let key = Key::new(tool_call.meta.namespace.clone(), parent_name);
        match self.store.get_task(&key).await {
            Ok(Some(task)) => task.status.span_context,
            Ok(None) => None,
            Err(error) => {
                debug!(%key, %error, "Parent task span unavailable; starting detached");
                None
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("controller is shut down")]
pub struct ControllerClosed;

/// Enqueues work items into the controller.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Key>,
}

impl ControllerHandle {
    pub async fn enqueue(&self, key: Key) -> Result<(), ControllerClosed> {
        self.tx.send(key).await.map_err(|_| ControllerClosed)
    }

    pub fn try_enqueue(&self, key: Key) -> Result<(), ControllerClosed> {
        self.tx.try_send(key).map_err(|_| ControllerClosed)
    }
}

/// Worker-pool runtime: delivers work items to at most `workers` concurrent
/// reconciliations and turns requeue directives into future deliveries.
pub struct Controller {
    handle: ControllerHandle,
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl Controller {
    pub fn spawn(reconciler: Arc<Reconciler>, config: &ControllerConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<Key>(config.queue_depth.max(1));
        let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
        let shutdown = CancellationToken::new();
        let reconcile_timeout = config.reconcile_timeout;
        let transport_backoff = config.transport_backoff;

        let loop_token = shutdown.clone();
        let requeue_tx = tx.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    item = rx.recv() => {
                        let Some(key) = item else { break };
                        let Ok(permit) = semaphore.clone().acquire_owned().await else {
                            break;
                        };

                        let reconciler = reconciler.clone();
                        let requeue_tx = requeue_tx.clone();
                        let worker_token = loop_token.clone();
                        tokio::spawn(async move {
                            // The deadline cuts the reconciliation off
                            // before any status write it has not reached;
                            // the record is untouched and re-enqueued.
                            let requeue = match tokio::time::timeout(
                                reconcile_timeout,
                                reconciler.reconcile(&key),
                            )
                            .await
                            {
                                Ok(requeue) => requeue,
                                Err(_) => {
                                    warn!(%key, "Reconciliation hit its deadline; re-enqueueing");
                                    Requeue::After(transport_backoff)
                                }
                            };
                            drop(permit);

                            match requeue {
                                Requeue::None => {}
                                Requeue::Immediate => {
                                    let _ = requeue_tx.send(key).await;
                                }
                                Requeue::After(delay) => {
                                    tokio::spawn(async move {
                                        tokio::select! {
                                            () = worker_token.cancelled() => {}
                                            () = tokio::time::sleep(delay) => {
                                                let _ = requeue_tx.send(key).await;
                                            }
                                        }
                                    });
                                }
                            }
                        });
                    }
                }
            }
            info!("Controller dispatch loop stopped");
        });

        Self {
            handle: ControllerHandle { tx },
            task,
            shutdown,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}
