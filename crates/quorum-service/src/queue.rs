use async_trait::async_trait;
use quorum_core::{ApprovalEngine, DispatchSink, EngineError, StatusChangedEvent};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("recalculation queue is closed")]
    Closed,
}

/// In-process recalculation queue deduplicated by workflow id.
///
/// Repeat enqueues for a workflow that is already pending collapse into the
/// one queued job. The dedup entry is released when the worker picks the
/// job up, so a vote arriving mid-recalculation schedules a fresh pass
/// rather than being lost.
pub struct RecalcQueue {
    tx: mpsc::UnboundedSender<Uuid>,
    pending: Mutex<HashSet<Uuid>>,
}

impl RecalcQueue {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Uuid>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            tx,
            pending: Mutex::new(HashSet::new()),
        });
        (queue, rx)
    }

    /// Enqueue a recalculation. Returns false when the workflow was already
    /// queued and the call collapsed into the existing job.
    pub async fn enqueue(&self, workflow_id: Uuid) -> Result<bool, QueueError> {
        let mut pending = self.pending.lock().await;
        if !pending.insert(workflow_id) {
            return Ok(false);
        }

        if self.tx.send(workflow_id).is_err() {
            pending.remove(&workflow_id);
            return Err(QueueError::Closed);
        }
        Ok(true)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Drain the queue into the recalculation coordinator. Concurrency
    /// conflicts are benign here: the racing writer's result is already
    /// correct, or a still-dirty workflow re-triggers on its next read.
    pub fn spawn_worker(
        queue: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Uuid>,
        engine: Arc<ApprovalEngine>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(workflow_id) = rx.recv().await {
                queue.pending.lock().await.remove(&workflow_id);

                match engine.recalculate(workflow_id).await {
                    Ok(recalculation) if recalculation.changed => {
                        info!(
                            workflow_id = %workflow_id,
                            status = %recalculation.workflow.status,
                            "queued recalculation changed workflow status"
                        );
                    }
                    Ok(_) => {
                        debug!(workflow_id = %workflow_id, "queued recalculation left status unchanged");
                    }
                    Err(EngineError::Concurrency { .. }) => {
                        debug!(
                            workflow_id = %workflow_id,
                            "concurrent recalculation already wrote a fresh status"
                        );
                    }
                    Err(err) => {
                        warn!(workflow_id = %workflow_id, error = %err, "queued recalculation failed");
                    }
                }
            }
        })
    }
}

/// Dispatch sink wired into the engine: recalculations land on the
/// in-process queue, status-changed events go to the action sink.
pub struct ServiceDispatchSink {
    queue: Arc<RecalcQueue>,
    actions: Arc<dyn DispatchSink>,
}

impl ServiceDispatchSink {
    pub fn new(queue: Arc<RecalcQueue>, actions: Arc<dyn DispatchSink>) -> Self {
        Self { queue, actions }
    }
}

#[async_trait]
impl DispatchSink for ServiceDispatchSink {
    async fn enqueue_recalculation(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        self.queue
            .enqueue(workflow_id)
            .await
            .map(|_| ())
            .map_err(|err| EngineError::Dispatch(err.to_string()))
    }

    async fn enqueue_status_changed(&self, event: StatusChangedEvent) -> Result<(), EngineError> {
        self.actions.enqueue_status_changed(event).await
    }
}
