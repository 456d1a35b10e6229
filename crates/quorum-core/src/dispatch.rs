use crate::error::EngineError;
use crate::types::StatusChangedEvent;
use async_trait::async_trait;
use uuid::Uuid;

/// Queue/event collaborator. Both methods carry best-effort semantics at
/// the call sites: the engine logs and swallows their failures, because the
/// durable state they announce is already written.
#[async_trait]
pub trait DispatchSink: Send + Sync {
    /// Schedule an asynchronous recalculation. Implementations deduplicate
    /// by workflow id; repeat enqueues for the same workflow collapse.
    async fn enqueue_recalculation(&self, workflow_id: Uuid) -> Result<(), EngineError>;

    /// Hand a terminal status transition to the action-dispatch workers.
    /// Fire-and-forget; no acknowledgement is required.
    async fn enqueue_status_changed(&self, event: StatusChangedEvent) -> Result<(), EngineError>;
}
