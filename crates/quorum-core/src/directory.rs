use crate::error::EngineError;
use crate::types::{EntityRef, VoterProfile, WorkflowTemplate};
use async_trait::async_trait;
use uuid::Uuid;

/// Group-membership collaborator. Implementations return an empty profile
/// for entities they have never seen, not an error.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    async fn profile_of(&self, entity: &EntityRef) -> Result<VoterProfile, EngineError>;
}

/// Template collaborator. The engine reads rule tree, status, the
/// deprecated-voting flag, actions and the default expiry; template
/// lifecycle (versioning, deprecation) lives elsewhere.
#[async_trait]
pub trait TemplateDirectory: Send + Sync {
    async fn by_id(&self, template_id: Uuid) -> Result<WorkflowTemplate, EngineError>;
}
