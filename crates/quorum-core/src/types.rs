use crate::error::{EngineError, VotePayloadError};
use crate::rule::ApprovalRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a voting principal. Machine agents vote through the same
/// ledger as humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: Uuid,
}

impl EntityRef {
    pub fn user(id: Uuid) -> Self {
        Self {
            kind: EntityKind::User,
            id,
        }
    }

    pub fn agent(id: Uuid) -> Self {
        Self {
            kind: EntityKind::Agent,
            id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.name(), self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    Agent,
}

impl EntityKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
        }
    }
}

/// Vote kinds. A withdraw supersedes the voter's earlier approve/veto
/// without deleting ledger history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Approve,
    Veto,
    Withdraw,
}

impl VoteKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Veto => "veto",
            Self::Withdraw => "withdraw",
        }
    }
}

/// A single cast vote. Votes are append-only; they are never mutated or
/// deleted once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub voter: EntityRef,
    pub kind: VoteKind,
    /// Non-empty iff `kind` is approve; names the group requirements the
    /// approval counts toward.
    pub voted_for_groups: Vec<String>,
    pub reason: Option<String>,
    pub casted_at: DateTime<Utc>,
}

impl Vote {
    /// Build a vote, enforcing kind-specific payload invariants.
    pub fn new(
        workflow_id: Uuid,
        voter: EntityRef,
        kind: VoteKind,
        voted_for_groups: Vec<String>,
        reason: Option<String>,
    ) -> Result<Self, EngineError> {
        match kind {
            VoteKind::Approve if voted_for_groups.is_empty() => {
                return Err(VotePayloadError::ApproveRequiresGroups.into());
            }
            VoteKind::Veto if !voted_for_groups.is_empty() => {
                return Err(VotePayloadError::VetoCarriesGroups.into());
            }
            VoteKind::Withdraw if !voted_for_groups.is_empty() => {
                return Err(VotePayloadError::WithdrawCarriesGroups.into());
            }
            _ => {}
        }

        Ok(Self {
            id: Uuid::new_v4(),
            workflow_id,
            voter,
            kind,
            voted_for_groups,
            reason,
            casted_at: Utc::now(),
        })
    }

    pub fn approve(
        workflow_id: Uuid,
        voter: EntityRef,
        voted_for_groups: Vec<String>,
    ) -> Result<Self, EngineError> {
        Self::new(workflow_id, voter, VoteKind::Approve, voted_for_groups, None)
    }

    pub fn veto(workflow_id: Uuid, voter: EntityRef, reason: Option<String>) -> Result<Self, EngineError> {
        Self::new(workflow_id, voter, VoteKind::Veto, Vec::new(), reason)
    }

    pub fn withdraw(workflow_id: Uuid, voter: EntityRef) -> Result<Self, EngineError> {
        Self::new(workflow_id, voter, VoteKind::Withdraw, Vec::new(), None)
    }
}

/// Workflow lifecycle states. Everything except `Pending` is terminal and
/// final: a terminal workflow is never re-opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Approved,
    Rejected,
    Canceled,
    Expired,
}

impl WorkflowStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A workflow under evaluation.
///
/// `version` is a monotonic counter: every persisted mutation increments it
/// and every conditional write checks it. `recalculation_required` is the
/// dirty marker set by vote writes and cleared only by a successful
/// recalculation against the observed version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub template_id: Uuid,
    pub status: WorkflowStatus,
    pub expires_at: DateTime<Utc>,
    pub recalculation_required: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Patch applied by the guarded conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusPatch {
    pub status: WorkflowStatus,
    pub recalculation_required: bool,
}

/// Template lifecycle states, owned by the external template collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Active,
    Deprecated,
}

/// Post-decision action carried opaquely on the status-changed event;
/// delivery is owned by the external dispatch workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemplateAction {
    Email { recipient: String },
    Webhook { url: String },
}

/// Approval template a workflow is created against. Immutable once active;
/// the engine reads `status` and the deprecated-voting flag only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: Uuid,
    pub name: String,
    pub version: u32,
    pub approval_rule: ApprovalRule,
    #[serde(default)]
    pub actions: Vec<TemplateAction>,
    pub default_expires_in_hours: Option<i64>,
    pub status: TemplateStatus,
    #[serde(default)]
    pub allow_voting_on_deprecated_template: bool,
}

/// Group membership record, read-only input owned by the membership
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub entity: EntityRef,
    pub group_id: String,
    pub role: GroupRole,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    Member,
    Maintainer,
}

/// System-wide roles. Vote capability requires `Voter` or `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRole {
    Requester,
    Voter,
    Admin,
}

/// Explicit capability bundle passed into the eligibility check; there is
/// no ambient auth state anywhere in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterProfile {
    pub entity: EntityRef,
    #[serde(default)]
    pub memberships: Vec<Membership>,
    #[serde(default)]
    pub roles: Vec<SystemRole>,
}

impl VoterProfile {
    /// A profile with no memberships and no roles; what the directory
    /// returns for an entity it has never seen.
    pub fn empty(entity: EntityRef) -> Self {
        Self {
            entity,
            memberships: Vec::new(),
            roles: Vec::new(),
        }
    }

    pub fn may_vote(&self) -> bool {
        self.roles
            .iter()
            .any(|role| matches!(role, SystemRole::Voter | SystemRole::Admin))
    }

    pub fn is_member_of(&self, group_id: &str) -> bool {
        self.memberships
            .iter()
            .any(|membership| membership.group_id == group_id)
    }
}

/// Event emitted when a workflow leaves `Pending` for a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangedEvent {
    pub workflow_id: Uuid,
    pub old_status: WorkflowStatus,
    pub new_status: WorkflowStatus,
    pub template_actions: Vec<TemplateAction>,
    pub occurred_at: DateTime<Utc>,
}

/// Request to open a workflow against a template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub template_id: Uuid,
    /// Overrides the template's default expiry horizon when present.
    pub expires_in_hours: Option<i64>,
}

/// Request to cast a vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVoteRequest {
    pub workflow_id: Uuid,
    pub voter: EntityRef,
    pub kind: VoteKind,
    #[serde(default)]
    pub voted_for_groups: Vec<String>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approve_vote_requires_at_least_one_group() {
        let err = Vote::approve(Uuid::new_v4(), EntityRef::user(Uuid::new_v4()), vec![]).unwrap_err();
        assert_eq!(err.code(), "approve_vote_requires_groups");
    }

    #[test]
    fn veto_and_withdraw_reject_group_payloads() {
        let workflow_id = Uuid::new_v4();
        let voter = EntityRef::user(Uuid::new_v4());

        let err = Vote::new(
            workflow_id,
            voter,
            VoteKind::Veto,
            vec!["eng".to_string()],
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "veto_vote_must_not_carry_groups");

        let err = Vote::new(
            workflow_id,
            voter,
            VoteKind::Withdraw,
            vec!["eng".to_string()],
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "withdraw_vote_must_not_carry_groups");
    }

    #[test]
    fn vote_capability_requires_voter_or_admin_role() {
        let entity = EntityRef::agent(Uuid::new_v4());
        let mut profile = VoterProfile::empty(entity);
        assert!(!profile.may_vote());

        profile.roles.push(SystemRole::Requester);
        assert!(!profile.may_vote());

        profile.roles.push(SystemRole::Voter);
        assert!(profile.may_vote());
    }

    #[test]
    fn terminal_statuses_are_everything_but_pending() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        for status in [
            WorkflowStatus::Approved,
            WorkflowStatus::Rejected,
            WorkflowStatus::Canceled,
            WorkflowStatus::Expired,
        ] {
            assert!(status.is_terminal());
        }
    }
}
