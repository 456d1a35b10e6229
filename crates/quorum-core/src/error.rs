use crate::types::WorkflowStatus;
use thiserror::Error;
use uuid::Uuid;

/// Quorum engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid approval rule: {0}")]
    Rule(#[from] RuleError),

    #[error("vote not allowed: {0}")]
    CantVote(#[from] CantVoteReason),

    #[error("invalid vote payload: {0}")]
    VotePayload(#[from] VotePayloadError),

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(Uuid),

    #[error("template '{0}' not found")]
    TemplateNotFound(Uuid),

    #[error("template '{0}' is not active")]
    TemplateNotActive(Uuid),

    #[error("workflow '{workflow_id}' is already terminal ({status})")]
    TerminalWorkflow {
        workflow_id: Uuid,
        status: WorkflowStatus,
    },

    #[error("expiry horizon must be positive, got {0} hours")]
    InvalidExpiry(i64),

    #[error("vote '{0}' is already recorded")]
    DuplicateVote(Uuid),

    #[error("concurrent update on workflow '{workflow_id}': stored version moved past {expected}")]
    Concurrency { workflow_id: Uuid, expected: u64 },

    #[error("malformed persisted content: {0}")]
    MalformedContent(String),

    #[error("dispatch enqueue failed: {0}")]
    Dispatch(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Stable snake_case code surfaced to API callers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rule(err) => err.code(),
            Self::CantVote(reason) => reason.code(),
            Self::VotePayload(err) => err.code(),
            Self::WorkflowNotFound(_) => "workflow_not_found",
            Self::TemplateNotFound(_) => "template_not_found",
            Self::TemplateNotActive(_) => "template_not_active",
            Self::TerminalWorkflow { .. } => "workflow_already_terminal",
            Self::InvalidExpiry(_) => "invalid_expiry",
            Self::DuplicateVote(_) => "duplicate_vote",
            Self::Concurrency { .. } => "concurrency_error",
            Self::MalformedContent(_) => "malformed_content",
            Self::Dispatch(_) => "dispatch_error",
            Self::Storage(_) => "storage_error",
            Self::Serialization(_) => "serialization_error",
        }
    }
}

/// Structural violations in an approval rule tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("and rule must contain at least one child rule")]
    EmptyAnd,

    #[error("or rule must contain at least one child rule")]
    EmptyOr,

    #[error("rule nesting exceeds the maximum depth of {max}")]
    NestingTooDeep { max: usize },

    #[error("group rule requires min_count >= 1")]
    InvalidMinCount,

    #[error("group rule requires a non-empty group id")]
    InvalidGroupId,

    #[error("unknown rule type '{0}'")]
    InvalidRuleType(String),

    #[error("malformed persisted rule tree: {0}")]
    MalformedContent(String),
}

impl RuleError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyAnd => "and_rule_must_have_rules",
            Self::EmptyOr => "or_rule_must_have_rules",
            Self::NestingTooDeep { .. } => "max_rule_nesting_exceeded",
            Self::InvalidMinCount => "group_rule_invalid_min_count",
            Self::InvalidGroupId => "group_rule_invalid_group_id",
            Self::InvalidRuleType(_) => "invalid_rule_type",
            Self::MalformedContent(_) => "malformed_content",
        }
    }
}

/// Deterministic, user-facing reasons why an entity may not vote right now.
///
/// The ordering of the checks that produce these reasons is fixed; the same
/// inputs always yield the same reason.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CantVoteReason {
    #[error("the workflow deadline has passed")]
    WorkflowExpired,

    #[error("the workflow was cancelled")]
    WorkflowCancelled,

    #[error("the workflow already reached a decision")]
    WorkflowAlreadyDecided,

    #[error("the workflow template is no longer open for voting")]
    TemplateNotActive,

    #[error("the entity holds no role that grants voting")]
    EntityNotEligible,

    #[error("the entity belongs to none of the groups the rule tree requires")]
    EntityNotInRequiredGroup,
}

impl CantVoteReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkflowExpired => "workflow_expired",
            Self::WorkflowCancelled => "workflow_cancelled",
            Self::WorkflowAlreadyDecided => "workflow_already_approved",
            Self::TemplateNotActive => "workflow_template_not_active",
            Self::EntityNotEligible => "entity_not_eligible_to_vote",
            Self::EntityNotInRequiredGroup => "entity_not_in_required_group",
        }
    }
}

/// Kind-specific vote payload violations, rejected before any write.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VotePayloadError {
    #[error("approve votes must name at least one group")]
    ApproveRequiresGroups,

    #[error("veto votes must not carry groups")]
    VetoCarriesGroups,

    #[error("withdraw votes must not carry groups")]
    WithdrawCarriesGroups,
}

impl VotePayloadError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ApproveRequiresGroups => "approve_vote_requires_groups",
            Self::VetoCarriesGroups => "veto_vote_must_not_carry_groups",
            Self::WithdrawCarriesGroups => "withdraw_vote_must_not_carry_groups",
        }
    }
}
