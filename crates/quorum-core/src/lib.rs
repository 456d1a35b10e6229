//! Quorum core: approval policy trees, vote-consistency evaluation, and the
//! optimistic-concurrency recalculation protocol.
//!
//! The evaluator is pure and deterministic; orchestration talks to storage,
//! directory and dispatch collaborators through narrow async traits, and the
//! per-workflow version counter is the only mutual-exclusion primitive.

#![deny(unsafe_code)]

pub mod directory;
pub mod dispatch;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod rule;
pub mod storage;
pub mod types;

pub use directory::{MembershipDirectory, TemplateDirectory};
pub use dispatch::DispatchSink;
pub use eligibility::can_vote;
pub use engine::{ApprovalEngine, ApprovalEngineConfig, Recalculation};
pub use error::{CantVoteReason, EngineError, RuleError, VotePayloadError};
pub use evaluator::{evaluate, MembershipView};
pub use rule::{ApprovalRule, MAX_RULE_DEPTH};
pub use storage::{MemoryStore, PostgresStore, Storage, StorageConfig, VoteStore, WorkflowStore};
pub use types::{
    CastVoteRequest, CreateWorkflowRequest, EntityKind, EntityRef, GroupRole, Membership,
    StatusChangedEvent, StatusPatch, SystemRole, TemplateAction, TemplateStatus, Vote, VoteKind,
    VoterProfile, Workflow, WorkflowStatus, WorkflowTemplate,
};
