use crate::error::CantVoteReason;
use crate::types::{TemplateStatus, VoterProfile, Workflow, WorkflowStatus, WorkflowTemplate};
use chrono::{DateTime, Utc};

/// Decide whether `profile` may cast a vote on `workflow` right now.
///
/// Pure given its inputs; performs no reads or writes. The checks run in a
/// fixed order and the first failing reason wins, so error reporting is
/// deterministic and stable. Called both as a standalone read-only query
/// and as the pre-condition inside vote casting.
pub fn can_vote(
    workflow: &Workflow,
    template: &WorkflowTemplate,
    profile: &VoterProfile,
    now: DateTime<Utc>,
) -> Result<(), CantVoteReason> {
    if now > workflow.expires_at || workflow.status == WorkflowStatus::Expired {
        return Err(CantVoteReason::WorkflowExpired);
    }

    if workflow.status == WorkflowStatus::Canceled {
        return Err(CantVoteReason::WorkflowCancelled);
    }

    if matches!(
        workflow.status,
        WorkflowStatus::Approved | WorkflowStatus::Rejected
    ) {
        return Err(CantVoteReason::WorkflowAlreadyDecided);
    }

    match template.status {
        TemplateStatus::Active => {}
        TemplateStatus::Deprecated if template.allow_voting_on_deprecated_template => {}
        _ => return Err(CantVoteReason::TemplateNotActive),
    }

    if !profile.may_vote() {
        return Err(CantVoteReason::EntityNotEligible);
    }

    let required = template.approval_rule.referenced_group_ids();
    let in_required_group = profile
        .memberships
        .iter()
        .any(|membership| required.contains(&membership.group_id));
    if !in_required_group {
        return Err(CantVoteReason::EntityNotInRequiredGroup);
    }

    Ok(())
}
