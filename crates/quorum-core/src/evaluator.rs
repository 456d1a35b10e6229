use crate::rule::ApprovalRule;
use crate::types::{EntityRef, Vote, VoteKind, WorkflowStatus};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Group memberships resolved at evaluation time, keyed by voter.
///
/// Membership is re-checked at evaluation, not vote, time: a voter who left
/// a group after approving no longer counts toward that group's quorum.
#[derive(Debug, Default, Clone)]
pub struct MembershipView {
    groups_by_entity: HashMap<EntityRef, HashSet<String>>,
}

impl MembershipView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: EntityRef, groups: impl IntoIterator<Item = String>) {
        self.groups_by_entity
            .entry(entity)
            .or_default()
            .extend(groups);
    }

    pub fn is_member(&self, entity: &EntityRef, group_id: &str) -> bool {
        self.groups_by_entity
            .get(entity)
            .map(|groups| groups.contains(group_id))
            .unwrap_or(false)
    }
}

/// Derive a workflow's status from its rule tree and full vote ledger.
///
/// Deterministic and side-effect-free: the same rule, votes, memberships
/// and clock always yield the same status, so running it twice converges.
/// `votes` is the ledger in ascending `casted_at` order with stable
/// insertion order; ties on `casted_at` resolve to the later entry.
pub fn evaluate(
    rule: &ApprovalRule,
    votes: &[Vote],
    memberships: &MembershipView,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> WorkflowStatus {
    let effective = effective_votes(votes);

    // A single veto from any eligible voter blocks approval regardless of
    // quorum elsewhere.
    if effective
        .values()
        .any(|vote| vote.kind == VoteKind::Veto)
    {
        return WorkflowStatus::Rejected;
    }

    if satisfied(rule, &effective, memberships) {
        return WorkflowStatus::Approved;
    }

    if now > expires_at {
        return WorkflowStatus::Expired;
    }

    WorkflowStatus::Pending
}

/// Reduce the ledger to each voter's latest vote. An effective withdraw
/// cancels the voter's earlier approve/veto and contributes nothing.
fn effective_votes(votes: &[Vote]) -> HashMap<EntityRef, &Vote> {
    let mut effective: HashMap<EntityRef, &Vote> = HashMap::new();
    for vote in votes {
        match effective.get(&vote.voter) {
            Some(existing) if existing.casted_at > vote.casted_at => {}
            _ => {
                effective.insert(vote.voter, vote);
            }
        }
    }
    effective
}

fn satisfied(
    rule: &ApprovalRule,
    effective: &HashMap<EntityRef, &Vote>,
    memberships: &MembershipView,
) -> bool {
    match rule {
        ApprovalRule::Group {
            group_id,
            min_count,
        } => {
            let approvals = effective
                .values()
                .filter(|vote| {
                    vote.kind == VoteKind::Approve
                        && vote.voted_for_groups.iter().any(|group| group == group_id)
                        && memberships.is_member(&vote.voter, group_id)
                })
                .count();
            approvals as u32 >= *min_count
        }
        ApprovalRule::And { rules } => rules
            .iter()
            .all(|rule| satisfied(rule, effective, memberships)),
        ApprovalRule::Or { rules } => rules
            .iter()
            .any(|rule| satisfied(rule, effective, memberships)),
    }
}
