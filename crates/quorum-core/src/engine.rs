use crate::directory::{MembershipDirectory, TemplateDirectory};
use crate::dispatch::DispatchSink;
use crate::eligibility;
use crate::error::EngineError;
use crate::evaluator::{evaluate, MembershipView};
use crate::storage::{VoteStore, WorkflowStore};
use crate::types::{
    CastVoteRequest, CreateWorkflowRequest, EntityRef, StatusChangedEvent, StatusPatch, Vote,
    Workflow, WorkflowStatus, WorkflowTemplate,
};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct ApprovalEngineConfig {
    /// Expiry horizon applied when neither the request nor the template
    /// names one.
    pub default_expires_in_hours: i64,
}

impl Default for ApprovalEngineConfig {
    fn default() -> Self {
        Self {
            default_expires_in_hours: 72,
        }
    }
}

/// Outcome of one recalculation pass.
#[derive(Debug, Clone)]
pub struct Recalculation {
    pub workflow: Workflow,
    pub previous_status: WorkflowStatus,
    pub changed: bool,
}

/// Orchestrates vote casting and status recalculation over the narrow
/// storage, directory and dispatch collaborators.
///
/// No in-process locks coordinate concurrent callers; the per-workflow
/// version counter enforced by the store's conditional update is the only
/// mutual-exclusion primitive.
pub struct ApprovalEngine {
    workflows: Arc<dyn WorkflowStore>,
    votes: Arc<dyn VoteStore>,
    memberships: Arc<dyn MembershipDirectory>,
    templates: Arc<dyn TemplateDirectory>,
    dispatch: Arc<dyn DispatchSink>,
    config: ApprovalEngineConfig,
}

impl ApprovalEngine {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        votes: Arc<dyn VoteStore>,
        memberships: Arc<dyn MembershipDirectory>,
        templates: Arc<dyn TemplateDirectory>,
        dispatch: Arc<dyn DispatchSink>,
        config: ApprovalEngineConfig,
    ) -> Self {
        Self {
            workflows,
            votes,
            memberships,
            templates,
            dispatch,
            config,
        }
    }

    /// Open a Pending workflow against an active template.
    pub async fn create_workflow(
        &self,
        request: CreateWorkflowRequest,
    ) -> Result<Workflow, EngineError> {
        let template = self.templates.by_id(request.template_id).await?;
        if template.status != crate::types::TemplateStatus::Active {
            return Err(EngineError::TemplateNotActive(template.id));
        }
        template.approval_rule.validate()?;

        let hours = request
            .expires_in_hours
            .or(template.default_expires_in_hours)
            .unwrap_or(self.config.default_expires_in_hours);
        if hours <= 0 {
            return Err(EngineError::InvalidExpiry(hours));
        }

        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::new_v4(),
            name: request.name,
            template_id: template.id,
            status: WorkflowStatus::Pending,
            expires_at: now + Duration::hours(hours),
            recalculation_required: false,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.workflows.insert(workflow).await
    }

    /// Read a workflow, recalculating first when its dirty marker is set.
    ///
    /// This is the lazy half of the recalculation trigger; the queue
    /// consumer is the eager half, and either one alone keeps status fresh.
    pub async fn workflow(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        let workflow = self.workflows.get_by_id(workflow_id).await?;
        if !workflow.recalculation_required {
            return Ok(workflow);
        }

        match self.recalculate(workflow_id).await {
            Ok(recalculation) => Ok(recalculation.workflow),
            // A concurrent recalculation already wrote the fresh result.
            Err(EngineError::Concurrency { .. }) => self.workflows.get_by_id(workflow_id).await,
            Err(err) => Err(err),
        }
    }

    pub async fn votes_of(&self, workflow_id: Uuid) -> Result<Vec<Vote>, EngineError> {
        // Fail with not-found rather than an empty ledger for unknown ids.
        self.workflows.get_by_id(workflow_id).await?;
        self.votes.all_for_workflow(workflow_id).await
    }

    /// Read-only eligibility query, surfaced to callers as "can I vote".
    pub async fn can_vote(&self, workflow_id: Uuid, voter: &EntityRef) -> Result<(), EngineError> {
        let workflow = self.workflows.get_by_id(workflow_id).await?;
        let template = self.resolved_template(&workflow).await?;
        let profile = self.memberships.profile_of(voter).await?;
        eligibility::can_vote(&workflow, &template, &profile, Utc::now())?;
        Ok(())
    }

    /// Cast a vote: eligibility gate, payload validation, atomic
    /// vote-plus-dirty-mark write, then a best-effort recalculation enqueue.
    ///
    /// The eligibility gate runs before the write without holding anything;
    /// a vote that slips past a concurrent status change is reconciled
    /// authoritatively at recalculation time.
    pub async fn cast_vote(&self, request: CastVoteRequest) -> Result<Vote, EngineError> {
        let workflow = self.workflows.get_by_id(request.workflow_id).await?;
        let template = self.resolved_template(&workflow).await?;
        let profile = self.memberships.profile_of(&request.voter).await?;
        eligibility::can_vote(&workflow, &template, &profile, Utc::now())?;

        let vote = Vote::new(
            request.workflow_id,
            request.voter,
            request.kind,
            request.voted_for_groups,
            request.reason,
        )?;

        let stored = self.votes.append(vote).await?;

        if let Err(err) = self.dispatch.enqueue_recalculation(workflow.id).await {
            warn!(
                workflow_id = %workflow.id,
                error = %err,
                "recalculation enqueue failed; the next read will recover"
            );
        }

        Ok(stored)
    }

    /// Re-derive status from the rule tree and the current vote ledger,
    /// writing the result under the version observed at read time.
    ///
    /// Idempotent: running it twice over the same ledger converges to the
    /// same status. A failed guard means another recalculation already ran;
    /// callers must not blind-retry.
    pub async fn recalculate(&self, workflow_id: Uuid) -> Result<Recalculation, EngineError> {
        let workflow = self.workflows.get_by_id(workflow_id).await?;
        let observed_version = workflow.version;

        if workflow.status.is_terminal() {
            // Terminal status is final. A stray dirty flag (a vote that
            // raced the terminal transition) is cleared without touching
            // the status.
            if !workflow.recalculation_required {
                return Ok(Recalculation {
                    previous_status: workflow.status,
                    workflow,
                    changed: false,
                });
            }
            let updated = self
                .workflows
                .conditional_update(
                    workflow_id,
                    observed_version,
                    StatusPatch {
                        status: workflow.status,
                        recalculation_required: false,
                    },
                )
                .await?;
            return Ok(Recalculation {
                previous_status: workflow.status,
                workflow: updated,
                changed: false,
            });
        }

        let template = self.resolved_template(&workflow).await?;
        let votes = self.votes.all_for_workflow(workflow_id).await?;
        let memberships = self.membership_view(&votes).await?;

        let now = Utc::now();
        let status = evaluate(
            &template.approval_rule,
            &votes,
            &memberships,
            workflow.expires_at,
            now,
        );

        let previous_status = workflow.status;
        let updated = self
            .workflows
            .conditional_update(
                workflow_id,
                observed_version,
                StatusPatch {
                    status,
                    recalculation_required: false,
                },
            )
            .await?;
        debug!(
            workflow_id = %workflow_id,
            status = %updated.status,
            "recalculated workflow status"
        );

        if previous_status == WorkflowStatus::Pending && status.is_terminal() {
            self.emit_status_changed(&updated, previous_status, &template)
                .await;
        }

        Ok(Recalculation {
            workflow: updated,
            previous_status,
            changed: previous_status != status,
        })
    }

    /// Cancel a workflow. External trigger only (operator action or a
    /// template-deprecation cascade); never produced by evaluation.
    pub async fn cancel_workflow(&self, workflow_id: Uuid) -> Result<Workflow, EngineError> {
        let workflow = self.workflows.get_by_id(workflow_id).await?;
        if workflow.status.is_terminal() {
            return Err(EngineError::TerminalWorkflow {
                workflow_id,
                status: workflow.status,
            });
        }

        // Resolve the template before the write so nothing can fail after
        // the cancellation is durable.
        let template = self.resolved_template(&workflow).await?;

        let previous_status = workflow.status;
        let updated = self
            .workflows
            .conditional_update(
                workflow_id,
                workflow.version,
                StatusPatch {
                    status: WorkflowStatus::Canceled,
                    recalculation_required: false,
                },
            )
            .await?;

        if previous_status == WorkflowStatus::Pending {
            self.emit_status_changed(&updated, previous_status, &template)
                .await;
        }

        Ok(updated)
    }

    /// Load the workflow's template and defensively re-validate its rule
    /// tree; a template that decodes to an invalid tree is malformed
    /// content, never silently coerced.
    async fn resolved_template(
        &self,
        workflow: &Workflow,
    ) -> Result<WorkflowTemplate, EngineError> {
        let template = self.templates.by_id(workflow.template_id).await?;
        template.approval_rule.validate().map_err(|err| {
            EngineError::MalformedContent(format!(
                "template '{}' carries an invalid rule tree: {err}",
                template.id
            ))
        })?;
        Ok(template)
    }

    /// Resolve the evaluation-time membership view for every distinct voter
    /// in the ledger.
    async fn membership_view(&self, votes: &[Vote]) -> Result<MembershipView, EngineError> {
        let mut view = MembershipView::new();
        let mut seen = HashSet::new();
        for vote in votes {
            if !seen.insert(vote.voter) {
                continue;
            }
            let profile = self.memberships.profile_of(&vote.voter).await?;
            view.insert(
                vote.voter,
                profile
                    .memberships
                    .into_iter()
                    .map(|membership| membership.group_id),
            );
        }
        Ok(view)
    }

    async fn emit_status_changed(
        &self,
        workflow: &Workflow,
        previous_status: WorkflowStatus,
        template: &WorkflowTemplate,
    ) {
        let event = StatusChangedEvent {
            workflow_id: workflow.id,
            old_status: previous_status,
            new_status: workflow.status,
            template_actions: template.actions.clone(),
            occurred_at: Utc::now(),
        };

        // Best-effort: the status change is already durable; only the
        // side-effect actions may lag behind an enqueue failure.
        if let Err(err) = self.dispatch.enqueue_status_changed(event).await {
            warn!(
                workflow_id = %workflow.id,
                error = %err,
                "status-changed dispatch enqueue failed; actions may lag"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{MembershipDirectory, TemplateDirectory};
    use crate::rule::ApprovalRule;
    use crate::storage::Storage;
    use crate::types::{
        GroupRole, Membership, SystemRole, TemplateAction, TemplateStatus, VoteKind, VoterProfile,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct StaticDirectory {
        templates: HashMap<Uuid, WorkflowTemplate>,
        profiles: HashMap<EntityRef, VoterProfile>,
    }

    #[async_trait]
    impl TemplateDirectory for StaticDirectory {
        async fn by_id(&self, template_id: Uuid) -> Result<WorkflowTemplate, EngineError> {
            self.templates
                .get(&template_id)
                .cloned()
                .ok_or(EngineError::TemplateNotFound(template_id))
        }
    }

    #[async_trait]
    impl MembershipDirectory for StaticDirectory {
        async fn profile_of(&self, entity: &EntityRef) -> Result<VoterProfile, EngineError> {
            Ok(self
                .profiles
                .get(entity)
                .cloned()
                .unwrap_or_else(|| VoterProfile::empty(*entity)))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        recalculations: Mutex<Vec<Uuid>>,
        events: Mutex<Vec<StatusChangedEvent>>,
    }

    #[async_trait]
    impl DispatchSink for RecordingSink {
        async fn enqueue_recalculation(&self, workflow_id: Uuid) -> Result<(), EngineError> {
            self.recalculations.lock().await.push(workflow_id);
            Ok(())
        }

        async fn enqueue_status_changed(
            &self,
            event: StatusChangedEvent,
        ) -> Result<(), EngineError> {
            self.events.lock().await.push(event);
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl DispatchSink for FailingSink {
        async fn enqueue_recalculation(&self, _workflow_id: Uuid) -> Result<(), EngineError> {
            Err(EngineError::Dispatch("queue unavailable".to_string()))
        }

        async fn enqueue_status_changed(
            &self,
            _event: StatusChangedEvent,
        ) -> Result<(), EngineError> {
            Err(EngineError::Dispatch("queue unavailable".to_string()))
        }
    }

    struct Fixture {
        engine: ApprovalEngine,
        storage: Storage,
        sink: Arc<RecordingSink>,
        template_id: Uuid,
        voters: HashMap<&'static str, EntityRef>,
    }

    fn eng_quorum_template() -> WorkflowTemplate {
        WorkflowTemplate {
            id: Uuid::new_v4(),
            name: "release-signoff".to_string(),
            version: 1,
            approval_rule: ApprovalRule::group("eng", 2),
            actions: vec![TemplateAction::Email {
                recipient: "release@quorum.dev".to_string(),
            }],
            default_expires_in_hours: Some(48),
            status: TemplateStatus::Active,
            allow_voting_on_deprecated_template: false,
        }
    }

    fn voter_profile(entity: EntityRef, groups: &[&str]) -> VoterProfile {
        VoterProfile {
            entity,
            memberships: groups
                .iter()
                .map(|group| Membership {
                    entity,
                    group_id: group.to_string(),
                    role: GroupRole::Member,
                    since: Utc::now(),
                })
                .collect(),
            roles: vec![SystemRole::Voter],
        }
    }

    fn build_fixture(template: WorkflowTemplate) -> Fixture {
        let template_id = template.id;
        let mut voters = HashMap::new();
        let mut profiles = HashMap::new();
        for (name, groups) in [
            ("alice", vec!["eng"]),
            ("bob", vec!["eng"]),
            ("carol", vec!["eng", "legal"]),
            ("mallory", vec!["marketing"]),
        ] {
            let entity = EntityRef::user(Uuid::new_v4());
            profiles.insert(entity, voter_profile(entity, &groups));
            voters.insert(name, entity);
        }

        let directory = Arc::new(StaticDirectory {
            templates: HashMap::from([(template_id, template)]),
            profiles,
        });
        let sink = Arc::new(RecordingSink::default());
        let storage = Storage::in_memory();
        let engine = ApprovalEngine::new(
            storage.workflows.clone(),
            storage.votes.clone(),
            directory.clone(),
            directory,
            sink.clone(),
            ApprovalEngineConfig::default(),
        );

        Fixture {
            engine,
            storage,
            sink,
            template_id,
            voters,
        }
    }

    fn approve_request(workflow_id: Uuid, voter: EntityRef, groups: &[&str]) -> CastVoteRequest {
        CastVoteRequest {
            workflow_id,
            voter,
            kind: VoteKind::Approve,
            voted_for_groups: groups.iter().map(|group| group.to_string()).collect(),
            reason: None,
        }
    }

    #[tokio::test]
    async fn create_workflow_uses_the_template_expiry_default() {
        let fixture = build_fixture(eng_quorum_template());
        let workflow = fixture
            .engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id: fixture.template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap();

        assert_eq!(workflow.status, WorkflowStatus::Pending);
        assert_eq!(workflow.version, 0);
        let horizon = workflow.expires_at - workflow.created_at;
        assert_eq!(horizon.num_hours(), 48);
    }

    #[tokio::test]
    async fn create_workflow_rejects_inactive_templates() {
        let mut template = eng_quorum_template();
        template.status = TemplateStatus::Deprecated;
        let fixture = build_fixture(template);

        let err = fixture
            .engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id: fixture.template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TemplateNotActive(_)));
    }

    #[tokio::test]
    async fn quorum_votes_approve_and_emit_one_event() {
        let fixture = build_fixture(eng_quorum_template());
        let workflow = fixture
            .engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id: fixture.template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap();

        let alice = fixture.voters["alice"];
        let bob = fixture.voters["bob"];

        fixture
            .engine
            .cast_vote(approve_request(workflow.id, alice, &["eng"]))
            .await
            .unwrap();
        let fresh = fixture.engine.workflow(workflow.id).await.unwrap();
        assert_eq!(fresh.status, WorkflowStatus::Pending);
        assert!(!fresh.recalculation_required);

        fixture
            .engine
            .cast_vote(approve_request(workflow.id, bob, &["eng"]))
            .await
            .unwrap();
        let fresh = fixture.engine.workflow(workflow.id).await.unwrap();
        assert_eq!(fresh.status, WorkflowStatus::Approved);

        let events = fixture.sink.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].old_status, WorkflowStatus::Pending);
        assert_eq!(events[0].new_status, WorkflowStatus::Approved);
        assert_eq!(events[0].template_actions.len(), 1);

        let recalcs = fixture.sink.recalculations.lock().await;
        assert_eq!(recalcs.len(), 2);
    }

    #[tokio::test]
    async fn veto_rejects_even_after_quorum() {
        let fixture = build_fixture(eng_quorum_template());
        let workflow = fixture
            .engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id: fixture.template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap();

        for name in ["alice", "bob"] {
            fixture
                .engine
                .cast_vote(approve_request(workflow.id, fixture.voters[name], &["eng"]))
                .await
                .unwrap();
        }
        fixture
            .engine
            .cast_vote(CastVoteRequest {
                workflow_id: workflow.id,
                voter: fixture.voters["carol"],
                kind: VoteKind::Veto,
                voted_for_groups: vec![],
                reason: Some("holding for the incident review".to_string()),
            })
            .await
            .unwrap();

        let fresh = fixture.engine.workflow(workflow.id).await.unwrap();
        assert_eq!(fresh.status, WorkflowStatus::Rejected);
    }

    #[tokio::test]
    async fn withdraw_reverts_an_unrecalculated_quorum() {
        let fixture = build_fixture(eng_quorum_template());
        let workflow = fixture
            .engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id: fixture.template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap();

        fixture
            .engine
            .cast_vote(approve_request(workflow.id, fixture.voters["alice"], &["eng"]))
            .await
            .unwrap();
        fixture
            .engine
            .cast_vote(approve_request(workflow.id, fixture.voters["bob"], &["eng"]))
            .await
            .unwrap();
        // Bob withdraws before any recalculation ran; the quorum never
        // becomes a stored Approved status.
        fixture
            .engine
            .cast_vote(CastVoteRequest {
                workflow_id: workflow.id,
                voter: fixture.voters["bob"],
                kind: VoteKind::Withdraw,
                voted_for_groups: vec![],
                reason: None,
            })
            .await
            .unwrap();

        let fresh = fixture.engine.workflow(workflow.id).await.unwrap();
        assert_eq!(fresh.status, WorkflowStatus::Pending);

        assert!(fixture.sink.events.lock().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_eligibility_writes_nothing() {
        let fixture = build_fixture(eng_quorum_template());
        let workflow = fixture
            .engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id: fixture.template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap();

        let err = fixture
            .engine
            .cast_vote(approve_request(
                workflow.id,
                fixture.voters["mallory"],
                &["eng"],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "entity_not_in_required_group");

        assert!(fixture.engine.votes_of(workflow.id).await.unwrap().is_empty());
        let stored = fixture.engine.workflow(workflow.id).await.unwrap();
        assert!(!stored.recalculation_required);
        assert_eq!(stored.version, 0);
    }

    #[tokio::test]
    async fn enqueue_failure_does_not_fail_the_cast() {
        let template = eng_quorum_template();
        let template_id = template.id;
        let alice = EntityRef::user(Uuid::new_v4());
        let directory = Arc::new(StaticDirectory {
            templates: HashMap::from([(template_id, template)]),
            profiles: HashMap::from([(alice, voter_profile(alice, &["eng"]))]),
        });
        let storage = Storage::in_memory();
        let engine = ApprovalEngine::new(
            storage.workflows,
            storage.votes,
            directory.clone(),
            directory,
            Arc::new(FailingSink),
            ApprovalEngineConfig::default(),
        );

        let workflow = engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap();

        engine
            .cast_vote(approve_request(workflow.id, alice, &["eng"]))
            .await
            .unwrap();

        // The vote landed and the dirty marker is set; the lazy read path
        // recovers without the queue.
        let fresh = engine.workflow(workflow.id).await.unwrap();
        assert!(!fresh.recalculation_required);
        assert_eq!(fresh.version, 2);
    }

    #[tokio::test]
    async fn dirty_expired_workflows_expire_on_the_next_read() {
        let fixture = build_fixture(eng_quorum_template());

        // A workflow whose deadline passed with an unsatisfied quorum; the
        // lone approval landed while it was still open.
        let now = Utc::now();
        let workflow = Workflow {
            id: Uuid::new_v4(),
            name: "release-1.4".to_string(),
            template_id: fixture.template_id,
            status: WorkflowStatus::Pending,
            expires_at: now - Duration::minutes(5),
            recalculation_required: false,
            version: 0,
            created_at: now - Duration::hours(49),
            updated_at: now - Duration::hours(49),
        };
        fixture
            .storage
            .workflows
            .insert(workflow.clone())
            .await
            .unwrap();
        let vote = Vote::approve(
            workflow.id,
            fixture.voters["alice"],
            vec!["eng".to_string()],
        )
        .unwrap();
        fixture.storage.votes.append(vote).await.unwrap();

        let fresh = fixture.engine.workflow(workflow.id).await.unwrap();
        assert_eq!(fresh.status, WorkflowStatus::Expired);
        assert!(!fresh.recalculation_required);

        let events = fixture.sink.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].new_status, WorkflowStatus::Expired);
    }

    #[tokio::test]
    async fn recalculation_of_a_terminal_workflow_only_clears_the_dirty_flag() {
        let fixture = build_fixture(eng_quorum_template());
        let workflow = fixture
            .engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id: fixture.template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap();

        let canceled = fixture.engine.cancel_workflow(workflow.id).await.unwrap();
        assert_eq!(canceled.status, WorkflowStatus::Canceled);

        let recalculation = fixture.engine.recalculate(workflow.id).await.unwrap();
        assert!(!recalculation.changed);
        assert_eq!(recalculation.workflow.status, WorkflowStatus::Canceled);
    }

    #[tokio::test]
    async fn cancel_is_rejected_on_terminal_workflows() {
        let fixture = build_fixture(eng_quorum_template());
        let workflow = fixture
            .engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id: fixture.template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap();

        fixture.engine.cancel_workflow(workflow.id).await.unwrap();
        let err = fixture.engine.cancel_workflow(workflow.id).await.unwrap_err();
        assert!(matches!(err, EngineError::TerminalWorkflow { .. }));

        // Cancellation of a pending workflow emitted its event once.
        assert_eq!(fixture.sink.events.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn votes_after_cancellation_are_rejected() {
        let fixture = build_fixture(eng_quorum_template());
        let workflow = fixture
            .engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id: fixture.template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap();
        fixture.engine.cancel_workflow(workflow.id).await.unwrap();

        let err = fixture
            .engine
            .cast_vote(approve_request(workflow.id, fixture.voters["alice"], &["eng"]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "workflow_cancelled");
    }

    #[tokio::test]
    async fn can_vote_query_reports_the_same_reason_as_casting() {
        let fixture = build_fixture(eng_quorum_template());
        let workflow = fixture
            .engine
            .create_workflow(CreateWorkflowRequest {
                name: "release-1.4".to_string(),
                template_id: fixture.template_id,
                expires_in_hours: None,
            })
            .await
            .unwrap();

        assert!(fixture
            .engine
            .can_vote(workflow.id, &fixture.voters["alice"])
            .await
            .is_ok());

        let err = fixture
            .engine
            .can_vote(workflow.id, &fixture.voters["mallory"])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "entity_not_in_required_group");
    }
}
