//! Directory and dispatch adapters for the quorum engine.

#![deny(unsafe_code)]

use async_trait::async_trait;
use quorum_core::{
    DispatchSink, EngineError, EntityRef, MembershipDirectory, RuleError, StatusChangedEvent,
    TemplateDirectory, VoterProfile, WorkflowTemplate,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("directory fixture IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory fixture serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("template '{id}' carries an invalid rule: {source}")]
    Rule { id: Uuid, source: RuleError },
}

/// On-disk shape of a directory fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryFixture {
    #[serde(default)]
    pub templates: Vec<WorkflowTemplate>,
    #[serde(default)]
    pub profiles: Vec<VoterProfile>,
}

/// File-loadable membership and template directory.
///
/// Stands in for the external group/template collaborators in local runs
/// and tests. Unknown entities resolve to an empty profile, not an error;
/// templates are rule-validated at load time so a malformed fixture fails
/// fast instead of surfacing mid-vote.
#[derive(Debug, Default)]
pub struct FixtureDirectory {
    templates: RwLock<HashMap<Uuid, WorkflowTemplate>>,
    profiles: RwLock<HashMap<EntityRef, VoterProfile>>,
}

impl FixtureDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FixtureError> {
        let bytes = fs::read(path)?;
        let fixture: DirectoryFixture = serde_json::from_slice(&bytes)?;
        Self::from_fixture(fixture)
    }

    pub fn from_fixture(fixture: DirectoryFixture) -> Result<Self, FixtureError> {
        let mut templates = HashMap::new();
        for template in fixture.templates {
            template
                .approval_rule
                .validate()
                .map_err(|source| FixtureError::Rule {
                    id: template.id,
                    source,
                })?;
            templates.insert(template.id, template);
        }

        let profiles = fixture
            .profiles
            .into_iter()
            .map(|profile| (profile.entity, profile))
            .collect();

        Ok(Self {
            templates: RwLock::new(templates),
            profiles: RwLock::new(profiles),
        })
    }

    pub async fn insert_template(&self, template: WorkflowTemplate) -> Result<(), FixtureError> {
        template
            .approval_rule
            .validate()
            .map_err(|source| FixtureError::Rule {
                id: template.id,
                source,
            })?;
        self.templates.write().await.insert(template.id, template);
        Ok(())
    }

    pub async fn insert_profile(&self, profile: VoterProfile) {
        self.profiles.write().await.insert(profile.entity, profile);
    }

    pub async fn template_count(&self) -> usize {
        self.templates.read().await.len()
    }
}

#[async_trait]
impl TemplateDirectory for FixtureDirectory {
    async fn by_id(&self, template_id: Uuid) -> Result<WorkflowTemplate, EngineError> {
        self.templates
            .read()
            .await
            .get(&template_id)
            .cloned()
            .ok_or(EngineError::TemplateNotFound(template_id))
    }
}

#[async_trait]
impl MembershipDirectory for FixtureDirectory {
    async fn profile_of(&self, entity: &EntityRef) -> Result<VoterProfile, EngineError> {
        Ok(self
            .profiles
            .read()
            .await
            .get(entity)
            .cloned()
            .unwrap_or_else(|| VoterProfile::empty(*entity)))
    }
}

/// Captures enqueued work for assertions.
#[derive(Debug, Default)]
pub struct RecordingDispatchSink {
    recalculations: Mutex<Vec<Uuid>>,
    events: Mutex<Vec<StatusChangedEvent>>,
}

impl RecordingDispatchSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recalculations(&self) -> Vec<Uuid> {
        self.recalculations.lock().await.clone()
    }

    pub async fn events(&self) -> Vec<StatusChangedEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl DispatchSink for RecordingDispatchSink {
    async fn enqueue_recalculation(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        self.recalculations.lock().await.push(workflow_id);
        Ok(())
    }

    async fn enqueue_status_changed(&self, event: StatusChangedEvent) -> Result<(), EngineError> {
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Logs dispatched work; stands in for the external action workers.
#[derive(Debug, Clone, Default)]
pub struct TracingDispatchSink;

#[async_trait]
impl DispatchSink for TracingDispatchSink {
    async fn enqueue_recalculation(&self, workflow_id: Uuid) -> Result<(), EngineError> {
        info!(workflow_id = %workflow_id, "recalculation requested");
        Ok(())
    }

    async fn enqueue_status_changed(&self, event: StatusChangedEvent) -> Result<(), EngineError> {
        info!(
            workflow_id = %event.workflow_id,
            old_status = %event.old_status,
            new_status = %event.new_status,
            actions = event.template_actions.len(),
            "workflow status changed"
        );
        Ok(())
    }
}

/// Deterministic failing sink for exercising the best-effort paths.
#[derive(Debug, Clone)]
pub struct FailingDispatchSink {
    reason: String,
}

impl FailingDispatchSink {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl DispatchSink for FailingDispatchSink {
    async fn enqueue_recalculation(&self, _workflow_id: Uuid) -> Result<(), EngineError> {
        Err(EngineError::Dispatch(self.reason.clone()))
    }

    async fn enqueue_status_changed(&self, _event: StatusChangedEvent) -> Result<(), EngineError> {
        Err(EngineError::Dispatch(self.reason.clone()))
    }
}
