use crate::error::EngineError;
use crate::types::{EntityKind, EntityRef, StatusPatch, Vote, VoteKind, Workflow, WorkflowStatus};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Workflow persistence backend configuration.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Keep workflows and votes in process memory only.
    Memory,
    /// Persist workflows and votes in PostgreSQL.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Workflow row store.
///
/// The conditional update is the only write path for workflow state after
/// creation: a single compare-and-swap at the storage boundary, never a
/// separate read-then-write.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert(&self, workflow: Workflow) -> Result<Workflow, EngineError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Workflow, EngineError>;

    /// Apply `patch` iff the stored version still equals `expected_version`,
    /// bumping the version in the same atomic operation. A moved version
    /// surfaces as a concurrency error, a missing row as not-found.
    async fn conditional_update(
        &self,
        id: Uuid,
        expected_version: u64,
        patch: StatusPatch,
    ) -> Result<Workflow, EngineError>;
}

/// Append-only vote ledger.
#[async_trait]
pub trait VoteStore: Send + Sync {
    /// Append the vote and set `recalculation_required = true`,
    /// `version += 1` on the parent workflow as one all-or-nothing unit.
    /// Fails closed when the workflow does not exist.
    async fn append(&self, vote: Vote) -> Result<Vote, EngineError>;

    async fn latest_by_voter(
        &self,
        workflow_id: Uuid,
        voter: EntityRef,
    ) -> Result<Option<Vote>, EngineError>;

    /// All votes for the workflow, ascending `casted_at` with stable
    /// insertion order on ties.
    async fn all_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<Vote>, EngineError>;
}

/// Bootstrapped store handles plus the backend label for health reporting.
#[derive(Clone)]
pub struct Storage {
    pub workflows: Arc<dyn WorkflowStore>,
    pub votes: Arc<dyn VoteStore>,
    backend: &'static str,
}

impl Storage {
    pub async fn bootstrap(config: StorageConfig) -> Result<Self, EngineError> {
        match config {
            StorageConfig::Memory => Ok(Self::in_memory()),
            StorageConfig::Postgres {
                database_url,
                max_connections,
            } => {
                let store = PostgresStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                let store = Arc::new(store);
                Ok(Self {
                    workflows: store.clone(),
                    votes: store,
                    backend: "postgres",
                })
            }
        }
    }

    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            workflows: store.clone(),
            votes: store,
            backend: "memory",
        }
    }

    pub fn backend_label(&self) -> &'static str {
        self.backend
    }
}

/// In-memory backend. A single lock over both maps makes the vote append
/// and the conditional update atomic units, matching the transactional
/// contract of the PostgreSQL backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    workflows: HashMap<Uuid, Workflow>,
    votes: HashMap<Uuid, Vec<Vote>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn insert(&self, workflow: Workflow) -> Result<Workflow, EngineError> {
        let mut state = self.state.write().await;
        state.votes.entry(workflow.id).or_default();
        state.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Workflow, EngineError> {
        let state = self.state.read().await;
        state
            .workflows
            .get(&id)
            .cloned()
            .ok_or(EngineError::WorkflowNotFound(id))
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected_version: u64,
        patch: StatusPatch,
    ) -> Result<Workflow, EngineError> {
        let mut state = self.state.write().await;
        let workflow = state
            .workflows
            .get_mut(&id)
            .ok_or(EngineError::WorkflowNotFound(id))?;

        if workflow.version != expected_version {
            return Err(EngineError::Concurrency {
                workflow_id: id,
                expected: expected_version,
            });
        }

        workflow.status = patch.status;
        workflow.recalculation_required = patch.recalculation_required;
        workflow.version += 1;
        workflow.updated_at = Utc::now();
        Ok(workflow.clone())
    }
}

#[async_trait]
impl VoteStore for MemoryStore {
    async fn append(&self, vote: Vote) -> Result<Vote, EngineError> {
        let mut state = self.state.write().await;
        let MemoryState { workflows, votes } = &mut *state;

        let workflow = workflows
            .get_mut(&vote.workflow_id)
            .ok_or(EngineError::WorkflowNotFound(vote.workflow_id))?;
        let ledger = votes.entry(vote.workflow_id).or_default();

        if ledger.iter().any(|existing| existing.id == vote.id) {
            return Err(EngineError::DuplicateVote(vote.id));
        }

        ledger.push(vote.clone());
        workflow.recalculation_required = true;
        workflow.version += 1;
        workflow.updated_at = Utc::now();
        Ok(vote)
    }

    async fn latest_by_voter(
        &self,
        workflow_id: Uuid,
        voter: EntityRef,
    ) -> Result<Option<Vote>, EngineError> {
        let state = self.state.read().await;
        let ledger = match state.votes.get(&workflow_id) {
            Some(ledger) => ledger,
            None => return Ok(None),
        };

        let mut latest: Option<&Vote> = None;
        for vote in ledger.iter().filter(|vote| vote.voter == voter) {
            match latest {
                Some(existing) if existing.casted_at > vote.casted_at => {}
                _ => latest = Some(vote),
            }
        }
        Ok(latest.cloned())
    }

    async fn all_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<Vote>, EngineError> {
        let state = self.state.read().await;
        let mut ledger = state
            .votes
            .get(&workflow_id)
            .cloned()
            .unwrap_or_default();
        ledger.sort_by_key(|vote| vote.casted_at);
        Ok(ledger)
    }
}

/// PostgreSQL backend. Identifiers are stored as TEXT; the schema is owned
/// here and created on bootstrap.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| EngineError::Storage(format!("postgres connect failed: {e}")))?;

        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                template_id TEXT NOT NULL,
                status TEXT NOT NULL,
                expires_at TIMESTAMPTZ NOT NULL,
                recalculation_required BOOLEAN NOT NULL,
                version BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                seq BIGSERIAL PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                workflow_id TEXT NOT NULL REFERENCES workflows (id),
                voter_kind TEXT NOT NULL,
                voter_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                voted_for_groups JSONB NOT NULL,
                reason TEXT NULL,
                casted_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("postgres schema create failed: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_votes_workflow_id ON votes (workflow_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(format!("postgres index create failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl WorkflowStore for PostgresStore {
    async fn insert(&self, workflow: Workflow) -> Result<Workflow, EngineError> {
        let version = encode_version(workflow.version)?;
        sqlx::query(
            r#"
            INSERT INTO workflows (
                id, name, template_id, status, expires_at,
                recalculation_required, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(workflow.id.to_string())
        .bind(&workflow.name)
        .bind(workflow.template_id.to_string())
        .bind(workflow.status.name())
        .bind(workflow.expires_at)
        .bind(workflow.recalculation_required)
        .bind(version)
        .bind(workflow.created_at)
        .bind(workflow.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("workflow insert failed: {e}")))?;

        Ok(workflow)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Workflow, EngineError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, template_id, status, expires_at,
                   recalculation_required, version, created_at, updated_at
            FROM workflows
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("workflow load failed: {e}")))?;

        match row {
            Some(row) => decode_workflow(&row),
            None => Err(EngineError::WorkflowNotFound(id)),
        }
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected_version: u64,
        patch: StatusPatch,
    ) -> Result<Workflow, EngineError> {
        let expected = encode_version(expected_version)?;
        let row = sqlx::query(
            r#"
            UPDATE workflows
            SET status = $3, recalculation_required = $4,
                version = version + 1, updated_at = $5
            WHERE id = $1 AND version = $2
            RETURNING id, name, template_id, status, expires_at,
                      recalculation_required, version, created_at, updated_at
            "#,
        )
        .bind(id.to_string())
        .bind(expected)
        .bind(patch.status.name())
        .bind(patch.recalculation_required)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("workflow conditional update failed: {e}")))?;

        if let Some(row) = row {
            return decode_workflow(&row);
        }

        // No row matched: decide between a version conflict and a missing
        // workflow.
        let exists = sqlx::query("SELECT 1 FROM workflows WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::Storage(format!("workflow existence check failed: {e}")))?;

        if exists.is_some() {
            Err(EngineError::Concurrency {
                workflow_id: id,
                expected: expected_version,
            })
        } else {
            Err(EngineError::WorkflowNotFound(id))
        }
    }
}

#[async_trait]
impl VoteStore for PostgresStore {
    async fn append(&self, vote: Vote) -> Result<Vote, EngineError> {
        let groups = serde_json::to_value(&vote.voted_for_groups)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EngineError::Storage(format!("vote transaction begin failed: {e}")))?;

        let marked = sqlx::query(
            r#"
            UPDATE workflows
            SET recalculation_required = TRUE, version = version + 1, updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(vote.workflow_id.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| EngineError::Storage(format!("workflow dirty-mark failed: {e}")))?;

        if marked.rows_affected() == 0 {
            return Err(EngineError::WorkflowNotFound(vote.workflow_id));
        }

        sqlx::query(
            r#"
            INSERT INTO votes (
                id, workflow_id, voter_kind, voter_id, kind,
                voted_for_groups, reason, casted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(vote.id.to_string())
        .bind(vote.workflow_id.to_string())
        .bind(vote.voter.kind.name())
        .bind(vote.voter.id.to_string())
        .bind(vote.kind.name())
        .bind(groups)
        .bind(&vote.reason)
        .bind(vote.casted_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation()) {
                EngineError::DuplicateVote(vote.id)
            } else {
                EngineError::Storage(format!("vote insert failed: {err}"))
            }
        })?;

        tx.commit()
            .await
            .map_err(|e| EngineError::Storage(format!("vote transaction commit failed: {e}")))?;

        Ok(vote)
    }

    async fn latest_by_voter(
        &self,
        workflow_id: Uuid,
        voter: EntityRef,
    ) -> Result<Option<Vote>, EngineError> {
        let row = sqlx::query(
            r#"
            SELECT id, workflow_id, voter_kind, voter_id, kind,
                   voted_for_groups, reason, casted_at
            FROM votes
            WHERE workflow_id = $1 AND voter_kind = $2 AND voter_id = $3
            ORDER BY casted_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .bind(workflow_id.to_string())
        .bind(voter.kind.name())
        .bind(voter.id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("vote load failed: {e}")))?;

        row.as_ref().map(decode_vote).transpose()
    }

    async fn all_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<Vote>, EngineError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workflow_id, voter_kind, voter_id, kind,
                   voted_for_groups, reason, casted_at
            FROM votes
            WHERE workflow_id = $1
            ORDER BY casted_at ASC, seq ASC
            "#,
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Storage(format!("vote load failed: {e}")))?;

        rows.iter().map(decode_vote).collect()
    }
}

fn encode_version(version: u64) -> Result<i64, EngineError> {
    version
        .try_into()
        .map_err(|_| EngineError::Storage("version exceeds postgres BIGINT range".to_string()))
}

fn decode_version(version: i64) -> Result<u64, EngineError> {
    version
        .try_into()
        .map_err(|_| EngineError::MalformedContent("negative workflow version in storage".to_string()))
}

fn decode_uuid(column: &str, value: &str) -> Result<Uuid, EngineError> {
    Uuid::parse_str(value)
        .map_err(|_| EngineError::MalformedContent(format!("invalid uuid in column '{column}'")))
}

fn status_from_str(value: &str) -> Result<WorkflowStatus, EngineError> {
    match value {
        "pending" => Ok(WorkflowStatus::Pending),
        "approved" => Ok(WorkflowStatus::Approved),
        "rejected" => Ok(WorkflowStatus::Rejected),
        "canceled" => Ok(WorkflowStatus::Canceled),
        "expired" => Ok(WorkflowStatus::Expired),
        other => Err(EngineError::MalformedContent(format!(
            "unknown workflow status '{other}' in storage"
        ))),
    }
}

fn vote_kind_from_str(value: &str) -> Result<VoteKind, EngineError> {
    match value {
        "approve" => Ok(VoteKind::Approve),
        "veto" => Ok(VoteKind::Veto),
        "withdraw" => Ok(VoteKind::Withdraw),
        other => Err(EngineError::MalformedContent(format!(
            "unknown vote kind '{other}' in storage"
        ))),
    }
}

fn entity_kind_from_str(value: &str) -> Result<EntityKind, EngineError> {
    match value {
        "user" => Ok(EntityKind::User),
        "agent" => Ok(EntityKind::Agent),
        other => Err(EngineError::MalformedContent(format!(
            "unknown entity kind '{other}' in storage"
        ))),
    }
}

fn decode_workflow(row: &sqlx::postgres::PgRow) -> Result<Workflow, EngineError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| EngineError::Storage(format!("decode id failed: {e}")))?;
    let template_id: String = row
        .try_get("template_id")
        .map_err(|e| EngineError::Storage(format!("decode template_id failed: {e}")))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| EngineError::Storage(format!("decode status failed: {e}")))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|e| EngineError::Storage(format!("decode version failed: {e}")))?;

    Ok(Workflow {
        id: decode_uuid("id", &id)?,
        name: row
            .try_get("name")
            .map_err(|e| EngineError::Storage(format!("decode name failed: {e}")))?,
        template_id: decode_uuid("template_id", &template_id)?,
        status: status_from_str(&status)?,
        expires_at: row
            .try_get("expires_at")
            .map_err(|e| EngineError::Storage(format!("decode expires_at failed: {e}")))?,
        recalculation_required: row
            .try_get("recalculation_required")
            .map_err(|e| EngineError::Storage(format!("decode recalculation_required failed: {e}")))?,
        version: decode_version(version)?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| EngineError::Storage(format!("decode created_at failed: {e}")))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| EngineError::Storage(format!("decode updated_at failed: {e}")))?,
    })
}

fn decode_vote(row: &sqlx::postgres::PgRow) -> Result<Vote, EngineError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| EngineError::Storage(format!("decode id failed: {e}")))?;
    let workflow_id: String = row
        .try_get("workflow_id")
        .map_err(|e| EngineError::Storage(format!("decode workflow_id failed: {e}")))?;
    let voter_kind: String = row
        .try_get("voter_kind")
        .map_err(|e| EngineError::Storage(format!("decode voter_kind failed: {e}")))?;
    let voter_id: String = row
        .try_get("voter_id")
        .map_err(|e| EngineError::Storage(format!("decode voter_id failed: {e}")))?;
    let kind: String = row
        .try_get("kind")
        .map_err(|e| EngineError::Storage(format!("decode kind failed: {e}")))?;
    let groups: serde_json::Value = row
        .try_get("voted_for_groups")
        .map_err(|e| EngineError::Storage(format!("decode voted_for_groups failed: {e}")))?;

    Ok(Vote {
        id: decode_uuid("id", &id)?,
        workflow_id: decode_uuid("workflow_id", &workflow_id)?,
        voter: EntityRef {
            kind: entity_kind_from_str(&voter_kind)?,
            id: decode_uuid("voter_id", &voter_id)?,
        },
        kind: vote_kind_from_str(&kind)?,
        voted_for_groups: serde_json::from_value(groups)
            .map_err(|e| EngineError::MalformedContent(format!("invalid voted_for_groups: {e}")))?,
        reason: row
            .try_get("reason")
            .map_err(|e| EngineError::Storage(format!("decode reason failed: {e}")))?,
        casted_at: row
            .try_get("casted_at")
            .map_err(|e| EngineError::Storage(format!("decode casted_at failed: {e}")))?,
    })
}
