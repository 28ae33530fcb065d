//! Read-only agent directory (SQLite).

use crate::error::{DbError, Result};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row as _, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Active,
    Archived,
}

impl AgentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(AgentStatus::Active),
            "archived" => Some(AgentStatus::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Directory entry for an agent.
#[derive(Debug, Clone)]
pub struct Agent {
    pub uuid: Uuid,
    /// Public id users type after the bot mention.
    pub agent_id: String,
    pub name: String,
    pub description: String,
    /// Path of the agent's icon, relative to the image base URL.
    pub image_path: Option<String>,
    pub status: AgentStatus,
}

/// A published configuration of an agent.
#[derive(Debug, Clone)]
pub struct AgentVersion {
    pub agent_uuid: Uuid,
    pub version: String,
    pub system_prompt: String,
    pub llm_provider: Option<String>,
    pub llm_model: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lookup of agents and their versions.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Any agent by uuid, archived ones included.
    async fn get_agent(&self, uuid: Uuid) -> Result<Option<Agent>>;

    async fn get_active_agent_by_public_id(&self, agent_id: &str) -> Result<Option<Agent>>;

    async fn get_agent_version(&self, uuid: Uuid, version: &str) -> Result<Option<AgentVersion>>;

    async fn get_latest_agent_version(&self, uuid: Uuid) -> Result<Option<AgentVersion>>;

    /// A page of active agents ordered by public id, plus the total count.
    async fn list_active_agents(&self, offset: i64, limit: i64) -> Result<(Vec<Agent>, i64)>;
}

#[derive(Debug, Clone)]
pub struct SqliteAgentDirectory {
    pool: SqlitePool,
}

impl SqliteAgentDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const AGENT_COLUMNS: &str = "uuid, agent_id, name, description, image_path, status";
const VERSION_COLUMNS: &str =
    "agent_uuid, version, system_prompt, llm_provider, llm_model, created_at";

#[async_trait]
impl AgentDirectory for SqliteAgentDirectory {
    async fn get_agent(&self, uuid: Uuid) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE uuid = ?"))
            .bind(uuid.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("failed to load agent")?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn get_active_agent_by_public_id(&self, agent_id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE agent_id = ? AND status = 'active'"
        ))
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load agent by public id")?;

        row.as_ref().map(row_to_agent).transpose()
    }

    async fn get_agent_version(&self, uuid: Uuid, version: &str) -> Result<Option<AgentVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM agent_versions WHERE agent_uuid = ? AND version = ?"
        ))
        .bind(uuid.to_string())
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load agent version")?;

        row.as_ref().map(row_to_version).transpose()
    }

    async fn get_latest_agent_version(&self, uuid: Uuid) -> Result<Option<AgentVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM agent_versions WHERE agent_uuid = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(uuid.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load latest agent version")?;

        row.as_ref().map(row_to_version).transpose()
    }

    async fn list_active_agents(&self, offset: i64, limit: i64) -> Result<(Vec<Agent>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents WHERE status = 'active'")
            .fetch_one(&self.pool)
            .await
            .context("failed to count active agents")?;

        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE status = 'active' \
             ORDER BY agent_id ASC LIMIT ? OFFSET ?"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("failed to list active agents")?;

        let agents = rows.iter().map(row_to_agent).collect::<Result<Vec<_>>>()?;
        Ok((agents, total))
    }
}

fn row_uuid(row: &SqliteRow, column: &'static str) -> Result<Uuid> {
    let raw: String = row
        .try_get(column)
        .with_context(|| format!("failed to read {column}"))?;
    Uuid::parse_str(&raw).map_err(|_| DbError::InvalidValue { column, value: raw }.into())
}

fn row_to_agent(row: &SqliteRow) -> Result<Agent> {
    let status: String = row.try_get("status").context("failed to read agent status")?;
    let status = AgentStatus::parse(&status).ok_or(DbError::InvalidValue {
        column: "status",
        value: status.clone(),
    })?;

    Ok(Agent {
        uuid: row_uuid(row, "uuid")?,
        agent_id: row.try_get("agent_id").context("failed to read agent_id")?,
        name: row.try_get("name").context("failed to read agent name")?,
        description: row
            .try_get("description")
            .context("failed to read agent description")?,
        image_path: row
            .try_get::<Option<String>, _>("image_path")
            .context("failed to read agent image_path")?
            .filter(|path| !path.trim().is_empty()),
        status,
    })
}

fn row_to_version(row: &SqliteRow) -> Result<AgentVersion> {
    Ok(AgentVersion {
        agent_uuid: row_uuid(row, "agent_uuid")?,
        version: row.try_get("version").context("failed to read version")?,
        system_prompt: row
            .try_get("system_prompt")
            .context("failed to read system_prompt")?,
        llm_provider: row
            .try_get::<Option<String>, _>("llm_provider")
            .context("failed to read llm_provider")?
            .filter(|value| !value.is_empty()),
        llm_model: row
            .try_get::<Option<String>, _>("llm_model")
            .context("failed to read llm_model")?
            .filter(|value| !value.is_empty()),
        created_at: row
            .try_get::<chrono::NaiveDateTime, _>("created_at")
            .map(|value| value.and_utc())
            .context("failed to read version created_at")?,
    })
}

/// Insert an agent and its versions (oldest first) straight into the tables.
#[cfg(test)]
pub(crate) async fn seed_agent(
    pool: &SqlitePool,
    agent_id: &str,
    status: AgentStatus,
    image_path: Option<&str>,
    versions: &[(&str, &str, Option<&str>, Option<&str>)],
) -> Uuid {
    let uuid = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO agents (uuid, agent_id, name, description, image_path, status) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid.to_string())
    .bind(agent_id)
    .bind(format!("{agent_id} bot"))
    .bind(format!("Answers {agent_id} questions"))
    .bind(image_path)
    .bind(status.as_str())
    .execute(pool)
    .await
    .expect("agent should insert");

    for (index, (version, prompt, provider, model)) in versions.iter().enumerate() {
        sqlx::query(
            "INSERT INTO agent_versions \
             (agent_uuid, version, system_prompt, llm_provider, llm_model, created_at) \
             VALUES (?, ?, ?, ?, ?, datetime('now', ?))",
        )
        .bind(uuid.to_string())
        .bind(*version)
        .bind(*prompt)
        .bind(*provider)
        .bind(*model)
        .bind(format!("+{index} seconds"))
        .execute(pool)
        .await
        .expect("agent version should insert");
    }

    uuid
}
