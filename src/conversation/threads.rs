//! Thread, message and history-record persistence (SQLite).

use crate::agent::AgentRef;
use crate::error::{DbError, Result};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row as _, SqlitePool};
use uuid::Uuid;

/// Slack-native identity of a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadKey {
    pub team_id: String,
    pub channel_id: String,
    pub thread_ts: String,
}

impl ThreadKey {
    pub fn new(
        team_id: impl Into<String>,
        channel_id: impl Into<String>,
        thread_ts: impl Into<String>,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            channel_id: channel_id.into(),
            thread_ts: thread_ts.into(),
        }
    }
}

/// The agent (and version) a thread answers with. Set once, at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentBinding {
    pub agent: AgentRef,
    pub version: String,
}

/// A running conversation.
#[derive(Debug, Clone)]
pub struct Thread {
    pub id: Uuid,
    pub key: ThreadKey,
    /// `None` for threads recorded before agent binding existed.
    pub binding: Option<AgentBinding>,
    pub created_at: DateTime<Utc>,
}

/// A message to record in a thread.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub thread_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub ts: String,
}

/// A recorded turn.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub ts: String,
    pub created_at: DateTime<Utc>,
}

/// Pointer to a serialized history payload in the history store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// A fresh record with a time-ordered id.
    pub fn new(thread_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            thread_id,
            created_at: Utc::now(),
        }
    }
}

/// Persistence for threads, their messages and history records.
///
/// `get_or_create_*` must be atomic: concurrent first mentions in the same
/// thread yield one record with one binding.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Fetch or create a thread without an agent binding.
    async fn get_or_create_thread(&self, key: &ThreadKey) -> Result<Thread>;

    /// Fetch or create a thread. The binding is only written on creation.
    async fn get_or_create_thread_with_agent(
        &self,
        key: &ThreadKey,
        binding: &AgentBinding,
    ) -> Result<Thread>;

    async fn get_thread_by_key(&self, channel_id: &str, thread_ts: &str) -> Result<Option<Thread>>;

    async fn append_message(&self, message: NewMessage) -> Result<Message>;

    async fn latest_history_record(&self, thread_id: Uuid) -> Result<Option<HistoryRecord>>;

    async fn put_history_record(&self, record: &HistoryRecord) -> Result<()>;
}

/// SQLite-backed [`ThreadStore`].
#[derive(Debug, Clone)]
pub struct SqliteThreadStore {
    pool: SqlitePool,
}

impl SqliteThreadStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_or_fetch(&self, key: &ThreadKey, binding: Option<&AgentBinding>) -> Result<Thread> {
        let id = Uuid::new_v4();
        let (agent_kind, agent_uuid, agent_version) = match binding {
            Some(binding) => (
                Some(binding.agent.kind()),
                binding.agent.uuid().map(|uuid| uuid.to_string()),
                Some(binding.version.clone()),
            ),
            None => (None, None, None),
        };

        // The unique key makes this a single atomic get-or-create: a racing
        // insert loses quietly and both callers read the winner's row.
        let result = sqlx::query(
            r#"
            INSERT INTO threads (
                id, team_id, channel_id, thread_ts, agent_kind, agent_uuid, agent_version, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(team_id, channel_id, thread_ts) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(&key.team_id)
        .bind(&key.channel_id)
        .bind(&key.thread_ts)
        .bind(agent_kind)
        .bind(agent_uuid)
        .bind(agent_version)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to insert thread")?;

        if result.rows_affected() == 1 {
            tracing::debug!(
                thread_id = %id,
                channel_id = %key.channel_id,
                thread_ts = %key.thread_ts,
                "created thread"
            );
        }

        let row = sqlx::query(
            "SELECT id, team_id, channel_id, thread_ts, agent_kind, agent_uuid, agent_version, created_at \
             FROM threads WHERE team_id = ? AND channel_id = ? AND thread_ts = ?",
        )
        .bind(&key.team_id)
        .bind(&key.channel_id)
        .bind(&key.thread_ts)
        .fetch_one(&self.pool)
        .await
        .context("failed to load thread after insert")?;

        row_to_thread(&row)
    }
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    async fn get_or_create_thread(&self, key: &ThreadKey) -> Result<Thread> {
        self.insert_or_fetch(key, None).await
    }

    async fn get_or_create_thread_with_agent(
        &self,
        key: &ThreadKey,
        binding: &AgentBinding,
    ) -> Result<Thread> {
        self.insert_or_fetch(key, Some(binding)).await
    }

    async fn get_thread_by_key(&self, channel_id: &str, thread_ts: &str) -> Result<Option<Thread>> {
        let row = sqlx::query(
            "SELECT id, team_id, channel_id, thread_ts, agent_kind, agent_uuid, agent_version, created_at \
             FROM threads WHERE channel_id = ? AND thread_ts = ? \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(channel_id)
        .bind(thread_ts)
        .fetch_optional(&self.pool)
        .await
        .context("failed to look up thread")?;

        row.as_ref().map(row_to_thread).transpose()
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            thread_id: message.thread_id,
            user_id: message.user_id,
            user_name: message.user_name,
            text: message.text,
            ts: message.ts,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO thread_messages (id, thread_id, user_id, user_name, text, ts, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.thread_id.to_string())
        .bind(&message.user_id)
        .bind(&message.user_name)
        .bind(&message.text)
        .bind(&message.ts)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .context("failed to append thread message")?;

        Ok(message)
    }

    async fn latest_history_record(&self, thread_id: Uuid) -> Result<Option<HistoryRecord>> {
        let row = sqlx::query(
            "SELECT id, thread_id, created_at FROM history_records \
             WHERE thread_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
        )
        .bind(thread_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load latest history record")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(HistoryRecord {
            id: parse_uuid(&row, "id")?,
            thread_id: parse_uuid(&row, "thread_id")?,
            created_at: row
                .try_get("created_at")
                .context("failed to read history record created_at")?,
        }))
    }

    async fn put_history_record(&self, record: &HistoryRecord) -> Result<()> {
        sqlx::query("INSERT INTO history_records (id, thread_id, created_at) VALUES (?, ?, ?)")
            .bind(record.id.to_string())
            .bind(record.thread_id.to_string())
            .bind(record.created_at)
            .execute(&self.pool)
            .await
            .context("failed to save history record")?;
        Ok(())
    }
}

fn parse_uuid(row: &SqliteRow, column: &'static str) -> Result<Uuid> {
    let raw: String = row
        .try_get(column)
        .with_context(|| format!("failed to read {column}"))?;
    Uuid::parse_str(&raw).map_err(|_| DbError::InvalidValue { column, value: raw }.into())
}

fn row_to_thread(row: &SqliteRow) -> Result<Thread> {
    let agent_kind: Option<String> = row.try_get("agent_kind").context("failed to read agent_kind")?;
    let agent_version: Option<String> = row
        .try_get("agent_version")
        .context("failed to read agent_version")?;

    let binding = match agent_kind.as_deref() {
        None => None,
        Some("general") => Some(AgentBinding {
            agent: AgentRef::General,
            version: agent_version.unwrap_or_default(),
        }),
        Some("agent") => Some(AgentBinding {
            agent: AgentRef::Agent(parse_uuid(row, "agent_uuid")?),
            version: agent_version.unwrap_or_default(),
        }),
        Some(other) => {
            return Err(DbError::InvalidValue {
                column: "agent_kind",
                value: other.to_string(),
            }
            .into());
        }
    };

    Ok(Thread {
        id: parse_uuid(row, "id")?,
        key: ThreadKey {
            team_id: row.try_get("team_id").context("failed to read team_id")?,
            channel_id: row.try_get("channel_id").context("failed to read channel_id")?,
            thread_ts: row.try_get("thread_ts").context("failed to read thread_ts")?,
        },
        binding,
        created_at: row.try_get("created_at").context("failed to read created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory_pool;

    fn key() -> ThreadKey {
        ThreadKey::new("T1", "C1", "1700000000.000100")
    }

    #[tokio::test]
    async fn binding_is_written_once() {
        let store = SqliteThreadStore::new(memory_pool().await);
        let first_agent = Uuid::new_v4();

        let first = store
            .get_or_create_thread_with_agent(
                &key(),
                &AgentBinding {
                    agent: AgentRef::Agent(first_agent),
                    version: "v1".into(),
                },
            )
            .await
            .expect("thread should be created");

        let second = store
            .get_or_create_thread_with_agent(
                &key(),
                &AgentBinding {
                    agent: AgentRef::General,
                    version: "general-v1".into(),
                },
            )
            .await
            .expect("thread should be fetched");

        assert_eq!(first.id, second.id);
        assert_eq!(
            second.binding,
            Some(AgentBinding {
                agent: AgentRef::Agent(first_agent),
                version: "v1".into(),
            })
        );
    }

    #[tokio::test]
    async fn unbound_threads_read_back_as_legacy() {
        let store = SqliteThreadStore::new(memory_pool().await);
        let created = store
            .get_or_create_thread(&key())
            .await
            .expect("thread should be created");
        assert!(created.binding.is_none());

        let found = store
            .get_thread_by_key("C1", "1700000000.000100")
            .await
            .expect("lookup should succeed")
            .expect("thread should exist");
        assert_eq!(found.id, created.id);
        assert!(found.binding.is_none());

        assert!(
            store
                .get_thread_by_key("C1", "other")
                .await
                .expect("lookup should succeed")
                .is_none()
        );
    }

    #[tokio::test]
    async fn concurrent_first_mentions_share_one_thread() {
        let store = SqliteThreadStore::new(memory_pool().await);
        let general = AgentBinding {
            agent: AgentRef::General,
            version: "general-v1".into(),
        };
        let specific = AgentBinding {
            agent: AgentRef::Agent(Uuid::new_v4()),
            version: "v3".into(),
        };

        let thread_key = key();
        let (a, b) = tokio::join!(
            store.get_or_create_thread_with_agent(&thread_key, &general),
            store.get_or_create_thread_with_agent(&thread_key, &specific),
        );
        let (a, b) = (a.expect("first call"), b.expect("second call"));

        assert_eq!(a.id, b.id);
        assert_eq!(a.binding, b.binding);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM threads")
            .fetch_one(&store.pool)
            .await
            .expect("count should succeed");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn latest_history_record_is_the_newest() {
        let store = SqliteThreadStore::new(memory_pool().await);
        let thread = store
            .get_or_create_thread(&key())
            .await
            .expect("thread should be created");

        assert!(
            store
                .latest_history_record(thread.id)
                .await
                .expect("load should succeed")
                .is_none()
        );

        let older = HistoryRecord::new(thread.id);
        store.put_history_record(&older).await.expect("save older");
        let newer = HistoryRecord::new(thread.id);
        store.put_history_record(&newer).await.expect("save newer");

        let latest = store
            .latest_history_record(thread.id)
            .await
            .expect("load should succeed")
            .expect("record should exist");
        assert_eq!(latest.id, newer.id);
        assert_ne!(latest.id, older.id);
    }

    #[tokio::test]
    async fn messages_are_appended() {
        let store = SqliteThreadStore::new(memory_pool().await);
        let thread = store
            .get_or_create_thread(&key())
            .await
            .expect("thread should be created");

        for text in ["first", "second"] {
            store
                .append_message(NewMessage {
                    thread_id: thread.id,
                    user_id: "U1".into(),
                    user_name: "Alice".into(),
                    text: text.into(),
                    ts: "1700000000.000200".into(),
                })
                .await
                .expect("append should succeed");
        }

        let texts: Vec<String> = sqlx::query_scalar(
            "SELECT text FROM thread_messages WHERE thread_id = ? ORDER BY created_at, rowid",
        )
        .bind(thread.id.to_string())
        .fetch_all(&store.pool)
        .await
        .expect("query should succeed");
        assert_eq!(texts, vec!["first".to_string(), "second".to_string()]);
    }
}
