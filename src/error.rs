//! Top-level error types for Tamamo.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error("messaging client not configured")]
    MessagingNotConfigured,
}

/// Database connection and operation errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to SQLite: {0}")]
    SqliteConnect(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("invalid stored value in {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}

/// LLM provider, client and session errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("missing API key for provider: {0}")]
    MissingProviderKey(String),

    #[error("no LLM client available")]
    NoClientAvailable,

    #[error("failed to create client for {provider}/{model}: {primary}; fallback also failed: {fallback}")]
    FallbackFailed {
        provider: String,
        model: String,
        primary: Box<Error>,
        fallback: Box<Error>,
    },

    #[error("provider request failed: {0}")]
    ProviderRequest(String),

    #[error("completion failed: {0}")]
    CompletionFailed(String),

    #[error("failed to encode conversation history: {0}")]
    HistoryEncoding(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Agent lookup and resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent {uuid} bound to this thread no longer exists")]
    BoundAgentMissing { uuid: uuid::Uuid },

    #[error("version {version} of agent {uuid} bound to this thread no longer exists")]
    BoundVersionMissing { uuid: uuid::Uuid, version: String },

    #[error("agent {uuid} has no versions")]
    NoVersions { uuid: uuid::Uuid },

    #[error("agent directory not configured")]
    DirectoryNotConfigured,
}

/// Messaging platform errors.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("failed to post message to {channel_id}: {reason}")]
    PostFailed { channel_id: String, reason: String },

    #[error("lookup failed: {0}")]
    LookupFailed(String),
}

/// Conversation history payload errors.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history payload {history_id} for thread {thread_id} not found")]
    NotFound {
        thread_id: String,
        history_id: String,
    },

    #[error("failed to read history payload: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write history payload: {0}")]
    Write(#[source] std::io::Error),
}
