//! Conversation threads, history and thread context.

pub mod context;
pub mod history;
pub mod threads;

pub use context::{ThreadContext, ThreadContextAnalyzer};
pub use history::{FsHistoryStore, HistoryStore};
pub use threads::{
    AgentBinding, HistoryRecord, Message, NewMessage, SqliteThreadStore, Thread, ThreadKey,
    ThreadStore,
};
