//! Thread context: is this mention starting a conversation or continuing one?

use crate::conversation::threads::{Thread, ThreadStore};
use crate::error::Result;

use std::sync::Arc;

/// What the orchestrator knows about the thread an event landed in.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    pub is_new_thread: bool,
    pub existing_thread: Option<Thread>,
    /// False when an existing thread's binding is authoritative.
    pub requires_agent_resolution: bool,
}

impl ThreadContext {
    fn new_thread() -> Self {
        Self {
            is_new_thread: true,
            existing_thread: None,
            requires_agent_resolution: true,
        }
    }

    /// Context for a thread whose stored binding is authoritative.
    pub fn existing(thread: Thread) -> Self {
        Self {
            is_new_thread: false,
            existing_thread: Some(thread),
            requires_agent_resolution: false,
        }
    }
}

/// Read-only classifier over the thread store.
#[derive(Clone)]
pub struct ThreadContextAnalyzer {
    store: Option<Arc<dyn ThreadStore>>,
}

impl ThreadContextAnalyzer {
    /// Without a store every event is treated as a new thread.
    pub fn new(store: Option<Arc<dyn ThreadStore>>) -> Self {
        Self { store }
    }

    pub async fn analyze(
        &self,
        team_id: &str,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<ThreadContext> {
        let Some(store) = &self.store else {
            return Ok(ThreadContext::new_thread());
        };

        match store.get_thread_by_key(channel_id, thread_ts).await? {
            Some(thread) => {
                tracing::debug!(
                    %team_id,
                    %channel_id,
                    %thread_ts,
                    thread_id = %thread.id,
                    "continuing existing thread"
                );
                Ok(ThreadContext::existing(thread))
            }
            None => Ok(ThreadContext::new_thread()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::threads::{SqliteThreadStore, ThreadKey};
    use crate::db::memory_pool;

    #[tokio::test]
    async fn without_a_store_every_thread_is_new() {
        let analyzer = ThreadContextAnalyzer::new(None);
        let context = analyzer
            .analyze("T1", "C1", "1.0")
            .await
            .expect("analysis should succeed");

        assert!(context.is_new_thread);
        assert!(context.requires_agent_resolution);
        assert!(context.existing_thread.is_none());
    }

    #[tokio::test]
    async fn known_threads_skip_resolution() {
        let store: Arc<dyn ThreadStore> = Arc::new(SqliteThreadStore::new(memory_pool().await));
        let thread = store
            .get_or_create_thread(&ThreadKey::new("T1", "C1", "1.0"))
            .await
            .expect("thread should be created");

        let analyzer = ThreadContextAnalyzer::new(Some(store));

        let known = analyzer
            .analyze("T1", "C1", "1.0")
            .await
            .expect("analysis should succeed");
        assert!(!known.is_new_thread);
        assert!(!known.requires_agent_resolution);
        assert_eq!(known.existing_thread.map(|t| t.id), Some(thread.id));

        let unknown = analyzer
            .analyze("T1", "C1", "2.0")
            .await
            .expect("analysis should succeed");
        assert!(unknown.is_new_thread);
        assert!(unknown.requires_agent_resolution);
    }
}
