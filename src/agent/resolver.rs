//! Agent resolution: which prompt, provider and model answer a mention.

use crate::agent::directory::{Agent, AgentDirectory, AgentVersion};
use crate::agent::mention::AgentMention;
use crate::agent::AgentRef;
use crate::conversation::context::ThreadContext;
use crate::conversation::threads::AgentBinding;
use crate::error::{AgentError, Error};

use indoc::indoc;
use std::sync::Arc;
use uuid::Uuid;

/// Version recorded on threads started in general mode.
pub const GENERAL_MODE_VERSION: &str = "general-v1";

/// Version reported for threads created before agent binding existed.
pub const LEGACY_VERSION: &str = "legacy";

pub const GENERAL_MODE_PROMPT: &str = indoc! {"
    You are Tamamo, a friendly assistant living in this Slack workspace.

    Besides answering questions yourself, you are the front desk for a set of
    specialised agents. Each agent has a short id and is reached by mentioning
    you followed by that id:

        @Tamamo <agent-id> <message>

    When a request would be better served by a specialised agent, say so and
    show the user how to address it. Keep answers short and use Slack markdown.
    The agent chosen when a thread starts stays with that thread.
"};

pub const LEGACY_SYSTEM_PROMPT: &str = indoc! {"
    You are a helpful assistant in a Slack workspace. Answer clearly and
    concisely, and use Slack markdown where it helps.
"};

/// How a reply should be presented in Slack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentDisplay {
    pub name: Option<String>,
    pub image_path: Option<String>,
}

/// Everything needed to answer one request. Computed per request, never stored.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub agent: AgentRef,
    pub version: String,
    pub system_prompt: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub display: AgentDisplay,
}

impl AgentContext {
    fn general(version: &str, system_prompt: &str) -> Self {
        Self {
            agent: AgentRef::General,
            version: version.to_string(),
            system_prompt: system_prompt.to_string(),
            provider: None,
            model: None,
            display: AgentDisplay::default(),
        }
    }

    fn from_version(agent: &Agent, version: AgentVersion) -> Self {
        Self {
            agent: AgentRef::Agent(agent.uuid),
            version: version.version,
            system_prompt: version.system_prompt,
            provider: version.llm_provider,
            model: version.llm_model,
            display: AgentDisplay {
                name: Some(agent.name.clone()),
                image_path: agent.image_path.clone(),
            },
        }
    }

    /// The binding a new thread records for this context.
    pub fn binding(&self) -> AgentBinding {
        AgentBinding {
            agent: self.agent,
            version: self.version.clone(),
        }
    }

    /// Provider and model, when both were resolved.
    pub fn model_route(&self) -> Option<(&str, &str)> {
        match (self.provider.as_deref(), self.model.as_deref()) {
            (Some(provider), Some(model)) => Some((provider, model)),
            _ => None,
        }
    }
}

/// Result of resolving a mention.
#[derive(Debug)]
pub enum ResolveOutcome {
    Resolved(AgentContext),
    /// The requested public id is unknown or archived.
    NotFound { agent_id: String },
    Failed(Error),
}

/// Picks the agent for a request from thread state and the mention.
#[derive(Clone)]
pub struct AgentResolver {
    directory: Option<Arc<dyn AgentDirectory>>,
}

impl AgentResolver {
    pub fn new(directory: Option<Arc<dyn AgentDirectory>>) -> Self {
        Self { directory }
    }

    pub async fn resolve(&self, mention: &AgentMention, context: &ThreadContext) -> ResolveOutcome {
        if let Some(thread) = &context.existing_thread {
            // Bound threads never switch agents, whatever the mention says.
            return match &thread.binding {
                Some(AgentBinding {
                    agent: AgentRef::General,
                    version,
                }) => ResolveOutcome::Resolved(AgentContext::general(version, GENERAL_MODE_PROMPT)),
                Some(AgentBinding {
                    agent: AgentRef::Agent(uuid),
                    version,
                }) => match self.resolve_bound(*uuid, version).await {
                    Ok(context) => ResolveOutcome::Resolved(context),
                    Err(error) => ResolveOutcome::Failed(error),
                },
                None => ResolveOutcome::Resolved(AgentContext::general(
                    LEGACY_VERSION,
                    LEGACY_SYSTEM_PROMPT,
                )),
            };
        }

        if !mention.has_agent_id() {
            return ResolveOutcome::Resolved(AgentContext::general(
                GENERAL_MODE_VERSION,
                GENERAL_MODE_PROMPT,
            ));
        }

        self.resolve_by_public_id(&mention.agent_id).await
    }

    async fn resolve_bound(&self, uuid: Uuid, version: &str) -> Result<AgentContext, Error> {
        let directory = self
            .directory
            .as_ref()
            .ok_or(AgentError::DirectoryNotConfigured)?;

        let agent = directory
            .get_agent(uuid)
            .await?
            .ok_or(AgentError::BoundAgentMissing { uuid })?;

        let bound = directory.get_agent_version(uuid, version).await?.ok_or_else(|| {
            AgentError::BoundVersionMissing {
                uuid,
                version: version.to_string(),
            }
        })?;

        Ok(AgentContext::from_version(&agent, bound))
    }

    async fn resolve_by_public_id(&self, agent_id: &str) -> ResolveOutcome {
        let Some(directory) = &self.directory else {
            tracing::warn!(%agent_id, "agent requested but no agent directory is configured");
            return ResolveOutcome::NotFound {
                agent_id: agent_id.to_string(),
            };
        };

        let agent = match directory.get_active_agent_by_public_id(agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                return ResolveOutcome::NotFound {
                    agent_id: agent_id.to_string(),
                };
            }
            Err(error) => return ResolveOutcome::Failed(error),
        };

        match directory.get_latest_agent_version(agent.uuid).await {
            Ok(Some(latest)) => {
                tracing::debug!(%agent_id, version = %latest.version, "resolved agent");
                ResolveOutcome::Resolved(AgentContext::from_version(&agent, latest))
            }
            Ok(None) => ResolveOutcome::Failed(AgentError::NoVersions { uuid: agent.uuid }.into()),
            Err(error) => ResolveOutcome::Failed(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::directory::{AgentStatus, SqliteAgentDirectory, seed_agent};
    use crate::conversation::threads::{Thread, ThreadKey};
    use crate::db::memory_pool;

    use chrono::Utc;

    fn new_thread_context() -> ThreadContext {
        ThreadContext {
            is_new_thread: true,
            existing_thread: None,
            requires_agent_resolution: true,
        }
    }

    fn existing_thread_context(binding: Option<AgentBinding>) -> ThreadContext {
        ThreadContext {
            is_new_thread: false,
            existing_thread: Some(Thread {
                id: Uuid::new_v4(),
                key: ThreadKey::new("T1", "C1", "1.0"),
                binding,
                created_at: Utc::now(),
            }),
            requires_agent_resolution: false,
        }
    }

    fn mention(agent_id: &str, message: &str) -> AgentMention {
        AgentMention {
            agent_id: agent_id.to_string(),
            message: message.to_string(),
        }
    }

    fn resolved(outcome: ResolveOutcome) -> AgentContext {
        match outcome {
            ResolveOutcome::Resolved(context) => context,
            other => panic!("expected a resolved agent, got {other:?}"),
        }
    }

    async fn resolver_with_agents() -> (AgentResolver, Uuid) {
        let pool = memory_pool().await;
        let uuid = seed_agent(
            &pool,
            "jira-helper",
            AgentStatus::Active,
            Some("agents/jira.png"),
            &[
                ("v1", "v1 prompt", Some("openai"), Some("gpt-4.1")),
                ("v2", "v2 prompt", Some("anthropic"), Some("claude-sonnet-4")),
            ],
        )
        .await;
        seed_agent(
            &pool,
            "retired",
            AgentStatus::Archived,
            None,
            &[("v1", "old", None, None)],
        )
        .await;
        let directory: Arc<dyn AgentDirectory> = Arc::new(SqliteAgentDirectory::new(pool));
        (AgentResolver::new(Some(directory)), uuid)
    }

    #[tokio::test]
    async fn new_thread_without_agent_id_uses_general_mode() {
        let resolver = AgentResolver::new(None);
        let context = resolved(
            resolver
                .resolve(&mention("", "hello"), &new_thread_context())
                .await,
        );

        assert_eq!(context.agent, AgentRef::General);
        assert_eq!(context.version, GENERAL_MODE_VERSION);
        assert_eq!(context.system_prompt, GENERAL_MODE_PROMPT);
        assert!(context.model_route().is_none());
    }

    #[tokio::test]
    async fn new_thread_with_agent_id_uses_latest_version() {
        let (resolver, uuid) = resolver_with_agents().await;
        let context = resolved(
            resolver
                .resolve(&mention("jira-helper", "hi"), &new_thread_context())
                .await,
        );

        assert_eq!(context.agent, AgentRef::Agent(uuid));
        assert_eq!(context.version, "v2");
        assert_eq!(context.system_prompt, "v2 prompt");
        assert_eq!(context.model_route(), Some(("anthropic", "claude-sonnet-4")));
        assert_eq!(context.display.name.as_deref(), Some("jira-helper bot"));
        assert_eq!(context.display.image_path.as_deref(), Some("agents/jira.png"));
    }

    #[tokio::test]
    async fn unknown_and_archived_agents_are_not_found() {
        let (resolver, _) = resolver_with_agents().await;

        for agent_id in ["nope", "retired"] {
            let outcome = resolver
                .resolve(&mention(agent_id, ""), &new_thread_context())
                .await;
            match outcome {
                ResolveOutcome::NotFound { agent_id: missing } => assert_eq!(missing, agent_id),
                other => panic!("expected NotFound for {agent_id}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn bound_thread_keeps_its_pinned_version() {
        let (resolver, uuid) = resolver_with_agents().await;
        let context = existing_thread_context(Some(AgentBinding {
            agent: AgentRef::Agent(uuid),
            version: "v1".into(),
        }));

        // A different agent id in a follow-up mention is ignored.
        let resolved_context = resolved(
            resolver
                .resolve(&mention("retired", "follow up"), &context)
                .await,
        );
        assert_eq!(resolved_context.agent, AgentRef::Agent(uuid));
        assert_eq!(resolved_context.version, "v1");
        assert_eq!(resolved_context.system_prompt, "v1 prompt");
        assert_eq!(resolved_context.model_route(), Some(("openai", "gpt-4.1")));
    }

    #[tokio::test]
    async fn general_binding_keeps_its_version() {
        let resolver = AgentResolver::new(None);
        let context = existing_thread_context(Some(AgentBinding {
            agent: AgentRef::General,
            version: GENERAL_MODE_VERSION.into(),
        }));

        let resolved_context = resolved(
            resolver
                .resolve(&mention("jira-helper", "switch?"), &context)
                .await,
        );
        assert_eq!(resolved_context.agent, AgentRef::General);
        assert_eq!(resolved_context.version, GENERAL_MODE_VERSION);
        assert!(resolved_context.model_route().is_none());
    }

    #[tokio::test]
    async fn unbound_thread_is_legacy_general() {
        let resolver = AgentResolver::new(None);
        let resolved_context = resolved(
            resolver
                .resolve(&mention("", "hi"), &existing_thread_context(None))
                .await,
        );

        assert_eq!(resolved_context.agent, AgentRef::General);
        assert_eq!(resolved_context.version, LEGACY_VERSION);
        assert_eq!(resolved_context.system_prompt, LEGACY_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn missing_bound_version_fails() {
        let (resolver, uuid) = resolver_with_agents().await;
        let context = existing_thread_context(Some(AgentBinding {
            agent: AgentRef::Agent(uuid),
            version: "v9".into(),
        }));

        match resolver.resolve(&mention("", "hi"), &context).await {
            ResolveOutcome::Failed(Error::Agent(AgentError::BoundVersionMissing {
                version, ..
            })) => assert_eq!(version, "v9"),
            other => panic!("expected a missing version failure, got {other:?}"),
        }

        let orphan = existing_thread_context(Some(AgentBinding {
            agent: AgentRef::Agent(Uuid::new_v4()),
            version: "v1".into(),
        }));
        assert!(matches!(
            resolver.resolve(&mention("", "hi"), &orphan).await,
            ResolveOutcome::Failed(Error::Agent(AgentError::BoundAgentMissing { .. }))
        ));
    }
}
