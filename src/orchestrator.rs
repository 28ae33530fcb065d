//! Mention handling: thread context, agent resolution, generation and reply.

pub mod dispatch;
pub mod replies;


use crate::agent::mention::find_bot_mention;
use crate::agent::{AgentContext, AgentDirectory, AgentMention, AgentResolver, ResolveOutcome};
use crate::conversation::{
    HistoryRecord, HistoryStore, NewMessage, Thread, ThreadContext, ThreadContextAnalyzer,
    ThreadKey, ThreadStore,
};
use crate::error::{ConfigError, Error, LlmError, Result};
use crate::llm::{LlmClient, ProviderGateway};
use crate::messaging::{DisplayIdentity, MessagingClientDyn, channel_details, user_details};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// An `app_mention` as delivered by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionEvent {
    pub team_id: String,
    pub user_id: String,
    pub text: String,
    pub channel_id: String,
    pub ts: String,
    /// Root of the thread, when the mention was posted inside one.
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl MentionEvent {
    /// Timestamp of the thread the reply goes to. A top-level mention starts a
    /// thread rooted at itself.
    pub fn thread_root(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }

    fn thread_key(&self) -> ThreadKey {
        ThreadKey::new(&self.team_id, &self.channel_id, self.thread_root())
    }
}

/// A plain message posted inside a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessageEvent {
    pub team_id: String,
    pub user_id: String,
    pub text: String,
    pub channel_id: String,
    pub ts: String,
    pub thread_ts: String,
}

/// Stages a mention moves through, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    MentionFiltered,
    AgentResolving,
    AgentResolved,
    AgentNotFound,
    HistoryLoading,
    SessionAcquiring,
    Fallback,
    SessionReady,
    Generating,
    Replying,
    HistoryPersisting,
    Done,
    Fatal,
}

impl Stage {
    fn as_str(self) -> &'static str {
        match self {
            Stage::MentionFiltered => "mention_filtered",
            Stage::AgentResolving => "agent_resolving",
            Stage::AgentResolved => "agent_resolved",
            Stage::AgentNotFound => "agent_not_found",
            Stage::HistoryLoading => "history_loading",
            Stage::SessionAcquiring => "session_acquiring",
            Stage::Fallback => "fallback",
            Stage::SessionReady => "session_ready",
            Stage::Generating => "generating",
            Stage::Replying => "replying",
            Stage::HistoryPersisting => "history_persisting",
            Stage::Done => "done",
            Stage::Fatal => "fatal",
        }
    }
}

/// Collaborators for a [`MentionHandler`]. Everything is optional; missing
/// pieces degrade the pipeline instead of failing construction, except that
/// an LLM source without a messaging client is rejected.
#[derive(Clone, Default)]
pub struct MentionHandlerConfig {
    pub messaging: Option<Arc<dyn MessagingClientDyn>>,
    /// Single default client, used when no gateway route applies.
    pub llm_client: Option<Arc<dyn LlmClient>>,
    pub gateway: Option<Arc<dyn ProviderGateway>>,
    pub thread_store: Option<Arc<dyn ThreadStore>>,
    pub history_store: Option<Arc<dyn HistoryStore>>,
    pub agent_directory: Option<Arc<dyn AgentDirectory>>,
    /// Base URL agent image paths are joined onto.
    pub image_base_url: Option<String>,
}

impl MentionHandlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messaging(mut self, messaging: Arc<dyn MessagingClientDyn>) -> Self {
        self.messaging = Some(messaging);
        self
    }

    pub fn with_llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm_client = Some(client);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn ProviderGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_thread_store(mut self, store: Arc<dyn ThreadStore>) -> Self {
        self.thread_store = Some(store);
        self
    }

    pub fn with_history_store(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn with_agent_directory(mut self, directory: Arc<dyn AgentDirectory>) -> Self {
        self.agent_directory = Some(directory);
        self
    }

    pub fn with_image_base_url(mut self, url: impl Into<String>) -> Self {
        self.image_base_url = Some(url.into()).filter(|url: &String| !url.trim().is_empty());
        self
    }
}

/// The client chosen for a turn, and what it replaced if it is a fallback.
struct SelectedClient {
    client: Arc<dyn LlmClient>,
    replaced: Option<(String, String)>,
}

/// Handles mention events end to end. Cheap to clone; one task per event.
#[derive(Clone)]
pub struct MentionHandler {
    messaging: Option<Arc<dyn MessagingClientDyn>>,
    llm_client: Option<Arc<dyn LlmClient>>,
    gateway: Option<Arc<dyn ProviderGateway>>,
    thread_store: Option<Arc<dyn ThreadStore>>,
    history_store: Option<Arc<dyn HistoryStore>>,
    agent_directory: Option<Arc<dyn AgentDirectory>>,
    image_base_url: Option<String>,
    analyzer: ThreadContextAnalyzer,
    resolver: AgentResolver,
}

impl MentionHandler {
    pub fn new(config: MentionHandlerConfig) -> Result<Self> {
        let has_llm = config.llm_client.is_some() || config.gateway.is_some();
        if has_llm && config.messaging.is_none() {
            return Err(ConfigError::MessagingNotConfigured.into());
        }

        Ok(Self {
            analyzer: ThreadContextAnalyzer::new(config.thread_store.clone()),
            resolver: AgentResolver::new(config.agent_directory.clone()),
            messaging: config.messaging,
            llm_client: config.llm_client,
            gateway: config.gateway,
            thread_store: config.thread_store,
            history_store: config.history_store,
            agent_directory: config.agent_directory,
            image_base_url: config.image_base_url,
        })
    }

    fn llm_configured(&self) -> bool {
        self.llm_client.is_some() || self.gateway.is_some()
    }

    /// Answer one mention. Agent-not-found is handled with a help reply;
    /// configuration, client and generation failures get an apology reply
    /// and are returned.
    pub async fn handle_mention(&self, event: &MentionEvent) -> Result<()> {
        let messaging = self
            .messaging
            .as_deref()
            .ok_or(ConfigError::MessagingNotConfigured)?;

        tracing::debug!(
            team_id = %event.team_id,
            channel_id = %event.channel_id,
            user_id = %event.user_id,
            ts = %event.ts,
            "mention received"
        );

        if !self.llm_configured() {
            return self.reply_llm_not_configured(messaging, event).await;
        }

        let Some(trailing) = find_bot_mention(&event.text, |user_id| messaging.is_bot_user(user_id))
        else {
            tracing::debug!(channel_id = %event.channel_id, "event does not mention this bot");
            return Ok(());
        };
        self.enter(Stage::MentionFiltered, event);

        let mention = AgentMention::from_trailing(trailing);
        let thread_ts = event.thread_root();

        self.enter(Stage::AgentResolving, event);
        let context = match self
            .analyzer
            .analyze(&event.team_id, &event.channel_id, thread_ts)
            .await
        {
            Ok(context) => context,
            Err(error) => return self.fail(messaging, event, None, error).await,
        };

        let agent = match self.resolver.resolve(&mention, &context).await {
            ResolveOutcome::Resolved(agent) => agent,
            ResolveOutcome::NotFound { agent_id } => {
                self.enter(Stage::AgentNotFound, event);
                return self.reply_agent_not_found(messaging, event, &agent_id).await;
            }
            ResolveOutcome::Failed(error) => {
                return self.fail(messaging, event, None, error).await;
            }
        };
        tracing::info!(
            channel_id = %event.channel_id,
            user_id = %event.user_id,
            agent = %agent.agent,
            version = %agent.version,
            new_thread = context.is_new_thread,
            "agent resolved"
        );
        self.enter(Stage::AgentResolved, event);

        let thread = match self.record_mention(messaging, event, &agent).await {
            Ok(thread) => thread,
            Err(error) => return self.fail(messaging, event, Some(&agent), error).await,
        };
        let thread_id = thread.as_ref().map(|thread| thread.id);

        // A concurrent first mention may have bound the thread first; its
        // binding wins for this turn too.
        let agent = match thread {
            Some(thread)
                if context.is_new_thread && thread.binding.as_ref() != Some(&agent.binding()) =>
            {
                tracing::info!(
                    thread_id = %thread.id,
                    resolved = %agent.agent,
                    "thread was bound concurrently, answering with the stored binding"
                );
                let stored = ThreadContext::existing(thread);
                match self.resolver.resolve(&mention, &stored).await {
                    ResolveOutcome::Resolved(bound) => bound,
                    ResolveOutcome::NotFound { agent_id } => {
                        return self
                            .reply_agent_not_found(messaging, event, &agent_id)
                            .await;
                    }
                    ResolveOutcome::Failed(error) => {
                        return self.fail(messaging, event, Some(&agent), error).await;
                    }
                }
            }
            _ => agent,
        };

        self.enter(Stage::HistoryLoading, event);
        let history = match thread_id {
            Some(thread_id) => self.load_history(thread_id).await,
            None => None,
        };

        self.enter(Stage::SessionAcquiring, event);
        let selected = match self.select_client(&agent).await {
            Ok(selected) => selected,
            Err(error) => return self.fail(messaging, event, Some(&agent), error).await,
        };

        if let Some((provider, model)) = &selected.replaced {
            self.enter(Stage::Fallback, event);
            let warning =
                replies::fallback_warning(provider, model, &selected.client.describe());
            if let Err(error) = messaging
                .post_message(&event.channel_id, thread_ts, &warning)
                .await
            {
                tracing::warn!(%error, channel_id = %event.channel_id, "failed to post fallback warning");
            }
        }

        let mut session = match selected.client.new_session(&agent.system_prompt, history) {
            Ok(session) => session,
            Err(error) => return self.fail(messaging, event, Some(&agent), error).await,
        };
        self.enter(Stage::SessionReady, event);

        self.enter(Stage::Generating, event);
        // In a continuing thread the agent is fixed, so nothing is stripped.
        let message = if context.requires_agent_resolution {
            mention.message.as_str()
        } else {
            trailing.trim()
        };
        let response = match session.generate_content(message).await {
            Ok(response) => response,
            Err(error) => return self.fail(messaging, event, Some(&agent), error).await,
        };

        self.enter(Stage::Replying, event);
        let text = replies::response_text(response.joined());
        let posted = match self.display_identity(&agent) {
            Some(display) => {
                messaging
                    .post_message_as(&event.channel_id, thread_ts, &text, &display)
                    .await
            }
            None => messaging.post_message(&event.channel_id, thread_ts, &text).await,
        };
        if let Err(error) = posted {
            tracing::error!(
                %error,
                thread_id = ?thread_id,
                channel_id = %event.channel_id,
                user_id = %event.user_id,
                agent = %agent.agent,
                "failed to post reply"
            );
            return Err(error);
        }

        if let Some(thread_id) = thread_id {
            self.enter(Stage::HistoryPersisting, event);
            self.save_history(thread_id, session.current_history()).await;
        }

        self.enter(Stage::Done, event);
        Ok(())
    }

    /// Record a plain message posted in a thread this bot already tracks.
    /// Messages in unknown threads are ignored.
    pub async fn record_thread_message(&self, event: &ThreadMessageEvent) -> Result<()> {
        let Some(store) = &self.thread_store else {
            return Ok(());
        };

        let Some(thread) = store
            .get_thread_by_key(&event.channel_id, &event.thread_ts)
            .await?
        else {
            return Ok(());
        };

        let user_name = match self.messaging.as_deref() {
            Some(messaging) => user_details(messaging, &event.user_id).await.value.display_name,
            None => String::new(),
        };

        store
            .append_message(NewMessage {
                thread_id: thread.id,
                user_id: event.user_id.clone(),
                user_name,
                text: event.text.clone(),
                ts: event.ts.clone(),
            })
            .await?;

        tracing::debug!(thread_id = %thread.id, channel_id = %event.channel_id, "thread message recorded");
        Ok(())
    }

    fn enter(&self, stage: Stage, event: &MentionEvent) {
        tracing::trace!(stage = stage.as_str(), channel_id = %event.channel_id, ts = %event.ts, "mention stage");
    }

    async fn reply_llm_not_configured(
        &self,
        messaging: &dyn MessagingClientDyn,
        event: &MentionEvent,
    ) -> Result<()> {
        tracing::warn!(channel_id = %event.channel_id, "mention received but no LLM is configured");

        if let Some(store) = &self.thread_store {
            let recorded = async {
                let thread = store.get_or_create_thread(&event.thread_key()).await?;
                let user_name = user_details(messaging, &event.user_id).await.value.display_name;
                store
                    .append_message(NewMessage {
                        thread_id: thread.id,
                        user_id: event.user_id.clone(),
                        user_name,
                        text: event.text.clone(),
                        ts: event.ts.clone(),
                    })
                    .await
            }
            .await;

            if let Err(error) = recorded {
                tracing::warn!(%error, channel_id = %event.channel_id, "failed to record message");
            }
        }

        messaging
            .post_message(&event.channel_id, event.thread_root(), replies::LLM_NOT_CONFIGURED)
            .await
    }

    async fn reply_agent_not_found(
        &self,
        messaging: &dyn MessagingClientDyn,
        event: &MentionEvent,
        agent_id: &str,
    ) -> Result<()> {
        tracing::info!(%agent_id, channel_id = %event.channel_id, user_id = %event.user_id, "requested agent not found");

        let (agents, total) = match &self.agent_directory {
            Some(directory) => match directory
                .list_active_agents(0, replies::AGENT_LIST_LIMIT)
                .await
            {
                Ok(page) => page,
                Err(error) => {
                    tracing::warn!(%error, "failed to list agents for help reply");
                    (Vec::new(), 0)
                }
            },
            None => (Vec::new(), 0),
        };

        let reply = replies::agent_not_found(agent_id, &agents, total);
        messaging
            .post_message(&event.channel_id, event.thread_root(), &reply)
            .await
    }

    /// Apologize in the thread and hand the error back.
    async fn fail(
        &self,
        messaging: &dyn MessagingClientDyn,
        event: &MentionEvent,
        agent: Option<&AgentContext>,
        error: Error,
    ) -> Result<()> {
        self.enter(Stage::Fatal, event);
        tracing::error!(
            %error,
            channel_id = %event.channel_id,
            user_id = %event.user_id,
            agent = ?agent.map(|agent| agent.agent.to_string()),
            "failed to handle mention"
        );

        if let Err(post_error) = messaging
            .post_message(&event.channel_id, event.thread_root(), replies::EXPERIENCING_ISSUES)
            .await
        {
            tracing::warn!(error = %post_error, channel_id = %event.channel_id, "failed to post apology");
        }

        Err(error)
    }

    /// Get or create the bound thread and append the triggering message.
    async fn record_mention(
        &self,
        messaging: &dyn MessagingClientDyn,
        event: &MentionEvent,
        agent: &AgentContext,
    ) -> Result<Option<Thread>> {
        let Some(store) = &self.thread_store else {
            return Ok(None);
        };

        let thread = store
            .get_or_create_thread_with_agent(&event.thread_key(), &agent.binding())
            .await?;

        let channel = channel_details(messaging, &event.channel_id).await;
        let user = user_details(messaging, &event.user_id).await;
        tracing::debug!(
            thread_id = %thread.id,
            channel_name = %channel.value.name,
            channel_kind = %channel.value.kind,
            user_name = %user.value.display_name,
            metadata_defaulted = channel.defaulted || user.defaulted,
            "recording mention"
        );

        store
            .append_message(NewMessage {
                thread_id: thread.id,
                user_id: event.user_id.clone(),
                user_name: user.value.display_name,
                text: event.text.clone(),
                ts: event.ts.clone(),
            })
            .await?;

        Ok(Some(thread))
    }

    /// Latest history payload for a thread. Any failure starts fresh.
    async fn load_history(&self, thread_id: Uuid) -> Option<Vec<u8>> {
        let store = self.thread_store.as_ref()?;
        let history_store = self.history_store.as_ref()?;

        let record = match store.latest_history_record(thread_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(%error, %thread_id, "failed to load history record, starting fresh");
                return None;
            }
        };

        match history_store.load_payload(thread_id, record.id).await {
            Ok(payload) => Some(payload),
            Err(error) => {
                tracing::warn!(%error, %thread_id, history_id = %record.id, "failed to load history payload, starting fresh");
                None
            }
        }
    }

    /// Persist the session history under a new record. Best effort.
    async fn save_history(&self, thread_id: Uuid, payload: Result<Vec<u8>>) {
        let (Some(store), Some(history_store)) = (&self.thread_store, &self.history_store) else {
            return;
        };

        let payload = match payload {
            Ok(payload) if payload.is_empty() => return,
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(%error, %thread_id, "failed to encode session history");
                return;
            }
        };

        let record = HistoryRecord::new(thread_id);
        if let Err(error) = history_store
            .save_payload(thread_id, record.id, &payload)
            .await
        {
            tracing::warn!(%error, %thread_id, history_id = %record.id, "failed to save history payload");
            return;
        }

        if let Err(error) = store.put_history_record(&record).await {
            tracing::warn!(%error, %thread_id, history_id = %record.id, "failed to save history record");
        }
    }

    async fn select_client(&self, agent: &AgentContext) -> Result<SelectedClient> {
        let Some(gateway) = &self.gateway else {
            return self
                .llm_client
                .clone()
                .map(|client| SelectedClient {
                    client,
                    replaced: None,
                })
                .ok_or_else(|| LlmError::NoClientAvailable.into());
        };

        let Some((provider, model)) = agent.model_route() else {
            let client = match &self.llm_client {
                Some(client) => client.clone(),
                None => gateway.fallback_client().await?,
            };
            return Ok(SelectedClient {
                client,
                replaced: None,
            });
        };

        match gateway.create_client(provider, model).await {
            Ok(client) => Ok(SelectedClient {
                client,
                replaced: None,
            }),
            Err(primary) => {
                tracing::warn!(%primary, %provider, %model, agent = %agent.agent, "client creation failed, trying fallback");
                match gateway.fallback_client().await {
                    Ok(client) => Ok(SelectedClient {
                        client,
                        replaced: Some((provider.to_string(), model.to_string())),
                    }),
                    Err(fallback) => Err(LlmError::FallbackFailed {
                        provider: provider.to_string(),
                        model: model.to_string(),
                        primary: Box::new(primary),
                        fallback: Box::new(fallback),
                    }
                    .into()),
                }
            }
        }
    }

    /// Agent name and icon, for concrete agents with an image when a base URL is set.
    fn display_identity(&self, agent: &AgentContext) -> Option<DisplayIdentity> {
        agent.agent.uuid()?;
        let base_url = self.image_base_url.as_deref()?;
        let image_path = agent.display.image_path.as_deref()?;

        Some(DisplayIdentity {
            name: agent.display.name.clone().unwrap_or_else(|| "Tamamo".to_string()),
            icon_url: format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                image_path.trim_start_matches('/')
            ),
        })
    }
}
