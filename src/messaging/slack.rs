//! Slack client and Socket Mode listener using slack-morphism.
//!
//! **Outbound**: thread replies (optionally under an agent's name and icon),
//! split into UTF-8-safe chunks; `conversations.info` and `users.info` lookups.
//!
//! **Inbound**: `app_mention` events become [`MentionEvent`]s; plain messages
//! inside threads become [`ThreadMessageEvent`]s for recording.

use crate::error::{MessagingError, Result};
use crate::messaging::traits::{
    ChannelInfo, ChannelKind, DisplayIdentity, MessagingClient, UserInfo,
};
use crate::orchestrator::{MentionEvent, ThreadMessageEvent};

use anyhow::Context as _;
use slack_morphism::prelude::*;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Slack caps `markdown` blocks at 12,000 characters per payload.
const MAX_MESSAGE_LEN: usize = 12_000;

/// An inbound event worth handling.
#[derive(Debug, Clone)]
pub enum SlackEvent {
    Mention(MentionEvent),
    ThreadMessage(ThreadMessageEvent),
}

/// Slack Web API client bound to the bot token.
pub struct SlackMessenger {
    /// Shared HTTP client; holds the hyper connection pool.
    client: Arc<SlackHyperClient>,
    token: SlackApiToken,
    bot_user_id: String,
}

impl SlackMessenger {
    /// Build the client and resolve the bot's own user id via `auth.test`.
    pub async fn connect(bot_token: impl Into<String>) -> Result<Self> {
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("failed to create slack HTTP connector")?,
        ));
        let token = SlackApiToken::new(SlackApiTokenValue(bot_token.into()));

        let auth_response = client
            .open_session(&token)
            .auth_test()
            .await
            .context("failed to call auth.test for bot user ID")?;
        let bot_user_id = auth_response.user_id.0.clone();
        tracing::info!(bot_user_id = %bot_user_id, "slack bot user ID resolved");

        Ok(Self {
            client,
            token,
            bot_user_id,
        })
    }

    pub fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.token)
    }

    async fn post_chunks(
        &self,
        channel_id: &str,
        thread_ts: &str,
        text: &str,
        display: Option<&DisplayIdentity>,
    ) -> Result<()> {
        let session = self.session();

        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            let mut request = SlackApiChatPostMessageRequest::new(
                SlackChannelId(channel_id.to_string()),
                markdown_content(chunk),
            )
            .with_thread_ts(SlackTs(thread_ts.to_string()));

            if let Some(display) = display {
                request = request
                    .with_username(display.name.clone())
                    .with_icon_url(display.icon_url.clone());
            }

            session
                .chat_post_message(&request)
                .await
                .map_err(|error| MessagingError::PostFailed {
                    channel_id: channel_id.to_string(),
                    reason: error.to_string(),
                })?;
        }

        Ok(())
    }
}

impl MessagingClient for SlackMessenger {
    fn is_bot_user(&self, user_id: &str) -> bool {
        user_id == self.bot_user_id
    }

    async fn post_message(&self, channel_id: &str, thread_ts: &str, text: &str) -> Result<()> {
        self.post_chunks(channel_id, thread_ts, text, None).await
    }

    async fn post_message_as(
        &self,
        channel_id: &str,
        thread_ts: &str,
        text: &str,
        display: &DisplayIdentity,
    ) -> Result<()> {
        self.post_chunks(channel_id, thread_ts, text, Some(display))
            .await
    }

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo> {
        let response = self
            .session()
            .conversations_info(&SlackApiConversationsInfoRequest::new(SlackChannelId(
                channel_id.to_string(),
            )))
            .await
            .map_err(|error| MessagingError::LookupFailed(error.to_string()))?;

        let channel = response.channel;
        Ok(ChannelInfo {
            name: channel
                .name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| channel_id.to_string()),
            kind: channel_kind(
                channel.flags.is_im.unwrap_or(false),
                channel.flags.is_mpim.unwrap_or(false),
                channel.flags.is_private.unwrap_or(false),
            ),
        })
    }

    async fn user_info(&self, user_id: &str) -> Result<UserInfo> {
        let response = self
            .session()
            .users_info(&SlackApiUsersInfoRequest::new(SlackUserId(
                user_id.to_string(),
            )))
            .await
            .map_err(|error| MessagingError::LookupFailed(error.to_string()))?;

        Ok(UserInfo {
            display_name: resolve_display_name(&response.user),
        })
    }
}

fn channel_kind(is_im: bool, is_mpim: bool, is_private: bool) -> ChannelKind {
    if is_im {
        ChannelKind::Im
    } else if is_mpim {
        ChannelKind::Mpim
    } else if is_private {
        ChannelKind::Private
    } else {
        ChannelKind::Public
    }
}

/// Profile display name, then real name, then handle. Empty if none is set.
fn resolve_display_name(user: &SlackUser) -> String {
    user.profile
        .as_ref()
        .and_then(|profile| {
            [&profile.display_name, &profile.real_name]
                .into_iter()
                .flatten()
                .find(|name| !name.trim().is_empty())
                .cloned()
        })
        .or_else(|| user.name.clone().filter(|name| !name.trim().is_empty()))
        .unwrap_or_default()
}

/// Build message content using a `markdown` block, falling back to plain text
/// for content over the block limit.
fn markdown_content(text: impl Into<String>) -> SlackMessageContent {
    let text = text.into();
    if text.len() <= MAX_MESSAGE_LEN {
        let block = SlackBlock::Markdown(SlackMarkdownBlock::new(text.clone()));
        SlackMessageContent::new()
            .with_text(text)
            .with_blocks(vec![block])
    } else {
        SlackMessageContent::new().with_text(text)
    }
}

/// Split a message into UTF-8-safe chunks at line/word boundaries.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut safe_max = max_len.min(remaining.len());
        while !remaining.is_char_boundary(safe_max) {
            safe_max -= 1;
        }

        let split_at = remaining[..safe_max]
            .rfind('\n')
            .or_else(|| remaining[..safe_max].rfind(' '))
            .filter(|index| *index > 0)
            .unwrap_or(safe_max);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ---------------------------------------------------------------------------
// Socket Mode (fn pointer callbacks, a slack-morphism requirement)
// ---------------------------------------------------------------------------

/// State shared with socket mode callbacks via `SlackClientEventsUserState`.
struct ListenerState {
    events_tx: mpsc::Sender<SlackEvent>,
    bot_user_id: String,
}

/// Connect Socket Mode and forward events until the connection ends.
pub async fn listen(
    app_token: &str,
    bot_user_id: &str,
    events_tx: mpsc::Sender<SlackEvent>,
) -> Result<()> {
    let state = Arc::new(ListenerState {
        events_tx,
        bot_user_id: bot_user_id.to_string(),
    });

    let callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

    // The listener owns its WebSocket connection, so it gets its own client.
    let listener_client = Arc::new(SlackClient::new(
        SlackClientHyperConnector::new().context("failed to create slack socket mode connector")?,
    ));

    let listener_environment = Arc::new(
        SlackClientEventsListenerEnvironment::new(listener_client)
            .with_error_handler(slack_error_handler)
            .with_user_state(state),
    );

    let listener = SlackClientSocketModeListener::new(
        &SlackClientSocketModeConfig::new(),
        listener_environment,
        callbacks,
    );

    let app_token = SlackApiToken::new(SlackApiTokenValue(app_token.to_string()));
    listener
        .listen_for(&app_token)
        .await
        .context("failed to start slack socket mode listener")?;

    tracing::info!("slack socket mode connected");
    let exit_code = listener.serve().await;
    tracing::info!(exit_code, "slack socket mode listener stopped");

    Ok(())
}

async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> UserCallbackResult<()> {
    let state_guard = states.read().await;
    let Some(state) = state_guard.get_user_state::<Arc<ListenerState>>() else {
        tracing::error!("slack listener state missing, dropping event");
        return Ok(());
    };

    let team_id = event.team_id.0.clone();
    let forwarded = match event.event {
        SlackEventCallbackBody::AppMention(mention) => app_mention_event(mention, team_id, state),
        SlackEventCallbackBody::Message(message) => thread_message_event(message, team_id, state),
        _ => None,
    };

    if let Some(forwarded) = forwarded {
        if let Err(error) = state.events_tx.send(forwarded).await {
            tracing::warn!(%error, "event receiver dropped");
        }
    }

    Ok(())
}

fn app_mention_event(
    mention: SlackAppMentionEvent,
    team_id: String,
    state: &ListenerState,
) -> Option<SlackEvent> {
    let user_id = mention.user.0.clone();
    if user_id == state.bot_user_id {
        return None;
    }

    Some(SlackEvent::Mention(MentionEvent {
        team_id,
        user_id,
        text: mention.content.text.clone().unwrap_or_default(),
        channel_id: mention.channel.0.clone(),
        ts: mention.origin.ts.0.clone(),
        thread_ts: mention.origin.thread_ts.as_ref().map(|ts| ts.0.clone()),
    }))
}

/// Plain human replies inside a thread. Mentions of the bot arrive separately
/// as `app_mention` and are skipped here.
fn thread_message_event(
    message: SlackMessageEvent,
    team_id: String,
    state: &ListenerState,
) -> Option<SlackEvent> {
    if !is_recorded_subtype(message.subtype.as_ref()) || message.sender.bot_id.is_some() {
        return None;
    }

    let user_id = message.sender.user.as_ref()?.0.clone();
    if user_id == state.bot_user_id {
        return None;
    }

    let thread_ts = message.origin.thread_ts.as_ref()?.0.clone();
    let channel_id = message.origin.channel.as_ref()?.0.clone();
    let text = message
        .content
        .as_ref()
        .and_then(|content| content.text.clone())
        .unwrap_or_default();

    if text.contains(&format!("<@{}", state.bot_user_id)) {
        return None;
    }

    Some(SlackEvent::ThreadMessage(ThreadMessageEvent {
        team_id,
        user_id,
        text,
        channel_id,
        ts: message.origin.ts.0.clone(),
        thread_ts,
    }))
}

/// Subtypes that are still a person writing in the thread. Edits, deletes,
/// joins and bot messages are not.
fn is_recorded_subtype(subtype: Option<&SlackMessageEventType>) -> bool {
    matches!(
        subtype,
        None | Some(
            SlackMessageEventType::ThreadBroadcast
                | SlackMessageEventType::FileShare
                | SlackMessageEventType::MeMessage
        )
    )
}

fn slack_error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> HttpStatusCode {
    tracing::warn!(error = %err, "slack socket mode error");
    HttpStatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_messages_are_not_split() {
        assert_eq!(split_message("hello", 100), vec!["hello".to_string()]);
    }

    #[test]
    fn long_messages_split_on_line_breaks() {
        let text = format!("{}\n{}", "a".repeat(8), "b".repeat(8));
        assert_eq!(
            split_message(&text, 10),
            vec!["a".repeat(8), "b".repeat(8)]
        );
    }

    #[test]
    fn splitting_never_cuts_a_character() {
        let text = "日本語".repeat(10);
        let chunks = split_message(&text, 10);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|chunk| chunk.len() <= 10));
    }

    #[test]
    fn channel_kinds_follow_flags() {
        assert_eq!(channel_kind(false, false, false), ChannelKind::Public);
        assert_eq!(channel_kind(false, false, true), ChannelKind::Private);
        // Group DMs are also flagged private.
        assert_eq!(channel_kind(false, true, true), ChannelKind::Mpim);
        assert_eq!(channel_kind(true, false, true), ChannelKind::Im);
    }

    fn subtype(wire: &str) -> SlackMessageEventType {
        serde_json::from_value(serde_json::Value::String(wire.into()))
            .expect("known slack subtype")
    }

    #[test]
    fn broadcasts_and_file_shares_are_recorded() {
        assert!(is_recorded_subtype(None));
        assert!(is_recorded_subtype(Some(&subtype("thread_broadcast"))));
        assert!(is_recorded_subtype(Some(&subtype("file_share"))));
    }

    #[test]
    fn edits_deletes_joins_and_bots_are_skipped() {
        for wire in ["message_changed", "message_deleted", "channel_join", "bot_message"] {
            assert!(
                !is_recorded_subtype(Some(&subtype(wire))),
                "{wire} should be skipped"
            );
        }
    }
}
