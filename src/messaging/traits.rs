//! Messaging client trait and dynamic dispatch companion.

use crate::error::Result;

use std::future::Future;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Public,
    Private,
    Im,
    Mpim,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Public => "public",
            ChannelKind::Private => "private",
            ChannelKind::Im => "im",
            ChannelKind::Mpim => "mpim",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    pub kind: ChannelKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub display_name: String,
}

/// Name and icon a reply is posted under instead of the bot's own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayIdentity {
    pub name: String,
    pub icon_url: String,
}

/// Static trait for chat platform clients.
/// Use this for type-safe implementations.
pub trait MessagingClient: Send + Sync + 'static {
    /// Whether `user_id` is this bot.
    fn is_bot_user(&self, user_id: &str) -> bool;

    /// Reply in a thread under the bot's default identity.
    fn post_message(
        &self,
        channel_id: &str,
        thread_ts: &str,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Reply in a thread under another display name and icon.
    fn post_message_as(
        &self,
        channel_id: &str,
        thread_ts: &str,
        text: &str,
        display: &DisplayIdentity,
    ) -> impl Future<Output = Result<()>> + Send;

    fn channel_info(&self, channel_id: &str) -> impl Future<Output = Result<ChannelInfo>> + Send;

    fn user_info(&self, user_id: &str) -> impl Future<Output = Result<UserInfo>> + Send;
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn MessagingClientDyn>`.
pub trait MessagingClientDyn: Send + Sync + 'static {
    fn is_bot_user(&self, user_id: &str) -> bool;

    fn post_message<'a>(
        &'a self,
        channel_id: &'a str,
        thread_ts: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn post_message_as<'a>(
        &'a self,
        channel_id: &'a str,
        thread_ts: &'a str,
        text: &'a str,
        display: &'a DisplayIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn channel_info<'a>(
        &'a self,
        channel_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ChannelInfo>> + Send + 'a>>;

    fn user_info<'a>(
        &'a self,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UserInfo>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing MessagingClient automatically implements MessagingClientDyn.
impl<T: MessagingClient> MessagingClientDyn for T {
    fn is_bot_user(&self, user_id: &str) -> bool {
        MessagingClient::is_bot_user(self, user_id)
    }

    fn post_message<'a>(
        &'a self,
        channel_id: &'a str,
        thread_ts: &'a str,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(MessagingClient::post_message(self, channel_id, thread_ts, text))
    }

    fn post_message_as<'a>(
        &'a self,
        channel_id: &'a str,
        thread_ts: &'a str,
        text: &'a str,
        display: &'a DisplayIdentity,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(MessagingClient::post_message_as(
            self, channel_id, thread_ts, text, display,
        ))
    }

    fn channel_info<'a>(
        &'a self,
        channel_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ChannelInfo>> + Send + 'a>> {
        Box::pin(MessagingClient::channel_info(self, channel_id))
    }

    fn user_info<'a>(
        &'a self,
        user_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UserInfo>> + Send + 'a>> {
        Box::pin(MessagingClient::user_info(self, user_id))
    }
}
