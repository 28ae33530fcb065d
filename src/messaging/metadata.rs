//! Best-effort channel and user lookups that never block a reply.

use crate::messaging::traits::{ChannelInfo, ChannelKind, MessagingClientDyn, UserInfo};

/// A looked-up value, or a default standing in for a failed lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup<T> {
    pub value: T,
    pub defaulted: bool,
}

impl<T> Lookup<T> {
    fn found(value: T) -> Self {
        Self {
            value,
            defaulted: false,
        }
    }

    fn defaulted(value: T) -> Self {
        Self {
            value,
            defaulted: true,
        }
    }
}

/// Channel name and kind. Falls back to the channel id as a public channel.
pub async fn channel_details(
    client: &dyn MessagingClientDyn,
    channel_id: &str,
) -> Lookup<ChannelInfo> {
    match client.channel_info(channel_id).await {
        Ok(info) => Lookup::found(info),
        Err(error) => {
            tracing::warn!(%error, %channel_id, "channel lookup failed, using defaults");
            Lookup::defaulted(ChannelInfo {
                name: channel_id.to_string(),
                kind: ChannelKind::Public,
            })
        }
    }
}

/// User display name. Falls back to an empty name.
pub async fn user_details(client: &dyn MessagingClientDyn, user_id: &str) -> Lookup<UserInfo> {
    match client.user_info(user_id).await {
        Ok(info) => Lookup::found(info),
        Err(error) => {
            tracing::warn!(%error, %user_id, "user lookup failed, using defaults");
            Lookup::defaulted(UserInfo::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::fake::FakeMessenger;

    #[tokio::test]
    async fn successful_lookups_are_not_defaulted() {
        let messenger = FakeMessenger::new("UBOT");
        messenger.set_channel("C1", "general", ChannelKind::Private);
        messenger.set_user("U1", "Alice");

        let channel = channel_details(&messenger, "C1").await;
        assert!(!channel.defaulted);
        assert_eq!(channel.value.name, "general");
        assert_eq!(channel.value.kind, ChannelKind::Private);

        let user = user_details(&messenger, "U1").await;
        assert!(!user.defaulted);
        assert_eq!(user.value.display_name, "Alice");
    }

    #[tokio::test]
    async fn failed_lookups_fall_back_to_defaults() {
        let messenger = FakeMessenger::new("UBOT");
        messenger.fail_lookups();

        let channel = channel_details(&messenger, "C42").await;
        assert!(channel.defaulted);
        assert_eq!(channel.value.name, "C42");
        assert_eq!(channel.value.kind, ChannelKind::Public);

        let user = user_details(&messenger, "U1").await;
        assert!(user.defaulted);
        assert_eq!(user.value.display_name, "");
    }
}
