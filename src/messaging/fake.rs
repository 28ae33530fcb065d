//! In-memory messaging client for tests.

use crate::error::{MessagingError, Result};
use crate::messaging::traits::{
    ChannelInfo, ChannelKind, DisplayIdentity, MessagingClient, UserInfo,
};

use parking_lot::Mutex;
use std::collections::HashMap;

/// A reply the fake recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel_id: String,
    pub thread_ts: String,
    pub text: String,
    pub display: Option<DisplayIdentity>,
}

#[derive(Default)]
struct FakeState {
    posts: Vec<PostedMessage>,
    channels: HashMap<String, ChannelInfo>,
    users: HashMap<String, UserInfo>,
    lookups_fail: bool,
    posts_fail: bool,
}

pub struct FakeMessenger {
    bot_user_id: String,
    state: Mutex<FakeState>,
}

impl FakeMessenger {
    pub fn new(bot_user_id: &str) -> Self {
        Self {
            bot_user_id: bot_user_id.to_string(),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn set_channel(&self, channel_id: &str, name: &str, kind: ChannelKind) {
        self.state.lock().channels.insert(
            channel_id.to_string(),
            ChannelInfo {
                name: name.to_string(),
                kind,
            },
        );
    }

    pub fn set_user(&self, user_id: &str, display_name: &str) {
        self.state.lock().users.insert(
            user_id.to_string(),
            UserInfo {
                display_name: display_name.to_string(),
            },
        );
    }

    pub fn fail_lookups(&self) {
        self.state.lock().lookups_fail = true;
    }

    pub fn fail_posts(&self) {
        self.state.lock().posts_fail = true;
    }

    pub fn posts(&self) -> Vec<PostedMessage> {
        self.state.lock().posts.clone()
    }

    fn record(
        &self,
        channel_id: &str,
        thread_ts: &str,
        text: &str,
        display: Option<&DisplayIdentity>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.posts_fail {
            return Err(MessagingError::PostFailed {
                channel_id: channel_id.to_string(),
                reason: "posting disabled".into(),
            }
            .into());
        }
        state.posts.push(PostedMessage {
            channel_id: channel_id.to_string(),
            thread_ts: thread_ts.to_string(),
            text: text.to_string(),
            display: display.cloned(),
        });
        Ok(())
    }
}

impl MessagingClient for FakeMessenger {
    fn is_bot_user(&self, user_id: &str) -> bool {
        user_id == self.bot_user_id
    }

    async fn post_message(&self, channel_id: &str, thread_ts: &str, text: &str) -> Result<()> {
        self.record(channel_id, thread_ts, text, None)
    }

    async fn post_message_as(
        &self,
        channel_id: &str,
        thread_ts: &str,
        text: &str,
        display: &DisplayIdentity,
    ) -> Result<()> {
        self.record(channel_id, thread_ts, text, Some(display))
    }

    async fn channel_info(&self, channel_id: &str) -> Result<ChannelInfo> {
        let state = self.state.lock();
        if state.lookups_fail {
            return Err(MessagingError::LookupFailed("channel_not_found".into()).into());
        }
        Ok(state.channels.get(channel_id).cloned().unwrap_or(ChannelInfo {
            name: channel_id.to_string(),
            kind: ChannelKind::Public,
        }))
    }

    async fn user_info(&self, user_id: &str) -> Result<UserInfo> {
        let state = self.state.lock();
        if state.lookups_fail {
            return Err(MessagingError::LookupFailed("user_not_found".into()).into());
        }
        Ok(state.users.get(user_id).cloned().unwrap_or_default())
    }
}
