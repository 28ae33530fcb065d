//! Messaging: the chat platform seam and its Slack implementation.

#[cfg(test)]
pub(crate) mod fake;
pub mod metadata;
pub mod slack;
pub mod traits;

pub use metadata::{Lookup, channel_details, user_details};
pub use slack::{SlackEvent, SlackMessenger};
pub use traits::{
    ChannelInfo, ChannelKind, DisplayIdentity, MessagingClient, MessagingClientDyn, UserInfo,
};
