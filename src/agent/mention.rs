//! Mention parsing: `<@BOT> [agent-id] message`.

use regex::Regex;
use std::sync::LazyLock;

/// Slack user mention, optionally with a label: `<@U123>` or `<@U123|name>`.
static USER_MENTION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<@([A-Z0-9]+)(?:\|[^>]*)?>").expect("hardcoded mention regex")
});

static AGENT_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_-]{2,31}$").expect("hardcoded agent id regex")
});

/// What a user asked for after mentioning the bot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AgentMention {
    /// Requested agent's public id; empty when none was given.
    pub agent_id: String,
    pub message: String,
}

impl AgentMention {
    /// Parse the first mention in `text`. `None` when the text mentions nobody.
    pub fn parse(text: &str) -> Option<Self> {
        let found = USER_MENTION_REGEX.find(text)?;
        Some(Self::from_trailing(&text[found.end()..]))
    }

    /// Parse the text that follows a mention token.
    pub fn from_trailing(trailing: &str) -> Self {
        let trailing = trailing.trim();
        let (first, rest) = trailing
            .split_once(char::is_whitespace)
            .unwrap_or((trailing, ""));

        if is_valid_agent_id(first) {
            Self {
                agent_id: first.to_string(),
                message: rest.trim().to_string(),
            }
        } else {
            Self {
                agent_id: String::new(),
                message: trailing.to_string(),
            }
        }
    }

    pub fn has_agent_id(&self) -> bool {
        !self.agent_id.is_empty()
    }
}

pub fn is_valid_agent_id(token: &str) -> bool {
    AGENT_ID_REGEX.is_match(token)
}

/// Text following the first mention of a user accepted by `is_bot`.
pub fn find_bot_mention<'a>(text: &'a str, is_bot: impl Fn(&str) -> bool) -> Option<&'a str> {
    USER_MENTION_REGEX.captures_iter(text).find_map(|captures| {
        let user_id = captures.get(1)?.as_str();
        let whole = captures.get(0)?;
        is_bot(user_id).then(|| &text[whole.end()..])
    })
}
