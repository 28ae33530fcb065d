//! User-facing reply texts.

use crate::agent::Agent;

use indoc::indoc;

/// How many agents the not-found help lists.
pub const AGENT_LIST_LIMIT: i64 = 10;

pub const LLM_NOT_CONFIGURED: &str =
    "LLM not configured. Ask a workspace admin to set up an LLM provider for Tamamo.";

pub const EXPERIENCING_ISSUES: &str =
    "Sorry, I'm experiencing issues right now and couldn't answer. Please try again in a little while.";

pub const NO_RESPONSE: &str = "(no response)";

pub const USAGE: &str = indoc! {"
    *How to use Tamamo*
    • `@Tamamo <message>` chats with Tamamo directly.
    • `@Tamamo <agent-id> <message>` starts a thread with a specific agent.
    The agent chosen when a thread starts answers every reply in that thread."};

/// Help reply for an unknown or archived agent id.
pub fn agent_not_found(agent_id: &str, agents: &[Agent], total: i64) -> String {
    let mut reply = format!("Agent ID '{agent_id}' not found.\n\n");

    if agents.is_empty() {
        reply.push_str("No agents are available right now.\n");
    } else {
        reply.push_str("*Available agents*\n");
        for agent in agents {
            if agent.description.trim().is_empty() {
                reply.push_str(&format!("• `{}`\n", agent.agent_id));
            } else {
                reply.push_str(&format!(
                    "• `{}`: {}\n",
                    agent.agent_id,
                    agent.description.trim()
                ));
            }
        }
        let remaining = total - agents.len() as i64;
        if remaining > 0 {
            reply.push_str(&format!("…and {remaining} more.\n"));
        }
    }

    reply.push('\n');
    reply.push_str(USAGE);
    reply
}

/// Posted before the answer when the requested model couldn't be used.
pub fn fallback_warning(provider: &str, model: &str, fallback: &str) -> String {
    format!(
        ":warning: The model `{provider}/{model}` configured for this agent is unavailable. \
         Answering with `{fallback}` instead."
    )
}

/// Joined response text, or a placeholder when the model said nothing.
pub fn response_text(joined: String) -> String {
    if joined.trim().is_empty() {
        NO_RESPONSE.to_string()
    } else {
        joined
    }
}
