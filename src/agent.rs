//! Agents: directory lookups, mention parsing and per-request resolution.

pub mod directory;
pub mod mention;
pub mod resolver;

pub use directory::{Agent, AgentDirectory, AgentStatus, AgentVersion, SqliteAgentDirectory};
pub use mention::AgentMention;
pub use resolver::{AgentContext, AgentDisplay, AgentResolver, ResolveOutcome};

use uuid::Uuid;

/// Who answers a thread: the built-in general mode or a directory agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRef {
    General,
    Agent(Uuid),
}

impl AgentRef {
    pub fn uuid(&self) -> Option<Uuid> {
        match self {
            AgentRef::General => None,
            AgentRef::Agent(uuid) => Some(*uuid),
        }
    }

    /// Storage discriminator.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentRef::General => "general",
            AgentRef::Agent(_) => "agent",
        }
    }
}

impl std::fmt::Display for AgentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRef::General => write!(f, "general"),
            AgentRef::Agent(uuid) => write!(f, "agent:{}", uuid),
        }
    }
}
