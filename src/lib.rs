//! Tamamo: a Slack bot that routes mentions to configured AI agents and keeps
//! per-thread conversations with them.

pub mod agent;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod llm;
pub mod logging;
pub mod messaging;
pub mod orchestrator;

pub use error::{Error, Result};
pub use orchestrator::{MentionEvent, MentionHandler, MentionHandlerConfig, ThreadMessageEvent};
pub use orchestrator::dispatch::{DrainReport, dispatch_events};
