//! LLM provider gateway, clients and chat sessions.

pub mod manager;
pub mod model;
pub mod traits;

pub use manager::LlmManager;
pub use model::{HttpChatClient, HttpChatSession};
pub use traits::{ChatSession, GenerateResponse, LlmClient, ProviderGateway};
