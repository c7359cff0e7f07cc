//! Configuration loading, secret resolution, and the conversation orchestrator.

pub mod config;
pub mod orchestrator;
pub mod vault;

pub use config::Config;
pub use orchestrator::{
    APOLOGY, Conversation, ConversationOrchestrator, OrchestratorConfig, SourceRef, TurnReply,
};
