//! One chat turn: memory, retrieval, prompt assembly, completion, write-back.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use desk_llm::error::LlmError;
use desk_llm::provider::{LlmProvider, Message};
use desk_memory::{ChatMessage, ChatRole, KnowledgeIndex, RecordMetadata, SearchHit, SessionMemoryStore};
use serde::Serialize;

use crate::config::{Config, DEFAULT_SYSTEM_PROMPT};

pub const APOLOGY: &str = "I apologize, but I encountered an error. Please try again.";

const KNOWLEDGE_PREFIX: &str = "[knowledge base]\n";

/// A retrieved chunk cited in a reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub title: String,
    pub content: String,
    pub metadata: RecordMetadata,
    pub score: f32,
}

impl From<SearchHit> for SourceRef {
    fn from(hit: SearchHit) -> Self {
        Self {
            title: hit.metadata.title.clone(),
            content: hit.content,
            metadata: hit.metadata,
            score: hit.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnReply {
    pub response_text: String,
    pub sources: Vec<SourceRef>,
}

impl TurnReply {
    #[must_use]
    pub fn apology() -> Self {
        Self {
            response_text: APOLOGY.to_owned(),
            sources: Vec::new(),
        }
    }
}

/// Object-safe entry point used by the gateway.
pub trait Conversation: Send + Sync {
    /// Handle one user message for `session_id`. Never fails: errors become an apology.
    fn handle_turn<'a>(
        &'a self,
        session_id: &'a str,
        user_message: &'a str,
    ) -> Pin<Box<dyn Future<Output = TurnReply> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub search_limit: usize,
    pub history_window: usize,
    pub max_context_chars: usize,
    pub system_prompt: String,
    pub llm_timeout: Duration,
    pub retrieval_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            search_limit: 5,
            history_window: 10,
            max_context_chars: 6000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            llm_timeout: Duration::from_secs(60),
            retrieval_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            search_limit: config.index.search_limit,
            history_window: config.chat.history_window,
            max_context_chars: config.chat.max_context_chars,
            system_prompt: config.chat.system_prompt.clone(),
            llm_timeout: Duration::from_secs(config.timeouts.llm_seconds),
            retrieval_timeout: Duration::from_secs(config.timeouts.embedding_seconds),
        }
    }
}

pub struct ConversationOrchestrator<P: LlmProvider> {
    provider: Arc<P>,
    index: Arc<KnowledgeIndex>,
    memory: Arc<SessionMemoryStore>,
    config: OrchestratorConfig,
}

impl<P: LlmProvider> std::fmt::Debug for ConversationOrchestrator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationOrchestrator")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider> ConversationOrchestrator<P> {
    #[must_use]
    pub fn new(
        provider: Arc<P>,
        index: Arc<KnowledgeIndex>,
        memory: Arc<SessionMemoryStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provider,
            index,
            memory,
            config,
        }
    }

    #[must_use]
    pub fn memory(&self) -> &Arc<SessionMemoryStore> {
        &self.memory
    }

    pub async fn handle_turn(&self, session_id: &str, user_message: &str) -> TurnReply {
        let history = self.memory.read(session_id).await;
        let mut sources = self.retrieve(user_message).await;
        let context = knowledge_block(&sources, self.config.max_context_chars);
        // Only the entries that reached the prompt are attributed.
        sources.truncate(context.as_ref().map_or(0, |(_, included)| *included));
        let messages = self.build_prompt(&history, context.map(|(text, _)| text), user_message);

        match self.complete(&messages).await {
            Ok(response_text) => {
                self.memory
                    .append_batch(
                        session_id,
                        vec![
                            (ChatRole::User, user_message.to_owned()),
                            (ChatRole::Assistant, response_text.clone()),
                        ],
                    )
                    .await;
                tracing::debug!(session_id, sources = sources.len(), "turn completed");
                TurnReply {
                    response_text,
                    sources,
                }
            }
            Err(e) => {
                tracing::error!(session_id, "completion failed: {e}");
                self.memory
                    .append(session_id, ChatRole::User, user_message)
                    .await;
                TurnReply::apology()
            }
        }
    }

    async fn retrieve(&self, query: &str) -> Vec<SourceRef> {
        let search = self.index.search_text(query, self.config.search_limit);
        match tokio::time::timeout(self.config.retrieval_timeout, search).await {
            Ok(Ok(hits)) => hits.into_iter().map(SourceRef::from).collect(),
            Ok(Err(e)) => {
                tracing::warn!("retrieval failed, answering without sources: {e}");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.retrieval_timeout.as_secs(),
                    "retrieval timed out, answering without sources"
                );
                Vec::new()
            }
        }
    }

    fn build_prompt(
        &self,
        history: &[ChatMessage],
        context: Option<String>,
        user_message: &str,
    ) -> Vec<Message> {
        let window = self.config.history_window;
        let tail = &history[history.len().saturating_sub(window)..];

        let mut messages = Vec::with_capacity(tail.len() + 3);
        messages.push(Message::system(self.config.system_prompt.clone()));
        if let Some(context) = context {
            messages.push(Message::system(context));
        }
        messages.extend(tail.iter().map(|m| match m.role {
            ChatRole::User => Message::user(m.content.clone()),
            ChatRole::Assistant => Message::assistant(m.content.clone()),
        }));
        messages.push(Message::user(user_message));
        messages
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        match tokio::time::timeout(self.config.llm_timeout, self.provider.chat(messages)).await {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.config.llm_timeout.as_secs())),
        }
    }
}

impl<P: LlmProvider + 'static> Conversation for ConversationOrchestrator<P> {
    fn handle_turn<'a>(
        &'a self,
        session_id: &'a str,
        user_message: &'a str,
    ) -> Pin<Box<dyn Future<Output = TurnReply> + Send + 'a>> {
        Box::pin(ConversationOrchestrator::handle_turn(
            self,
            session_id,
            user_message,
        ))
    }
}

/// Attributed source text, cut at whole entries so the block stays within `max_chars`.
///
/// Returns the block and how many leading `sources` it holds.
fn knowledge_block(sources: &[SourceRef], max_chars: usize) -> Option<(String, usize)> {
    let mut text = String::from(KNOWLEDGE_PREFIX);
    let prefix_len = KNOWLEDGE_PREFIX.chars().count();
    let mut used = prefix_len;
    let mut included = 0;

    for source in sources {
        let entry = format!("- [{}] {}\n", source.title, source.content);
        let entry_len = entry.chars().count();
        if used + entry_len > max_chars {
            break;
        }
        text.push_str(&entry);
        used += entry_len;
        included += 1;
    }

    (included > 0).then_some((text, included))
}
