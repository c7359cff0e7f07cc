use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::vault::Secret;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an AI service desk agent. Provide clear and concise responses.";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Separate endpoint for embeddings; `base_url` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_base_url: Option<String>,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".into()
}

fn default_max_tokens() -> u32 {
    500
}

fn default_temperature() -> f32 {
    0.7
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            embedding_model: default_embedding_model(),
            embedding_base_url: None,
        }
    }
}

/// Vector index backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
    /// Flat in-process index persisted to a JSON file.
    #[default]
    Local,
    Qdrant,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackend,
    #[serde(default = "default_local_path")]
    pub local_path: PathBuf,
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_vector_size")]
    pub vector_size: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_index_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

fn default_local_path() -> PathBuf {
    PathBuf::from("data/index.json")
}

fn default_qdrant_url() -> String {
    "http://localhost:6334".into()
}

fn default_collection() -> String {
    "articles_store".into()
}

fn default_vector_size() -> usize {
    384
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_index_concurrency() -> usize {
    4
}

fn default_search_limit() -> usize {
    5
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            local_path: default_local_path(),
            qdrant_url: default_qdrant_url(),
            collection: default_collection(),
            vector_size: default_vector_size(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            concurrency: default_index_concurrency(),
            search_limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Drive,
    Directory,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub kind: SourceKind,
    /// Drive folder id, or a sub-directory of `directory`.
    #[serde(default)]
    pub folder_id: String,
    #[serde(default = "default_drive_base_url")]
    pub drive_base_url: String,
    #[serde(default = "default_source_directory")]
    pub directory: PathBuf,
}

fn default_drive_base_url() -> String {
    desk_memory::document::source::DEFAULT_DRIVE_BASE_URL.into()
}

fn default_source_directory() -> PathBuf {
    PathBuf::from("docs")
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::default(),
            folder_id: String::new(),
            drive_base_url: default_drive_base_url(),
            directory: default_source_directory(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MemoryConfig {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
}

fn default_max_messages() -> usize {
    50
}

fn default_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_gc_interval_secs() -> u64 {
    300
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            ttl_secs: default_ttl_secs(),
            gc_interval_secs: default_gc_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChatConfig {
    /// Trailing memory messages included in each prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Upper bound on retrieved text placed in the prompt.
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_history_window() -> usize {
    10
}

fn default_max_context_chars() -> usize {
    6000
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.into()
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_context_chars: default_max_context_chars(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_gateway_max_body")]
    pub max_body_size: usize,
}

fn default_gateway_bind() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8000
}

fn default_gateway_max_body() -> usize {
    1_048_576
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_gateway_bind(),
            port: default_gateway_port(),
            max_body_size: default_gateway_max_body(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_llm_timeout")]
    pub llm_seconds: u64,
    #[serde(default = "default_embedding_timeout")]
    pub embedding_seconds: u64,
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_embedding_timeout() -> u64 {
    30
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_seconds: default_llm_timeout(),
            embedding_seconds: default_embedding_timeout(),
        }
    }
}

/// Secrets resolved at startup, never read from or written to the TOML file.
#[derive(Debug, Default)]
pub struct ResolvedSecrets {
    pub openai_api_key: Option<Secret>,
    pub drive_access_token: Option<Secret>,
}
