use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_index();
        self.apply_env_overrides_runtime();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("DESK_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("DESK_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("DESK_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("DESK_LLM_EMBEDDING_BASE_URL") {
            self.llm.embedding_base_url = Some(v);
        }
        if let Ok(v) = std::env::var("DESK_LLM_MAX_TOKENS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.llm.max_tokens = n;
        }
        if let Ok(v) = std::env::var("DESK_LLM_TEMPERATURE")
            && let Ok(t) = v.parse::<f32>()
        {
            self.llm.temperature = t;
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("DESK_INDEX_BACKEND") {
            if let Ok(backend) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.index.backend = backend;
            } else {
                tracing::warn!("ignoring invalid DESK_INDEX_BACKEND value: {v}");
            }
        }
        if let Ok(v) = std::env::var("DESK_INDEX_LOCAL_PATH") {
            self.index.local_path = v.into();
        }
        if let Ok(v) = std::env::var("DESK_QDRANT_URL") {
            self.index.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("DESK_INDEX_COLLECTION") {
            self.index.collection = v;
        }
        if let Ok(v) = std::env::var("DESK_INDEX_VECTOR_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.vector_size = n;
        }
        if let Ok(v) = std::env::var("DESK_INDEX_CHUNK_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.chunk_size = n;
        }
        if let Ok(v) = std::env::var("DESK_INDEX_CHUNK_OVERLAP")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.chunk_overlap = n;
        }
        if let Ok(v) = std::env::var("DESK_INDEX_CONCURRENCY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.concurrency = n;
        }
        if let Ok(v) = std::env::var("DESK_SOURCE_KIND") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.source.kind = kind;
            } else {
                tracing::warn!("ignoring invalid DESK_SOURCE_KIND value: {v}");
            }
        }
        if let Ok(v) = std::env::var("DESK_DRIVE_FOLDER_ID") {
            self.source.folder_id = v;
        }
        if let Ok(v) = std::env::var("DESK_SOURCE_DIRECTORY") {
            self.source.directory = v.into();
        }
    }

    fn apply_env_overrides_runtime(&mut self) {
        if let Ok(v) = std::env::var("DESK_MAX_CHAT_MEMORY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.memory.max_messages = n;
        }
        if let Ok(v) = std::env::var("DESK_MEMORY_TTL_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.memory.ttl_secs = secs;
        }
        if let Ok(v) = std::env::var("DESK_CHAT_HISTORY_WINDOW")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chat.history_window = n;
        }
        if let Ok(v) = std::env::var("DESK_GATEWAY_BIND") {
            self.gateway.bind = v;
        }
        if let Ok(v) = std::env::var("DESK_GATEWAY_PORT")
            && let Ok(port) = v.parse::<u16>()
        {
            self.gateway.port = port;
        }
        if let Ok(v) = std::env::var("DESK_TIMEOUT_LLM")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.timeouts.llm_seconds = secs;
        }
        if let Ok(v) = std::env::var("DESK_TIMEOUT_EMBEDDING")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.timeouts.embedding_seconds = secs;
        }
    }
}
