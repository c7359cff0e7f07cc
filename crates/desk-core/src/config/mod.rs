mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

use crate::vault::{Secret, VaultProvider};

pub const OPENAI_API_KEY_VAR: &str = "DESK_OPENAI_API_KEY";
pub const DRIVE_ACCESS_TOKEN_VAR: &str = "DESK_DRIVE_ACCESS_TOKEN";

impl Config {
    /// Load configuration from a TOML file with env var overrides, then validate it.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if the
    /// resulting values are inconsistent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::info!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.index.chunk_size == 0 {
            bail!("index.chunk_size must be greater than zero");
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            bail!(
                "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
                self.index.chunk_overlap,
                self.index.chunk_size
            );
        }
        if self.index.vector_size == 0 {
            bail!("index.vector_size must be greater than zero");
        }
        if self.index.concurrency == 0 {
            bail!("index.concurrency must be at least 1");
        }
        if self.index.search_limit == 0 {
            bail!("index.search_limit must be at least 1");
        }
        if self.index.collection.is_empty() {
            bail!("index.collection must not be empty");
        }
        if self.memory.max_messages == 0 {
            bail!("memory.max_messages must be at least 1");
        }
        if self.memory.ttl_secs == 0 {
            bail!("memory.ttl_secs must be greater than zero");
        }
        if self.timeouts.llm_seconds == 0 || self.timeouts.embedding_seconds == 0 {
            bail!("timeouts must be greater than zero");
        }
        Ok(())
    }

    /// Resolve sensitive configuration values through the vault.
    ///
    /// # Errors
    ///
    /// Returns an error if the vault backend fails.
    pub async fn resolve_secrets(&mut self, vault: &dyn VaultProvider) -> anyhow::Result<()> {
        if let Some(val) = vault.get_secret(OPENAI_API_KEY_VAR).await? {
            self.secrets.openai_api_key = Some(Secret::new(val));
        }
        if let Some(val) = vault.get_secret(DRIVE_ACCESS_TOKEN_VAR).await? {
            self.secrets.drive_access_token = Some(Secret::new(val));
        }
        Ok(())
    }

    /// Folder reference handed to the indexing pipeline.
    #[must_use]
    pub fn index_folder(&self) -> &str {
        &self.source.folder_id
    }
}
