//! Credential lookup for the completion API key and the Drive access token.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

/// Directory of one-file-per-secret mounts (Docker or Kubernetes style), checked after the environment.
pub const SECRETS_DIR_VAR: &str = "DESK_SECRETS_DIR";

pub type SecretFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<Option<String>>> + Send + 'a>>;

/// Credential value that never prints itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Where credentials come from. `Ok(None)` means "not configured here".
pub trait VaultProvider: Send + Sync {
    fn get_secret<'a>(&'a self, key: &'a str) -> SecretFuture<'a>;
}

/// Process environment; empty values count as unset.
pub struct EnvVaultProvider;

impl VaultProvider for EnvVaultProvider {
    fn get_secret<'a>(&'a self, key: &'a str) -> SecretFuture<'a> {
        Box::pin(async move { Ok(std::env::var(key).ok().filter(|v| !v.is_empty())) })
    }
}

/// Reads `<dir>/<key>`, trimming the trailing newline most secret mounts carry.
pub struct SecretsDirProvider {
    dir: PathBuf,
}

impl SecretsDirProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl VaultProvider for SecretsDirProvider {
    fn get_secret<'a>(&'a self, key: &'a str) -> SecretFuture<'a> {
        Box::pin(async move {
            if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
                anyhow::bail!("invalid secret name '{key}'");
            }
            let path = self.dir.join(key);
            match tokio::fs::read_to_string(&path).await {
                Ok(raw) => {
                    let value = raw.trim_end_matches(['\r', '\n']);
                    Ok((!value.is_empty()).then(|| value.to_owned()))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
            }
        })
    }
}

/// First provider that knows the key wins.
pub struct ChainedVault {
    providers: Vec<Box<dyn VaultProvider>>,
}

impl ChainedVault {
    #[must_use]
    pub fn new(providers: Vec<Box<dyn VaultProvider>>) -> Self {
        Self { providers }
    }
}

impl VaultProvider for ChainedVault {
    fn get_secret<'a>(&'a self, key: &'a str) -> SecretFuture<'a> {
        Box::pin(async move {
            for provider in &self.providers {
                if let Some(value) = provider.get_secret(key).await? {
                    return Ok(Some(value));
                }
            }
            Ok(None)
        })
    }
}

/// Environment first, then `DESK_SECRETS_DIR` when it is set.
#[must_use]
pub fn from_env() -> Box<dyn VaultProvider> {
    match std::env::var_os(SECRETS_DIR_VAR) {
        Some(dir) if !dir.is_empty() => {
            tracing::info!(dir = %Path::new(&dir).display(), "reading secrets from directory");
            Box::new(ChainedVault::new(vec![
                Box::new(EnvVaultProvider),
                Box::new(SecretsDirProvider::new(dir)),
            ]))
        }
        _ => Box::new(EnvVaultProvider),
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct MockVaultProvider {
    secrets: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl MockVaultProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_secret(mut self, key: &str, value: &str) -> Self {
        self.secrets.insert(key.to_owned(), value.to_owned());
        self
    }
}

#[cfg(test)]
impl VaultProvider for MockVaultProvider {
    fn get_secret<'a>(&'a self, key: &'a str) -> SecretFuture<'a> {
        Box::pin(async move { Ok(self.secrets.get(key).cloned()) })
    }
}
