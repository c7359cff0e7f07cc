use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use chrono::{DateTime, SecondsFormat, Utc};

use super::DocumentSource;
use crate::document::error::DocumentError;
use crate::document::types::{PDF_MIME, SourceDocument, SourceEntry};

/// Default maximum file size: 50 MiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Reads documents from a local directory tree, for offline setups and tests.
///
/// `folder` is resolved relative to the root; entries are the PDF and plain-text files
/// directly inside it, sorted by name. Entry ids are root-relative paths.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    max_file_size: u64,
}

impl DirectorySource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    #[must_use]
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, String> {
        let rel = Path::new(relative);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(format!("path escapes source root: {relative}"));
        }
        Ok(self.root.join(rel))
    }
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(PDF_MIME),
        "txt" | "md" => Some("text/plain"),
        _ => None,
    }
}

impl DocumentSource for DirectorySource {
    fn list<'a>(
        &'a self,
        folder: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SourceEntry>, DocumentError>> + Send + 'a>> {
        Box::pin(async move {
            let dir = self.resolve(folder).map_err(DocumentError::Listing)?;
            let mut read_dir = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| DocumentError::Listing(format!("{}: {e}", dir.display())))?;

            let mut entries = Vec::new();
            while let Some(item) = read_dir
                .next_entry()
                .await
                .map_err(|e| DocumentError::Listing(e.to_string()))?
            {
                let path = item.path();
                let Some(mime) = mime_for(&path) else {
                    continue;
                };
                let meta = item.metadata().await?;
                if !meta.is_file() {
                    continue;
                }
                let modified_time = meta
                    .modified()
                    .map(|t| DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default();
                let id = path
                    .strip_prefix(&self.root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .into_owned();
                let title = item.file_name().to_string_lossy().into_owned();
                entries.push(SourceEntry {
                    id,
                    title,
                    modified_time,
                    mime_type: mime.to_owned(),
                });
            }
            entries.sort_by(|a, b| a.title.cmp(&b.title));
            tracing::info!(dir = %dir.display(), count = entries.len(), "listed local documents");
            Ok(entries)
        })
    }

    fn fetch<'a>(
        &'a self,
        entry: &'a SourceEntry,
    ) -> Pin<Box<dyn Future<Output = Result<SourceDocument, DocumentError>> + Send + 'a>> {
        Box::pin(async move {
            let fetch_err = |reason: String| DocumentError::Fetch {
                source_id: entry.id.clone(),
                reason,
            };
            let path = self.resolve(&entry.id).map_err(fetch_err)?;
            let meta = tokio::fs::metadata(&path)
                .await
                .map_err(|e| fetch_err(e.to_string()))?;
            if meta.len() > self.max_file_size {
                return Err(fetch_err(format!(
                    "file too large: {} bytes (max {})",
                    meta.len(),
                    self.max_file_size
                )));
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| fetch_err(e.to_string()))?;
            Ok(SourceDocument::from_entry(entry, bytes))
        })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "directory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_supported_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("image.png"), b"png").unwrap();
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let source = DirectorySource::new(dir.path());
        let entries = source.list("").await.unwrap();
        let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, ["a.txt", "b.pdf"]);
        assert_eq!(entries[0].mime_type, "text/plain");
        assert_eq!(entries[1].mime_type, PDF_MIME);
        assert!(entries[0].modified_time.ends_with('Z'));
    }

    #[tokio::test]
    async fn lists_subfolder_with_relative_ids() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("kb")).unwrap();
        std::fs::write(dir.path().join("kb").join("vpn.md"), b"vpn").unwrap();

        let source = DirectorySource::new(dir.path());
        let entries = source.list("kb").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(Path::new(&entries[0].id), Path::new("kb").join("vpn.md"));

        let doc = source.fetch(&entries[0]).await.unwrap();
        assert_eq!(doc.raw_content, b"vpn");
    }

    #[tokio::test]
    async fn missing_folder_is_listing_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirectorySource::new(dir.path())
            .list("absent")
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Listing(_)));
    }

    #[tokio::test]
    async fn rejects_parent_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path());
        assert!(matches!(
            source.list("../etc").await.unwrap_err(),
            DocumentError::Listing(_)
        ));
        let entry = SourceEntry {
            id: "../secret.txt".into(),
            title: "secret.txt".into(),
            modified_time: String::new(),
            mime_type: "text/plain".into(),
        };
        assert!(matches!(
            source.fetch(&entry).await.unwrap_err(),
            DocumentError::Fetch { .. }
        ));
    }

    #[tokio::test]
    async fn oversized_file_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.txt"), vec![b'x'; 64]).unwrap();
        let source = DirectorySource::new(dir.path()).with_max_file_size(10);
        let entries = source.list("").await.unwrap();
        let err = source.fetch(&entries[0]).await.unwrap_err();
        assert!(matches!(err, DocumentError::Fetch { .. }));
    }
}
