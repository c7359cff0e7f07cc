use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;

use super::DocumentSource;
use crate::document::error::DocumentError;
use crate::document::types::{PDF_MIME, SourceDocument, SourceEntry};

pub const DEFAULT_DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

const PAGE_SIZE: &str = "100";

/// Google Drive v3 REST adapter, authenticated with a pre-acquired bearer token.
#[derive(Clone)]
pub struct DriveSource {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl fmt::Debug for DriveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveSource")
            .field("base_url", &self.base_url)
            .field("access_token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    #[serde(default)]
    modified_time: String,
    #[serde(default)]
    mime_type: Option<String>,
}

impl DriveSource {
    #[must_use]
    pub fn new(client: reqwest::Client, mut base_url: String, access_token: String) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client,
            base_url,
            access_token,
        }
    }

    fn url(&self, path: &str) -> Result<url::Url, String> {
        url::Url::parse(&format!("{}/{path}", self.base_url)).map_err(|e| e.to_string())
    }

    async fn list_page(
        &self,
        folder: &str,
        page_token: Option<&str>,
    ) -> Result<FileList, DocumentError> {
        let mut url = self.url("files").map_err(DocumentError::Listing)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("q", &folder_query(folder))
                .append_pair("fields", "nextPageToken,files(id,name,modifiedTime,mimeType)")
                .append_pair("orderBy", "name")
                .append_pair("pageSize", PAGE_SIZE);
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| DocumentError::Listing(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Drive listing error {status}: {body}");
            return Err(DocumentError::Listing(format!("Drive returned {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| DocumentError::Listing(e.to_string()))
    }
}

/// Drive search expression selecting the PDFs directly inside `folder`.
fn folder_query(folder: &str) -> String {
    let escaped = folder.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}' in parents and mimeType='{PDF_MIME}' and trashed=false")
}

impl DocumentSource for DriveSource {
    fn list<'a>(
        &'a self,
        folder: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SourceEntry>, DocumentError>> + Send + 'a>> {
        Box::pin(async move {
            let mut entries = Vec::new();
            let mut page_token: Option<String> = None;
            loop {
                let page = self.list_page(folder, page_token.as_deref()).await?;
                entries.extend(page.files.into_iter().map(|f| SourceEntry {
                    id: f.id,
                    title: f.name,
                    modified_time: f.modified_time,
                    mime_type: f.mime_type.unwrap_or_else(|| PDF_MIME.to_owned()),
                }));
                match page.next_page_token {
                    Some(next) if !next.is_empty() => page_token = Some(next),
                    _ => break,
                }
            }
            tracing::info!(folder, count = entries.len(), "listed Drive documents");
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
            let mut url = self.url(&format!("files/{}", entry.id)).map_err(fetch_err)?;
            url.query_pairs_mut().append_pair("alt", "media");

            let response = self
                .client
                .get(url)
                .bearer_auth(&self.access_token)
                .send()
                .await
                .map_err(|e| fetch_err(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(fetch_err(format!("Drive returned {status}")));
            }
            let bytes = response.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
            tracing::debug!(source_id = %entry.id, bytes = bytes.len(), "downloaded document");
            Ok(SourceDocument::from_entry(entry, bytes.to_vec()))
        })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "drive"
    }
}
