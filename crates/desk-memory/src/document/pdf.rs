use super::error::DocumentError;

/// Extract plain text from PDF bytes on the blocking pool.
///
/// # Errors
///
/// Returns [`DocumentError::Pdf`] if the bytes are not a readable PDF or the extractor panics.
pub async fn extract_text(bytes: Vec<u8>) -> Result<String, DocumentError> {
    tokio::task::spawn_blocking(move || extract_text_sync(&bytes))
        .await
        .map_err(|e| DocumentError::Pdf(format!("extraction task failed: {e}")))?
}

#[cfg(feature = "pdf")]
fn extract_text_sync(bytes: &[u8]) -> Result<String, DocumentError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| DocumentError::Pdf(e.to_string()))
}

#[cfg(not(feature = "pdf"))]
fn extract_text_sync(_bytes: &[u8]) -> Result<String, DocumentError> {
    Err(DocumentError::UnsupportedFormat(
        "PDF support disabled (build with feature `pdf`)".into(),
    ))
}
