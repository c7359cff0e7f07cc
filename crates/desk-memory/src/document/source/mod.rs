mod directory;
mod drive;

pub use directory::DirectorySource;
pub use drive::{DEFAULT_DRIVE_BASE_URL, DriveSource};

use std::future::Future;
use std::pin::Pin;

use super::error::DocumentError;
use super::types::{SourceDocument, SourceEntry};

/// Remote (or local) file store the indexing pipeline reads from.
pub trait DocumentSource: Send + Sync {
    /// List indexable documents under `folder`, in a stable order.
    fn list<'a>(
        &'a self,
        folder: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SourceEntry>, DocumentError>> + Send + 'a>>;

    fn fetch<'a>(
        &'a self,
        entry: &'a SourceEntry,
    ) -> Pin<Box<dyn Future<Output = Result<SourceDocument, DocumentError>> + Send + 'a>>;

    fn name(&self) -> &str;
}
