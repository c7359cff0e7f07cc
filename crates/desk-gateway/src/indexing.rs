use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use desk_memory::document::{IndexReport, IndexingPipeline};
use tokio::task::JoinHandle;

/// Outcome of the most recent indexing run.
#[derive(Debug, Clone)]
pub enum LastRun {
    Completed(IndexReport),
    Failed(String),
}

/// Background indexing runs, at most one at a time.
pub struct IndexJob {
    pipeline: Arc<IndexingPipeline>,
    folder: String,
    running: AtomicBool,
    last_run: RwLock<Option<LastRun>>,
}

impl std::fmt::Debug for IndexJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexJob")
            .field("folder", &self.folder)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Clears the running flag even if the run panics.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl IndexJob {
    #[must_use]
    pub fn new(pipeline: Arc<IndexingPipeline>, folder: impl Into<String>) -> Self {
        Self {
            pipeline,
            folder: folder.into(),
            running: AtomicBool::new(false),
            last_run: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn last_run(&self) -> Option<LastRun> {
        self.last_run
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Spawn a run unless one is already in progress.
    ///
    /// Returns `None` when a run is in progress.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        let job = Arc::clone(self);
        Some(tokio::spawn(async move { job.execute().await }))
    }

    async fn execute(&self) {
        let _guard = RunningGuard(&self.running);
        let outcome = match self.pipeline.run(&self.folder).await {
            Ok(report) => {
                tracing::info!(
                    folder = %self.folder,
                    indexed = report.results.len(),
                    failed = report.failures.len(),
                    chunks = report.chunk_total(),
                    "indexing run finished"
                );
                LastRun::Completed(report)
            }
            Err(e) => {
                tracing::error!(folder = %self.folder, "indexing run failed: {e}");
                LastRun::Failed(e.to_string())
            }
        };
        *self
            .last_run
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }
}
