use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::vector_store::{
    BoxFuture, ScoredVectorPoint, VectorFilter, VectorPoint, VectorStore, VectorStoreError,
    matches_filter, rank_order,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    collections: BTreeMap<String, StoredCollection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCollection {
    vector_size: u64,
    points: BTreeMap<String, StoredPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPoint {
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

/// Flat in-process index, optionally persisted to a JSON file.
///
/// Every mutation rewrites the whole file (temp file + rename). Mutations are serialised
/// by `persist_lock`; readers only take the in-memory lock and never wait on disk.
pub struct LocalVectorStore {
    state: RwLock<Snapshot>,
    path: Option<PathBuf>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl LocalVectorStore {
    /// Memory-only store, nothing is written to disk.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(Snapshot::default()),
            path: None,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open a store persisted at `path`.
    ///
    /// A missing file starts empty; an unreadable or corrupt file starts empty with a warning.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) => {
                    let points: usize = snapshot
                        .collections
                        .values()
                        .map(|c| c.points.len())
                        .sum();
                    tracing::info!(path = %path.display(), points, "loaded local index");
                    snapshot
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "local index file is corrupt, starting empty: {e}");
                    Snapshot::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no local index file, starting empty");
                Snapshot::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "failed to read local index file, starting empty: {e}");
                Snapshot::default()
            }
        };
        Self {
            state: RwLock::new(snapshot),
            path: Some(path),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply `mutate` to a copy of the state, persist the copy, then publish it.
    ///
    /// Readers see either the old or the new state, never a change whose write failed.
    /// Caller must hold `persist_lock` so file writes land in mutation order.
    async fn mutate_and_persist<F>(&self, mutate: F) -> Result<(), VectorStoreError>
    where
        F: FnOnce(&mut Snapshot) -> Result<(), VectorStoreError> + Send,
    {
        let mut next = self
            .state
            .read()
            .map_err(|e| VectorStoreError::Persistence(e.to_string()))?
            .clone();
        mutate(&mut next)?;
        self.persist(&next).await?;
        *self
            .state
            .write()
            .map_err(|e| VectorStoreError::Persistence(e.to_string()))? = next;
        Ok(())
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<(), VectorStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec(snapshot)
            .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VectorStoreError::Persistence(e.to_string()))?;
        }
        let tmp = tmp_path(path);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| VectorStoreError::Persistence(e.to_string()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| VectorStoreError::Persistence(e.to_string()))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "persisted local index");
        Ok(())
    }
}

impl Default for LocalVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalVectorStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn check_dimensions(
    col: &StoredCollection,
    points: &[VectorPoint],
) -> Result<(), VectorStoreError> {
    if let Some(bad) = points
        .iter()
        .find(|p| p.vector.len() as u64 != col.vector_size)
    {
        return Err(VectorStoreError::Upsert(format!(
            "point {} has dimension {}, collection expects {}",
            bad.id,
            bad.vector.len(),
            col.vector_size
        )));
    }
    Ok(())
}

fn insert_points(col: &mut StoredCollection, points: Vec<VectorPoint>) {
    for p in points {
        col.points.insert(
            p.id,
            StoredPoint {
                vector: p.vector,
                payload: p.payload,
            },
        );
    }
}

impl VectorStore for LocalVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let _guard = self.persist_lock.lock().await;
            {
                let state = self
                    .state
                    .read()
                    .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
                if let Some(existing) = state.collections.get(&collection) {
                    if existing.vector_size != vector_size {
                        return Err(VectorStoreError::Collection(format!(
                            "collection {collection} has dimension {}, requested {vector_size}",
                            existing.vector_size
                        )));
                    }
                    return Ok(());
                }
            }
            tracing::info!(collection, vector_size, "creating local collection");
            self.mutate_and_persist(|state| {
                state
                    .collections
                    .entry(collection)
                    .or_insert_with(|| StoredCollection {
                        vector_size,
                        points: BTreeMap::new(),
                    });
                Ok(())
            })
            .await
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let state = self
                .state
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(state.collections.contains_key(&collection))
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if points.is_empty() {
                return Ok(());
            }
            let _guard = self.persist_lock.lock().await;
            self.mutate_and_persist(|state| {
                let col = state.collections.get_mut(&collection).ok_or_else(|| {
                    VectorStoreError::Upsert(format!("collection {collection} not found"))
                })?;
                check_dimensions(col, &points)?;
                insert_points(col, points);
                Ok(())
            })
            .await
        })
    }

    fn replace(
        &self,
        collection: &str,
        scope: VectorFilter,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let _guard = self.persist_lock.lock().await;
            self.mutate_and_persist(|state| {
                let col = state.collections.get_mut(&collection).ok_or_else(|| {
                    VectorStoreError::Upsert(format!("collection {collection} not found"))
                })?;
                check_dimensions(col, &points)?;
                col.points.retain(|_, sp| !matches_filter(&sp.payload, &scope));
                insert_points(col, points);
                Ok(())
            })
            .await
        })
    }

    fn delete(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let _guard = self.persist_lock.lock().await;
            self.mutate_and_persist(|state| {
                let col = state.collections.get_mut(&collection).ok_or_else(|| {
                    VectorStoreError::Delete(format!("collection {collection} not found"))
                })?;
                col.points.retain(|_, sp| !matches_filter(&sp.payload, &filter));
                Ok(())
            })
            .await
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let state = self
                .state
                .read()
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            let col = state.collections.get(&collection).ok_or_else(|| {
                VectorStoreError::Search(format!("collection {collection} not found"))
            })?;

            let empty_filter = VectorFilter::default();
            let f = filter.as_ref().unwrap_or(&empty_filter);

            let mut scored: Vec<ScoredVectorPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| matches_filter(&sp.payload, f))
                .map(|(id, sp)| ScoredVectorPoint {
                    id: id.clone(),
                    score: cosine_similarity(&vector, &sp.vector),
                    payload: sp.payload.clone(),
                })
                .collect();

            scored.sort_by(rank_order);
            scored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(scored)
        })
    }

    fn count(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let state = self
                .state
                .read()
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            let Some(col) = state.collections.get(&collection) else {
                return Ok(0);
            };
            let n = match &filter {
                Some(f) => col
                    .points
                    .values()
                    .filter(|sp| matches_filter(&sp.payload, f))
                    .count(),
                None => col.points.len(),
            };
            Ok(n as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::FieldValue;

    fn point(id: &str, vector: Vec<f32>, source: &str) -> VectorPoint {
        VectorPoint {
            id: id.into(),
            vector,
            payload: HashMap::from([("source_id".into(), serde_json::json!(source))]),
        }
    }

    fn by_source(source: &str) -> VectorFilter {
        VectorFilter::field_eq("source_id", FieldValue::Text(source.into()))
    }

    #[tokio::test]
    async fn ensure_collection_and_exists() {
        let store = LocalVectorStore::new();
        assert!(!store.collection_exists("test").await.unwrap());
        store.ensure_collection("test", 3).await.unwrap();
        store.ensure_collection("test", 3).await.unwrap();
        assert!(store.collection_exists("test").await.unwrap());
    }

    #[tokio::test]
    async fn ensure_collection_rejects_dimension_change() {
        let store = LocalVectorStore::new();
        store.ensure_collection("test", 3).await.unwrap();
        let err = store.ensure_collection("test", 4).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::Collection(_)));
    }

    #[tokio::test]
    async fn upsert_and_search() {
        let store = LocalVectorStore::new();
        store.ensure_collection("test", 3).await.unwrap();
        store
            .upsert(
                "test",
                vec![
                    point("a", vec![1.0, 0.0, 0.0], "s1"),
                    point("b", vec![0.0, 1.0, 0.0], "s1"),
                ],
            )
            .await
            .unwrap();

        let results = store
            .search("test", vec![1.0, 0.0, 0.0], 2, None)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "a");
        assert!((results[0].score - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension() {
        let store = LocalVectorStore::new();
        store.ensure_collection("test", 3).await.unwrap();
        let err = store
            .upsert("test", vec![point("a", vec![1.0, 0.0], "s1")])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Upsert(_)));
        assert_eq!(store.count("test", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upsert_into_missing_collection_errors() {
        let store = LocalVectorStore::new();
        let err = store
            .upsert("nope", vec![point("a", vec![1.0], "s1")])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Upsert(_)));
    }

    #[tokio::test]
    async fn equal_scores_break_ties_by_id() {
        let store = LocalVectorStore::new();
        store.ensure_collection("test", 2).await.unwrap();
        store
            .upsert(
                "test",
                vec![
                    point("c", vec![1.0, 0.0], "s1"),
                    point("a", vec![2.0, 0.0], "s1"),
                    point("b", vec![3.0, 0.0], "s1"),
                ],
            )
            .await
            .unwrap();
        let ids: Vec<_> = store
            .search("test", vec![1.0, 0.0], 3, None)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn search_limit_and_filter() {
        let store = LocalVectorStore::new();
        store.ensure_collection("test", 2).await.unwrap();
        store
            .upsert(
                "test",
                vec![
                    point("a", vec![1.0, 0.0], "s1"),
                    point("b", vec![0.9, 0.1], "s2"),
                    point("c", vec![0.0, 1.0], "s2"),
                ],
            )
            .await
            .unwrap();

        let top1 = store.search("test", vec![1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(top1.len(), 1);

        let filtered = store
            .search("test", vec![1.0, 0.0], 10, Some(by_source("s2")))
            .await
            .unwrap();
        let ids: Vec<_> = filtered.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["b", "c"]);
    }

    #[tokio::test]
    async fn replace_supersedes_scope_only() {
        let store = LocalVectorStore::new();
        store.ensure_collection("test", 2).await.unwrap();
        store
            .upsert(
                "test",
                vec![
                    point("s1-0", vec![1.0, 0.0], "s1"),
                    point("s1-1", vec![1.0, 0.0], "s1"),
                    point("s2-0", vec![0.0, 1.0], "s2"),
                ],
            )
            .await
            .unwrap();

        store
            .replace(
                "test",
                by_source("s1"),
                vec![point("s1-0", vec![0.5, 0.5], "s1")],
            )
            .await
            .unwrap();

        assert_eq!(store.count("test", Some(by_source("s1"))).await.unwrap(), 1);
        assert_eq!(store.count("test", Some(by_source("s2"))).await.unwrap(), 1);
        assert_eq!(store.count("test", None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn delete_by_filter() {
        let store = LocalVectorStore::new();
        store.ensure_collection("test", 2).await.unwrap();
        store
            .upsert(
                "test",
                vec![
                    point("a", vec![1.0, 0.0], "s1"),
                    point("b", vec![0.0, 1.0], "s2"),
                ],
            )
            .await
            .unwrap();
        store.delete("test", by_source("s1")).await.unwrap();
        let rest = store.search("test", vec![1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "b");
    }

    #[tokio::test]
    async fn count_missing_collection_is_zero() {
        let store = LocalVectorStore::new();
        assert_eq!(store.count("none", None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");

        let store = LocalVectorStore::open(&path).await;
        store.ensure_collection("kb", 2).await.unwrap();
        store
            .upsert("kb", vec![point("a", vec![1.0, 0.0], "s1")])
            .await
            .unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
        drop(store);

        let reopened = LocalVectorStore::open(&path).await;
        assert_eq!(reopened.path(), Some(path.as_path()));
        assert!(reopened.collection_exists("kb").await.unwrap());
        let hits = reopened.search("kb", vec![1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload["source_id"], "s1");
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = LocalVectorStore::open(&path).await;
        assert!(!store.collection_exists("kb").await.unwrap());
        store.ensure_collection("kb", 2).await.unwrap();

        let reopened = LocalVectorStore::open(&path).await;
        assert!(reopened.collection_exists("kb").await.unwrap());
    }

    #[tokio::test]
    async fn failed_write_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"a regular file").unwrap();
        let store = LocalVectorStore::open(blocker.join("index.json")).await;

        assert!(matches!(
            store.ensure_collection("kb", 2).await.unwrap_err(),
            VectorStoreError::Persistence(_)
        ));
        assert!(!store.collection_exists("kb").await.unwrap());
        assert!(store.ensure_collection("kb", 2).await.is_err());
        assert!(
            store
                .upsert("kb", vec![point("a", vec![1.0, 0.0], "s1")])
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn failed_write_does_not_expose_points() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let store = LocalVectorStore::open(&path).await;
        store.ensure_collection("kb", 2).await.unwrap();
        store
            .upsert("kb", vec![point("a", vec![1.0, 0.0], "s1")])
            .await
            .unwrap();

        // A directory at the temp path makes the next write fail.
        std::fs::create_dir(tmp_path(&path)).unwrap();
        let err = store
            .upsert("kb", vec![point("b", vec![0.0, 1.0], "s2")])
            .await
            .unwrap_err();
        assert!(matches!(err, VectorStoreError::Persistence(_)));
        assert_eq!(store.count("kb", None).await.unwrap(), 1);
        let hits = store.search("kb", vec![0.0, 1.0], 5, None).await.unwrap();
        assert!(hits.iter().all(|h| h.payload["source_id"] == "s1"));

        std::fs::remove_dir(tmp_path(&path)).unwrap();
        let reopened = LocalVectorStore::open(&path).await;
        assert_eq!(reopened.count("kb", None).await.unwrap(), 1);
    }

    #[test]
    fn cosine_similarity_orthogonal_and_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < f32::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn debug_shows_path() {
        let store = LocalVectorStore::new();
        let dbg = format!("{store:?}");
        assert!(dbg.contains("LocalVectorStore"));
    }
}
