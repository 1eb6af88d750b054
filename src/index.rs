//! The image manifest: one JSON document mapping device ids to the images
//! they uploaded, kept in the object store next to the images.
//!
//! Updates are read-modify-write. `load` remembers the revision it saw and
//! `commit` hands it back to the store, so a concurrent writer makes the
//! commit fail instead of silently dropping the other writer's records.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{IndexError, StoreError};
use crate::store::{ObjectStore, Revision};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub filename: String,
    pub path: String,
    /// unix seconds
    pub timestamp: u64,
}

/// device id -> records in upload order
pub type Manifest = BTreeMap<String, Vec<ImageRecord>>;

pub struct IndexManager {
    store: Arc<dyn ObjectStore>,
    path: String,
}

/// Returns a copy of `manifest` with `record` appended to `device_id`'s list.
pub fn append(manifest: &Manifest, device_id: &str, record: ImageRecord) -> Manifest {
    let mut next = manifest.clone();
    next.entry(device_id.to_string())
        .or_insert_with(Vec::new)
        .push(record);
    next
}

impl IndexManager {
    pub fn new(store: Arc<dyn ObjectStore>, path: &str) -> IndexManager {
        IndexManager {
            store,
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// A missing manifest is the empty manifest with no revision.
    pub async fn load(&self) -> Result<(Manifest, Option<Revision>), IndexError> {
        match self.store.fetch(&self.path).await {
            Ok(object) => {
                let manifest = serde_json::from_slice(&object.content)?;
                Ok((manifest, Some(object.revision)))
            }
            Err(StoreError::NotFound { .. }) => Ok((Manifest::new(), None)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn commit(
        &self,
        manifest: &Manifest,
        revision: Option<&Revision>,
        message: &str,
    ) -> Result<Revision, IndexError> {
        let mut content = serde_json::to_vec_pretty(manifest)?;
        content.push(b'\n');
        Ok(self
            .store
            .write(&self.path, &content, revision, message)
            .await?)
    }

    /// load, append and commit once. A conflict is returned, not retried.
    pub async fn record(&self, device_id: &str, record: ImageRecord) -> Result<Revision, IndexError> {
        let (manifest, revision) = self.load().await?;
        let manifest = append(&manifest, device_id, record);
        self.commit(
            &manifest,
            revision.as_ref(),
            &format!("Update image index for {}", device_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn record(ts: u64) -> ImageRecord {
        let filename = format!("cam1_{}.jpg", ts);
        ImageRecord {
            path: format!("images/cam1/{}", filename),
            filename,
            timestamp: ts,
        }
    }

    #[test]
    fn test_append_keeps_order_and_input() {
        let empty = Manifest::new();
        let once = append(&empty, "cam1", record(1));
        let twice = append(&once, "cam1", record(2));
        let other = append(&twice, "cam2", record(3));

        assert!(empty.is_empty());
        assert_eq!(once["cam1"], vec![record(1)]);
        assert_eq!(twice["cam1"], vec![record(1), record(2)]);
        assert_eq!(other["cam1"], vec![record(1), record(2)]);
        assert_eq!(other["cam2"], vec![record(3)]);
    }

    #[actix_web::test]
    async fn test_load_without_manifest() {
        let store = Arc::new(MemoryStore::new());
        let index = IndexManager::new(store, "images.json");
        let (manifest, revision) = index.load().await.unwrap();
        assert!(manifest.is_empty());
        assert_eq!(revision, None);
    }

    #[actix_web::test]
    async fn test_commit_with_stale_revision_conflicts() {
        let store = Arc::new(MemoryStore::new());
        let index = IndexManager::new(store.clone(), "images.json");

        let first = index.record("cam1", record(1)).await.unwrap();
        let (manifest, seen) = index.load().await.unwrap();
        assert_eq!(seen.as_ref(), Some(&first));

        // someone else commits in between
        let second = index.record("cam2", record(2)).await.unwrap();
        assert_ne!(first, second);

        let mine = append(&manifest, "cam1", record(3));
        match index.commit(&mine, seen.as_ref(), "stale").await {
            Err(IndexError::Store(StoreError::Conflict { .. })) => {}
            other => panic!("expected conflict, got {:?}", other),
        }

        let (manifest, current) = index.load().await.unwrap();
        let mine = append(&manifest, "cam1", record(3));
        let third = index.commit(&mine, current.as_ref(), "fresh").await.unwrap();
        assert_ne!(Some(third), current);

        let (manifest, _) = index.load().await.unwrap();
        assert_eq!(manifest["cam1"], vec![record(1), record(3)]);
        assert_eq!(manifest["cam2"], vec![record(2)]);
    }

    #[actix_web::test]
    async fn test_committed_manifest_is_pretty_json() {
        let store = Arc::new(MemoryStore::new());
        let index = IndexManager::new(store.clone(), "images.json");
        index.record("cam1", record(1700000000)).await.unwrap();

        let text = String::from_utf8(store.get("images.json").unwrap()).unwrap();
        assert!(text.ends_with("}\n"));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "cam1": [{
                    "filename": "cam1_1700000000.jpg",
                    "path": "images/cam1/cam1_1700000000.jpg",
                    "timestamp": 1700000000
                }]
            })
        );
    }

    #[actix_web::test]
    async fn test_malformed_manifest_is_not_overwritten() {
        let store = Arc::new(MemoryStore::new());
        store.write("images.json", b"not json", None, "seed").await.unwrap();
        let index = IndexManager::new(store.clone(), "images.json");

        assert!(matches!(
            index.record("cam1", record(1)).await,
            Err(IndexError::Malformed(_))
        ));
        assert_eq!(store.get("images.json").unwrap(), b"not json".to_vec());
    }
}
