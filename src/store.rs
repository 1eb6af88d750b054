// Store is responsible for:
// reading and writing whole objects keyed by repository path
// handing out revision tokens so writers can detect lost updates
//
// Every write creates a new revision; nothing is mutated in place.
use async_trait::async_trait;

use crate::error::StoreError;

/// Opaque version marker of a stored object (the blob sha on GitHub).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision(pub String);

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub revision: Revision,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fails with `StoreError::NotFound` when nothing is stored at `path`.
    async fn fetch(&self, path: &str) -> Result<StoredObject, StoreError>;

    /// With `revision` the write only succeeds if it is still the stored
    /// revision. Without it the write must create `path`.
    async fn write(
        &self,
        path: &str,
        content: &[u8],
        revision: Option<&Revision>,
        message: &str,
    ) -> Result<Revision, StoreError>;
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-process store with the same revision rules as the GitHub one.
    #[derive(Default)]
    pub struct MemoryStore {
        objects: Mutex<HashMap<String, (Vec<u8>, Revision)>>,
        next_revision: AtomicUsize,
        calls: AtomicUsize,
        fail_writes_to: Mutex<Option<String>>,
    }

    impl MemoryStore {
        pub fn new() -> MemoryStore {
            MemoryStore::default()
        }

        /// Number of fetch + write calls seen so far.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn get(&self, path: &str) -> Option<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(path)
                .map(|(content, _)| content.clone())
        }

        /// Makes every later write to `path` fail with a 502.
        pub fn fail_writes_to(&self, path: &str) {
            *self.fail_writes_to.lock().unwrap() = Some(path.to_string());
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn fetch(&self, path: &str) -> Result<StoredObject, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.objects.lock().unwrap().get(path) {
                Some((content, revision)) => Ok(StoredObject {
                    content: content.clone(),
                    revision: revision.clone(),
                }),
                None => Err(StoreError::NotFound {
                    path: path.to_string(),
                }),
            }
        }

        async fn write(
            &self,
            path: &str,
            content: &[u8],
            revision: Option<&Revision>,
            _message: &str,
        ) -> Result<Revision, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes_to.lock().unwrap().as_deref() == Some(path) {
                return Err(StoreError::Remote {
                    status: 502,
                    detail: "bad gateway".to_string(),
                });
            }

            let mut objects = self.objects.lock().unwrap();
            let current = objects.get(path).map(|(_, r)| r);
            match (current, revision) {
                (None, None) => {}
                (Some(stored), Some(expected)) if stored == expected => {}
                (Some(_), None) => {
                    return Err(StoreError::Conflict {
                        path: path.to_string(),
                        status: 422,
                        detail: "\"sha\" wasn't supplied.".to_string(),
                    })
                }
                _ => {
                    return Err(StoreError::Conflict {
                        path: path.to_string(),
                        status: 409,
                        detail: format!("{} does not match", path),
                    })
                }
            }

            let n = self.next_revision.fetch_add(1, Ordering::SeqCst);
            let new_revision = Revision(format!("rev-{}", n));
            objects.insert(path.to_string(), (content.to_vec(), new_revision.clone()));
            Ok(new_revision)
        }
    }

    #[actix_web::test]
    async fn test_create_then_update_requires_revision() {
        let store = MemoryStore::new();
        let first = store.write("a.txt", b"one", None, "create").await.unwrap();

        match store.write("a.txt", b"two", None, "again").await {
            Err(StoreError::Conflict { status, .. }) => assert_eq!(status, 422),
            other => panic!("expected conflict, got {:?}", other),
        }

        let second = store
            .write("a.txt", b"two", Some(&first), "update")
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(store.fetch("a.txt").await.unwrap().content, b"two".to_vec());
    }

    #[actix_web::test]
    async fn test_fetch_missing_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.fetch("nope.json").await,
            Err(StoreError::NotFound { .. })
        ));
    }
}
