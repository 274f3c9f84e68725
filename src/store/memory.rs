use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Document, DocumentStore, Revision, StoreError};

/// Process-local document store used for local development and tests.
pub struct MemoryDocumentStore {
    documents: Mutex<HashMap<String, Document>>,
    next_revision: AtomicU64,
    writable: bool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            next_revision: AtomicU64::new(1),
            writable: true,
        }
    }

    /// A store that serves reads but refuses writes, like a deployment
    /// without a write token.
    pub fn read_only() -> Self {
        Self {
            writable: false,
            ..Self::new()
        }
    }

    /// Seeds a document regardless of the write flag.
    pub async fn insert(&self, path: &str, content: &str) -> Revision {
        let revision = self.bump();
        self.documents.lock().await.insert(
            path.to_string(),
            Document {
                content: content.to_string(),
                revision: revision.clone(),
            },
        );
        revision
    }

    fn bump(&self) -> Revision {
        Revision(self.next_revision.fetch_add(1, Ordering::Relaxed).to_string())
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.lock().await.get(path).cloned())
    }

    async fn put(
        &self,
        path: &str,
        content: &str,
        revision: Option<&Revision>,
        _message: &str,
    ) -> Result<Revision, StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }

        let mut documents = self.documents.lock().await;
        let current = documents.get(path).map(|doc| &doc.revision);
        if current != revision {
            return Err(StoreError::RevisionMismatch(path.to_string()));
        }

        let next = self.bump();
        documents.insert(
            path.to_string(),
            Document {
                content: content.to_string(),
                revision: next.clone(),
            },
        );
        Ok(next)
    }

    async fn delete(
        &self,
        path: &str,
        revision: &Revision,
        _message: &str,
    ) -> Result<(), StoreError> {
        if !self.writable {
            return Err(StoreError::ReadOnly);
        }

        let mut documents = self.documents.lock().await;
        match documents.get(path) {
            Some(doc) if &doc.revision == revision => {
                documents.remove(path);
                Ok(())
            }
            _ => Err(StoreError::RevisionMismatch(path.to_string())),
        }
    }

    fn can_write(&self) -> bool {
        self.writable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_requires_absent_document() {
        let store = MemoryDocumentStore::new();
        let first = store.put("a.json", "{}", None, "create").await.unwrap();

        let err = store.put("a.json", "{}", None, "blind").await.unwrap_err();
        assert!(matches!(err, StoreError::RevisionMismatch(_)));

        let second = store.put("a.json", "[]", Some(&first), "update").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(store.get("a.json").await.unwrap().unwrap().content, "[]");
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let store = MemoryDocumentStore::new();
        let first = store.put("a.json", "1", None, "create").await.unwrap();
        store.put("a.json", "2", Some(&first), "update").await.unwrap();

        let err = store.put("a.json", "3", Some(&first), "stale").await.unwrap_err();
        assert!(matches!(err, StoreError::RevisionMismatch(_)));

        let err = store.delete("a.json", &first, "stale").await.unwrap_err();
        assert!(matches!(err, StoreError::RevisionMismatch(_)));
        assert_eq!(store.get("a.json").await.unwrap().unwrap().content, "2");
    }

    #[tokio::test]
    async fn read_only_store_refuses_writes() {
        let store = MemoryDocumentStore::read_only();
        store.insert("a.json", "{}").await;

        assert!(!store.can_write());
        assert!(store.get("a.json").await.unwrap().is_some());
        let err = store.put("b.json", "{}", None, "create").await.unwrap_err();
        assert!(matches!(err, StoreError::ReadOnly));
    }
}
