//! Document storage for the file-backed post store.
//!
//! Every document carries an opaque revision. Writes name the revision they
//! were computed from so a concurrent change is detected instead of being
//! overwritten.

pub mod github;
pub mod memory;
pub mod models;
pub mod posts;

pub use github::GithubDocumentStore;
pub use memory::MemoryDocumentStore;
pub use posts::PostStore;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque version marker handed out by the backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision(pub String);

impl Revision {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    pub revision: Revision,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document {0} was modified concurrently, please retry")]
    RevisionMismatch(String),
    #[error("Post storage is not configured for writes")]
    ReadOnly,
    #[error("Post {post_id} was saved but the summary index was not updated: {source}")]
    PartiallyApplied {
        post_id: String,
        #[source]
        source: Box<StoreError>,
    },
    #[error("Document {path} is not valid JSON: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(error: reqwest::Error) -> Self {
        StoreError::Backend(error.to_string())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns `None` when nothing is stored at `path`.
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError>;

    /// Creates the document when `revision` is `None`, otherwise replaces the
    /// document currently at `revision`.
    async fn put(
        &self,
        path: &str,
        content: &str,
        revision: Option<&Revision>,
        message: &str,
    ) -> Result<Revision, StoreError>;

    async fn delete(&self, path: &str, revision: &Revision, message: &str)
    -> Result<(), StoreError>;

    /// Whether a write credential is configured.
    fn can_write(&self) -> bool;
}
