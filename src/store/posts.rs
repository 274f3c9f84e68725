use std::sync::Arc;

use uuid::Uuid;

use super::models::{Post, PostIndex, PostSummary};
use super::{DocumentStore, Revision, StoreError};
use crate::media::MediaStore;

const MAX_SLUG_CHARS: usize = 60;

/// A post together with the revision it was read at.
#[derive(Debug, Clone)]
pub struct StoredPost {
    pub post: Post,
    pub revision: Revision,
}

/// Full post documents plus the summary index used for listings.
///
/// Layout under `prefix`: one `{id}.json` per post and a shared `index.json`.
pub struct PostStore {
    documents: Arc<dyn DocumentStore>,
    prefix: String,
}

impl PostStore {
    pub fn new(documents: Arc<dyn DocumentStore>, prefix: impl Into<String>) -> Self {
        Self {
            documents,
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn can_write(&self) -> bool {
        self.documents.can_write()
    }

    fn post_path(&self, id: &str) -> String {
        format!("{}/{}.json", self.prefix, id)
    }

    fn index_path(&self) -> String {
        format!("{}/{INDEX_STEM}.json", self.prefix)
    }

    pub async fn load_index(&self) -> Result<(PostIndex, Option<Revision>), StoreError> {
        let path = self.index_path();
        match self.documents.get(&path).await? {
            Some(doc) => {
                let index = serde_json::from_str(&doc.content)
                    .map_err(|source| StoreError::Corrupt { path, source })?;
                Ok((index, Some(doc.revision)))
            }
            None => Ok((PostIndex::default(), None)),
        }
    }

    /// Summaries in listing order.
    pub async fn list(&self) -> Result<Vec<PostSummary>, StoreError> {
        let (index, _) = self.load_index().await?;
        let mut posts = index.posts;
        sort_summary(&mut posts);
        Ok(posts)
    }

    pub async fn load_post(&self, id: &str) -> Result<Option<StoredPost>, StoreError> {
        if !is_valid_post_id(id) {
            return Ok(None);
        }

        let path = self.post_path(id);
        match self.documents.get(&path).await? {
            Some(doc) => {
                let post = serde_json::from_str(&doc.content)
                    .map_err(|source| StoreError::Corrupt { path, source })?;
                Ok(Some(StoredPost {
                    post,
                    revision: doc.revision,
                }))
            }
            None => Ok(None),
        }
    }

    /// Writes the post document, then refreshes its entry in the index.
    ///
    /// The document write is checked against `revision`. The index is only
    /// touched once the document is stored; if that second write fails the
    /// error is `PartiallyApplied` and the index lags until the next save.
    pub async fn save_post_and_index(
        &self,
        post: &Post,
        revision: Option<&Revision>,
        message: &str,
    ) -> Result<Revision, StoreError> {
        let content = to_document(post)?;
        let new_revision = self
            .documents
            .put(&self.post_path(&post.id), &content, revision, message)
            .await?;

        let summary = post.summary();
        self.update_index(message, |posts| {
            match posts.iter_mut().find(|entry| entry.id == summary.id) {
                Some(entry) => *entry = summary,
                None => posts.push(summary),
            }
        })
        .await
        .map_err(|source| StoreError::PartiallyApplied {
            post_id: post.id.clone(),
            source: Box::new(source),
        })?;

        Ok(new_revision)
    }

    /// Removes the document and its index entry, then deletes the post's
    /// images. Image cleanup never fails the delete.
    pub async fn delete_post(
        &self,
        stored: &StoredPost,
        media: &dyn MediaStore,
        message: &str,
    ) -> Result<(), StoreError> {
        let post = &stored.post;
        self.documents
            .delete(&self.post_path(&post.id), &stored.revision, message)
            .await?;

        self.update_index(message, |posts| posts.retain(|entry| entry.id != post.id))
            .await
            .map_err(|source| StoreError::PartiallyApplied {
                post_id: post.id.clone(),
                source: Box::new(source),
            })?;

        for key in &post.images {
            if let Err(e) = media.delete(key).await {
                warn!(post_id = %post.id, image = %key, "image cleanup failed: {}", e);
            }
        }

        Ok(())
    }

    async fn update_index<F>(&self, message: &str, edit: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Vec<PostSummary>),
    {
        let (mut index, revision) = self.load_index().await?;
        edit(&mut index.posts);
        sort_summary(&mut index.posts);

        let content = serde_json::to_string_pretty(&index)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.documents
            .put(&self.index_path(), &content, revision.as_ref(), message)
            .await?;
        Ok(())
    }
}

fn to_document(post: &Post) -> Result<String, StoreError> {
    serde_json::to_string_pretty(post).map_err(|e| StoreError::Backend(e.to_string()))
}

/// Newest first by `updatedAt`, falling back to `createdAt`. The sort is
/// stable, so equal keys keep their previous relative order.
pub fn sort_summary(posts: &mut [PostSummary]) {
    posts.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
}

/// File stem of the summary index, never a post id.
const INDEX_STEM: &str = "index";

/// Post ids become file names and URL path segments, so only the characters
/// [`slugify`] produces are accepted, and the index stem is reserved.
pub fn is_valid_post_id(id: &str) -> bool {
    !id.is_empty()
        && id.chars().count() <= 100
        && id != INDEX_STEM
        && id.chars().all(|c| c.is_alphanumeric() || c == '-')
}

pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;

    for c in title.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
        if slug.chars().count() >= MAX_SLUG_CHARS {
            break;
        }
    }

    let slug: String = slug.chars().take(MAX_SLUG_CHARS).collect();
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "post".to_string()
    } else {
        slug.to_string()
    }
}

/// Slugified title plus a random suffix, fixed for the life of the post.
pub fn new_post_id(title: &str) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{}-{}", slugify(title), &random[..6])
}
