//! Object storage for post images.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use axum::{
    Json,
    body::Bytes,
    extract::{Extension, Path as UrlPath, Query},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::AdminUser;
use crate::error::{AppError, AppResult};
use crate::startup::AppState;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Invalid media key: {0}")]
    InvalidKey(String),
    #[error("Unsupported media type: {0}")]
    UnsupportedType(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMedia {
    pub key: String,
    pub url: String,
    pub size: u64,
    pub content_type: String,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn put(&self, key: &str, data: &[u8], content_type: &str)
    -> Result<StoredMedia, MediaError>;

    /// Returns the bytes and content type, or `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, String)>, MediaError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), MediaError>;

    fn public_url(&self, key: &str) -> String;
}

/// Files on the local filesystem, served back under `base_url`.
pub struct LocalMediaStore {
    root: PathBuf,
    base_url: String,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, MediaError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn put(
        &self,
        key: &str,
        data: &[u8],
        content_type: &str,
    ) -> Result<StoredMedia, MediaError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        Ok(StoredMedia {
            key: key.to_string(),
            url: self.public_url(key),
            size: data.len() as u64,
            content_type: content_type.to_string(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, String)>, MediaError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some((bytes, content_type_for(key).to_string()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), MediaError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }
}

/// Keys are relative paths made of normal components only.
pub fn validate_key(key: &str) -> Result<(), MediaError> {
    let path = Path::new(key);
    let only_normal = path
        .components()
        .all(|component| matches!(component, Component::Normal(_)));

    if key.is_empty() || key.contains('\\') || !only_normal {
        return Err(MediaError::InvalidKey(key.to_string()));
    }
    Ok(())
}

pub fn content_type_for(key: &str) -> &'static str {
    let extension = key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/avif" => Some("avif"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

/// `{year}/{month}/{random}-{name}.{ext}` with the name reduced to a safe
/// file stem.
pub fn new_media_key(name: &str, content_type: &str) -> Result<String, MediaError> {
    let extension = extension_for(content_type)
        .ok_or_else(|| MediaError::UnsupportedType(content_type.to_string()))?;

    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    let stem: String = stem
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c.to_ascii_lowercase())
            } else if c == '-' || c == '_' || c == ' ' {
                Some('-')
            } else {
                None
            }
        })
        .take(40)
        .collect();
    let stem = stem.trim_matches('-');
    let stem = if stem.is_empty() { "image" } else { stem };

    let now = Utc::now();
    let random = Uuid::new_v4().simple().to_string();
    Ok(format!(
        "{}/{:02}/{}-{}.{}",
        now.year(),
        now.month(),
        &random[..8],
        stem,
        extension
    ))
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub name: String,
}

/// Stores the raw request body as an image.
pub async fn upload_media(
    admin: AdminUser,
    Extension(app_state): Extension<AppState>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_ascii_lowercase())
        .unwrap_or_default();

    if body.is_empty() {
        return Err(AppError::BadRequest("Empty upload".to_string()));
    }

    let key = new_media_key(&query.name, &content_type)?;
    let stored = app_state.media.put(&key, &body, &content_type).await?;
    info!(login = %admin.login, key = %stored.key, size = stored.size, "media uploaded");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "key": stored.key,
            "url": stored.url,
        })),
    ))
}

pub async fn serve_media(
    Extension(app_state): Extension<AppState>,
    UrlPath(key): UrlPath<String>,
) -> AppResult<impl IntoResponse> {
    let (bytes, content_type) = app_state
        .media
        .get(&key)
        .await?
        .ok_or_else(|| AppError::NotFound("Media not found".to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        bytes,
    ))
}
