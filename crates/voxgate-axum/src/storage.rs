//! Attachment upload endpoint and the filesystem blob store.
//!
//! `POST /storage/upload` accepts a multipart `file` field and stores it
//! through the configured [`BlobStorage`]; the returned URL is what prompt
//! parts reference via `image_url` / `file_url`. Stored blobs are served
//! back under `GET /storage/{key}`.

use std::path::PathBuf;

use async_trait::async_trait;
use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use bytes::Bytes;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use voxgate_core::provider::{BlobStorage, ProviderError};

use crate::error::HttpError;
use crate::state::AppState;

/// Blob storage rooted at a local directory (`BLOB_BUCKET`).
///
/// Keys map directly onto relative paths; traversal components are
/// rejected. URLs are gateway-relative (`/storage/<key>`), matching the
/// retrieval route.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, ProviderError> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
        {
            return Err(ProviderError::Rejected(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStorage for FsBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, ProviderError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        info!(key, size = bytes.len(), content_type, "blob stored");
        Ok(format!("/storage/{key}"))
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
}

/// `POST /storage/upload` — multipart attachment upload.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, HttpError> {
    state.auth.verify_bearer(&headers)?;

    let Some(storage) = state.deps.providers.storage() else {
        return Err(HttpError::Internal("no blob storage configured".into()));
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| HttpError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = sanitize_filename(field.file_name().unwrap_or("upload.bin"));
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| HttpError::BadRequest(format!("failed reading upload: {e}")))?;

        let key = format!("uploads/{}-{filename}", Uuid::new_v4());
        let url = storage
            .put(&key, data, &content_type)
            .await
            .map_err(|e| HttpError::Internal(e.to_string()))?;
        return Ok(Json(UploadResponse { url }));
    }

    Err(HttpError::BadRequest(
        "multipart body must contain a 'file' field".into(),
    ))
}

/// Keep only path-safe filename characters.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload.bin".to_string()
    } else {
        cleaned
    }
}
