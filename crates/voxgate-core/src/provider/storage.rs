//! Blob storage port: opaque durable storage for persisted artifacts.

use async_trait::async_trait;
use bytes::Bytes;

use super::ProviderError;

/// Put-blob contract. Implementations must be safe to call concurrently.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `bytes` under `key` and return a durable URL.
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
    ) -> Result<String, ProviderError>;
}
