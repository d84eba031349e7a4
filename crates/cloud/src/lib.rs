//! Blob storage for finished artifacts.
//!
//! [`BlobStore`] is the seam the result pipeline uploads through.
//! [`S3BlobStore`] is the production implementation; [`FsBlobStore`]
//! writes under a local directory.

use async_trait::async_trait;
use relay_core::types::TaskId;

pub mod fs;
pub mod s3;

pub use fs::FsBlobStore;
pub use s3::S3BlobStore;

/// Errors from a blob store.
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    /// The key would escape the store's namespace.
    #[error("Invalid blob key: {0:?}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote store rejected or failed the upload.
    #[error("Upload failed: {0}")]
    Upload(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, returning the key as stored.
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str)
        -> Result<String, BlobStoreError>;
}

/// Key for a task's artifact: `{prefix}{internal_id}/{filename}`.
///
/// The task id keeps keys unique even when backends reuse filenames.
pub fn artifact_key(prefix: &str, internal_id: TaskId, filename: &str) -> String {
    format!("{prefix}{internal_id}/{filename}")
}

/// MIME type from the artifact's extension.
pub fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}
