//! Local persistence for outcomes that could not leave the process.
//!
//! Layout under the fallback directory:
//!
//! ```text
//! {dir}/{internal_id}/{filename}        artifact whose upload failed
//! {dir}/undelivered/{internal_id}.json  payload whose delivery failed
//! ```

use std::path::{Path, PathBuf};

use relay_core::types::TaskId;

/// Subdirectory for undelivered webhook payloads.
pub const UNDELIVERED_DIR: &str = "undelivered";

/// Write artifact bytes under their original filename.
///
/// Only the final path component of `filename` is used.
pub async fn write_artifact(
    dir: &Path,
    internal_id: TaskId,
    filename: &str,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "artifact".into());
    let task_dir = dir.join(internal_id.to_string());
    tokio::fs::create_dir_all(&task_dir).await?;
    let path = task_dir.join(name);
    tokio::fs::write(&path, bytes).await?;
    Ok(path)
}

/// Write an undelivered payload as pretty JSON.
pub async fn write_undelivered(
    dir: &Path,
    internal_id: TaskId,
    payload: &serde_json::Value,
) -> std::io::Result<PathBuf> {
    let undelivered = dir.join(UNDELIVERED_DIR);
    tokio::fs::create_dir_all(&undelivered).await?;
    let path = undelivered.join(format!("{internal_id}.json"));
    let body = serde_json::to_vec_pretty(payload)?;
    tokio::fs::write(&path, body).await?;
    Ok(path)
}
