//! The operations the dispatcher needs from a backend.
//!
//! [`ComfyUIApi`](crate::api::ComfyUIApi) is the production implementation.
//! The trait exists so the submission and result paths can be driven
//! without a live server.

use async_trait::async_trait;

use crate::api::ComfyUIApiError;
use crate::events::OutputRef;

#[async_trait]
pub trait BackendApi: Send + Sync {
    /// Queue a workflow under `client_id`, returning the backend job id.
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, ComfyUIApiError>;

    /// Write an input artifact, returning its backend-local path.
    async fn push_input(&self, filename: &str, bytes: Vec<u8>) -> Result<String, ComfyUIApiError>;

    /// Remove an input artifact by backend-local path.
    async fn delete_input(&self, path: &str) -> Result<(), ComfyUIApiError>;

    /// Read a produced artifact.
    async fn fetch_output(&self, output: &OutputRef) -> Result<Vec<u8>, ComfyUIApiError>;
}
