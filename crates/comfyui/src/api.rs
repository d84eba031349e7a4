//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, input upload and cleanup, and output
//! retrieval using [`reqwest`].

use async_trait::async_trait;
use serde::Deserialize;

use crate::backend::BackendApi;
use crate::events::OutputRef;

/// Subfolder of the backend input directory that relay uploads go to.
pub const INPUT_SUBFOLDER: &str = "relay";

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    pub number: i32,
    /// Per-node validation errors; empty when the prompt was accepted.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

/// Response returned by `/upload/image`.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl UploadResponse {
    /// Path relative to the input directory, as `LoadImage` expects it.
    pub fn path(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ComfyUIApi {
    /// Client for the instance at `api_url` (e.g. `http://host:8188`),
    /// sharing the connection pool of `client`.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. Events for the prompt are pushed to the WebSocket
    /// session registered under the same client ID.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Upload an image into the input directory (`POST /upload/image`).
    pub async fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("type", "input")
            .text("subfolder", INPUT_SUBFOLDER)
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download a file (`GET /view`).
    ///
    /// `kind` is the ComfyUI folder type: `output`, `input` or `temp`.
    pub async fn view(
        &self,
        filename: &str,
        subfolder: &str,
        kind: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[("filename", filename), ("subfolder", subfolder), ("type", kind)])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Ask the backend to delete a file (`POST /clean_file`).
    ///
    /// The endpoint is a backend-side extension; deletion itself happens
    /// on the backend.
    pub async fn clean_file(&self, kind: &str, path: &str) -> Result<(), ComfyUIApiError> {
        let (subfolder, filename) = match path.rsplit_once('/') {
            Some((dir, name)) => (dir, name),
            None => ("", path),
        };
        let body = serde_json::json!({
            "type": kind,
            "filename": filename,
            "subfolder": subfolder,
        });

        let response = self
            .client
            .post(format!("{}/clean_file", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Non-2xx responses become [`ComfyUIApiError::ApiError`] carrying the
    /// body text, which ComfyUI fills with node validation errors.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = match response.text().await {
            Ok(text) => text,
            Err(_) => String::from("<unreadable body>"),
        };
        Err(ComfyUIApiError::ApiError {
            status: status.as_u16(),
            body,
        })
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        Ok(Self::ensure_success(response).await?.json::<T>().await?)
    }
}

#[async_trait]
impl BackendApi for ComfyUIApi {
    async fn submit(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<String, ComfyUIApiError> {
        let response = self.submit_workflow(workflow, client_id).await?;
        tracing::debug!(
            api_url = %self.api_url,
            prompt_id = %response.prompt_id,
            queue_number = response.number,
            "Prompt queued",
        );
        Ok(response.prompt_id)
    }

    async fn push_input(&self, filename: &str, bytes: Vec<u8>) -> Result<String, ComfyUIApiError> {
        Ok(self.upload_image(filename, bytes).await?.path())
    }

    async fn delete_input(&self, path: &str) -> Result<(), ComfyUIApiError> {
        self.clean_file("input", path).await
    }

    async fn fetch_output(&self, output: &OutputRef) -> Result<Vec<u8>, ComfyUIApiError> {
        self.view(&output.filename, &output.subfolder, "output").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_path_includes_subfolder() {
        let resp: UploadResponse =
            serde_json::from_str(r#"{"name":"in.png","subfolder":"relay","type":"input"}"#)
                .unwrap();
        assert_eq!(resp.path(), "relay/in.png");

        let resp: UploadResponse = serde_json::from_str(r#"{"name":"in.png"}"#).unwrap();
        assert_eq!(resp.path(), "in.png");
    }

    #[test]
    fn submit_response_parses_without_node_errors() {
        let resp: SubmitResponse =
            serde_json::from_str(r#"{"prompt_id":"abc","number":4}"#).unwrap();
        assert_eq!(resp.prompt_id, "abc");
        assert_eq!(resp.number, 4);
        assert!(resp.node_errors.is_null());
    }

    #[test]
    fn api_error_display() {
        let err = ComfyUIApiError::ApiError {
            status: 400,
            body: "invalid prompt".into(),
        };
        assert_eq!(err.to_string(), "ComfyUI API error (400): invalid prompt");
    }
}
