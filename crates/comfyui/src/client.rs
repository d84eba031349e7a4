//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI instance, including the client identity the relay registers
//! under. Call [`ComfyUIClient::connect`] to establish a live
//! [`ComfyUIConnection`] over WebSocket.

use relay_core::types::BackendId;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// The WebSocket stream type produced by [`ComfyUIClient::connect`].
pub type ComfyUIStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance.
///
/// The `client_id` is fixed for the lifetime of the handle. ComfyUI pushes
/// prompt events only to the session registered under the submitting
/// client id, so every reconnect must present the same one.
pub struct ComfyUIClient {
    backend_id: BackendId,
    ws_url: String,
    client_id: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    pub backend_id: BackendId,
    /// Client ID sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// Create a client with a freshly generated identity.
    ///
    /// * `backend_id` - configuration index of this backend.
    /// * `ws_url`     - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(backend_id: BackendId, ws_url: String) -> Self {
        Self::with_client_id(backend_id, ws_url, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_client_id(backend_id: BackendId, ws_url: String, client_id: String) -> Self {
        Self {
            backend_id,
            ws_url,
            client_id,
        }
    }

    pub fn backend_id(&self) -> BackendId {
        self.backend_id
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Identity the relay is registered under on this backend.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Connect to the ComfyUI WebSocket endpoint under this client's
    /// identity.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, self.client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            backend_id = self.backend_id,
            client_id = %self.client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            backend_id: self.backend_id,
            client_id: self.client_id.clone(),
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
