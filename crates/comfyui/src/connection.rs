//! Per-backend connection task: connect, process, reconnect.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection};
use crate::events::BackendEvent;
use crate::processor::{process_messages, EventNormalizer, StreamEnd};
use crate::reconnect::{reconnect_loop, ReconnectConfig};
use crate::state::BackendState;

/// Everything one backend's listener owns.
pub struct BackendConnection {
    client: Arc<ComfyUIClient>,
    state: Arc<BackendState>,
    event_tx: mpsc::Sender<BackendEvent>,
    reconnect: ReconnectConfig,
}

impl BackendConnection {
    pub fn new(
        client: Arc<ComfyUIClient>,
        state: Arc<BackendState>,
        event_tx: mpsc::Sender<BackendEvent>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            client,
            state,
            event_tx,
            reconnect,
        }
    }

    /// Run until `cancel` fires or the event consumer goes away.
    ///
    /// The backend is reachable exactly while a session is open. Recorded
    /// outputs are kept across sessions, and every reconnect reuses the
    /// client's fixed identity.
    pub async fn run(self, cancel: CancellationToken) {
        let backend_id = self.state.id();
        let mut normalizer = EventNormalizer::new(backend_id);
        let mut restored: Option<ComfyUIConnection> = None;

        loop {
            let conn = match restored.take() {
                Some(conn) => conn,
                None => {
                    let attempt = tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = self.client.connect() => result,
                    };
                    match attempt {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::warn!(
                                backend_id,
                                error = %e,
                                "Connection failed, entering reconnect loop",
                            );
                            match reconnect_loop(&self.client, &self.reconnect, &cancel).await {
                                Some(conn) => conn,
                                None => break,
                            }
                        }
                    }
                }
            };

            self.state.set_reachable(true);
            normalizer.begin_session();
            let mut ws_stream = conn.ws_stream;

            let end = tokio::select! {
                _ = cancel.cancelled() => None,
                end = process_messages(&mut ws_stream, &mut normalizer, &self.state, &self.event_tx) => Some(end),
            };
            self.state.set_reachable(false);

            match end {
                None => {
                    let _ = ws_stream.close(None).await;
                    break;
                }
                Some(StreamEnd::ConsumerGone) => break,
                Some(StreamEnd::Disconnected) => {}
            }

            tracing::info!(
                backend_id,
                in_flight = normalizer.in_flight(),
                "Connection lost, entering reconnect loop",
            );
            match reconnect_loop(&self.client, &self.reconnect, &cancel).await {
                Some(conn) => restored = Some(conn),
                None => break,
            }
        }

        self.state.set_reachable(false);
        tracing::info!(backend_id, "Connection task exited");
    }
}
