//! WebSocket message processing.
//!
//! [`EventNormalizer`] reduces raw ComfyUI messages to [`BackendEvent`]s.
//! [`process_messages`] drives it from a live stream: load updates are
//! written to the backend's own [`BackendState`], terminal job events are
//! queued for the correlator.

use std::collections::{HashMap, HashSet};

use futures::{Stream, StreamExt};
use relay_core::types::BackendId;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::events::{BackendEvent, OutputRef};
use crate::messages::{parse_message, ComfyUIMessage, NodeOutput};
use crate::state::BackendState;

/// Why [`process_messages`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The socket closed or failed; the caller should reconnect.
    Disconnected,
    /// The event queue has no consumer left; the caller should stop.
    ConsumerGone,
}

/// Per-backend translation state.
///
/// Outlives individual WebSocket sessions so outputs recorded before a
/// disconnect are still attached to the completion that follows it.
#[derive(Debug)]
pub struct EventNormalizer {
    backend_id: BackendId,
    /// First saved image per in-flight prompt.
    outputs: HashMap<String, OutputRef>,
    /// Prompts that already produced a terminal event and still expect
    /// the trailing `executing` with a null node.
    settled: HashSet<String>,
}

impl EventNormalizer {
    pub fn new(backend_id: BackendId) -> Self {
        Self {
            backend_id,
            outputs: HashMap::new(),
            settled: HashSet::new(),
        }
    }

    /// Prompts with a recorded output but no completion yet.
    pub fn in_flight(&self) -> usize {
        self.outputs.len()
    }

    /// Prompts still expecting their trailing null-node `executing`.
    pub fn awaiting_trailer(&self) -> usize {
        self.settled.len()
    }

    /// Start a new socket session. A trailer lost with the old socket is
    /// never resent, so the prompts waiting for one are forgotten.
    pub fn begin_session(&mut self) {
        if !self.settled.is_empty() {
            tracing::debug!(
                backend_id = self.backend_id,
                dropped = self.settled.len(),
                "Forgetting trailers from previous session",
            );
            self.settled.clear();
        }
    }

    /// Translate one message. Returns `None` for kinds that are only
    /// observed.
    pub fn normalize(&mut self, msg: ComfyUIMessage) -> Option<BackendEvent> {
        let backend_id = self.backend_id;
        match msg {
            ComfyUIMessage::Status(data) => Some(BackendEvent::QueueDepthChanged {
                backend_id,
                depth: data.queue_remaining(),
            }),
            ComfyUIMessage::Executed(data) => {
                self.record_output(&data);
                None
            }
            ComfyUIMessage::Executing(data) => match data.node {
                Some(node) => {
                    tracing::trace!(backend_id, prompt_id = %data.prompt_id, node = %node, "Executing node");
                    None
                }
                None => self.finish(data.prompt_id, true),
            },
            ComfyUIMessage::ExecutionSuccess(data) => {
                tracing::debug!(backend_id, prompt_id = %data.prompt_id, "Execution succeeded");
                self.finish(data.prompt_id, false)
            }
            ComfyUIMessage::ExecutionError(data) => {
                tracing::warn!(
                    backend_id,
                    prompt_id = %data.prompt_id,
                    node_id = %data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                let error = format!(
                    "{} in node {}: {}",
                    data.exception_type, data.node_id, data.exception_message
                );
                self.fail(data.prompt_id, error)
            }
            ComfyUIMessage::ExecutionInterrupted(data) => {
                let error = match data.node_id {
                    Some(node) => format!("Execution interrupted at node {node}"),
                    None => "Execution interrupted".to_string(),
                };
                self.fail(data.prompt_id, error)
            }
            ComfyUIMessage::Progress(data) => {
                tracing::trace!(backend_id, value = data.value, max = data.max, "Generation progress");
                None
            }
            ComfyUIMessage::ExecutionStart(data) => {
                tracing::debug!(backend_id, prompt_id = %data.prompt_id, "Execution started");
                None
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(backend_id, prompt_id = %data.prompt_id, cached = data.nodes.len(), "Execution used cache");
                None
            }
        }
    }

    fn record_output(&mut self, data: &NodeOutput) {
        let saved = data.images().into_iter().find(|img| img.kind == "output");
        if let Some(img) = saved {
            tracing::debug!(
                backend_id = self.backend_id,
                prompt_id = %data.prompt_id,
                node = %data.node,
                filename = %img.filename,
                "Output recorded",
            );
            self.outputs
                .entry(data.prompt_id.clone())
                .or_insert_with(|| OutputRef::new(img.filename, img.subfolder));
        }
    }

    /// Complete a prompt. `trailing` marks the null-node `executing`
    /// message, which is always the last one ComfyUI sends for a prompt.
    fn finish(&mut self, prompt_id: String, trailing: bool) -> Option<BackendEvent> {
        let already_settled = if trailing {
            self.settled.remove(&prompt_id)
        } else {
            !self.settled.insert(prompt_id.clone())
        };
        if already_settled {
            self.outputs.remove(&prompt_id);
            return None;
        }
        let backend_id = self.backend_id;
        match self.outputs.remove(&prompt_id) {
            Some(output) => Some(BackendEvent::JobCompleted {
                backend_id,
                job_id: prompt_id,
                output,
            }),
            None => Some(BackendEvent::JobFailed {
                backend_id,
                job_id: prompt_id,
                error: "no output produced".into(),
            }),
        }
    }

    fn fail(&mut self, prompt_id: String, error: String) -> Option<BackendEvent> {
        self.outputs.remove(&prompt_id);
        if !self.settled.insert(prompt_id.clone()) {
            return None;
        }
        Some(BackendEvent::JobFailed {
            backend_id: self.backend_id,
            job_id: prompt_id,
            error,
        })
    }
}

/// Process WebSocket messages from one backend session.
///
/// Loops until the stream closes, errors, or the event queue's consumer
/// is gone. Binary frames (preview images) are ignored.
pub async fn process_messages<S>(
    ws_stream: &mut S,
    normalizer: &mut EventNormalizer,
    state: &BackendState,
    event_tx: &mpsc::Sender<BackendEvent>,
) -> StreamEnd
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let backend_id = state.id();
    while let Some(msg_result) = ws_stream.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                tracing::trace!(backend_id, "Ignoring binary message (preview image)");
                continue;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Ok(Message::Close(frame)) => {
                tracing::info!(backend_id, ?frame, "ComfyUI WebSocket closed");
                return StreamEnd::Disconnected;
            }
            Err(e) => {
                tracing::error!(backend_id, error = %e, "WebSocket receive error");
                return StreamEnd::Disconnected;
            }
        };

        let msg = match parse_message(text.as_str()) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::trace!(backend_id, error = %e, "Discarding unrecognised ComfyUI message");
                continue;
            }
        };

        match normalizer.normalize(msg) {
            Some(BackendEvent::QueueDepthChanged { depth, .. }) => {
                tracing::debug!(backend_id, depth, "Queue depth changed");
                state.set_queue_depth(depth);
            }
            Some(event) => {
                if event_tx.send(event).await.is_err() {
                    tracing::warn!(backend_id, "Event consumer gone, stopping listener");
                    return StreamEnd::ConsumerGone;
                }
            }
            None => {}
        }
    }
    StreamEnd::Disconnected
}
