//! ComfyUI backend integration.
//!
//! Provides typed message parsing, the REST API wrapper, the per-backend
//! WebSocket connection loop with reconnection, event normalization, and
//! the per-backend load state read by the scheduler.

pub mod api;
pub mod backend;
pub mod client;
pub mod connection;
pub mod events;
pub mod manager;
pub mod messages;
pub mod processor;
pub mod reconnect;
pub mod state;

pub use backend::BackendApi;
pub use events::{BackendEvent, OutputRef};
pub use manager::{BackendConfig, BackendHandle, BackendManager, EVENT_CHANNEL_CAPACITY};
pub use reconnect::ReconnectConfig;
pub use state::{BackendState, LoadTracker};
