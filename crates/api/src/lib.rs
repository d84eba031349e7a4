//! Relay HTTP server library.
//!
//! Exposes configuration, state, error handling and routes so the binary
//! and the integration tests share them.

pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
