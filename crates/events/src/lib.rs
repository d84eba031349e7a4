//! Outcome notifications to client callbacks.
//!
//! [`WebhookPayload`] is the body every task's callback receives exactly
//! once; [`delivery::webhook`] performs the single bounded POST.

pub mod delivery;
pub mod payload;

pub use delivery::webhook::{WebhookDelivery, WebhookError, WebhookSender};
pub use payload::WebhookPayload;
