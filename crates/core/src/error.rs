/// Domain-level failures, independent of transport or storage.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A request or stored value violates a domain rule.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
