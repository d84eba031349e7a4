/// Index of a backend in configuration order.
///
/// Doubles as the scheduler's tie-break order.
pub type BackendId = usize;

/// Dispatcher-assigned task identifier (UUID v7).
pub type TaskId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
