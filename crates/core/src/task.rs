//! Task lifecycle vocabulary: statuses, transitions and outcome codes.
//!
//! A task moves `pending -> submitted -> completed -> uploaded -> delivered`
//! on the happy path. `failed` and `completed_undelivered` are the other
//! terminal states.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a task record, stored as lowercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Submitted,
    Completed,
    Uploaded,
    Delivered,
    CompletedUndelivered,
    Failed,
}

impl TaskStatus {
    /// Database / wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Completed => "completed",
            Self::Uploaded => "uploaded",
            Self::Delivered => "delivered",
            Self::CompletedUndelivered => "completed_undelivered",
            Self::Failed => "failed",
        }
    }

    /// Parse the database representation.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "pending" => Ok(Self::Pending),
            "submitted" => Ok(Self::Submitted),
            "completed" => Ok(Self::Completed),
            "uploaded" => Ok(Self::Uploaded),
            "delivered" => Ok(Self::Delivered),
            "completed_undelivered" => Ok(Self::CompletedUndelivered),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!(
                "Unknown task status '{other}'"
            ))),
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::CompletedUndelivered | Self::Failed
        )
    }

    /// Statuses reachable from `self`.
    pub fn valid_transitions(self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Submitted],
            Self::Submitted => &[Self::Completed, Self::Failed],
            Self::Completed => &[Self::Uploaded, Self::Failed],
            Self::Uploaded => &[Self::Delivered, Self::CompletedUndelivered],
            Self::Delivered | Self::CompletedUndelivered | Self::Failed => &[],
        }
    }

    pub fn can_transition(self, to: TaskStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Outcome code carried by every finalized task and every webhook payload.
///
/// `None` (0) means success; every failure kind has its own non-zero code.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    None = 0,
    /// The backend reported an execution error for the job.
    ExecutionFailed = 1,
    /// The finished artifact could not be read from the backend.
    FetchFailed = 2,
    /// The artifact could not be written to blob storage.
    UploadFailed = 3,
    /// The client callback could not be reached.
    DeliveryFailed = 4,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Result<Self, CoreError> {
        match code {
            0 => Ok(Self::None),
            1 => Ok(Self::ExecutionFailed),
            2 => Ok(Self::FetchFailed),
            3 => Ok(Self::UploadFailed),
            4 => Ok(Self::DeliveryFailed),
            other => Err(CoreError::Validation(format!("Unknown error code {other}"))),
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::None
    }

    /// Code to record after a failed webhook delivery.
    ///
    /// A success outcome escalates to `DeliveryFailed`; an existing failure
    /// code is kept so the original cause is not masked.
    pub fn escalate_for_delivery(self) -> Self {
        if self.is_success() {
            Self::DeliveryFailed
        } else {
            self
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i32::deserialize(deserializer)?;
        Self::from_code(code).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Submitted,
            TaskStatus::Completed,
            TaskStatus::Uploaded,
            TaskStatus::Delivered,
            TaskStatus::CompletedUndelivered,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::from_name(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(TaskStatus::from_name("cancelled").is_err());
    }

    #[test]
    fn terminal_states_have_no_transitions() {
        for status in [
            TaskStatus::Delivered,
            TaskStatus::CompletedUndelivered,
            TaskStatus::Failed,
        ] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn submitted_can_complete_or_fail_only() {
        assert!(TaskStatus::Submitted.can_transition(TaskStatus::Completed));
        assert!(TaskStatus::Submitted.can_transition(TaskStatus::Failed));
        assert!(!TaskStatus::Submitted.can_transition(TaskStatus::Uploaded));
        assert!(!TaskStatus::Submitted.can_transition(TaskStatus::Delivered));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::CompletedUndelivered).unwrap();
        assert_eq!(json, "\"completed_undelivered\"");
    }

    #[test]
    fn error_code_values_are_stable() {
        assert_eq!(ErrorCode::None.code(), 0);
        assert_eq!(ErrorCode::ExecutionFailed.code(), 1);
        assert_eq!(ErrorCode::FetchFailed.code(), 2);
        assert_eq!(ErrorCode::UploadFailed.code(), 3);
        assert_eq!(ErrorCode::DeliveryFailed.code(), 4);
    }

    #[test]
    fn error_code_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&ErrorCode::UploadFailed).unwrap(), "3");
        let parsed: ErrorCode = serde_json::from_str("4").unwrap();
        assert_eq!(parsed, ErrorCode::DeliveryFailed);
        assert!(serde_json::from_str::<ErrorCode>("99").is_err());
    }

    #[test]
    fn delivery_escalation_only_replaces_success() {
        assert_eq!(
            ErrorCode::None.escalate_for_delivery(),
            ErrorCode::DeliveryFailed
        );
        assert_eq!(
            ErrorCode::UploadFailed.escalate_for_delivery(),
            ErrorCode::UploadFailed
        );
    }
}
