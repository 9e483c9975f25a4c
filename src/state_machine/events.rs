use serde::{Deserialize, Serialize};

/// Events that can trigger migration status transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MigrationEvent {
    /// The strategy reported no further ranges
    Finish,
    /// A range exhausted its attempts
    Fail(String),
    /// Operator hold
    Pause,
    /// Operator release (from paused or failed)
    Resume,
}

impl MigrationEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Finish => "finish",
            Self::Fail(_) => "fail",
            Self::Pause => "pause",
            Self::Resume => "resume",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// Create a failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
