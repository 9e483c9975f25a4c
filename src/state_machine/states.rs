use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a batched migration definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// Eligible for scheduling
    #[default]
    Active,
    /// Held by an operator; no new batches are started
    Paused,
    /// Every range has been processed
    Finished,
    /// A range exhausted its attempts; needs an operator
    Failed,
}

impl MigrationStatus {
    /// Check if this is a terminal state for automatic execution
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Check if the scheduler may run batches for this migration
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MigrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid migration status: {s}")),
        }
    }
}

/// Lifecycle of a single batch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    /// Terminal job records are never modified again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_status_terminal_check() {
        assert!(MigrationStatus::Finished.is_terminal());
        assert!(MigrationStatus::Failed.is_terminal());
        assert!(!MigrationStatus::Active.is_terminal());
        assert!(!MigrationStatus::Paused.is_terminal());
    }

    #[test]
    fn test_only_active_is_schedulable() {
        assert!(MigrationStatus::Active.is_schedulable());
        assert!(!MigrationStatus::Paused.is_schedulable());
        assert!(!MigrationStatus::Finished.is_schedulable());
        assert!(!MigrationStatus::Failed.is_schedulable());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(MigrationStatus::Paused.to_string(), "paused");
        assert_eq!(
            "finished".parse::<MigrationStatus>().unwrap(),
            MigrationStatus::Finished
        );
        assert!("finalizing".parse::<MigrationStatus>().is_err());

        assert_eq!(JobStatus::Succeeded.to_string(), "succeeded");
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
    }

    #[test]
    fn test_state_serde() {
        let json = serde_json::to_string(&MigrationStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");

        let parsed: JobStatus = serde_json::from_str("\"pending\"").unwrap();
        assert_eq!(parsed, JobStatus::Pending);
    }
}
