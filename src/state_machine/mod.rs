//! Status model for batched migrations and their jobs.
//!
//! Migrations carry their status on the definition row; the transition table
//! lives here so every writer (scheduler, finalizer, operator actions) applies
//! the same rules.

pub mod events;
pub mod states;

pub use events::MigrationEvent;
pub use states::{JobStatus, MigrationStatus};

use crate::error::{MigrationError, Result};

/// Resolve the status reached by applying `event` to a migration in `current`.
pub fn determine_target_state(
    migration_id: i64,
    current: MigrationStatus,
    event: &MigrationEvent,
) -> Result<MigrationStatus> {
    let target = match (current, event) {
        (MigrationStatus::Active, MigrationEvent::Finish) => MigrationStatus::Finished,
        (MigrationStatus::Active, MigrationEvent::Fail(_)) => MigrationStatus::Failed,

        (MigrationStatus::Active, MigrationEvent::Pause) => MigrationStatus::Paused,
        (MigrationStatus::Paused, MigrationEvent::Pause) => MigrationStatus::Paused,

        (MigrationStatus::Paused, MigrationEvent::Resume) => MigrationStatus::Active,
        (MigrationStatus::Failed, MigrationEvent::Resume) => MigrationStatus::Active,
        (MigrationStatus::Active, MigrationEvent::Resume) => MigrationStatus::Active,

        (from, event) => {
            return Err(MigrationError::InvalidTransition {
                migration_id,
                from: from.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_driven_transitions() {
        assert_eq!(
            determine_target_state(1, MigrationStatus::Active, &MigrationEvent::Finish).unwrap(),
            MigrationStatus::Finished
        );
        assert_eq!(
            determine_target_state(
                1,
                MigrationStatus::Active,
                &MigrationEvent::fail_with_error("boom")
            )
            .unwrap(),
            MigrationStatus::Failed
        );
    }

    #[test]
    fn test_operator_transitions() {
        assert_eq!(
            determine_target_state(1, MigrationStatus::Active, &MigrationEvent::Pause).unwrap(),
            MigrationStatus::Paused
        );
        assert_eq!(
            determine_target_state(1, MigrationStatus::Paused, &MigrationEvent::Resume).unwrap(),
            MigrationStatus::Active
        );
        assert_eq!(
            determine_target_state(1, MigrationStatus::Failed, &MigrationEvent::Resume).unwrap(),
            MigrationStatus::Active
        );
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(
            determine_target_state(1, MigrationStatus::Finished, &MigrationEvent::Resume).is_err()
        );
        assert!(
            determine_target_state(1, MigrationStatus::Paused, &MigrationEvent::Finish).is_err()
        );
        assert!(
            determine_target_state(1, MigrationStatus::Failed, &MigrationEvent::Pause).is_err()
        );

        let err =
            determine_target_state(7, MigrationStatus::Finished, &MigrationEvent::Pause).unwrap_err();
        assert!(err.to_string().contains("migration 7"));
    }
}
