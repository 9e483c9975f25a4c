//! # Job Registry
//!
//! Thread-safe mapping from job class name to the [`MigrationJob`] that
//! processes one batch. Migrations only store the name; the runner resolves
//! it here every time a batch executes.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{MigrationError, Result};

/// Everything a job needs to process one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchArguments {
    /// Inclusive lower bound of the batch
    pub start_key: i64,
    /// Inclusive upper bound of the batch
    pub end_key: i64,
    pub table_name: String,
    pub column_name: String,
    pub sub_batch_size: i64,
    pub job_arguments: Vec<Value>,
}

/// What a job reports back after a successful batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub rows_processed: Option<i64>,
}

impl BatchReport {
    pub fn rows(rows_processed: i64) -> Self {
        Self {
            rows_processed: Some(rows_processed),
        }
    }
}

/// A unit of migration work applied to one key range.
///
/// Implementations must be idempotent over a range: a failed batch is retried
/// with the exact same bounds.
#[async_trait]
pub trait MigrationJob: Send + Sync {
    async fn perform(&self, arguments: &BatchArguments) -> anyhow::Result<BatchReport>;

    /// Number of job arguments this job expects, if it declares one
    fn job_arguments_count(&self) -> Option<usize> {
        None
    }
}

/// Registered jobs keyed by job class name
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<dyn MigrationJob>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_class_names", &self.job_class_names())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job; replaces any job already registered under the name
    pub fn register(&self, job_class_name: impl Into<String>, job: Arc<dyn MigrationJob>) {
        let job_class_name = job_class_name.into();
        if self.jobs.insert(job_class_name.clone(), job).is_some() {
            warn!(job_class_name = %job_class_name, "Replaced registered migration job");
        } else {
            debug!(job_class_name = %job_class_name, "Registered migration job");
        }
    }

    pub fn unregister(&self, job_class_name: &str) -> bool {
        self.jobs.remove(job_class_name).is_some()
    }

    pub fn contains(&self, job_class_name: &str) -> bool {
        self.jobs.contains_key(job_class_name)
    }

    /// Resolve a job class name
    pub fn resolve(&self, job_class_name: &str) -> Result<Arc<dyn MigrationJob>> {
        self.jobs
            .get(job_class_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| MigrationError::UnknownJob {
                job_class_name: job_class_name.to_string(),
            })
    }

    /// Check the argument count against the job's declared arity
    pub fn validate_arguments(&self, job_class_name: &str, job_arguments: &[Value]) -> Result<()> {
        let job = self.resolve(job_class_name)?;

        match job.job_arguments_count() {
            Some(expected) if expected != job_arguments.len() => {
                Err(MigrationError::WrongArgumentCount {
                    job_class_name: job_class_name.to_string(),
                    given: job_arguments.len(),
                    expected,
                })
            }
            _ => Ok(()),
        }
    }

    /// Registered names, sorted
    pub fn job_class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NoopJob {
        arity: Option<usize>,
    }

    #[async_trait]
    impl MigrationJob for NoopJob {
        async fn perform(&self, arguments: &BatchArguments) -> anyhow::Result<BatchReport> {
            Ok(BatchReport::rows(arguments.end_key - arguments.start_key + 1))
        }

        fn job_arguments_count(&self) -> Option<usize> {
            self.arity
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = JobRegistry::new();
        assert!(registry.is_empty());

        registry.register("CopyColumn", Arc::new(NoopJob { arity: None }));
        assert!(registry.contains("CopyColumn"));
        assert!(registry.resolve("CopyColumn").is_ok());

        let err = registry.resolve("Missing").err().unwrap();
        assert!(matches!(err, MigrationError::UnknownJob { .. }));
    }

    #[test]
    fn test_validate_arguments_against_declared_arity() {
        let registry = JobRegistry::new();
        registry.register("CopyColumn", Arc::new(NoopJob { arity: Some(2) }));

        assert!(registry
            .validate_arguments("CopyColumn", &[json!("a"), json!("b")])
            .is_ok());

        let err = registry
            .validate_arguments("CopyColumn", &[json!("a")])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Wrong number of job arguments for CopyColumn (given 1, expected 2)"
        );
    }

    #[test]
    fn test_undeclared_arity_accepts_anything() {
        let registry = JobRegistry::new();
        registry.register("Backfill", Arc::new(NoopJob { arity: None }));
        assert!(registry
            .validate_arguments("Backfill", &[json!(1), json!(2), json!(3)])
            .is_ok());
    }

    #[test]
    fn test_names_are_sorted_and_unregister_works() {
        let registry = JobRegistry::new();
        registry.register("b", Arc::new(NoopJob { arity: None }));
        registry.register("a", Arc::new(NoopJob { arity: None }));
        assert_eq!(registry.job_class_names(), vec!["a", "b"]);

        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_resolved_job_performs() {
        let registry = JobRegistry::new();
        registry.register("CopyColumn", Arc::new(NoopJob { arity: None }));

        let report = registry
            .resolve("CopyColumn")
            .unwrap()
            .perform(&BatchArguments {
                start_key: 1,
                end_key: 10,
                table_name: "events".to_string(),
                column_name: "id".to_string(),
                sub_batch_size: 5,
                job_arguments: vec![],
            })
            .await
            .unwrap();
        assert_eq!(report.rows_processed, Some(10));
    }
}
