//! # Registry
//!
//! Name-based resolution of the jobs that process migration batches.

pub mod job_registry;

pub use job_registry::{BatchArguments, BatchReport, JobRegistry, MigrationJob};
