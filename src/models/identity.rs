//! # Migration Identity
//!
//! The (job class, table, column, job arguments) tuple that names one
//! configured migration. Enqueue deduplicates on it and every lookup made by
//! deploy-time code (finalize, delete, health gate) goes through it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identity key of a batched migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationIdentity {
    pub job_class_name: String,
    pub table_name: String,
    pub column_name: String,
    pub job_arguments: Vec<Value>,
}

impl MigrationIdentity {
    pub fn new(
        job_class_name: impl Into<String>,
        table_name: impl Into<String>,
        column_name: impl Into<String>,
        job_arguments: Vec<Value>,
    ) -> Self {
        Self {
            job_class_name: job_class_name.into(),
            table_name: table_name.into(),
            column_name: column_name.into(),
            job_arguments,
        }
    }

    /// Job arguments as the JSON array stored in the database
    pub fn job_arguments_value(&self) -> Value {
        Value::Array(self.job_arguments.clone())
    }

    /// Compact JSON rendering of the job arguments
    pub fn job_arguments_json(&self) -> String {
        self.job_arguments_value().to_string()
    }

    /// Copy-pasteable manual finalize invocation for this migration.
    ///
    /// Commas inside the JSON arguments are escaped so the bracketed argument
    /// list survives shell-style task argument parsing.
    pub fn remediation_command(&self, command_prefix: &str) -> String {
        format!(
            "{}[{},{},{},'{}']",
            command_prefix,
            self.job_class_name,
            self.table_name,
            self.column_name,
            self.job_arguments_json().replace(',', "\\,")
        )
    }
}

impl fmt::Display for MigrationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job_class_name: {}, table_name: {}, column_name: {}, job_arguments: {}",
            self.job_class_name,
            self.table_name,
            self.column_name,
            self.job_arguments_json()
        )
    }
}
