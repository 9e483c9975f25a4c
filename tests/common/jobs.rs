//! Scriptable [`MigrationJob`] used by the integration tests.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use batched_migrations::registry::{BatchArguments, BatchReport, MigrationJob};

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Records every batch it receives and fails on configured ranges
#[derive(Default)]
pub struct RecordingJob {
    calls: Mutex<Vec<BatchArguments>>,
    /// (start, end) -> remaining failures; `usize::MAX` fails forever
    failures: Mutex<HashMap<(i64, i64), usize>>,
    /// Runs inside the next call, before its result is returned
    hook: Mutex<Option<Hook>>,
    panics: Mutex<usize>,
    arity: Option<usize>,
}

impl fmt::Debug for RecordingJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingJob")
            .field("calls", &self.call_count())
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl RecordingJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arity(arity: usize) -> Self {
        Self {
            arity: Some(arity),
            ..Self::default()
        }
    }

    /// Fail the next `times` calls for exactly this range
    pub fn failing_on(self, start: i64, end: i64, times: usize) -> Self {
        self.failures.lock().insert((start, end), times);
        self
    }

    pub fn always_failing_on(self, start: i64, end: i64) -> Self {
        self.failing_on(start, end, usize::MAX)
    }

    /// Run `hook` while the next batch is in flight
    pub fn during_next_call<F, Fut>(self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.hook.lock() = Some(Box::new(move || hook().boxed()));
        self
    }

    /// Panic inside the next `times` calls
    pub fn panicking(self, times: usize) -> Self {
        *self.panics.lock() = times;
        self
    }

    pub fn calls(&self) -> Vec<BatchArguments> {
        self.calls.lock().clone()
    }

    pub fn ranges(&self) -> Vec<(i64, i64)> {
        self.calls
            .lock()
            .iter()
            .map(|call| (call.start_key, call.end_key))
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl MigrationJob for RecordingJob {
    async fn perform(&self, arguments: &BatchArguments) -> anyhow::Result<BatchReport> {
        self.calls.lock().push(arguments.clone());

        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook().await;
        }

        let panic_now = {
            let mut panics = self.panics.lock();
            let due = *panics > 0;
            if due {
                *panics -= 1;
            }
            due
        };
        if panic_now {
            panic!(
                "worker crashed in rows {}..={}",
                arguments.start_key, arguments.end_key
            );
        }

        let key = (arguments.start_key, arguments.end_key);
        let mut failures = self.failures.lock();
        if let Some(remaining) = failures.get_mut(&key) {
            if *remaining > 0 {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                return Err(anyhow!(
                    "deadlock detected while updating rows {}..={}",
                    arguments.start_key,
                    arguments.end_key
                ));
            }
        }

        Ok(BatchReport::rows(arguments.end_key - arguments.start_key + 1))
    }

    fn job_arguments_count(&self) -> Option<usize> {
        self.arity
    }
}
