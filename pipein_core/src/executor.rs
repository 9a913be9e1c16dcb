use crate::harness::{Harness, IterationOutcome};
use crate::input::Input;
use crate::provisioner::PreparedInput;
use std::panic::{AssertUnwindSafe, catch_unwind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    Ok,
    /// One or more entry points returned an error.
    TargetError(String),
    /// The input could not be delivered; the next one may be fine.
    Skipped(String),
    /// The harness itself could not set up the iteration.
    SetupFailed(String),
    Crash(String),
}

pub trait Executor<I: Input> {
    fn execute_sync(&mut self, input: &I) -> ExecutionStatus;
}

/// Runs inputs through a [`Harness`] in-process, turning panics into
/// [`ExecutionStatus::Crash`] instead of letting them reach the caller.
///
/// Fatal setup errors are reported as [`ExecutionStatus::SetupFailed`]
/// rather than terminating the process.
pub struct StdinExecutor {
    harness: Harness,
    last_prepared: Option<PreparedInput>,
}

impl StdinExecutor {
    pub fn new(harness: Harness) -> Self {
        Self {
            harness,
            last_prepared: None,
        }
    }

    pub fn harness(&self) -> &Harness {
        &self.harness
    }

    /// Channel details of the most recent input that reached the target.
    pub fn last_prepared(&self) -> Option<PreparedInput> {
        self.last_prepared
    }
}

impl<I: Input> Executor<I> for StdinExecutor {
    fn execute_sync(&mut self, input: &I) -> ExecutionStatus {
        self.last_prepared = None;
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.harness.run_iteration(input.as_bytes())
        }));

        if let Ok(Ok(IterationOutcome::Completed(report))) = &result {
            self.last_prepared = Some(report.prepared);
        }

        match result {
            Ok(Ok(IterationOutcome::Completed(report))) if report.target_errors.is_empty() => {
                ExecutionStatus::Ok
            }
            Ok(Ok(IterationOutcome::Completed(report))) => ExecutionStatus::TargetError(
                report
                    .target_errors
                    .iter()
                    .map(|e| format!("{}: {}", e.entry, e.message))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            Ok(Ok(IterationOutcome::Skipped(e))) => ExecutionStatus::Skipped(e.to_string()),
            Ok(Err(e)) => ExecutionStatus::SetupFailed(e.to_string()),
            Err(panic_payload) => {
                let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic type".to_string()
                };
                ExecutionStatus::Crash(msg)
            }
        }
    }
}
