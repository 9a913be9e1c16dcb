use crate::channel::SetupError;
use crate::config::{BindingMode, HarnessConfig};
use crate::entry::EntryPoint;
use crate::provisioner::{ChannelProvisioner, PreparedInput, ProvisionerState};
use crate::samples;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("entry point '{0}' reads standard input directly and needs rebind mode")]
    BindingRequired(String),
    #[error("unknown entry point '{0}'")]
    UnknownEntryPoint(String),
}

/// A recoverable error an entry point returned during an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetError {
    pub entry: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub prepared: PreparedInput,
    pub entries_run: usize,
    pub target_errors: Vec<TargetError>,
}

#[derive(Debug)]
pub enum IterationOutcome {
    Completed(IterationReport),
    /// Setup failed in a way that only spoils this input.
    Skipped(SetupError),
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, IterationOutcome::Completed(r) if r.target_errors.is_empty())
    }

    pub fn report(&self) -> Option<&IterationReport> {
        match self {
            IterationOutcome::Completed(report) => Some(report),
            IterationOutcome::Skipped(_) => None,
        }
    }
}

/// Feeds one buffer per iteration to the system under test through its
/// standard input.
pub struct Harness {
    provisioner: ChannelProvisioner,
    entries: Vec<Box<dyn EntryPoint>>,
    fatal_exit_code: i32,
}

impl Harness {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            provisioner: ChannelProvisioner::new(
                config.harness.binding,
                config.harness.oversize,
            ),
            entries: Vec::new(),
            fatal_exit_code: config.harness.fatal_exit_code,
        }
    }

    /// Builds a harness running the configured sample entry points.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, HarnessError> {
        let mut harness = Self::new(config);
        for name in &config.target.entry_points {
            let entry = samples::sample_entry(name)
                .ok_or_else(|| HarnessError::UnknownEntryPoint(name.clone()))?;
            harness.add_boxed_entry(entry)?;
        }
        Ok(harness)
    }

    /// Appends an entry point; entry points run in the order they were added.
    pub fn add_entry(&mut self, entry: impl EntryPoint + 'static) -> Result<(), HarnessError> {
        self.add_boxed_entry(Box::new(entry))
    }

    pub fn add_boxed_entry(&mut self, entry: Box<dyn EntryPoint>) -> Result<(), HarnessError> {
        if entry.reads_global_stdin() && self.provisioner.binding() != BindingMode::Rebind {
            return Err(HarnessError::BindingRequired(entry.name().to_string()));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn entry_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    pub fn state(&self) -> ProvisionerState {
        self.provisioner.state()
    }

    /// Runs one iteration: prepare, every entry point in order, teardown.
    ///
    /// Teardown happens on every path, including a panic unwinding out of an
    /// entry point. `Err` is returned only for fatal setup errors.
    pub fn run_iteration(&mut self, data: &[u8]) -> Result<IterationOutcome, SetupError> {
        let mut iteration = match self.provisioner.scoped(data) {
            Ok(iteration) => iteration,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, len = data.len(), "skipping iteration");
                return Ok(IterationOutcome::Skipped(e));
            }
        };
        let prepared = iteration.prepared();

        let entries = &mut self.entries;
        let target_errors = iteration.invoke(|stdin| {
            let mut errors = Vec::new();
            for entry in entries.iter_mut() {
                if let Err(e) = entry.invoke(&mut *stdin) {
                    debug!(entry = entry.name(), error = %e, "entry point returned an error");
                    errors.push(TargetError {
                        entry: entry.name().to_string(),
                        message: format!("{e:#}"),
                    });
                }
            }
            errors
        });
        drop(iteration);

        Ok(IterationOutcome::Completed(IterationReport {
            prepared,
            entries_run: self.entries.len(),
            target_errors,
        }))
    }

    /// Driver-facing entry point: runs one iteration and returns 0.
    ///
    /// A fatal setup error terminates the process with the configured exit
    /// code, since carrying on would feed the target garbage input.
    pub fn run_one(&mut self, data: &[u8]) -> i32 {
        match self.run_iteration(data) {
            Ok(outcome) => {
                debug!(success = outcome.is_success(), "iteration finished");
                0
            }
            Err(e) => {
                error!(error = %e, "unrecoverable harness setup failure");
                std::process::exit(self.fatal_exit_code);
            }
        }
    }
}

impl std::fmt::Debug for Harness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("provisioner", &self.provisioner)
            .field("entries", &self.entry_names())
            .field("fatal_exit_code", &self.fatal_exit_code)
            .finish()
    }
}
