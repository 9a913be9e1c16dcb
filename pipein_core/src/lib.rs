//! Delivers a fuzzer-supplied buffer to a target through its standard input.
//!
//! Each iteration writes the buffer into a fresh pipe, makes the read end
//! non-blocking, binds it onto descriptor 0, runs the target's entry points
//! and releases every descriptor again.

pub mod binding;
pub mod channel;
pub mod config;
pub mod entry;
pub mod executor;
pub mod harness;
pub mod input;
pub mod provisioner;
pub mod samples;

pub use binding::RawStdin;
pub use channel::{ByteChannel, ChannelEnd, SetupError, default_pipe_capacity};
pub use config::{BindingMode, HarnessConfig, OversizePolicy};
pub use entry::{EntryPoint, FnEntry, GlobalStdinEntry};
pub use executor::{ExecutionStatus, Executor, StdinExecutor};
pub use harness::{Harness, HarnessError, IterationOutcome, IterationReport, TargetError};
pub use input::Input;
pub use provisioner::{ChannelProvisioner, Iteration, PreparedInput, ProvisionerState};
