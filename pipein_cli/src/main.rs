use pipein_core::config::{HarnessConfig, LoggingSettings};
use pipein_core::executor::{ExecutionStatus, Executor, StdinExecutor};
use pipein_core::harness::Harness;
use pipein_core::{BindingMode, OversizePolicy, default_pipe_capacity};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_CONFIG_FILE: &str = "pipein.toml";

#[derive(Parser, Debug)]
#[clap(author, version, about = "Feed fuzz inputs to a target through its standard input", long_about = None)]
struct Cli {
    #[clap(short, long, value_parser, global = true)]
    config_file: Option<PathBuf>,
    /// Log filter, e.g. "debug" or "pipein_core=trace". RUST_LOG still wins.
    #[clap(long, global = true)]
    log_level: Option<String>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run input files through the configured entry points, one iteration each.
    Replay {
        /// Input files or directories of input files.
        #[clap(required = true)]
        inputs: Vec<PathBuf>,
        #[clap(long, value_enum)]
        binding: Option<CliBinding>,
        #[clap(long, value_enum)]
        oversize: Option<CliOversize>,
        /// Entry point names, in invocation order. Overrides the config file.
        #[clap(short, long = "entry", value_delimiter = ',')]
        entries: Vec<String>,
        /// Print one JSON object per input instead of text.
        #[clap(long)]
        json: bool,
    },
    /// Print the default pipe capacity, the largest input delivered whole
    /// under the truncate policy.
    Capacity,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliBinding {
    Rebind,
    Threaded,
}

impl From<CliBinding> for BindingMode {
    fn from(value: CliBinding) -> Self {
        match value {
            CliBinding::Rebind => BindingMode::Rebind,
            CliBinding::Threaded => BindingMode::Threaded,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CliOversize {
    Truncate,
    Reject,
    Grow,
}

impl From<CliOversize> for OversizePolicy {
    fn from(value: CliOversize) -> Self {
        match value {
            CliOversize::Truncate => OversizePolicy::Truncate,
            CliOversize::Reject => OversizePolicy::Reject,
            CliOversize::Grow => OversizePolicy::Grow,
        }
    }
}

#[derive(Serialize, Debug)]
struct ReplayRecord {
    path: PathBuf,
    md5: String,
    requested: usize,
    delivered: Option<usize>,
    status: &'static str,
    detail: Option<String>,
}

impl ReplayRecord {
    fn new(path: &Path, data: &[u8], status: &ExecutionStatus, delivered: Option<usize>) -> Self {
        let (status, detail) = match status {
            ExecutionStatus::Ok => ("ok", None),
            ExecutionStatus::TargetError(d) => ("target-error", Some(d.clone())),
            ExecutionStatus::Skipped(d) => ("skipped", Some(d.clone())),
            ExecutionStatus::SetupFailed(d) => ("setup-failed", Some(d.clone())),
            ExecutionStatus::Crash(d) => ("crash", Some(d.clone())),
        };
        Self {
            path: path.to_path_buf(),
            md5: format!("{:x}", md5::compute(data)),
            requested: data.len(),
            delivered,
            status,
            detail,
        }
    }

    fn to_text(&self) -> String {
        let delivered = self
            .delivered
            .map_or_else(|| "-".to_string(), |d| d.to_string());
        let mut line = format!(
            "{} {} {}/{} {}",
            self.path.display(),
            self.md5,
            delivered,
            self.requested,
            self.status
        );
        if let Some(detail) = &self.detail {
            line.push_str(": ");
            line.push_str(detail);
        }
        line
    }
}

fn load_config(config_file: Option<&Path>) -> Result<HarnessConfig, anyhow::Error> {
    match config_file {
        Some(config_path) => HarnessConfig::load_from_file(config_path),
        None => {
            let default_config_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_config_path.exists() {
                HarnessConfig::load_from_file(&default_config_path)
            } else {
                Ok(HarnessConfig::default())
            }
        }
    }
}

fn init_tracing(settings: &LoggingSettings, level_override: Option<&str>) -> Result<(), anyhow::Error> {
    let level = level_override.unwrap_or(&settings.level);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(env_filter);

    // Logs go to stderr; stdout carries replay results.
    let result = if settings.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialise logging: {e}"))
}

/// Expands directories into the files directly inside them, sorted by name.
fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(path)
                .with_context(|| format!("Failed to list input directory {path:?}"))?
            {
                let file_path = entry?.path();
                if file_path.is_file() {
                    entries.push(file_path);
                }
            }
            entries.sort();
            files.extend(entries);
        } else {
            anyhow::bail!("Input path {path:?} does not exist");
        }
    }
    Ok(files)
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ReplaySummary {
    executions: usize,
    target_errors: usize,
    skipped: usize,
    crashes: usize,
}

fn replay(
    config: &HarnessConfig,
    inputs: &[PathBuf],
    json: bool,
    out: &mut dyn Write,
) -> Result<ReplaySummary, anyhow::Error> {
    let harness = Harness::from_config(config)?;
    debug!(?harness, "harness ready");
    let mut executor = StdinExecutor::new(harness);
    let files = collect_inputs(inputs)?;
    let mut summary = ReplaySummary::default();

    for path in &files {
        let data = std::fs::read(path).with_context(|| format!("Failed to read input {path:?}"))?;
        let status = executor.execute_sync(&data);
        summary.executions += 1;

        let delivered = executor.last_prepared().map(|p| p.delivered);
        let record = ReplayRecord::new(path, &data, &status, delivered);
        if json {
            writeln!(out, "{}", serde_json::to_string(&record)?)?;
        } else {
            writeln!(out, "{}", record.to_text())?;
        }

        match status {
            ExecutionStatus::Ok => {}
            ExecutionStatus::TargetError(_) => summary.target_errors += 1,
            ExecutionStatus::Skipped(reason) => {
                warn!(?path, %reason, "input skipped");
                summary.skipped += 1;
            }
            ExecutionStatus::Crash(_) => summary.crashes += 1,
            ExecutionStatus::SetupFailed(reason) => {
                anyhow::bail!("Harness setup failed on {path:?}: {reason}");
            }
        }
    }
    Ok(summary)
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config_file.as_deref())?;
    init_tracing(&config.logging, cli.log_level.as_deref())?;

    match cli.command {
        Command::Capacity => {
            println!("{}", default_pipe_capacity()?);
        }
        Command::Replay {
            inputs,
            binding,
            oversize,
            entries,
            json,
        } => {
            if let Some(binding) = binding {
                config.harness.binding = binding.into();
            }
            if let Some(oversize) = oversize {
                config.harness.oversize = oversize.into();
            }
            if !entries.is_empty() {
                config.target.entry_points = entries;
            }
            debug!(?config, "effective configuration");

            let start_time = Instant::now();
            let summary = replay(&config, &inputs, json, &mut std::io::stdout().lock())?;
            info!(
                executions = summary.executions,
                target_errors = summary.target_errors,
                skipped = summary.skipped,
                crashes = summary.crashes,
                elapsed = ?start_time.elapsed(),
                "replay finished"
            );
        }
    }

    Ok(())
}
