use serde::Deserialize;
use std::path::Path;

/// How the channel's read end reaches the system under test.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BindingMode {
    /// Rebind descriptor 0 onto the read end; the reader is also lent to entry points.
    #[default]
    Rebind,
    /// Leave descriptor 0 alone and only lend the reader to entry points.
    Threaded,
}

/// What to do with inputs larger than the pipe can hold.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OversizePolicy {
    #[default]
    Truncate,
    Reject,
    Grow,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessSettings {
    #[serde(default)]
    pub binding: BindingMode,
    #[serde(default)]
    pub oversize: OversizePolicy,
    #[serde(default = "default_fatal_exit_code")]
    pub fatal_exit_code: i32,
}

pub fn default_fatal_exit_code() -> i32 {
    -1
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            binding: BindingMode::default(),
            oversize: OversizePolicy::default(),
            fatal_exit_code: default_fatal_exit_code(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    /// Entry point names, invoked in this order every iteration.
    #[serde(default = "default_entry_points")]
    pub entry_points: Vec<String>,
}

pub fn default_entry_points() -> Vec<String> {
    vec!["request-line".to_string(), "drain".to_string()]
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            entry_points: default_entry_points(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct HarnessConfig {
    #[serde(default)]
    pub harness: HarnessSettings,
    #[serde(default)]
    pub target: TargetSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl HarnessConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(config.harness.binding, BindingMode::Rebind);
        assert_eq!(config.harness.oversize, OversizePolicy::Truncate);
        assert_eq!(config.harness.fatal_exit_code, -1);
        assert_eq!(config.target.entry_points, vec!["request-line", "drain"]);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn parses_kebab_case_settings() {
        let config = HarnessConfig::from_toml_str(
            r#"
            [harness]
            binding = "threaded"
            oversize = "reject"
            fatal-exit-code = 3

            [target]
            entry-points = ["drain"]

            [logging]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.harness.binding, BindingMode::Threaded);
        assert_eq!(config.harness.oversize, OversizePolicy::Reject);
        assert_eq!(config.harness.fatal_exit_code, 3);
        assert_eq!(config.target.entry_points, vec!["drain"]);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = HarnessConfig::from_toml_str("[harness]\ntimeout-ms = 10\n").unwrap_err();
        assert!(err.to_string().contains("timeout-ms"));
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(HarnessConfig::from_toml_str("[harness]\noversize = \"chunk\"\n").is_err());
    }

    #[test]
    fn load_from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[harness]\noversize = \"grow\"").unwrap();
        let config = HarnessConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.harness.oversize, OversizePolicy::Grow);
    }

    #[test]
    fn load_from_missing_file_names_the_path() {
        let err = HarnessConfig::load_from_file(Path::new("/nonexistent/pipein.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pipein.toml"));
    }
}
