//! ---
//! devs_section: "01-common"
//! devs_subsection: "module"
//! devs_type: "source"
//! devs_scope: "code"
//! devs_description: "Shared primitives for the composition kernel."
//! devs_version: "v0.1.0"
//! devs_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::logging::LogFormat;

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_file_prefix() -> String {
    "devs".to_owned()
}

fn default_filter() -> String {
    "info".to_owned()
}

fn default_cycle_policy() -> CyclePolicy {
    CyclePolicy::Warn
}

/// Primary configuration object for a kernel run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
}

/// Metadata describing where a [`KernelConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedKernelConfig {
    pub config: KernelConfig,
    pub source: PathBuf,
}

impl KernelConfig {
    pub const ENV_CONFIG_PATH: &str = "DEVS_KERNEL_CONFIG";

    /// Load configuration from disk, respecting the `DEVS_KERNEL_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedKernelConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedKernelConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedKernelConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Load a configuration file from an explicit path.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading kernel configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<KernelConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.logging.validate()
    }
}

impl std::str::FromStr for KernelConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: KernelConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for the rolling log file. Stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    /// Filter directive used when neither `DEVS_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_filter")]
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            format: default_log_format(),
            file_prefix: default_file_prefix(),
            default_filter: default_filter(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.file_prefix.trim().is_empty() {
            return Err(anyhow!("logging.file_prefix must not be empty"));
        }
        if self.default_filter.trim().is_empty() {
            return Err(anyhow!("logging.default_filter must not be empty"));
        }
        Ok(())
    }
}

/// How coupled models treat internal coupling cycles when they are sealed.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CyclePolicy {
    /// Skip the check entirely.
    Allow,
    /// Log a warning naming a model on the cycle.
    #[default]
    Warn,
    /// Abort model construction.
    Reject,
}

impl std::str::FromStr for CyclePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(CyclePolicy::Allow),
            "warn" => Ok(CyclePolicy::Warn),
            "reject" => Ok(CyclePolicy::Reject),
            other => Err(format!("unknown cycle policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_cycle_policy")]
    pub cycle_policy: CyclePolicy,
    /// Log every delivery at debug level instead of trace.
    #[serde(default)]
    pub trace_deliveries: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            cycle_policy: default_cycle_policy(),
            trace_deliveries: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Broadcast an atomic model's declared state after every successful delivery.
    #[serde(default)]
    pub report_after_delivery: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: KernelConfig = "".parse().expect("empty config parses");
        assert_eq!(config, KernelConfig::default());
        assert_eq!(config.routing.cycle_policy, CyclePolicy::Warn);
        assert!(!config.reporting.report_after_delivery);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn parses_all_sections() {
        let config: KernelConfig = r#"
            [logging]
            directory = "target/test-logs"
            format = "structured-json"
            file_prefix = "sim"
            default_filter = "debug"

            [routing]
            cycle_policy = "reject"
            trace_deliveries = true

            [reporting]
            report_after_delivery = true
        "#
        .parse()
        .expect("config parses");

        assert_eq!(
            config.logging.directory.as_deref(),
            Some(Path::new("target/test-logs"))
        );
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
        assert_eq!(config.routing.cycle_policy, CyclePolicy::Reject);
        assert!(config.routing.trace_deliveries);
        assert!(config.reporting.report_after_delivery);
    }

    #[test]
    fn rejects_blank_prefix() {
        let err = "[logging]\nfile_prefix = \"  \"\n"
            .parse::<KernelConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("file_prefix"));
    }

    #[test]
    fn load_uses_first_existing_candidate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("kernel.toml");
        fs::write(&present, "[routing]\ncycle_policy = \"allow\"\n").expect("write config");

        let loaded = KernelConfig::load_with_source(&[missing, present.clone()])
            .expect("config loads");
        assert_eq!(loaded.source, present);
        assert_eq!(loaded.config.routing.cycle_policy, CyclePolicy::Allow);
    }

    #[test]
    fn cycle_policy_from_str() {
        assert_eq!("Reject".parse::<CyclePolicy>(), Ok(CyclePolicy::Reject));
        assert!("sometimes".parse::<CyclePolicy>().is_err());
    }
}
