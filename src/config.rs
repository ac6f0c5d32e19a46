use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "RMWATCH_CONFIG";

/// Config file picked up from the current directory when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "rmwatch.toml";

/// Placeholders substituted into backend argument templates
pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Upper bound for `watch.delay_secs` and `shutdown.timeout_secs` (one day)
pub const MAX_DURATION_SECS: f64 = 86_400.0;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Watcher behaviour
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Quiet period a path must observe before it is converted.
    #[serde(default = "default_delay_secs")]
    pub delay_secs: f64,
    #[serde(default = "default_true")]
    pub recursive: bool,
    /// Convert stale notebooks found under the roots at daemon startup.
    #[serde(default = "default_true")]
    pub catch_up: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_delay_secs(),
            recursive: true,
            catch_up: true,
        }
    }
}

/// Where and how PDFs are produced
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Parent for per-conversion temporary directories (system temp when unset).
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    /// PDFs at or below this size are blank pages and are discarded. 0 disables.
    #[serde(default = "default_blank_pdf_threshold")]
    pub blank_pdf_threshold: u64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            staging_dir: None,
            blank_pdf_threshold: default_blank_pdf_threshold(),
        }
    }
}

/// External converter commands
#[derive(Debug, Clone, Deserialize)]
pub struct BackendsConfig {
    #[serde(default = "default_v6_backend")]
    pub v6: BackendCommand,
    #[serde(default = "default_legacy_backend")]
    pub legacy: BackendCommand,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            v6: default_v6_backend(),
            legacy: default_legacy_backend(),
        }
    }
}

/// A program plus its argument template
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// What happens to running conversions when the watcher is stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InFlightPolicy {
    /// Let running conversions complete, refuse new ones.
    #[default]
    Finish,
    /// Terminate running conversions and discard their output.
    Abandon,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default)]
    pub in_flight: InFlightPolicy,
    /// Hard limit on how long `finish` may wait before aborting.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_delay_secs() -> f64 {
    1.0
}

fn default_blank_pdf_threshold() -> u64 {
    // rmc + Inkscape output for an empty page is 2-3 KB; any stroke pushes it past 20 KB
    10_000
}

fn default_v6_backend() -> BackendCommand {
    BackendCommand {
        program: "rmc".to_string(),
        args: vec![
            INPUT_PLACEHOLDER.to_string(),
            "-o".to_string(),
            OUTPUT_PLACEHOLDER.to_string(),
        ],
    }
}

fn default_legacy_backend() -> BackendCommand {
    BackendCommand {
        program: "rm2pdf".to_string(),
        args: vec![INPUT_PLACEHOLDER.to_string(), OUTPUT_PLACEHOLDER.to_string()],
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration.
    ///
    /// Loads environment variables from a .env file (if present) first.
    /// Looks for a config file in this order:
    /// 1. `explicit` (the `--config` flag)
    /// 2. Path in the RMWATCH_CONFIG environment variable
    /// 3. ./rmwatch.toml in the current directory
    ///
    /// Falls back to built-in defaults when none of them exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var(CONFIG_ENV) {
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => {
                    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                    local.exists().then_some(local)
                }
            },
        };

        let config = match config_path {
            Some(path) => {
                let config_str = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                Self::from_toml(&config_str)
                    .with_context(|| format!("Failed to parse {}", path.display()))?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without validating it.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !is_valid_duration(self.watch.delay_secs) {
            anyhow::bail!(
                "watch.delay_secs must be between 0 and {} seconds, got {}",
                MAX_DURATION_SECS,
                self.watch.delay_secs
            );
        }

        if let Some(timeout) = self.shutdown.timeout_secs {
            if !is_valid_duration(timeout) {
                anyhow::bail!(
                    "shutdown.timeout_secs must be between 0 and {} seconds, got {}",
                    MAX_DURATION_SECS,
                    timeout
                );
            }
        }

        for (name, backend) in [("v6", &self.backends.v6), ("legacy", &self.backends.legacy)] {
            if backend.program.trim().is_empty() {
                anyhow::bail!("backends.{}.program must not be empty", name);
            }
            for placeholder in [INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER] {
                if !backend.args.iter().any(|a| a.contains(placeholder)) {
                    anyhow::bail!("backends.{}.args must contain {}", name, placeholder);
                }
            }
        }

        Ok(())
    }

    /// Debounce delay as a Duration
    pub fn delay(&self) -> Duration {
        to_duration(self.watch.delay_secs)
    }

    /// Hard shutdown timeout, if one is configured
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown.timeout_secs.map(to_duration)
    }
}

fn is_valid_duration(secs: f64) -> bool {
    (0.0..=MAX_DURATION_SECS).contains(&secs) && Duration::try_from_secs_f64(secs).is_ok()
}

/// Seconds to a Duration, clamped to `[0, MAX_DURATION_SECS]`; NaN becomes zero.
fn to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_DURATION_SECS)).unwrap_or_default()
}
