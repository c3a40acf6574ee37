use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use reminder_mail::{MailSettings, MailTransport, DEFAULT_TIMEOUT_SECS};
use serde::Deserialize;

pub const DEFAULT_DATABASE: &str = "./reminders.sqlite3";
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Optional YAML configuration file. Every field can be overridden by a flag or
/// environment variable.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub database: Option<PathBuf>,
    pub log_filter: Option<String>,
    #[serde(default)]
    pub mail: MailFileConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MailFileConfig {
    pub transport: Option<MailTransport>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub outbox_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Load the config file at `path`, or an empty config when no path is given.
    ///
    /// # Errors
    /// Returns an error when the file cannot be read or is not valid config YAML.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// # Errors
    /// Returns an error when `raw` is not valid config YAML.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).context("failed to parse YAML config")
    }

    #[must_use]
    pub fn database(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.database.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE))
    }

    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().filter(|filter| !filter.trim().is_empty()).unwrap_or(DEFAULT_LOG_FILTER)
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TransportArg {
    Http,
    Outbox,
}

impl From<TransportArg> for MailTransport {
    fn from(value: TransportArg) -> Self {
        match value {
            TransportArg::Http => Self::Http,
            TransportArg::Outbox => Self::Outbox,
        }
    }
}

/// Mail settings given on the command line or through the environment.
#[derive(Debug, Clone, Default, Args)]
pub struct MailOverrides {
    #[arg(long = "mail-transport", env = "REMIND_MAIL_TRANSPORT", value_enum)]
    pub transport: Option<TransportArg>,
    #[arg(long = "mail-endpoint", env = "REMIND_MAIL_ENDPOINT")]
    pub endpoint: Option<String>,
    #[arg(long = "mail-api-key", env = "REMIND_MAIL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    #[arg(long = "mail-from", env = "REMIND_MAIL_FROM")]
    pub from_address: Option<String>,
    #[arg(long = "mail-from-name", env = "REMIND_MAIL_FROM_NAME")]
    pub from_name: Option<String>,
    #[arg(long = "outbox-dir", env = "REMIND_OUTBOX_DIR")]
    pub outbox_dir: Option<PathBuf>,
    #[arg(long = "mail-timeout-secs", env = "REMIND_MAIL_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,
}

/// Layer overrides on top of the file's mail section.
#[must_use]
pub fn resolve_mail_settings(file: &MailFileConfig, overrides: &MailOverrides) -> MailSettings {
    MailSettings {
        transport: overrides.transport.map(MailTransport::from).or(file.transport).unwrap_or_default(),
        endpoint: overrides.endpoint.clone().or_else(|| file.endpoint.clone()),
        api_key: overrides.api_key.clone().or_else(|| file.api_key.clone()),
        from_address: overrides
            .from_address
            .clone()
            .or_else(|| file.from_address.clone())
            .unwrap_or_default(),
        from_name: overrides.from_name.clone().or_else(|| file.from_name.clone()),
        outbox_dir: overrides.outbox_dir.clone().or_else(|| file.outbox_dir.clone()),
        timeout_secs: overrides.timeout_secs.or(file.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS),
    }
}
