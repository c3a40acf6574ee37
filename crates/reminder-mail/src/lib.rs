//! Outbound transports for reminder emails.
//!
//! `http` posts each message as JSON to a mail API; `outbox` drops one JSON file
//! per message into a directory for another process (or a test) to pick up.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use reminder_core::{Mailer, OutboundEmail, ReminderError};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use ulid::Ulid;

pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MailTransport {
    #[default]
    Http,
    Outbox,
}

impl MailTransport {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Outbox => "outbox",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Sender {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Resolved mail settings after file, environment, and flag layering.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MailSettings {
    pub transport: MailTransport,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub outbox_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

fn required(value: Option<&str>, what: &str, transport: MailTransport) -> Result<String, ReminderError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ReminderError::Config(format!("{what} is required for the {} mail transport", transport.as_str()))
        })
}

impl MailSettings {
    fn sender(&self) -> Result<Sender, ReminderError> {
        let email = required(Some(self.from_address.as_str()), "mail.from_address", self.transport)?;
        Ok(Sender { email, name: self.from_name.clone().filter(|name| !name.trim().is_empty()) })
    }

    /// Build the configured transport, failing on any missing required setting.
    ///
    /// # Errors
    /// Returns [`ReminderError::Config`] when the sender, endpoint, api key, or outbox
    /// directory required by the chosen transport is missing, or the outbox cannot be created.
    pub fn build_mailer(&self) -> Result<ConfiguredMailer, ReminderError> {
        let sender = self.sender()?;
        match self.transport {
            MailTransport::Http => {
                let endpoint = required(self.endpoint.as_deref(), "mail.endpoint", self.transport)?;
                let api_key = required(self.api_key.as_deref(), "mail.api_key", self.transport)?;
                let timeout = Duration::from_secs(self.timeout_secs.max(1));
                Ok(ConfiguredMailer::Http(HttpMailer::new(endpoint, api_key, sender, timeout)))
            }
            MailTransport::Outbox => {
                let dir = self.outbox_dir.as_deref().ok_or_else(|| {
                    ReminderError::Config("mail.outbox_dir is required for the outbox mail transport".to_string())
                })?;
                OutboxMailer::create(dir, sender)
                    .map(ConfiguredMailer::Outbox)
                    .map_err(|err| ReminderError::Config(format!("{err:#}")))
            }
        }
    }
}

/// Wire body posted to the mail API.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MailApiPayload {
    pub from: Sender,
    pub to: Vec<Sender>,
    pub subject: String,
    pub text: String,
    pub html: String,
}

impl MailApiPayload {
    #[must_use]
    pub fn new(sender: &Sender, email: &OutboundEmail) -> Self {
        Self {
            from: sender.clone(),
            to: vec![Sender { email: email.to.clone(), name: email.to_name.clone() }],
            subject: email.subject.clone(),
            text: email.text_body.clone(),
            html: email.html_body.clone(),
        }
    }
}

pub struct HttpMailer {
    endpoint: String,
    api_key: String,
    sender: Sender,
    agent: ureq::Agent,
}

impl HttpMailer {
    #[must_use]
    pub fn new(endpoint: String, api_key: String, sender: Sender, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .build();
        Self { endpoint, api_key, sender, agent }
    }
}

impl Mailer for HttpMailer {
    fn deliver(&self, email: &OutboundEmail) -> Result<(), ReminderError> {
        let payload = MailApiPayload::new(&self.sender, email);
        let result = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .set("User-Agent", concat!("remind/", env!("CARGO_PKG_VERSION")))
            .send_json(&payload);

        match result {
            Ok(response) => {
                debug!(to = %email.to, status = response.status(), "mail API accepted message");
                Ok(())
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let body = body.trim();
                Err(ReminderError::Delivery(if body.is_empty() {
                    format!("mail API returned HTTP {code}")
                } else {
                    format!("mail API returned HTTP {code}: {body}")
                }))
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(ReminderError::Delivery(format!("mail API unreachable: {transport}")))
            }
        }
    }
}

/// One file written by [`OutboxMailer`].
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct OutboxMessage {
    pub message_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub queued_at: OffsetDateTime,
    pub from: Sender,
    pub email: OutboundEmail,
}

pub struct OutboxMailer {
    dir: PathBuf,
    sender: Sender,
}

impl OutboxMailer {
    /// Use `dir` as the outbox, creating it when missing.
    ///
    /// # Errors
    /// Returns an error when the directory cannot be created.
    pub fn create(dir: &Path, sender: Sender) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create outbox directory {}", dir.display()))?;
        Ok(Self { dir: dir.to_path_buf(), sender })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_message(&self, email: &OutboundEmail) -> Result<PathBuf> {
        let message = OutboxMessage {
            message_id: Ulid::new().to_string(),
            queued_at: OffsetDateTime::now_utc(),
            from: self.sender.clone(),
            email: email.clone(),
        };
        let path = self.dir.join(format!("{}.json", message.message_id));
        let bytes = serde_json::to_vec_pretty(&message).context("failed to serialize outbox message")?;
        fs::write(&path, bytes)
            .with_context(|| format!("failed to write outbox message {}", path.display()))?;
        Ok(path)
    }
}

impl Mailer for OutboxMailer {
    fn deliver(&self, email: &OutboundEmail) -> Result<(), ReminderError> {
        let path = self
            .write_message(email)
            .map_err(|err| ReminderError::Delivery(format!("{err:#}")))?;
        debug!(to = %email.to, path = %path.display(), "queued message in outbox");
        Ok(())
    }
}

/// The transport selected by configuration.
pub enum ConfiguredMailer {
    Http(HttpMailer),
    Outbox(OutboxMailer),
}

impl Mailer for ConfiguredMailer {
    fn deliver(&self, email: &OutboundEmail) -> Result<(), ReminderError> {
        match self {
            Self::Http(mailer) => mailer.deliver(email),
            Self::Outbox(mailer) => mailer.deliver(email),
        }
    }
}

/// Read every message currently sitting in an outbox directory, oldest first.
///
/// # Errors
/// Returns an error when the directory or a message file cannot be read or decoded.
pub fn read_outbox(dir: &Path) -> Result<Vec<OutboxMessage>> {
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("failed to read outbox directory {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to list outbox directory {}", dir.display()))?;
    paths.retain(|path| path.extension().is_some_and(|ext| ext == "json"));
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read outbox message {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to decode outbox message {}", path.display()))
        })
        .collect()
}
