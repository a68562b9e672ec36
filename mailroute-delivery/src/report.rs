//! Structured failure reports published to broadcast channels
//!
//! Two record shapes exist. Operational records describe infrastructure
//! problems (a failed MX lookup, a broken SMTP session) and go to the mail-log
//! channel. Delivery records describe the outcome for one address and go to
//! the delivery-status channel. The domain of a record is always taken from
//! an address, never passed in on its own.
//!
//! Reporting is fire-and-forget: a record that cannot be published is logged
//! locally and otherwise forgotten.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use mailroute_common::{Domain, internal};
use redis::{AsyncCommands, aio::MultiplexedConnection};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to encode log entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to publish log entry: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Alert,
    Crit,
    Error,
    Notice,
    Info,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    #[serde(rename = "MX Lookup Error")]
    MxLookupError,
    #[serde(rename = "SMTP Delivery Error")]
    SmtpDeliveryError,
}

/// An infrastructure-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalEntry {
    pub message: String,
    pub domain: Domain,
    pub timestamp: String,
    pub severity: Severity,
    pub event: Event,
}

/// The outcome of delivering to one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEntry {
    pub message: String,
    pub domain: Domain,
    pub timestamp: String,
    pub direction: Direction,
    pub status: DeliveryStatus,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Operational(OperationalEntry),
    Delivery(DeliveryEntry),
}

/// Which record to build, with the fields specific to that record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Operational { severity: Severity, event: Event },
    Delivery { direction: Direction, status: DeliveryStatus },
}

/// Names of the channels records are published to.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Operational records (default: `::channel_for_mail:logs`)
    #[serde(default = "default_mail_logs")]
    pub mail_logs: String,

    /// Delivery records (default: `::email:logs`)
    #[serde(default = "default_delivery_logs")]
    pub delivery_logs: String,
}

fn default_mail_logs() -> String {
    "::channel_for_mail:logs".to_string()
}

fn default_delivery_logs() -> String {
    "::email:logs".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mail_logs: default_mail_logs(),
            delivery_logs: default_delivery_logs(),
        }
    }
}

/// Broadcasts a serialized record on a named channel.
#[async_trait]
pub trait LogPublisher: Send + Sync + Debug {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), PublishError>;
}

/// Publishes with Redis `PUBLISH`.
#[derive(Clone)]
pub struct RedisPublisher {
    connection: MultiplexedConnection,
}

impl RedisPublisher {
    #[must_use]
    pub const fn new(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }
}

impl Debug for RedisPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPublisher").finish_non_exhaustive()
    }
}

#[async_trait]
impl LogPublisher for RedisPublisher {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), PublishError> {
        let mut connection = self.connection.clone();
        connection.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }
}

/// Builds records and hands them to a [`LogPublisher`].
#[derive(Debug, Clone)]
pub struct Reporter {
    publisher: Arc<dyn LogPublisher>,
    channels: ChannelConfig,
}

impl Reporter {
    #[must_use]
    pub fn new(publisher: Arc<dyn LogPublisher>, channels: ChannelConfig) -> Self {
        Self {
            publisher,
            channels,
        }
    }

    /// Builds the record for `kind` about `address` and publishes it.
    ///
    /// Never fails: an address without a domain, an encoding failure or a
    /// publish failure is logged locally.
    pub async fn report(&self, kind: ReportKind, address: &str, message: impl Into<String>) {
        let message = message.into();

        let Some(entry) = Self::entry(kind, address, message.clone()) else {
            internal!(
                level = WARN,
                "Dropping report about '{address}' without a domain: {message}"
            );
            return;
        };

        self.publish(entry).await;
    }

    /// Reports an infrastructure failure concerning `address`'s domain.
    pub async fn operational(
        &self,
        address: &str,
        severity: Severity,
        event: Event,
        message: impl Into<String>,
    ) {
        self.report(ReportKind::Operational { severity, event }, address, message)
            .await;
    }

    /// Reports a failed outbound delivery to `address`.
    pub async fn delivery(
        &self,
        address: &str,
        status: DeliveryStatus,
        message: impl Into<String>,
    ) {
        self.report(
            ReportKind::Delivery {
                direction: Direction::Outgoing,
                status,
            },
            address,
            message,
        )
        .await;
    }

    fn entry(kind: ReportKind, address: &str, message: String) -> Option<LogEntry> {
        let domain = Domain::of_address(address).ok()?;
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        Some(match kind {
            ReportKind::Operational { severity, event } => LogEntry::Operational(OperationalEntry {
                message,
                domain,
                timestamp,
                severity,
                event,
            }),
            ReportKind::Delivery { direction, status } => LogEntry::Delivery(DeliveryEntry {
                message,
                domain,
                timestamp,
                direction,
                status,
                email: address.to_string(),
            }),
        })
    }

    async fn publish(&self, entry: LogEntry) {
        let (channel, payload) = match &entry {
            LogEntry::Operational(entry) => {
                (&self.channels.mail_logs, serde_json::to_string(entry))
            }
            LogEntry::Delivery(entry) => {
                (&self.channels.delivery_logs, serde_json::to_string(entry))
            }
        };

        let result = match payload {
            Ok(payload) => self.publisher.publish(channel, payload).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            internal!(level = ERROR, "Unable to publish to {channel}: {e} ({entry:?})");
        }
    }
}
