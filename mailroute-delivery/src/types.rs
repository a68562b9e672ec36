//! Type definitions shared by the delivery client and its configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dns::MailExchanger;

/// SMTP operation timeout configuration
///
/// Configures timeout durations for various SMTP operations to prevent
/// hung connections and ensure timely failure detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// Timeout for initial connection establishment and the greeting
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// Timeout for EHLO commands
    ///
    /// Default: 30 seconds
    #[serde(default = "default_ehlo_timeout")]
    pub ehlo_secs: u64,

    /// Timeout for STARTTLS command and TLS upgrade
    ///
    /// Default: 30 seconds
    #[serde(default = "default_starttls_timeout")]
    pub starttls_secs: u64,

    /// Timeout for MAIL FROM command
    ///
    /// Default: 30 seconds
    #[serde(default = "default_mail_from_timeout")]
    pub mail_from_secs: u64,

    /// Timeout for each RCPT TO command
    ///
    /// Default: 30 seconds
    #[serde(default = "default_rcpt_to_timeout")]
    pub rcpt_to_secs: u64,

    /// Timeout for DATA command and message transmission
    ///
    /// Default: 120 seconds (2 minutes)
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    /// Timeout for QUIT command
    ///
    /// Default: 10 seconds
    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            ehlo_secs: default_ehlo_timeout(),
            starttls_secs: default_starttls_timeout(),
            mail_from_secs: default_mail_from_timeout(),
            rcpt_to_secs: default_rcpt_to_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

impl SmtpTimeouts {
    /// Applies the same timeout to every step. Mostly useful in tests.
    #[must_use]
    pub const fn uniform(secs: u64) -> Self {
        Self {
            connect_secs: secs,
            ehlo_secs: secs,
            starttls_secs: secs,
            mail_from_secs: secs,
            rcpt_to_secs: secs,
            data_secs: secs,
            quit_secs: secs,
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_ehlo_timeout() -> u64 {
    30
}

const fn default_starttls_timeout() -> u64 {
    30
}

const fn default_mail_from_timeout() -> u64 {
    30
}

const fn default_rcpt_to_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

/// The SMTP steps that carry their own deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpStep {
    Connect,
    Ehlo,
    StartTls,
    MailFrom,
    RcptTo,
    Data,
    Quit,
}

impl SmtpStep {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Ehlo => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::MailFrom => "MAIL FROM",
            Self::RcptTo => "RCPT TO",
            Self::Data => "DATA",
            Self::Quit => "QUIT",
        }
    }

    /// The deadline configured for this step.
    #[must_use]
    pub const fn timeout(self, timeouts: &SmtpTimeouts) -> Duration {
        Duration::from_secs(match self {
            Self::Connect => timeouts.connect_secs,
            Self::Ehlo => timeouts.ehlo_secs,
            Self::StartTls => timeouts.starttls_secs,
            Self::MailFrom => timeouts.mail_from_secs,
            Self::RcptTo => timeouts.rcpt_to_secs,
            Self::Data => timeouts.data_secs,
            Self::Quit => timeouts.quit_secs,
        })
    }
}

/// A concrete delivery target: an exchanger plus the port to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailServer {
    /// The hostname or IP address of the mail server.
    pub host: String,
    /// MX priority (lower value = higher priority).
    pub priority: u16,
    /// Port number (default: 25).
    pub port: u16,
}

impl MailServer {
    /// Creates a new mail server entry.
    #[must_use]
    pub const fn new(host: String, priority: u16, port: u16) -> Self {
        Self {
            host,
            priority,
            port,
        }
    }

    /// Targets a resolved exchanger on `port`.
    #[must_use]
    pub fn from_exchanger(exchanger: &MailExchanger, port: u16) -> Self {
        Self::new(exchanger.host.clone(), exchanger.priority, port)
    }

    /// Returns the full address as `host:port`.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = SmtpTimeouts::default();
        assert_eq!(SmtpStep::Connect.timeout(&timeouts), Duration::from_secs(30));
        assert_eq!(SmtpStep::Data.timeout(&timeouts), Duration::from_secs(120));
        assert_eq!(SmtpStep::Quit.timeout(&timeouts), Duration::from_secs(10));
    }

    #[test]
    fn test_mail_server_address() {
        let server = MailServer::from_exchanger(&MailExchanger::new("mx1.example.com", 10), 25);
        assert_eq!(server.address(), "mx1.example.com:25");
        assert_eq!(server.priority, 10);
    }
}
