//! Ordered failover across the mail exchangers of one domain

use mailroute_common::{Domain, tracing};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{
    dns::MailExchanger,
    domain_config::DomainConfigRegistry,
    error::{DeliveryError, PermanentError},
    smtp_transaction::{RecipientRejection, SmtpTransaction},
    types::{MailServer, SmtpTimeouts},
};

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Port dialled on every exchanger (default: 25)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Name sent with EHLO (default: `localhost`)
    #[serde(default = "default_helo_name")]
    pub helo_name: String,

    /// Accept invalid TLS certificates (default: false)
    ///
    /// **SECURITY WARNING**: only for testing against hosts with
    /// self-signed certificates. Can be overridden per domain.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default)]
    pub smtp_timeouts: SmtpTimeouts,

    /// Per-domain overrides, see [`crate::DomainConfig`]
    #[serde(default)]
    pub domains: DomainConfigRegistry,
}

const fn default_port() -> u16 {
    25
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            helo_name: default_helo_name(),
            accept_invalid_certs: false,
            smtp_timeouts: SmtpTimeouts::default(),
            domains: DomainConfigRegistry::default(),
        }
    }
}

/// The result of delivering one domain bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// The exchanger that completed the session.
    pub server: MailServer,
    /// Whether the session was upgraded with STARTTLS.
    pub tls: bool,
    pub accepted: Vec<String>,
    pub rejected: Vec<RecipientRejection>,
}

/// Delivers a message to the first exchanger of a domain that takes it.
#[derive(Debug, Clone, Default)]
pub struct SmtpDelivery {
    config: DeliveryConfig,
}

impl SmtpDelivery {
    #[must_use]
    pub const fn new(config: DeliveryConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// The fixed target configured for `domain`, bypassing MX resolution.
    #[must_use]
    pub fn mx_override(&self, domain: &Domain) -> Option<MailServer> {
        self.config
            .domains
            .get(domain.as_str())
            .and_then(|config| config.mx_override_server(self.config.port))
    }

    /// Delivery targets for resolved exchangers, keeping their order.
    #[must_use]
    pub fn targets(&self, exchangers: &[MailExchanger]) -> Vec<MailServer> {
        exchangers
            .iter()
            .map(|mx| MailServer::from_exchanger(mx, self.config.port))
            .collect()
    }

    /// Tries `servers` strictly in order and stops at the first one that
    /// completes a session.
    ///
    /// A session in which every recipient was refused still counts as
    /// complete; the refusals are in the returned report.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::AllExchangersFailed`] with the last host's error when
    /// no server completed a session, or the cancellation error as soon as
    /// shutdown interrupts an attempt.
    #[tracing::instrument(level = "info", skip_all, fields(domain = %domain))]
    pub async fn deliver(
        &self,
        domain: &Domain,
        servers: &[MailServer],
        sender: &str,
        recipients: &[String],
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport, DeliveryError> {
        let domain_config = self.config.domains.get(domain.as_str());
        let require_tls = domain_config.is_some_and(|c| c.require_tls);
        let accept_invalid_certs = domain_config
            .and_then(|c| c.accept_invalid_certs)
            .unwrap_or(self.config.accept_invalid_certs);

        let mut last_error = None;

        for server in servers {
            let result = SmtpTransaction::new(
                server,
                &self.config.helo_name,
                &self.config.smtp_timeouts,
                cancel,
            )
            .require_tls(require_tls)
            .accept_invalid_certs(accept_invalid_certs)
            .execute(sender, recipients, message)
            .await;

            match result {
                Ok(outcome) => {
                    tracing::info!(
                        "{} accepted {} of {} recipients for {domain} (tls: {})",
                        server.host,
                        outcome.accepted.len(),
                        recipients.len(),
                        outcome.tls
                    );
                    return Ok(DeliveryReport {
                        server: server.clone(),
                        tls: outcome.tls,
                        accepted: outcome.accepted,
                        rejected: outcome.rejected,
                    });
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Delivery to {} failed, trying next exchanger: {e}",
                        server.address()
                    );
                    last_error = Some(e);
                }
            }
        }

        let last = last_error
            .unwrap_or_else(|| PermanentError::NoMailServers(domain.to_string()).into());

        Err(DeliveryError::AllExchangersFailed {
            last: Box::new(last),
        })
    }
}
