//! SMTP transaction execution module
//!
//! One [`SmtpTransaction`] is one session against one mail exchanger:
//! - greeting and EHLO
//! - STARTTLS when the server offers it, then EHLO again
//! - MAIL FROM and one RCPT TO per recipient
//! - DATA and the message content
//! - QUIT
//!
//! Every network step runs under its own deadline and gives up as soon as
//! the cancellation token fires.

use std::future::Future;

use mailroute_common::tracing;
use mailroute_smtp::client::{ClientError, SmtpClient};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{DeliveryError, PermanentError, SystemError, TemporaryError},
    types::{MailServer, SmtpStep, SmtpTimeouts},
};

/// A recipient the server refused during RCPT TO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientRejection {
    pub recipient: String,
    pub code: u16,
    pub reason: String,
}

/// What a completed session achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub accepted: Vec<String>,
    pub rejected: Vec<RecipientRejection>,
    /// Whether the session ran over TLS.
    pub tls: bool,
}

/// Represents a single SMTP transaction against one mail server
pub struct SmtpTransaction<'a> {
    server: &'a MailServer,
    /// The name we introduce ourselves with in EHLO
    helo_name: &'a str,
    /// Whether a plaintext session is unacceptable
    require_tls: bool,
    /// Whether to accept invalid TLS certificates
    accept_invalid_certs: bool,
    smtp_timeouts: &'a SmtpTimeouts,
    cancel: &'a CancellationToken,
}

impl<'a> SmtpTransaction<'a> {
    #[must_use]
    pub const fn new(
        server: &'a MailServer,
        helo_name: &'a str,
        smtp_timeouts: &'a SmtpTimeouts,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            server,
            helo_name,
            require_tls: false,
            accept_invalid_certs: false,
            smtp_timeouts,
            cancel,
        }
    }

    #[must_use]
    pub const fn require_tls(mut self, require: bool) -> Self {
        self.require_tls = require;
        self
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Runs `operation` under the deadline of `step`, or until cancellation.
    async fn step<T>(
        &self,
        step: SmtpStep,
        operation: impl Future<Output = Result<T, ClientError>>,
    ) -> Result<T, DeliveryError> {
        let deadline = step.timeout(self.smtp_timeouts);

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SystemError::Cancelled.into()),
            result = tokio::time::timeout(deadline, operation) => match result {
                Ok(result) => result.map_err(DeliveryError::from),
                Err(_) => Err(TemporaryError::Timeout(format!(
                    "{} to {} timed out after {deadline:?}",
                    step.as_str(),
                    self.server.address()
                ))
                .into()),
            },
        }
    }

    /// Execute the complete SMTP transaction
    ///
    /// Recipients the server refuses are collected in the outcome rather than
    /// failing the session. When no recipient is accepted the session is
    /// closed without sending DATA.
    ///
    /// # Errors
    /// Returns an error if this server cannot take the message: connection,
    /// TLS, sender, DATA or transmission failure, a timeout, or cancellation.
    #[tracing::instrument(level = "info", skip_all, fields(server = %self.server.address()))]
    pub async fn execute(
        self,
        sender: &str,
        recipients: &[String],
        message: &str,
    ) -> Result<TransactionOutcome, DeliveryError> {
        if self.accept_invalid_certs {
            tracing::warn!(
                "SECURITY WARNING: TLS certificate validation is disabled for {}",
                self.server.host
            );
        }

        let mut client = self.connect_and_greet().await?;
        let tls = self.negotiate_tls(&mut client).await?;

        self.send_mail_from(&mut client, sender).await?;

        let (accepted, rejected) = self.send_rcpt_to(&mut client, recipients).await?;

        let outcome = TransactionOutcome {
            accepted,
            rejected,
            tls,
        };

        if outcome.accepted.is_empty() {
            tracing::info!("Every recipient was refused, closing without DATA");
            self.quit(&mut client).await;
            return Ok(outcome);
        }

        self.send_message_data(&mut client, message).await?;

        // The message is already accepted, so QUIT problems don't fail the delivery
        self.quit(&mut client).await;

        Ok(outcome)
    }

    /// Connect to the SMTP server and read its greeting
    async fn connect_and_greet(&self) -> Result<SmtpClient, DeliveryError> {
        let address = self.server.address();

        let mut client = self
            .step(
                SmtpStep::Connect,
                SmtpClient::connect(&address, self.server.host.clone()),
            )
            .await
            .map_err(|e| match e {
                DeliveryError::Temporary(TemporaryError::ConnectionFailed(reason)) => {
                    TemporaryError::ConnectionFailed(format!(
                        "Failed to connect to {address}: {reason}"
                    ))
                    .into()
                }
                other => other,
            })?
            .accept_invalid_certs(self.accept_invalid_certs);

        let greeting = self.step(SmtpStep::Connect, client.read_greeting()).await?;

        if !greeting.is_success() {
            return Err(TemporaryError::ServerBusy(format!(
                "{address} refused the session: {} {}",
                greeting.code,
                greeting.message()
            ))
            .into());
        }

        Ok(client)
    }

    /// EHLO, then STARTTLS and a second EHLO when the server offers it.
    ///
    /// Returns whether the session is now encrypted.
    async fn negotiate_tls(&self, client: &mut SmtpClient) -> Result<bool, DeliveryError> {
        let ehlo_response = self
            .step(SmtpStep::Ehlo, client.ehlo(self.helo_name))
            .await?;

        if !ehlo_response.is_success() {
            return Err(DeliveryError::from_response(
                "Server rejected EHLO",
                &ehlo_response,
            ));
        }

        if !ehlo_response.has_extension("STARTTLS") {
            if self.require_tls {
                return Err(PermanentError::TlsRequired(format!(
                    "{} does not offer STARTTLS",
                    self.server.host
                ))
                .into());
            }
            tracing::debug!(
                "{} does not offer STARTTLS, continuing in plaintext",
                self.server.host
            );
            return Ok(false);
        }

        let starttls_response = self
            .step(SmtpStep::StartTls, client.starttls())
            .await
            .map_err(|e| {
                if self.require_tls && !e.is_cancelled() {
                    PermanentError::TlsRequired(e.to_string()).into()
                } else {
                    e
                }
            })?;

        if !starttls_response.is_success() {
            if self.require_tls {
                return Err(PermanentError::TlsRequired(format!(
                    "Server rejected STARTTLS: {} {}",
                    starttls_response.code,
                    starttls_response.message()
                ))
                .into());
            }
            return Err(DeliveryError::from_response(
                "Server rejected STARTTLS",
                &starttls_response,
            ));
        }

        // Re-send EHLO after STARTTLS (RFC 3207)
        let ehlo_response = self
            .step(SmtpStep::Ehlo, client.ehlo(self.helo_name))
            .await?;

        if !ehlo_response.is_success() {
            return Err(DeliveryError::from_response(
                "Server rejected EHLO after STARTTLS",
                &ehlo_response,
            ));
        }

        tracing::debug!("TLS successfully negotiated via STARTTLS");
        Ok(true)
    }

    async fn send_mail_from(
        &self,
        client: &mut SmtpClient,
        sender: &str,
    ) -> Result<(), DeliveryError> {
        let mail_response = self
            .step(SmtpStep::MailFrom, client.mail_from(sender))
            .await?;

        if !mail_response.is_success() {
            return Err(DeliveryError::from_response(
                "Server rejected MAIL FROM",
                &mail_response,
            ));
        }

        Ok(())
    }

    /// Send RCPT TO for every recipient, sorting them into accepted and refused
    async fn send_rcpt_to(
        &self,
        client: &mut SmtpClient,
        recipients: &[String],
    ) -> Result<(Vec<String>, Vec<RecipientRejection>), DeliveryError> {
        let mut accepted = Vec::with_capacity(recipients.len());
        let mut rejected = Vec::new();

        for recipient in recipients {
            let rcpt_response = self
                .step(SmtpStep::RcptTo, client.rcpt_to(recipient))
                .await?;

            if rcpt_response.is_success() {
                accepted.push(recipient.clone());
            } else {
                tracing::info!(
                    "{} refused {recipient}: {} {}",
                    self.server.host,
                    rcpt_response.code,
                    rcpt_response.message()
                );
                rejected.push(RecipientRejection {
                    recipient: recipient.clone(),
                    code: rcpt_response.code,
                    reason: rcpt_response.message(),
                });
            }
        }

        Ok((accepted, rejected))
    }

    /// Send DATA command and message content
    async fn send_message_data(
        &self,
        client: &mut SmtpClient,
        message: &str,
    ) -> Result<(), DeliveryError> {
        let data_response = self.step(SmtpStep::Data, client.data()).await?;

        if !data_response.is_intermediate() {
            return Err(DeliveryError::from_response(
                "Server rejected DATA",
                &data_response,
            ));
        }

        let send_response = self
            .step(SmtpStep::Data, client.send_data(message))
            .await?;

        if !send_response.is_success() {
            return Err(DeliveryError::from_response(
                "Server rejected message data",
                &send_response,
            ));
        }

        Ok(())
    }

    async fn quit(&self, client: &mut SmtpClient) {
        if let Err(e) = self.step(SmtpStep::Quit, client.quit()).await {
            tracing::warn!("QUIT to {} failed: {e}", self.server.host);
        }
    }
}
