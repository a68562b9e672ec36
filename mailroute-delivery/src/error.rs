//! Why a delivery to one exchanger, or to a whole domain, did not happen.
//!
//! Failures are split by what a later attempt could change: `Permanent`
//! for 5xx replies and policy, `Temporary` for 4xx replies and transport
//! problems, `System` for protocol violations and shutdown.

use mailroute_smtp::client::{ClientError, Response};
use thiserror::Error;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Permanent failure (e.g., 5xx SMTP codes).
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure (e.g., 4xx SMTP codes, connection errors).
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// System-level error (I/O, internal errors, etc.).
    #[error("System error: {0}")]
    System(#[from] SystemError),

    /// Every exchanger of a domain was tried and none accepted the message.
    #[error("all exchanger connections failed (last error: {last})")]
    AllExchangersFailed { last: Box<Self> },
}

/// Permanent errors, typically 5xx SMTP response codes.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// Message or sender was rejected by the server.
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// No mail servers found for the domain.
    #[error("No mail servers available for domain: {0}")]
    NoMailServers(String),

    /// TLS is required but not available or failed.
    #[error("TLS required: {0}")]
    TlsRequired(String),
}

/// Temporary errors, typically 4xx SMTP response codes or transient network issues.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// Failed to establish connection to the mail server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Server refused the session in its greeting.
    #[error("Server busy: {0}")]
    ServerBusy(String),

    /// An SMTP step exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Server returned a temporary failure code.
    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    /// TLS handshake failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
}

/// System-level errors that indicate internal problems.
#[derive(Debug, Error)]
pub enum SystemError {
    /// Delivery was abandoned because shutdown was requested.
    #[error("Delivery cancelled")]
    Cancelled,

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Returns `true` if delivery stopped because of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::System(SystemError::Cancelled))
    }

    /// Categorises a negative reply to an SMTP command.
    ///
    /// `context` describes what was rejected, e.g. `"Server rejected MAIL FROM"`.
    #[must_use]
    pub fn from_response(context: &str, response: &Response) -> Self {
        let message = format!("{context}: {} {}", response.code, response.message());
        match response.code {
            400..=499 => Self::Temporary(TemporaryError::SmtpTemporary(message)),
            500..=599 => Self::Permanent(PermanentError::MessageRejected(message)),
            _ => Self::System(SystemError::Internal(format!(
                "Unexpected SMTP response: {message}"
            ))),
        }
    }
}

/// Convert from SMTP `ClientError` to `DeliveryError`.
///
/// - **Connection/I/O errors** → Temporary
/// - **TLS errors** → Temporary
/// - **Parse/Builder/UTF-8 errors** → System
impl From<ClientError> for DeliveryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Io(e) => {
                Self::Temporary(TemporaryError::ConnectionFailed(format!("I/O error: {e}")))
            }

            ClientError::ConnectionClosed => Self::Temporary(TemporaryError::ConnectionFailed(
                "Connection closed unexpectedly".to_string(),
            )),

            ClientError::TlsError(msg) => Self::Temporary(TemporaryError::TlsHandshakeFailed(msg)),

            ClientError::ParseError(msg) => Self::System(SystemError::Internal(format!(
                "SMTP protocol parse error: {msg}"
            ))),

            ClientError::BuilderError(msg) => {
                Self::System(SystemError::Internal(format!("Message build error: {msg}")))
            }

            ClientError::Utf8Error(e) => {
                Self::System(SystemError::Internal(format!("UTF-8 decoding error: {e}")))
            }
        }
    }
}
