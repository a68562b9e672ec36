//! The send-mail job consumed from the external queue.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::domain::{AddressError, Domain};

/// Errors raised while decoding a queue payload into an [`EmailJob`].
#[derive(Debug, Error)]
pub enum JobError {
    #[error("malformed job payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid sender: {0}")]
    InvalidSender(#[from] AddressError),

    #[error("job has no recipients")]
    NoRecipients,
}

/// A single outbound message, as enqueued by a producer.
///
/// The wire form is `{"from": "...", "to": ["..."], "subject": "...", "body": "..."}`.
/// Producers that send a single recipient as a bare string are accepted; the
/// recipient list is always a sequence once decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJob {
    pub from: String,
    #[serde(deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(recipient) => vec![recipient],
        OneOrMany::Many(recipients) => recipients,
    })
}

impl EmailJob {
    /// Decodes and validates a queue payload.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, a sender without a domain, or an empty
    /// recipient list.
    pub fn decode(payload: &str) -> Result<Self, JobError> {
        let job: Self = serde_json::from_str(payload)?;
        job.sender_domain()?;

        if job.to.is_empty() {
            return Err(JobError::NoRecipients);
        }

        Ok(job)
    }

    /// Encodes this job into its queue payload.
    ///
    /// # Errors
    ///
    /// Only fails if serialization itself fails.
    pub fn encode(&self) -> Result<String, JobError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Domain of the sender address.
    ///
    /// # Errors
    ///
    /// See [`Domain::of_address`].
    pub fn sender_domain(&self) -> Result<Domain, AddressError> {
        Domain::of_address(&self.from)
    }
}
