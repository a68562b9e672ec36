//! Domain newtype derived from mail addresses
//!
//! Every domain the pipeline works with (grouping, MX cache keys, log records)
//! comes from the authority portion of an address: the text strictly after the
//! last `@`, lower-cased. Wrapping it keeps whole addresses from being passed
//! where a domain is expected.

use std::{
    fmt::{self, Display},
    ops::Deref,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons an address has no usable domain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address '{0}' has no '@'")]
    MissingAt(String),

    #[error("address '{0}' has nothing after the last '@'")]
    EmptyDomain(String),

    #[error("address {0:?} contains a control character")]
    ControlCharacter(String),
}

/// A lower-cased domain name.
///
/// ```
/// use mailroute_common::Domain;
///
/// let domain = Domain::of_address("Someone@Example.COM").unwrap();
/// assert_eq!(domain.as_str(), "example.com");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Domain(Arc<str>);

impl Domain {
    /// Builds a domain from an already extracted name, lower-casing it.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name.to_ascii_lowercase()))
    }

    /// Extracts the domain of `address`: everything after the last `@`.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] when the address has no `@`, the part after
    /// it is empty, or a control character (such as CR or LF) remains once
    /// surrounding whitespace is trimmed. Such addresses are never coerced
    /// into an empty domain.
    pub fn of_address(address: &str) -> Result<Self, AddressError> {
        let trimmed = address.trim();
        if trimmed.chars().any(char::is_control) {
            return Err(AddressError::ControlCharacter(address.to_string()));
        }

        let Some((_, authority)) = trimmed.rsplit_once('@') else {
            return Err(AddressError::MissingAt(address.to_string()));
        };

        if authority.is_empty() {
            return Err(AddressError::EmptyDomain(address.to_string()));
        }

        Ok(Self::new(authority))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for Domain {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
