//! Per-domain delivery overrides, keyed by recipient domain.

use std::collections::HashMap;

use serde::Deserialize;

use crate::types::MailServer;

/// Settings applied to one recipient domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DomainConfig {
    /// Send to this `host[:port]` instead of the domain's MX records.
    ///
    /// ```ron
    /// domains: {
    ///     "test.example.com": (
    ///         mx_override: "localhost:1025",
    ///     ),
    /// }
    /// ```
    #[serde(default)]
    pub mx_override: Option<String>,

    /// A host that does not offer STARTTLS is treated as failed.
    #[serde(default)]
    pub require_tls: bool,

    /// Takes precedence over the global `accept_invalid_certs` when set.
    #[serde(default)]
    pub accept_invalid_certs: Option<bool>,
}

impl DomainConfig {
    /// The override as a delivery target. A missing or unparsable port
    /// falls back to `default_port`.
    #[must_use]
    pub fn mx_override_server(&self, default_port: u16) -> Option<MailServer> {
        let address = self.mx_override.as_deref()?;

        let (host, port) = address
            .rsplit_once(':')
            .and_then(|(host, port)| port.parse().ok().map(|port| (host, port)))
            .unwrap_or((address, default_port));

        Some(MailServer::new(host.to_string(), 0, port))
    }
}

/// Domain settings, looked up by lower-cased domain name.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, DomainConfig>")]
pub struct DomainConfigRegistry {
    domains: HashMap<String, DomainConfig>,
}

impl From<HashMap<String, DomainConfig>> for DomainConfigRegistry {
    fn from(domains: HashMap<String, DomainConfig>) -> Self {
        domains.into_iter().collect()
    }
}

impl FromIterator<(String, DomainConfig)> for DomainConfigRegistry {
    fn from_iter<I: IntoIterator<Item = (String, DomainConfig)>>(iter: I) -> Self {
        let mut registry = Self::new();
        for (domain, config) in iter {
            registry.insert(domain, config);
        }
        registry
    }
}

impl DomainConfigRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `domain` must already be lower-cased, as [`mailroute_common::Domain`] is.
    #[must_use]
    pub fn get(&self, domain: &str) -> Option<&DomainConfig> {
        self.domains.get(domain)
    }

    pub fn insert(&mut self, domain: impl Into<String>, config: DomainConfig) {
        self.domains
            .insert(domain.into().to_ascii_lowercase(), config);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
