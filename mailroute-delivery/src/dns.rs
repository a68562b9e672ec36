//! DNS MX lookups for recipient domains.
//!
//! This is the source of truth behind the MX cache: it only ever talks to DNS
//! and never caches anything itself. A domain with no MX records resolves to
//! an empty exchanger list, which the caller treats as "undeliverable" rather
//! than as an error.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use hickory_resolver::{
    TokioResolver,
    config::{ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
};
use mailroute_common::{Domain, tracing::debug};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during DNS resolution.
#[derive(Debug, Error)]
pub enum DnsError {
    /// DNS query failed due to network or resolver issues.
    #[error("DNS lookup failed: {0}")]
    LookupFailed(#[from] hickory_resolver::ResolveError),

    /// DNS query timed out.
    #[error("DNS query timed out for domain: {0}")]
    Timeout(String),
}

/// Configuration for the DNS resolver.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    /// Per-query timeout in seconds (default: 5)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of retries per query (default: 2)
    #[serde(default = "default_attempts")]
    pub attempts: usize,
}

const fn default_timeout_secs() -> u64 {
    5
}

const fn default_attempts() -> usize {
    2
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            attempts: default_attempts(),
        }
    }
}

impl DnsConfig {
    /// Upper bound on a whole lookup, retries included.
    #[must_use]
    pub fn lookup_deadline(&self) -> Duration {
        let tries = u64::try_from(self.attempts).unwrap_or(u64::MAX).saturating_add(1);
        Duration::from_secs(self.timeout_secs.saturating_mul(tries))
    }
}

/// One MX record: a host and its preference (lower is tried first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailExchanger {
    pub host: String,
    pub priority: u16,
}

impl MailExchanger {
    #[must_use]
    pub fn new(host: impl Into<String>, priority: u16) -> Self {
        Self {
            host: host.into(),
            priority,
        }
    }
}

/// Source of MX records for a domain.
#[async_trait]
pub trait MxLookup: Send + Sync + Debug {
    /// Looks up the MX records of `domain`, in resolver order.
    ///
    /// A domain without MX records yields `Ok(vec![])`.
    async fn lookup_mx(&self, domain: &Domain) -> Result<Vec<MailExchanger>, DnsError>;
}

/// MX lookups through the system's configured nameservers.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioResolver,
    config: DnsConfig,
}

impl DnsResolver {
    /// Creates a resolver from the system DNS configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the system DNS configuration cannot be loaded.
    pub fn with_dns_config(config: DnsConfig) -> Result<Self, DnsError> {
        let resolver = TokioResolver::builder(TokioConnectionProvider::default())?
            .with_options(Self::options(&config))
            .build();

        Ok(Self { resolver, config })
    }

    /// Creates a resolver against explicit nameservers.
    #[must_use]
    pub fn with_resolver_config(resolver_config: ResolverConfig, config: DnsConfig) -> Self {
        let resolver =
            TokioResolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .with_options(Self::options(&config))
                .build();

        Self { resolver, config }
    }

    fn options(config: &DnsConfig) -> ResolverOpts {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(config.timeout_secs);
        opts.attempts = config.attempts;
        opts
    }
}

#[async_trait]
impl MxLookup for DnsResolver {
    #[tracing::instrument(level = "debug", skip(self), fields(domain = %domain))]
    async fn lookup_mx(&self, domain: &Domain) -> Result<Vec<MailExchanger>, DnsError> {
        // Fully qualified so the resolver never appends search domains
        let fqdn = format!("{domain}.");

        let lookup = tokio::time::timeout(
            self.config.lookup_deadline(),
            self.resolver.mx_lookup(fqdn.as_str()),
        )
        .await
        .map_err(|_| DnsError::Timeout(domain.to_string()))?;

        match lookup {
            Ok(mx_lookup) => {
                let exchangers = mx_lookup
                    .iter()
                    .filter_map(|mx| {
                        let exchange = mx.exchange().to_utf8();
                        let host = exchange.trim_end_matches('.');
                        // A null MX (RFC 7505) explicitly advertises no mail service
                        if host.is_empty() {
                            return None;
                        }
                        debug!("Found MX record: {host} (priority: {})", mx.preference());
                        Some(MailExchanger::new(host, mx.preference()))
                    })
                    .collect::<Vec<_>>();

                Ok(exchangers)
            }
            Err(err) if err.is_no_records_found() || err.is_nx_domain() => {
                debug!("No MX records found for {domain}");
                Ok(Vec::new())
            }
            Err(err) => Err(DnsError::LookupFailed(err)),
        }
    }
}
