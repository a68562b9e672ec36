//! Queue consumption, MX resolution and SMTP delivery
//!
//! This crate provides functionality to:
//! - Consume send-mail jobs from an external queue into a bounded worker pool
//! - Group recipients by domain and resolve their mail exchangers through a
//!   shared cache backed by DNS
//! - Deliver over SMTP with STARTTLS and ordered failover between exchangers
//! - Publish structured failure reports

mod cache;
mod delivery;
mod dns;
mod domain_config;
mod error;
mod grouping;
mod pipeline;
mod processor;
pub mod queue;
pub mod report;
mod smtp_transaction;
mod types;

pub use cache::{
    CacheBackend, CacheError, MemoryMxStore, MxCache, MxCacheConfig, MxStore, RedisMxStore,
};
pub use delivery::{DeliveryConfig, DeliveryReport, SmtpDelivery};
pub use dns::{DnsConfig, DnsError, DnsResolver, MailExchanger, MxLookup};
pub use domain_config::{DomainConfig, DomainConfigRegistry};
pub use error::{DeliveryError, PermanentError, SystemError, TemporaryError};
pub use grouping::{DomainBucket, Grouping, group_by_domain};
pub use pipeline::{JobPipeline, JobSummary};
pub use processor::{
    Admission, Dispatcher, DispatcherConfig, DispatcherStats, StatsSnapshot, admit,
};
pub use queue::{JobSource, QueueError, RedisJobSource};
pub use report::{
    ChannelConfig, LogPublisher, PublishError, RedisPublisher, Reporter, ReportKind,
};
pub use smtp_transaction::{RecipientRejection, SmtpTransaction, TransactionOutcome};
pub use types::{MailServer, SmtpStep, SmtpTimeouts};
