//! The per-job pipeline run by every worker
//!
//! ```text
//! EmailJob
//!   → group recipients by domain
//!   → per domain: MX override or cached resolution
//!   → SMTP delivery with failover
//!   → failure reports
//! ```
//!
//! Nothing in here returns an error to the worker. Every failure either ends
//! up as a published report or, for malformed input, a local diagnostic.

use mailroute_common::{EmailJob, internal, tracing};
use mailroute_smtp::client::MessageBuilder;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::MxCache,
    delivery::SmtpDelivery,
    grouping::{DomainBucket, group_by_domain},
    report::{DeliveryStatus, Event, Reporter, Severity},
    types::MailServer,
};

/// Counts of what happened to one job's recipients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobSummary {
    /// Recipients with no usable domain.
    pub malformed: usize,
    /// MX resolutions performed, one per distinct domain without an override.
    pub resolutions: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Recipients in domains that could not be delivered at all.
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct JobPipeline {
    cache: MxCache,
    delivery: SmtpDelivery,
    reporter: Reporter,
}

impl JobPipeline {
    #[must_use]
    pub const fn new(cache: MxCache, delivery: SmtpDelivery, reporter: Reporter) -> Self {
        Self {
            cache,
            delivery,
            reporter,
        }
    }

    /// Delivers `job` to every recipient domain, one domain after another.
    #[tracing::instrument(level = "info", skip_all, fields(from = %job.from))]
    pub async fn process(&self, job: &EmailJob, cancel: &CancellationToken) -> JobSummary {
        let mut summary = JobSummary::default();

        let grouping = group_by_domain(&job.to);
        for malformed in &grouping.malformed {
            internal!(level = WARN, "Skipping recipient: {malformed}");
        }
        summary.malformed = grouping.malformed.len();

        if grouping.buckets.is_empty() {
            return summary;
        }

        // Only addresses that made it into a bucket may reach the headers
        let recipients: Vec<&str> = grouping
            .buckets
            .iter()
            .flat_map(|bucket| bucket.recipients.iter().map(String::as_str))
            .collect();

        let message = match MessageBuilder::new()
            .from(job.from.as_str())
            .to_multiple(recipients.as_slice())
            .subject(job.subject.as_str())
            .body(job.body.as_str())
            .build()
        {
            Ok(message) => message,
            Err(e) => {
                self.reporter
                    .operational(
                        &job.from,
                        Severity::Error,
                        Event::SmtpDeliveryError,
                        format!("unable to build message from {}: {e}", job.from),
                    )
                    .await;
                summary.failed = grouping.buckets.iter().map(|b| b.recipients.len()).sum();
                return summary;
            }
        };

        for bucket in &grouping.buckets {
            if cancel.is_cancelled() {
                internal!(
                    level = WARN,
                    "Shutdown requested, abandoning delivery to {}",
                    bucket.domain
                );
                break;
            }

            self.process_bucket(job, bucket, &message, cancel, &mut summary)
                .await;
        }

        summary
    }

    async fn process_bucket(
        &self,
        job: &EmailJob,
        bucket: &DomainBucket,
        message: &str,
        cancel: &CancellationToken,
        summary: &mut JobSummary,
    ) {
        let Some(servers) = self.servers_for(bucket, summary).await else {
            summary.failed += bucket.recipients.len();
            return;
        };

        let result = self
            .delivery
            .deliver(
                &bucket.domain,
                &servers,
                &job.from,
                &bucket.recipients,
                message,
                cancel,
            )
            .await;

        match result {
            Ok(report) => {
                summary.accepted += report.accepted.len();
                summary.rejected += report.rejected.len();

                for rejection in &report.rejected {
                    self.reporter
                        .delivery(
                            &rejection.recipient,
                            DeliveryStatus::Rejected,
                            format!(
                                "{} rejected {}: {} {}",
                                report.server.host,
                                rejection.recipient,
                                rejection.code,
                                rejection.reason
                            ),
                        )
                        .await;
                }
            }
            Err(e) if e.is_cancelled() => {
                internal!(
                    level = WARN,
                    "Delivery to {} interrupted by shutdown",
                    bucket.domain
                );
                summary.failed += bucket.recipients.len();
            }
            Err(e) => {
                summary.failed += bucket.recipients.len();

                self.reporter
                    .operational(
                        bucket.representative(),
                        Severity::Error,
                        Event::SmtpDeliveryError,
                        format!("SMTP delivery to {} failed: {e}", bucket.domain),
                    )
                    .await;

                for recipient in &bucket.recipients {
                    self.reporter
                        .delivery(
                            recipient,
                            DeliveryStatus::Failed,
                            format!("delivery to {} failed: {e}", bucket.domain),
                        )
                        .await;
                }
            }
        }
    }

    /// Where to send a bucket, or `None` once the failure has been reported.
    async fn servers_for(
        &self,
        bucket: &DomainBucket,
        summary: &mut JobSummary,
    ) -> Option<Vec<MailServer>> {
        if let Some(server) = self.delivery.mx_override(&bucket.domain) {
            tracing::debug!("Using MX override {} for {}", server.address(), bucket.domain);
            return Some(vec![server]);
        }

        summary.resolutions += 1;

        let message = match self.cache.resolve(&bucket.domain).await {
            Ok(exchangers) if !exchangers.is_empty() => {
                return Some(self.delivery.targets(&exchangers));
            }
            Ok(_) => format!("no MX records found for domain {}", bucket.domain),
            Err(e) => format!("error getting MX records for domain {}: {e}", bucket.domain),
        };

        self.reporter
            .operational(
                bucket.representative(),
                Severity::Error,
                Event::MxLookupError,
                message,
            )
            .await;

        None
    }
}
