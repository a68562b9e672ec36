//! Partitioning of a job's recipients by domain

use ahash::AHashMap;
use mailroute_common::{AddressError, Domain};

/// Recipients that share a domain, in the order they appeared in the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainBucket {
    pub domain: Domain,
    pub recipients: Vec<String>,
}

impl DomainBucket {
    /// The address used when a failure concerns the bucket as a whole.
    ///
    /// Buckets are never empty.
    #[must_use]
    pub fn representative(&self) -> &str {
        self.recipients.first().map_or("", String::as_str)
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Grouping {
    /// One bucket per distinct domain, ordered by first appearance.
    pub buckets: Vec<DomainBucket>,
    /// Addresses that have no usable domain.
    pub malformed: Vec<AddressError>,
}

/// Groups `recipients` by the lower-cased text after their last `@`.
///
/// Addresses without a domain end up in [`Grouping::malformed`] and are
/// otherwise ignored.
#[must_use]
pub fn group_by_domain<S: AsRef<str>>(recipients: &[S]) -> Grouping {
    let mut grouping = Grouping::default();
    let mut index = AHashMap::<Domain, usize>::with_capacity(recipients.len());

    for recipient in recipients {
        let recipient = recipient.as_ref().trim();
        let domain = match Domain::of_address(recipient) {
            Ok(domain) => domain,
            Err(e) => {
                grouping.malformed.push(e);
                continue;
            }
        };

        let slot = *index.entry(domain.clone()).or_insert_with(|| {
            grouping.buckets.push(DomainBucket {
                domain,
                recipients: Vec::new(),
            });
            grouping.buckets.len() - 1
        });

        grouping.buckets[slot].recipients.push(recipient.to_string());
    }

    grouping
}
