//! Types shared by every mailroute crate: the queued job, domain extraction
//! and the logging setup.

pub mod domain;
pub mod job;
pub mod logging;

pub use domain::{AddressError, Domain};
pub use job::{EmailJob, JobError};
pub use tracing;
