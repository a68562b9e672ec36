//! SMTP wire support for mailroute's outbound delivery.

pub mod client;

pub use client::{ClientError, MessageBuilder, Response, SmtpClient};
