//! SMTP client used for outbound delivery.
//!
//! The client is deliberately low level: each method sends one command and
//! returns the server's [`Response`], leaving the decision about what a given
//! reply code means to the caller. It supports:
//!
//! - Plain TCP connections upgraded in place via STARTTLS
//! - Multi-line response parsing
//! - Dot-stuffed message transmission
//!
//! # Example
//!
//! ```no_run
//! use mailroute_smtp::client::{MessageBuilder, SmtpClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = SmtpClient::connect("mx1.example.com:25", "mx1.example.com").await?;
//! client.read_greeting().await?;
//!
//! let ehlo = client.ehlo("sender.example.org").await?;
//! if ehlo.has_extension("STARTTLS") {
//!     client.starttls().await?;
//!     client.ehlo("sender.example.org").await?;
//! }
//!
//! client.mail_from("a@sender.example.org").await?;
//! client.rcpt_to("b@example.com").await?;
//! client.data().await?;
//!
//! let message = MessageBuilder::new()
//!     .from("a@sender.example.org")
//!     .to("b@example.com")
//!     .subject("hi")
//!     .body("hello")
//!     .build()?;
//! client.send_data(&message).await?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod message;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use message::MessageBuilder;
pub use response::Response;
pub use smtp_client::SmtpClient;
