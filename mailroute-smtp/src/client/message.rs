//! Builder for the RFC 5322 message sent after DATA.

use std::io::Write;

use chrono::{DateTime, Utc};

use super::error::{ClientError, Result};

/// Builds a plain-text message with the headers a receiving MTA expects.
///
/// ```
/// use mailroute_smtp::client::MessageBuilder;
///
/// let message = MessageBuilder::new()
///     .from("sender@example.com")
///     .to("recipient@example.com")
///     .subject("Hello")
///     .body("This is the message body")
///     .build()
///     .unwrap();
///
/// assert!(message.contains("Subject: Hello\r\n"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    headers: Vec<(String, String)>,
    body: Option<String>,
    date: Option<DateTime<Utc>>,
    message_id: Option<String>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    /// Adds a recipient to the To header.
    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    /// Adds multiple recipients to the To header.
    #[must_use]
    pub fn to_multiple(mut self, emails: &[impl AsRef<str>]) -> Self {
        self.to
            .extend(emails.iter().map(|email| email.as_ref().to_string()));
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Adds a custom header, emitted in insertion order.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn body(mut self, content: impl Into<String>) -> Self {
        self.body = Some(content.into());
        self
    }

    /// Overrides the `Date` header, which otherwise is the build time.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Overrides the generated `Message-ID` (without angle brackets).
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Builds the final message.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::BuilderError`] if there is no sender or a header
    /// value would inject extra header lines.
    pub fn build(self) -> Result<String> {
        let from = self
            .from
            .as_deref()
            .ok_or_else(|| ClientError::BuilderError("missing From address".to_string()))?;

        let message_id = self.message_id.clone().unwrap_or_else(|| {
            let host = from.rsplit_once('@').map_or("localhost", |(_, d)| d);
            format!("{}@{host}", ulid::Ulid::new())
        });
        let date = self.date.unwrap_or_else(Utc::now);

        let mut message = Vec::with_capacity(1024 + self.body.as_ref().map_or(0, String::len));

        write_header(&mut message, "From", from)?;
        if !self.to.is_empty() {
            write_header(&mut message, "To", &self.to.join(", "))?;
        }
        if let Some(subject) = &self.subject {
            write_header(&mut message, "Subject", subject)?;
        }
        write_header(&mut message, "Date", &date.to_rfc2822())?;
        write_header(&mut message, "Message-ID", &format!("<{message_id}>"))?;

        for (name, value) in &self.headers {
            write_header(&mut message, name, value)?;
        }

        write_header(&mut message, "MIME-Version", "1.0")?;
        write_header(&mut message, "Content-Type", "text/plain; charset=utf-8")?;

        write!(&mut message, "\r\n")?;

        if let Some(body) = &self.body {
            write!(&mut message, "{body}")?;
        }

        String::from_utf8(message).map_err(|e| ClientError::Utf8Error(e.utf8_error()))
    }
}

fn write_header(message: &mut Vec<u8>, name: &str, value: &str) -> Result<()> {
    if value.contains(['\r', '\n']) {
        return Err(ClientError::BuilderError(format!(
            "header {name} contains a line break"
        )));
    }
    write!(message, "{name}: {value}\r\n")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_message() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.com")
            .subject("Test")
            .body("Hello World")
            .build()
            .unwrap();

        assert!(message.contains("From: sender@example.com\r\n"));
        assert!(message.contains("To: recipient@example.com\r\n"));
        assert!(message.contains("Subject: Test\r\n"));
        assert!(message.contains("MIME-Version: 1.0\r\n"));
        assert!(message.ends_with("\r\n\r\nHello World"));
    }

    #[test]
    fn test_multiple_recipients() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to_multiple(&["recipient1@example.com", "recipient2@example.com"])
            .build()
            .unwrap();

        assert!(message.contains("To: recipient1@example.com, recipient2@example.com\r\n"));
    }

    #[test]
    fn test_generated_message_id_uses_sender_domain() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .build()
            .unwrap();

        let parsed = mailparse::parse_mail(message.as_bytes()).unwrap();
        let id = parsed
            .headers
            .iter()
            .find(|h| h.get_key() == "Message-ID")
            .map(mailparse::MailHeader::get_value)
            .unwrap();
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
    }

    #[test]
    fn test_fixed_date_and_id() {
        let date = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .date(date)
            .message_id("abc@example.com")
            .build()
            .unwrap();

        assert!(message.contains("Date: Fri, 1 Mar 2024 10:00:00 +0000\r\n"));
        assert!(message.contains("Message-ID: <abc@example.com>\r\n"));
    }

    #[test]
    fn test_custom_headers() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .header("X-Mailer", "mailroute")
            .body("Test")
            .build()
            .unwrap();

        assert!(message.contains("X-Mailer: mailroute\r\n"));
    }

    #[test]
    fn test_missing_from() {
        let result = MessageBuilder::new().to("recipient@example.com").build();
        assert!(matches!(result, Err(ClientError::BuilderError(_))));
    }

    #[test]
    fn test_header_injection_rejected() {
        let result = MessageBuilder::new()
            .from("sender@example.com")
            .subject("hi\r\nBcc: victim@example.com")
            .build();
        assert!(matches!(result, Err(ClientError::BuilderError(_))));
    }
}
