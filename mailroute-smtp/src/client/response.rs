//! Server replies: `<code>[ -]<text>` lines, where `-` marks a continuation.

use super::error::{ClientError, Result};

/// A complete, possibly multi-line, reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    /// Text of each line, without the code and separator.
    pub lines: Vec<String>,
}

/// One reply line borrowed from the read buffer.
#[derive(Debug, PartialEq, Eq)]
struct ReplyLine<'a> {
    code: u16,
    last: bool,
    text: &'a str,
}

impl<'a> ReplyLine<'a> {
    fn parse(line: &'a str) -> Result<Self> {
        let (code, rest) = line
            .split_at_checked(3)
            .ok_or_else(|| ClientError::ParseError(format!("Reply line too short: '{line}'")))?;

        if !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ClientError::ParseError(format!("Invalid reply code: '{code}'")));
        }
        let code = code
            .parse()
            .map_err(|_| ClientError::ParseError(format!("Invalid reply code: '{code}'")))?;

        let mut chars = rest.chars();
        let last = match chars.next() {
            None | Some(' ') => true,
            Some('-') => false,
            Some(c) => {
                return Err(ClientError::ParseError(format!(
                    "Invalid separator after reply code: '{c}'"
                )));
            }
        };

        Ok(Self {
            code,
            last,
            text: chars.as_str(),
        })
    }
}

impl Response {
    #[must_use]
    pub const fn new(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    /// All lines joined with `\n`.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, 200..=299)
    }

    /// 3xx, e.g. `354` after DATA.
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        matches!(self.code, 300..=399)
    }

    /// 4xx
    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        matches!(self.code, 400..=499)
    }

    /// 5xx
    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        matches!(self.code, 500..=599)
    }

    /// Whether an EHLO reply advertises `keyword` (case-insensitive).
    ///
    /// The first line of an EHLO reply is the server's greeting, not an
    /// extension, so it is skipped.
    #[must_use]
    pub fn has_extension(&self, keyword: &str) -> bool {
        self.lines.iter().skip(1).any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(keyword))
        })
    }

    /// Parses the first complete reply in `buffer`.
    ///
    /// Returns the reply and the number of bytes it took up, or `None` when
    /// the buffer ends before the final line does. Lines may end in CRLF or a
    /// bare LF; blank lines between replies are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ParseError` for a malformed line or a code that
    /// changes part way through a multi-line reply.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut offset = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[offset..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[offset..offset + end];
            offset += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }

            let line = ReplyLine::parse(std::str::from_utf8(raw)?)?;
            match code {
                None => code = Some(line.code),
                Some(expected) if expected != line.code => {
                    return Err(ClientError::ParseError(format!(
                        "Reply code changed from {expected} to {} mid-reply",
                        line.code
                    )));
                }
                Some(_) => {}
            }

            lines.push(line.text.to_string());

            if line.last {
                return Ok(code.map(|code| (Self::new(code, lines), offset)));
            }
        }

        Ok(None)
    }
}
