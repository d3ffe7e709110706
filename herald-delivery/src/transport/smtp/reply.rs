//! Relay reply parsing

use super::error::{RelayError, Result};

/// Longest reply accepted from the relay, counting every line
pub const MAX_REPLY_LEN: usize = 64 * 1024;

/// One line of a reply, e.g. `250-SIZE 10240000`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyLine<'a> {
    pub code: u16,
    /// Set on `250-` style continuation lines
    pub more: bool,
    pub text: &'a str,
}

impl<'a> ReplyLine<'a> {
    /// Parse a line, with or without its trailing CRLF.
    ///
    /// # Errors
    /// Returns [`RelayError::Malformed`] if the line does not start with a
    /// three digit code followed by a space, a dash or nothing.
    pub fn parse(raw: &'a str) -> Result<Self> {
        let line = raw.trim_end_matches(['\r', '\n']);
        let Some((code, rest)) = line
            .split_at_checked(3)
            .filter(|(code, _)| code.bytes().all(|b| b.is_ascii_digit()))
        else {
            return Err(RelayError::Malformed(format!("no reply code in {line:?}")));
        };

        let code = code
            .parse::<u16>()
            .map_err(|_| RelayError::Malformed(format!("bad reply code in {line:?}")))?;

        let (more, text) = match rest.as_bytes().first() {
            None => (false, ""),
            Some(b' ') => (false, &rest[1..]),
            Some(b'-') => (true, &rest[1..]),
            Some(_) => {
                return Err(RelayError::Malformed(format!("bad separator in {line:?}")));
            }
        };

        Ok(Self { code, more, text })
    }
}

/// A complete, possibly multi-line, reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// 2xx
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code / 100 == 2
    }

    /// 3xx, as sent in answer to DATA
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code / 100 == 3
    }

    /// Turn anything but a 2xx reply into [`RelayError::Rejected`].
    ///
    /// # Errors
    /// Returns the rejection when the reply is not positive.
    pub fn positive(self) -> Result<Self> {
        if self.is_positive() {
            Ok(self)
        } else {
            Err(self.into_rejection())
        }
    }

    #[must_use]
    pub fn into_rejection(self) -> RelayError {
        RelayError::Rejected {
            code: self.code,
            text: self.text(),
        }
    }
}

/// Collects lines until a reply is complete
#[derive(Debug, Default)]
pub struct ReplyBuilder {
    code: Option<u16>,
    lines: Vec<String>,
    len: usize,
}

impl ReplyBuilder {
    /// Add one raw line, returning the reply once its last line arrives.
    ///
    /// # Errors
    /// Returns [`RelayError::Malformed`] for unparseable lines, a code that
    /// changes part way through, or a reply longer than [`MAX_REPLY_LEN`].
    pub fn push(&mut self, raw: &str) -> Result<Option<Reply>> {
        self.len += raw.len();
        if self.len > MAX_REPLY_LEN {
            return Err(RelayError::Malformed(format!(
                "reply longer than {MAX_REPLY_LEN} bytes"
            )));
        }

        let line = ReplyLine::parse(raw)?;
        if let Some(code) = self.code.filter(|code| *code != line.code) {
            return Err(RelayError::Malformed(format!(
                "reply code changed from {code} to {}",
                line.code
            )));
        }
        self.code = Some(line.code);
        self.lines.push(line.text.to_string());

        if line.more {
            return Ok(None);
        }

        Ok(Some(Reply {
            code: line.code,
            lines: std::mem::take(&mut self.lines),
        }))
    }
}
