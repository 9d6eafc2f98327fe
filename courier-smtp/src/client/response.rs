//! Relay replies.

use super::error::{ClientError, Result};

/// A complete reply from the relay, single or multi-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    /// Text of every line, without the code and separator.
    pub lines: Vec<String>,
}

impl Response {
    /// The reply text, one line per reply line.
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    /// Whether the command was accepted (a 2xx reply).
    pub const fn is_success(&self) -> bool {
        matches!(self.code, 200..=299)
    }

    /// Extension keywords of an EHLO reply, upper-cased.
    ///
    /// The first line of an EHLO reply names the relay and is not a keyword.
    pub fn capabilities(&self) -> impl Iterator<Item = String> + '_ {
        self.lines
            .iter()
            .skip(1)
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_ascii_uppercase)
    }

    pub fn has_capability(&self, keyword: &str) -> bool {
        self.capabilities()
            .any(|capability| capability.eq_ignore_ascii_case(keyword))
    }

    /// Take one complete reply off the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes it occupied, or `None` when
    /// the last line has not arrived yet. Lines may end in CRLF or a bare LF.
    ///
    /// # Errors
    /// [`ClientError::ParseError`] if a line has no three digit code, an
    /// unknown separator, or a code different from the first line's.
    pub fn decode(buffer: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut code = None;
        let mut lines = Vec::new();
        let mut offset = 0;

        while let Some(end) = buffer[offset..].iter().position(|&b| b == b'\n') {
            let raw = &buffer[offset..offset + end];
            offset += end + 1;

            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            if raw.is_empty() {
                continue;
            }
            let line = std::str::from_utf8(raw)?;
            let (line_code, last, text) = split_line(line)?;

            match code {
                None => code = Some(line_code),
                Some(expected) if expected != line_code => {
                    return Err(ClientError::ParseError(format!(
                        "Reply mixes codes {expected} and {line_code}"
                    )));
                }
                Some(_) => {}
            }
            lines.push(text.to_string());

            if last {
                return Ok(code.map(|code| (Self { code, lines }, offset)));
            }
        }

        Ok(None)
    }
}

/// Split `250-SIZE 1000` into its code, whether it ends the reply, and text.
fn split_line(line: &str) -> Result<(u16, bool, &str)> {
    let digits = line.get(..3).filter(|d| d.bytes().all(|b| b.is_ascii_digit()));
    let Some(code) = digits.and_then(|d| d.parse::<u16>().ok()) else {
        return Err(ClientError::ParseError(format!("No reply code in '{line}'")));
    };

    match line.as_bytes().get(3) {
        None => Ok((code, true, "")),
        Some(b' ') => Ok((code, true, &line[4..])),
        Some(b'-') => Ok((code, false, &line[4..])),
        Some(other) => Err(ClientError::ParseError(format!(
            "Unexpected separator '{}' in '{line}'",
            char::from(*other)
        ))),
    }
}
