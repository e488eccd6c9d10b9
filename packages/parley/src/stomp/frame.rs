//! STOMP 1.2 frames carried in WebSocket text messages.
//!
//! Wire format:
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! ...\n
//! \n
//! body\0
//! ```
//!
//! One frame per WebSocket message. A message made only of EOLs is a
//! heart-beat.

use thiserror::Error;

/// Maximum frame size (1 MiB). Rejects frames larger than this.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes (max {max})", max = MAX_FRAME_SIZE)]
    TooLarge(usize),

    #[error("frame has no header terminator")]
    Unterminated,

    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("invalid escape sequence in header: {0:?}")]
    InvalidEscape(String),

    #[error("invalid content-length: {0:?}")]
    BadContentLength(String),

    #[error("frame body is not NUL-terminated")]
    MissingNul,
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of `name`; repeated headers after the first are ignored.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> String {
        let escaped = escapes_headers(&self.command);
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escaped {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame. `Ok(None)` means the message was a heart-beat.
    pub fn decode(raw: &str) -> Result<Option<Frame>, FrameError> {
        if raw.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(raw.len()));
        }

        let rest = raw.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(None);
        }

        let (command, mut rest) = split_line(rest).ok_or(FrameError::Unterminated)?;
        let escaped = escapes_headers(command);

        let mut headers = Vec::new();
        loop {
            let (line, after) = split_line(rest).ok_or(FrameError::Unterminated)?;
            rest = after;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
            if escaped {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let content_length = headers
            .iter()
            .find(|(n, _)| n == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::BadContentLength(v.clone()))
            })
            .transpose()?;

        let body = match content_length {
            Some(len) => {
                if rest.as_bytes().get(len) != Some(&0) {
                    return Err(FrameError::MissingNul);
                }
                rest.get(..len)
                    .ok_or_else(|| FrameError::BadContentLength(len.to_string()))?
            }
            None => {
                let end = rest.find('\0').ok_or(FrameError::MissingNul)?;
                &rest[..end]
            }
        };

        Ok(Some(Frame {
            command: command.to_string(),
            headers,
            body: body.to_string(),
        }))
    }
}

/// CONNECT and CONNECTED frames carry headers verbatim.
fn escapes_headers(command: &str) -> bool {
    !matches!(command, "CONNECT" | "CONNECTED")
}

/// Split off one line, accepting `\n` or `\r\n`.
fn split_line(s: &str) -> Option<(&str, &str)> {
    let idx = s.find('\n')?;
    let line = &s[..idx];
    Some((line.strip_suffix('\r').unwrap_or(line), &s[idx + 1..]))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(s: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(s.to_string())),
        }
    }
    Ok(out)
}
