//! Line-oriented text protocol between the daemon and viewers.
//!
//! One probe result per line, UTF-8:
//!
//! ```text
//! <srcName> <dstName> <true|false>\n
//! ```
//!
//! There is no escaping, length prefix or handshake. Node names never
//! contain whitespace, so a line that does not split into exactly three
//! tokens is simply discarded by the reader.

use serde::Serialize;

use crate::probe::ProbeResult;

/// A probe result as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    pub source: String,
    pub dest: String,
    pub success: bool,
}

impl StatusLine {
    pub fn new(source: impl Into<String>, dest: impl Into<String>, success: bool) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            success,
        }
    }

    /// Renders the line, including the trailing newline.
    pub fn encode(&self) -> String {
        format!("{} {} {}\n", self.source, self.dest, self.success)
    }

    /// Parses one line (trailing newline optional).
    ///
    /// Returns `None` for anything but exactly three tokens ending in
    /// `true` or `false`.
    pub fn decode(line: &str) -> Option<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        let mut tokens = line.split_whitespace();
        let source = tokens.next()?;
        let dest = tokens.next()?;
        let success = tokens.next()?.parse::<bool>().ok()?;
        if tokens.next().is_some() {
            return None;
        }
        Some(Self::new(source, dest, success))
    }
}

impl From<&ProbeResult> for StatusLine {
    fn from(result: &ProbeResult) -> Self {
        Self {
            source: result.source.to_string(),
            dest: result
                .dest
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default(),
            success: result.success,
        }
    }
}

/// Encodes a probe result as one wire line.
pub fn encode(result: &ProbeResult) -> String {
    StatusLine::from(result).encode()
}
