//! Viewer-side client: connects to a daemon and decodes its status lines.

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::wire::StatusLine;

/// Where and how persistently a viewer connects.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub addr: String,
    pub connect_attempts: u32,
    pub connect_delay: Duration,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4001".to_string(),
            connect_attempts: 5,
            connect_delay: Duration::from_millis(600),
        }
    }
}

impl ViewerConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.connect_delay = delay;
        self
    }
}

/// Dials the daemon, retrying a bounded number of times.
pub async fn connect(config: &ViewerConfig) -> Result<TcpStream, CoreError> {
    let attempts = config.connect_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        match TcpStream::connect(&config.addr).await {
            Ok(stream) => {
                debug!(addr = %config.addr, attempt, "connected to daemon");
                return Ok(stream);
            }
            Err(e) => {
                warn!(addr = %config.addr, attempt, error = %e, "daemon not reachable");
                last_err = Some(e);
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.connect_delay).await;
        }
    }

    Err(CoreError::Unreachable {
        addr: config.addr.clone(),
        attempts,
        source: last_err
            .unwrap_or_else(|| std::io::Error::from(std::io::ErrorKind::NotConnected)),
    })
}

/// Why a status stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The daemon closed the connection
    Closed,
    /// The consumer asked to stop
    Stopped,
}

/// Feeds every well-formed line to `on_line` until the stream closes or
/// `on_line` returns `false`. Malformed lines are skipped.
pub async fn read_status_lines<R, F>(reader: R, mut on_line: F) -> Result<StreamEnd, CoreError>
where
    R: AsyncRead + Unpin,
    F: FnMut(StatusLine) -> bool,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(StreamEnd::Closed);
        }
        let Ok(line) = std::str::from_utf8(&buf) else {
            debug!(len = buf.len(), "discarding non-UTF-8 line");
            continue;
        };
        let Some(status) = StatusLine::decode(line) else {
            debug!(line = %line.trim_end(), "discarding malformed line");
            continue;
        };
        if !on_line(status) {
            return Ok(StreamEnd::Stopped);
        }
    }
}
