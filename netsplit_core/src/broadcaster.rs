//! ResultBroadcaster - fans probe results out to every connected viewer.
//!
//! Two loops cooperate through a channel:
//!
//! ```text
//!   accept loop ──(new sessions)──►┐
//!                                  ├──► dispatch loop ──► viewer 1..n
//!   workers ─────(probe results)──►┘
//! ```
//!
//! The dispatch loop is the only owner of the session registry, so
//! registration and fan-out never race.

use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::probe::ProbeResult;
use crate::wire;

/// Configuration for the broadcaster.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Capacity of the inbound result channel
    pub event_buffer: usize,

    /// Capacity of the accepted-but-unregistered session channel
    pub session_buffer: usize,

    /// First delay after a transient accept error
    pub backoff_initial: Duration,

    /// Ceiling for the accept backoff
    pub backoff_max: Duration,

    /// A viewer that cannot take a line within this is dropped
    pub write_timeout: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            event_buffer: 200,
            session_buffer: 10,
            backoff_initial: Duration::from_millis(5),
            backoff_max: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// ACCEPT LOOP
// =============================================================================

/// Source of inbound viewer connections.
#[async_trait]
pub trait Acceptor: Send + 'static {
    type Conn: AsyncWrite + Unpin + Send + 'static;

    /// Waits for the next viewer; returns the stream and a peer label.
    async fn accept(&mut self) -> io::Result<(Self::Conn, String)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Conn = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, String)> {
        let (stream, addr) = TcpListener::accept(self).await?;
        Ok((stream, addr.to_string()))
    }
}

/// Exponential backoff for transient accept errors.
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl AcceptBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: Duration::ZERO,
        }
    }

    /// Delay to wait after another consecutive transient error.
    pub fn next_delay(&mut self) -> Duration {
        self.current = if self.current.is_zero() {
            self.initial
        } else {
            self.current * 2
        };
        self.current = self.current.min(self.max);
        self.current
    }

    /// Called after a successful accept.
    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }
}

/// Whether an accept error is worth retrying.
pub fn is_transient(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => true,
        // ENFILE / EMFILE: out of file descriptors, may clear up
        _ => matches!(err.raw_os_error(), Some(23) | Some(24)),
    }
}

/// Accepts viewers until a non-transient error or the dispatch loop
/// going away.
pub async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    sessions: mpsc::Sender<Session<A::Conn>>,
    config: BroadcastConfig,
) {
    let mut backoff = AcceptBackoff::new(config.backoff_initial, config.backoff_max);
    loop {
        match acceptor.accept().await {
            Ok((conn, peer)) => {
                backoff.reset();
                info!(%peer, "viewer connected");
                if sessions.send(Session::new(peer, conn)).await.is_err() {
                    return;
                }
            }
            Err(e) if is_transient(&e) => {
                let delay = backoff.next_delay();
                warn!(error = %e, delay_ms = delay.as_millis() as u64, "accept error, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(error = %e, "accept failed, no longer accepting viewers");
                return;
            }
        }
    }
}

// =============================================================================
// DISPATCH LOOP
// =============================================================================

/// One connected viewer.
pub struct Session<W> {
    peer: String,
    writer: W,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    pub fn new(peer: impl Into<String>, writer: W) -> Self {
        Self {
            peer: peer.into(),
            writer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Writes one whole line. A short write counts as a failure; the
    /// remainder is never retried.
    async fn send_line(&mut self, line: &[u8], timeout: Duration) -> io::Result<()> {
        let write = async {
            let n = self.writer.write(line).await?;
            if n != line.len() {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("short write: {n} of {} bytes", line.len()),
                ));
            }
            self.writer.flush().await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        }
    }
}

/// The session registry plus the fan-out step.
pub struct ResultBroadcaster<W> {
    sessions: Vec<Session<W>>,
    config: BroadcastConfig,
}

impl<W: AsyncWrite + Unpin + Send + 'static> ResultBroadcaster<W> {
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            sessions: Vec::new(),
            config,
        }
    }

    pub fn register(&mut self, session: Session<W>) {
        self.sessions.push(session);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Peers of the registered sessions, in registration order.
    pub fn peers(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.peer.clone()).collect()
    }

    /// Logs the result and writes it to every session.
    ///
    /// Sessions whose write fails are dropped (closing their stream)
    /// before this returns. Returns the number of viewers reached.
    pub async fn dispatch(&mut self, result: &ProbeResult) -> usize {
        info!(target: "netsplit::status", "{}", result.summary);

        let line = wire::encode(result);
        let mut kept = Vec::with_capacity(self.sessions.len());
        for mut session in self.sessions.drain(..) {
            match session.send_line(line.as_bytes(), self.config.write_timeout).await {
                Ok(()) => kept.push(session),
                Err(e) => warn!(peer = %session.peer, error = %e, "dropping viewer"),
            }
        }
        self.sessions = kept;
        self.sessions.len()
    }

    /// Runs until the result channel closes.
    ///
    /// Pending sessions are always merged before the next result is
    /// dispatched.
    pub async fn run(
        mut self,
        mut results: mpsc::Receiver<ProbeResult>,
        mut new_sessions: mpsc::Receiver<Session<W>>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(session) = new_sessions.recv() => self.register(session),
                next = results.recv() => {
                    let Some(result) = next else { break };
                    while let Ok(session) = new_sessions.try_recv() {
                        self.register(session);
                    }
                    self.dispatch(&result).await;
                }
            }
        }
    }
}

/// Handles to the two broadcaster loops.
pub struct BroadcasterTasks {
    pub accept: JoinHandle<()>,
    pub dispatch: JoinHandle<()>,
}

impl BroadcasterTasks {
    pub fn abort(&self) {
        self.accept.abort();
        self.dispatch.abort();
    }
}

/// Spawns the accept and dispatch loops for `acceptor`.
pub fn spawn<A: Acceptor>(
    acceptor: A,
    results: mpsc::Receiver<ProbeResult>,
    config: BroadcastConfig,
) -> BroadcasterTasks {
    let (session_tx, session_rx) = mpsc::channel(config.session_buffer.max(1));
    let broadcaster = ResultBroadcaster::<A::Conn>::new(config.clone());
    BroadcasterTasks {
        accept: tokio::spawn(accept_loop(acceptor, session_tx, config)),
        dispatch: tokio::spawn(broadcaster.run(results, session_rx)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsplit_env::NodeName;
    use std::collections::VecDeque;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, DuplexStream};

    fn result(src: &str, dst: &str, ok: bool) -> ProbeResult {
        ProbeResult::new(NodeName::from(src), "10.0.0.9", Some(NodeName::from(dst)), ok)
    }

    /// Writer that accepts at most `limit` bytes per call.
    struct Trickle {
        limit: usize,
    }

    impl AsyncWrite for Trickle {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(buf.len().min(self.limit)))
        }
        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that never makes progress.
    struct Stalled;

    impl AsyncWrite for Stalled {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Pending
        }
        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }
        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = AcceptBackoff::new(Duration::from_millis(5), Duration::from_secs(1));
        let delays: Vec<u64> = (0..10).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 160, 320, 640, 1000, 1000]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(5));
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from_raw_os_error(24)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::InvalidInput)));
    }

    #[tokio::test]
    async fn test_fan_out_to_all_sessions() {
        let mut broadcaster = ResultBroadcaster::new(BroadcastConfig::default());
        let mut readers = Vec::new();
        for i in 0..3 {
            let (server, client) = tokio::io::duplex(256);
            broadcaster.register(Session::new(format!("viewer-{i}"), server));
            readers.push(client);
        }

        let reached = broadcaster.dispatch(&result("n0", "n1", true)).await;
        assert_eq!(reached, 3);

        for reader in readers.iter_mut() {
            let mut buf = vec![0u8; 11];
            reader.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, b"n0 n1 true\n");
        }
    }

    #[tokio::test]
    async fn test_failed_session_removed_others_unaffected() {
        let mut broadcaster = ResultBroadcaster::new(BroadcastConfig::default());
        let (s1, c1) = tokio::io::duplex(256);
        let (s2, c2) = tokio::io::duplex(256);
        let (s3, c3) = tokio::io::duplex(256);
        broadcaster.register(Session::new("one", s1));
        broadcaster.register(Session::new("two", s2));
        broadcaster.register(Session::new("three", s3));
        drop(c2);

        let reached = broadcaster.dispatch(&result("n1", "n0", false)).await;

        assert_eq!(reached, 2);
        assert_eq!(broadcaster.peers(), vec!["one", "three"]);

        broadcaster.dispatch(&result("n0", "n0", true)).await;
        for client in [c1, c3] {
            let mut lines = BufReader::new(client).lines();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "n1 n0 false");
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "n0 n0 true");
        }
    }

    #[tokio::test]
    async fn test_short_write_drops_session() {
        let mut broadcaster = ResultBroadcaster::new(BroadcastConfig::default());
        broadcaster.register(Session::new("slow", Trickle { limit: 3 }));

        let reached = broadcaster.dispatch(&result("n0", "n1", true)).await;

        assert_eq!(reached, 0);
        assert_eq!(broadcaster.session_count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_viewer_times_out() {
        let config = BroadcastConfig {
            write_timeout: Duration::from_millis(20),
            ..BroadcastConfig::default()
        };
        let mut broadcaster = ResultBroadcaster::new(config);
        broadcaster.register(Session::new("stalled", Stalled));

        let reached = broadcaster.dispatch(&result("n0", "n1", true)).await;

        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn test_run_merges_sessions_before_dispatch() {
        let (result_tx, result_rx) = mpsc::channel(8);
        let (session_tx, session_rx) = mpsc::channel(8);
        let broadcaster = ResultBroadcaster::<DuplexStream>::new(BroadcastConfig::default());
        let task = tokio::spawn(broadcaster.run(result_rx, session_rx));

        let (server, client) = tokio::io::duplex(256);
        session_tx.send(Session::new("late", server)).await.unwrap();
        result_tx.send(result("n2", "n1", true)).await.unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "n2 n1 true");

        drop(result_tx);
        task.await.unwrap();
    }

    /// Acceptor replaying a scripted sequence of outcomes.
    struct Scripted {
        outcomes: Arc<Mutex<VecDeque<io::Result<DuplexStream>>>>,
    }

    #[async_trait]
    impl Acceptor for Scripted {
        type Conn = DuplexStream;

        async fn accept(&mut self) -> io::Result<(DuplexStream, String)> {
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(outcome) => outcome.map(|conn| (conn, "scripted".to_string())),
                None => Err(io::Error::from(io::ErrorKind::InvalidInput)),
            }
        }
    }

    #[tokio::test]
    async fn test_accept_loop_survives_transient_errors() {
        let (server, _client) = tokio::io::duplex(16);
        let outcomes = VecDeque::from(vec![
            Err(io::Error::from(io::ErrorKind::ConnectionAborted)),
            Err(io::Error::from_raw_os_error(24)),
            Ok(server),
        ]);
        let acceptor = Scripted {
            outcomes: Arc::new(Mutex::new(outcomes)),
        };
        let (tx, mut rx) = mpsc::channel(4);

        // Ends on the scripted non-transient error after the last outcome.
        accept_loop(acceptor, tx, BroadcastConfig::default()).await;

        let session = rx.recv().await.unwrap();
        assert_eq!(session.peer(), "scripted");
        assert!(rx.recv().await.is_none());
    }
}
