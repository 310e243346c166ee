//! rsyslog-style ingestion over TCP or TLS.
//!
//! Each connection is one-shot: the server performs a single bounded read,
//! decodes every record line in it, hands the resulting events to the store
//! and closes the connection. Nothing is written back to the sender.
//!
//! Error policy per stage:
//! - bind / TLS material: fatal, returned from [`IngestServer::bind`]
//! - accept: logged and counted, the loop keeps accepting
//! - handshake / read / read timeout: logged, connection closed, no records
//! - short line: dropped and counted as `malformed`
//! - bad timestamp: replaced with the current time (see [`decode`])
//! - unknown topic: logged and counted as `unknown_topic`
//! - store failure: logged and counted as `store_error`, never retried

pub mod decode;
pub mod tls;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::decode::{decode_lines, RecordFrame, FRAME_FIELDS};
use crate::config::{bind_address, IngestConfig};
use crate::metrics::Metrics;
use crate::parser::ParserRegistry;
use crate::store::EventStore;

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// What happened to one record line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Parsed and accepted by the store.
    Stored,
    /// Fewer than five framing fields.
    Malformed,
    /// No parser registered for the topic.
    UnknownTopic,
    /// The store rejected the event.
    StoreError,
}

impl RecordOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Malformed => "malformed",
            Self::UnknownTopic => "unknown_topic",
            Self::StoreError => "store_error",
        }
    }
}

/// Per-batch outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub stored: usize,
    pub malformed: usize,
    pub unknown_topic: usize,
    pub store_errors: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Stored => self.stored += 1,
            RecordOutcome::Malformed => self.malformed += 1,
            RecordOutcome::UnknownTopic => self.unknown_topic += 1,
            RecordOutcome::StoreError => self.store_errors += 1,
        }
    }
}

/// Routes decoded records through the parser registry into the store.
pub struct RecordDispatcher<S> {
    parsers: ParserRegistry,
    store: S,
    metrics: Arc<Metrics>,
}

impl<S: EventStore> RecordDispatcher<S> {
    pub fn new(parsers: ParserRegistry, store: S, metrics: Arc<Metrics>) -> Self {
        Self {
            parsers,
            store,
            metrics,
        }
    }

    /// Processes every line of one read buffer.
    ///
    /// Never fails: each line's outcome is logged and counted, and a failure
    /// on one line does not stop the remaining lines.
    pub async fn dispatch_batch(&self, buf: &[u8]) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for decoded in decode_lines(buf) {
            let outcome = match decoded {
                Some(frame) => self.dispatch_frame(frame).await,
                None => {
                    debug!(required = FRAME_FIELDS, "dropping line with too few fields");
                    RecordOutcome::Malformed
                }
            };

            self.metrics.rsyslog_record(outcome.as_str());
            summary.record(outcome);
        }

        summary
    }

    /// Parses one frame with its topic's parser and submits the event.
    pub async fn dispatch_frame(&self, frame: RecordFrame) -> RecordOutcome {
        let Some(parser) = self.parsers.lookup(&frame.topic) else {
            error!(topic = %frame.topic, "unrecognized log type, won't be added");
            return RecordOutcome::UnknownTopic;
        };

        let event = parser.decode(&frame);

        match self.store.add_event(event).await {
            Ok(id) => {
                debug!(id = %id, topic = %frame.topic, host = %frame.host, "added log event");
                RecordOutcome::Stored
            }
            Err(e) => {
                error!(error = %e, topic = %frame.topic, "error adding log event");
                RecordOutcome::StoreError
            }
        }
    }
}

/// Connection-level settings shared by every connection task.
struct ConnectionHandler<S> {
    dispatcher: RecordDispatcher<S>,
    tls: Option<TlsAcceptor>,
    read_buffer_size: usize,
    read_timeout: Option<Duration>,
    metrics: Arc<Metrics>,
}

impl<S: EventStore> ConnectionHandler<S> {
    async fn handle(&self, stream: TcpStream, peer: SocketAddr) {
        let _timer = ConnectionTimer::start(&self.metrics);

        let buf = match self.read_batch(stream).await {
            Ok(buf) => buf,
            Err(e) => {
                error!(peer = %peer, error = %e, "error reading log");
                return;
            }
        };

        let summary = self.dispatcher.dispatch_batch(&buf).await;
        debug!(
            peer = %peer,
            bytes = buf.len(),
            stored = summary.stored,
            malformed = summary.malformed,
            unknown_topic = summary.unknown_topic,
            store_errors = summary.store_errors,
            "processed log batch",
        );
    }

    /// Performs the handshake (if TLS) and the single bounded read.
    async fn read_batch(&self, stream: TcpStream) -> io::Result<Vec<u8>> {
        let read = async {
            let mut buf = vec![0u8; self.read_buffer_size];
            let n = match &self.tls {
                Some(acceptor) => {
                    let mut tls_stream = acceptor.accept(stream).await?;
                    read_once(&mut tls_stream, &mut buf).await?
                }
                None => {
                    let mut stream = stream;
                    read_once(&mut stream, &mut buf).await?
                }
            };
            buf.truncate(n);
            Ok::<_, io::Error>(buf)
        };

        match self.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, read)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "read timed out"))?,
            None => read.await,
        }
    }
}

async fn read_once<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    reader.read(buf).await
}

/// Records connection latency and the active gauge, including when the
/// connection task unwinds.
struct ConnectionTimer<'a> {
    metrics: &'a Metrics,
    start: Instant,
}

impl<'a> ConnectionTimer<'a> {
    fn start(metrics: &'a Metrics) -> Self {
        metrics.ingest_connections_active.inc();
        Self {
            metrics,
            start: Instant::now(),
        }
    }
}

impl Drop for ConnectionTimer<'_> {
    fn drop(&mut self) {
        self.metrics.ingest_connections_active.dec();
        self.metrics.rsyslog_latency(self.start);
    }
}

/// Source of inbound connections for the accept loop.
pub trait Accept: Send + Sync + 'static {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Bound ingestion listener, ready to accept.
pub struct IngestServer<S, L = TcpListener> {
    listener: L,
    local_addr: SocketAddr,
    handler: Arc<ConnectionHandler<S>>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl<S: EventStore> IngestServer<S> {
    /// Binds the listener. TLS is served iff `tls` is provided.
    pub async fn bind(
        cfg: &IngestConfig,
        tls: Option<TlsAcceptor>,
        parsers: ParserRegistry,
        store: S,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let bind_addr = bind_address(&cfg.addr);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("error creating net listener on {bind_addr}"))?;
        let local_addr = listener.local_addr().context("getting local address")?;

        info!(
            addr = %local_addr,
            tls = tls.is_some(),
            topics = ?parsers.topics(),
            max_connections = cfg.max_connections,
            "starting rsyslog server",
        );

        let read_timeout = (!cfg.read_timeout.is_zero()).then_some(cfg.read_timeout);

        Ok(Self {
            listener,
            local_addr,
            handler: Arc::new(ConnectionHandler {
                dispatcher: RecordDispatcher::new(parsers, store, Arc::clone(&metrics)),
                tls,
                read_buffer_size: cfg.read_buffer_size,
                read_timeout,
                metrics,
            }),
            permits: Arc::new(Semaphore::new(cfg.max_connections)),
            cancel: CancellationToken::new(),
        })
    }
}

impl<S: EventStore, L: Accept> IngestServer<S, L> {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.handler.tls.is_some()
    }

    /// Spawns the accept loop and returns a handle used to stop it.
    pub fn start(self) -> IngestHandle {
        let cancel = self.cancel.clone();
        let local_addr = self.local_addr;
        let task = tokio::spawn(self.accept_loop());

        IngestHandle {
            local_addr,
            cancel,
            task,
        }
    }

    /// Accepts connections until the shutdown token is cancelled.
    ///
    /// Each connection runs in its own task once a permit is available.
    /// A failed accept is logged, counted and retried after
    /// [`ACCEPT_ERROR_BACKOFF`]; it never ends the loop. Dropping out of the
    /// loop closes the listener; connection tasks already spawned run to
    /// completion.
    pub async fn accept_loop(self) {
        loop {
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        handler.handle(stream, peer).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    warn!(error = %e, "error accepting logs");
                    self.handler.metrics.ingest_accept_errors.inc();

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(addr = %self.local_addr, "rsyslog server stopped");
    }
}

/// Handle to a running accept loop.
pub struct IngestHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl IngestHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, closes the listener and waits for the loop to exit.
    pub async fn stop(self) -> Result<()> {
        self.cancel.cancel();
        self.task.await.context("joining rsyslog accept loop")
    }
}
