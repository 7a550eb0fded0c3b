//! The SPDY connection engine.
//!
//! One reader task owns the socket read half and dispatches decoded frames;
//! one writer task owns the write half and drains eight prioritized frame
//! queues; every accepted stream runs its handler in a task of its own.
//! Tasks communicate through channels and the queues — the only shared
//! mutable state is the stream table and the per-stream records, each
//! behind its own lock.

mod client;
mod flow_control;
mod limit;
mod server;
mod settings;
mod stream;
mod writer;

pub use client::{connect, Client, PendingResponse, PushedStream, RequestHead, Response};
pub use flow_control::{DefaultFlowControl, FlowControlPolicy, FlowControlViolation};
pub use limit::{StreamLimit, NO_STREAM_LIMIT};
pub use server::{HandlerFuture, PushStream, Request, ResponseWriter, StreamHandler};
pub use settings::{default_client_settings, default_server_settings, SettingsStore};
pub use stream::StreamState;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, trace, warn};

use self::flow_control::FlowWindow;
use self::stream::StreamRecord;
use self::writer::OutputQueues;
use crate::frame::{
    DataFrame, Frame, FrameDecoder, FrameError, GoawayFrame, GoawayStatus, PingFrame, Priority,
    RstStreamFrame, SettingId, SettingsFrame, StatusCode, StreamId, SynReplyFrame, SynStreamFrame,
    Version, WindowUpdateFrame, DEFAULT_INITIAL_CLIENT_WINDOW_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_CONCURRENT_STREAMS, MAX_DATA_SIZE, MAX_FRAME_SIZE, MAX_STREAM_ID,
    MAX_TRANSFER_WINDOW_SIZE,
};
use crate::headers::Headers;

/// Which side of the connection this engine terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Connection-level observation hooks.
///
/// The engine calls these as peer-initiated streams are admitted or
/// refused and as live streams are torn down by RST_STREAM, so the
/// embedder can keep counters without threading state through every
/// handler. Implementations run on the reader task and must be cheap
/// and non-blocking.
pub trait ConnectionEvents: Send + Sync + std::fmt::Debug {
    /// A peer-initiated stream was admitted.
    fn stream_accepted(&self, stream_id: StreamId) {
        let _ = stream_id;
    }

    /// A peer-initiated stream was refused with REFUSED_STREAM.
    fn stream_refused(&self, stream_id: StreamId) {
        let _ = stream_id;
    }

    /// A live stream was torn down by RST_STREAM, ours or the peer's.
    fn stream_reset(&self, stream_id: StreamId, status: StatusCode) {
        let _ = (stream_id, status);
    }
}

/// Default observer: ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvents;

impl ConnectionEvents for NoEvents {}

/// Per-connection configuration.
///
/// There is no process-global state: every knob, including the set of
/// versions advertised during negotiation, travels with the connection.
#[derive(Debug, Clone)]
pub struct Config {
    /// The version negotiated for this connection (NPN/ALPN is the
    /// embedder's job).
    pub version: Version,
    /// Ceiling on concurrently active peer-initiated streams.
    pub max_concurrent_streams: u32,
    /// Payload-size ceiling; larger frames are FRAME_TOO_LARGE.
    pub max_frame_size: u32,
    /// Benign-anomaly budget before the connection gives up.
    pub max_benign_errors: u32,
    /// Socket read deadline.
    pub read_timeout: Option<Duration>,
    /// Socket write deadline.
    pub write_timeout: Option<Duration>,
    /// Receive-window policy (v3 and later).
    pub flow_control: Arc<dyn FlowControlPolicy>,
    /// Stream lifecycle observer.
    pub events: Arc<dyn ConnectionEvents>,
}

impl Config {
    /// Defaults for a server-side connection.
    pub fn server(version: Version) -> Self {
        Config {
            version,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            max_frame_size: MAX_FRAME_SIZE,
            max_benign_errors: 10,
            read_timeout: None,
            write_timeout: None,
            flow_control: Arc::new(DefaultFlowControl::new(DEFAULT_INITIAL_WINDOW_SIZE)),
            events: Arc::new(NoEvents),
        }
    }

    /// Defaults for a client-side connection. Clients advertise a much
    /// larger receive window.
    pub fn client(version: Version) -> Self {
        Config {
            flow_control: Arc::new(DefaultFlowControl::new(DEFAULT_INITIAL_CLIENT_WINDOW_SIZE)),
            ..Config::server(version)
        }
    }

    pub fn max_concurrent_streams(mut self, value: u32) -> Self {
        self.max_concurrent_streams = value;
        self
    }

    pub fn max_frame_size(mut self, value: u32) -> Self {
        self.max_frame_size = value;
        self
    }

    pub fn max_benign_errors(mut self, value: u32) -> Self {
        self.max_benign_errors = value;
        self
    }

    pub fn read_timeout(mut self, value: Option<Duration>) -> Self {
        self.read_timeout = value;
        self
    }

    pub fn write_timeout(mut self, value: Option<Duration>) -> Self {
        self.write_timeout = value;
        self
    }

    pub fn flow_control(mut self, policy: Arc<dyn FlowControlPolicy>) -> Self {
        self.flow_control = policy;
        self
    }

    pub fn events(mut self, events: Arc<dyn ConnectionEvents>) -> Self {
        self.events = events;
        self
    }
}

/// Connection-terminating errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("peer reported fatal status {0}")]
    PeerFatal(StatusCode),
    #[error("too many benign protocol errors")]
    TooManyBenignErrors,
    #[error("connection-level flow control violated")]
    FlowControl,
    #[error("read timed out")]
    ReadTimeout,
    #[error("write timed out")]
    WriteTimeout,
}

/// Errors surfaced to stream handlers and client calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream reset: {0}")]
    Reset(StatusCode),
    #[error("connection is closed")]
    ConnectionClosed,
    #[error("connection is going away")]
    GoingAway,
    #[error("stream is closed")]
    StreamClosed,
    #[error("stream ids exhausted")]
    StreamsExhausted,
    #[error("too many active streams")]
    TooManyStreams,
}

/// A completed ping round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub id: u32,
}

/// Streamed inbound payload for one stream.
#[derive(Debug)]
pub struct Body {
    rx: mpsc::UnboundedReceiver<Result<Bytes, StreamError>>,
}

impl Body {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<Result<Bytes, StreamError>>) -> Self {
        Body { rx }
    }

    /// The next chunk of payload, `None` after a clean FIN.
    pub async fn data(&mut self) -> Option<Result<Bytes, StreamError>> {
        self.rx.recv().await
    }

    /// Collect the remaining payload into one buffer.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.data().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

/// Serve one SPDY connection in the server role.
///
/// Runs until the peer disconnects, the connection drains after GOAWAY, or
/// a fatal protocol error occurs. The transport is typically a freshly
/// negotiated TLS stream, but any ordered byte stream works.
pub async fn serve<S, H>(io: S, config: Config, handler: Arc<H>) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    H: StreamHandler,
{
    let handler: Arc<dyn StreamHandler> = handler;
    let shared = Shared::new(Role::Server, config, Bridge::Server { handler });
    run_io(io, shared).await
}

/// Split the transport, start the writer task, and run the reader loop to
/// completion.
pub(crate) async fn run_io<S>(io: S, shared: Arc<Shared>) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    debug!(version = %shared.config.version, role = ?shared.role, "connection starting");
    let (read_half, write_half) = tokio::io::split(io);

    shared.queue_initial_settings();

    let writer_shared = shared.clone();
    let writer_task =
        tokio::spawn(async move { writer::write_loop(write_half, writer_shared).await });

    let result = read_loop(read_half, shared.clone()).await;
    shared.finalize();

    let writer_result = match writer_task.await {
        Ok(result) => result,
        Err(_) => Ok(()),
    };

    debug!(result = ?result, "connection finished");
    match result {
        Ok(()) => writer_result,
        Err(e) => Err(e),
    }
}

/// The reader task: decode frames in arrival order and dispatch them.
async fn read_loop<R>(mut reader: R, shared: Arc<Shared>) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new(shared.config.version);
    decoder.set_max_frame_size(shared.config.max_frame_size);
    let mut stop = shared.subscribe_stop();
    let mut buf = bytes::BytesMut::with_capacity(16 * 1024);

    loop {
        // Drain every complete frame before touching the socket again.
        loop {
            match decoder.decode(&mut buf) {
                Ok(Some(frame)) => {
                    trace!(stream = %frame.stream_id(), "frame received");
                    Shared::dispatch(&shared, frame)?;
                }
                Ok(None) => break,
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "fatal decoding error");
                    shared.send_goaway(GoawayStatus::ProtocolError);
                    return Err(e.into());
                }
                Err(FrameError::HeaderBlock { stream_id, reason }) => {
                    warn!(stream = %stream_id, %reason, "discarding bad header block");
                    shared.rst_benign(stream_id, StatusCode::ProtocolError)?;
                }
                Err(e) => {
                    shared.note_benign(&e.to_string())?;
                }
            }
        }

        if *stop.borrow() {
            return Ok(());
        }

        let n = tokio::select! {
            biased;
            _ = stop.changed() => return Ok(()),
            n = read_some(&mut reader, &mut buf, shared.config.read_timeout) => n?,
        };
        if n == 0 {
            return if shared.is_draining() {
                Ok(())
            } else {
                Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into())
            };
        }
    }
}

async fn read_some<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut bytes::BytesMut,
    deadline: Option<Duration>,
) -> Result<usize, ConnectionError> {
    match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, reader.read_buf(buf)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ConnectionError::ReadTimeout),
        },
        None => Ok(reader.read_buf(buf).await?),
    }
}

/// Role-specific delivery target for peer-initiated streams.
pub(crate) enum Bridge {
    Server { handler: Arc<dyn StreamHandler> },
    Client { pushes: mpsc::UnboundedSender<PushedStream> },
}

/// State shared between the reader, the writer, and stream handles.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) role: Role,
    bridge: Bridge,
    streams: Mutex<HashMap<u32, Arc<StreamRecord>>>,
    /// Bounds peer-initiated streams (our advertised limit).
    accept_limit: StreamLimit,
    /// Bounds locally-initiated streams (the peer's advertised limit).
    initiate_limit: StreamLimit,
    settings: Mutex<SettingsStore>,
    pings: Mutex<HashMap<u32, oneshot::Sender<Ping>>>,
    next_ping_id: AtomicU32,
    next_stream_id: AtomicU32,
    /// Highest peer-initiated stream id we accepted; GOAWAY's last-good.
    last_peer_stream_id: AtomicU32,
    benign_errors: AtomicU32,
    pub(crate) outgoing: OutputQueues,
    stop_tx: watch::Sender<bool>,
    goaway_sent: AtomicBool,
    goaway_received: AtomicBool,
    remote_last_good: AtomicU32,
    draining: AtomicBool,
    finalized: AtomicBool,
    /// The peer's INITIAL_WINDOW_SIZE, governing new streams' send windows.
    send_initial_window: AtomicU32,
    /// Connection-level send window (SPDY/3.1). Lock ordering: this lock
    /// is taken before any stream's flow lock.
    conn_send_window: Mutex<i64>,
    /// Connection-level receive window (SPDY/3.1).
    conn_recv_window: Mutex<i64>,
    conn_recv_initial: u32,
    /// Certificate vector slots populated by CREDENTIAL frames.
    certificates: Mutex<HashMap<u16, Vec<Bytes>>>,
}

impl Shared {
    pub(crate) fn new(role: Role, config: Config, bridge: Bridge) -> Arc<Self> {
        let (stop_tx, _) = watch::channel(false);
        let recv_initial = config.flow_control.initial_window_size();
        let (next_stream_id, next_ping_id) = match role {
            Role::Server => (2, 2),
            Role::Client => (1, 1),
        };
        Arc::new(Shared {
            accept_limit: StreamLimit::new(config.max_concurrent_streams),
            initiate_limit: StreamLimit::new(DEFAULT_MAX_CONCURRENT_STREAMS),
            config,
            role,
            bridge,
            streams: Mutex::new(HashMap::new()),
            settings: Mutex::new(SettingsStore::new()),
            pings: Mutex::new(HashMap::new()),
            next_ping_id: AtomicU32::new(next_ping_id),
            next_stream_id: AtomicU32::new(next_stream_id),
            last_peer_stream_id: AtomicU32::new(0),
            benign_errors: AtomicU32::new(0),
            outgoing: OutputQueues::new(),
            stop_tx,
            goaway_sent: AtomicBool::new(false),
            goaway_received: AtomicBool::new(false),
            remote_last_good: AtomicU32::new(0),
            draining: AtomicBool::new(false),
            finalized: AtomicBool::new(false),
            send_initial_window: AtomicU32::new(DEFAULT_INITIAL_WINDOW_SIZE),
            conn_send_window: Mutex::new(i64::from(DEFAULT_INITIAL_WINDOW_SIZE)),
            conn_recv_window: Mutex::new(i64::from(recv_initial)),
            conn_recv_initial: recv_initial,
            certificates: Mutex::new(HashMap::new()),
        })
    }

    // Stop signal plumbing.

    pub(crate) fn subscribe_stop(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    pub(crate) fn signal_stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    // Outbound queue helpers. Control frames always ride queue 0.

    pub(crate) fn queue_control(&self, frame: Frame) -> Result<(), StreamError> {
        self.outgoing
            .push(Priority::HIGHEST, frame)
            .map_err(|_| StreamError::ConnectionClosed)
    }

    pub(crate) fn queue_data_frame(
        &self,
        priority: Priority,
        frame: DataFrame,
    ) -> Result<(), StreamError> {
        self.outgoing
            .push(priority, Frame::Data(frame))
            .map_err(|_| StreamError::ConnectionClosed)
    }

    fn queue_initial_settings(&self) {
        let window = self.config.flow_control.initial_window_size();
        let frame = match self.role {
            Role::Server => default_server_settings(
                self.config.version,
                self.config.max_concurrent_streams,
                window,
            ),
            Role::Client => default_client_settings(
                self.config.version,
                self.config.max_concurrent_streams,
                window,
            ),
        };
        let _ = self.queue_control(Frame::Settings(frame));
    }

    // Stream table.

    pub(crate) fn get_stream(&self, id: StreamId) -> Option<Arc<StreamRecord>> {
        self.streams.lock().get(&id.value()).cloned()
    }

    pub(crate) fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn test_insert_stream(&self, record: Arc<StreamRecord>) {
        self.accept_limit.add();
        self.streams.lock().insert(record.id.value(), record);
    }

    /// Remove a stream from the table, releasing its limiter slot. Fires
    /// the drain check so a parked GOAWAY can complete.
    pub(crate) fn take_stream(&self, id: StreamId) -> Option<Arc<StreamRecord>> {
        let record = self.streams.lock().remove(&id.value())?;
        if record.local_origin {
            self.initiate_limit.release();
        } else {
            self.accept_limit.release();
        }
        self.check_drained();
        Some(record)
    }

    fn check_drained(&self) {
        if self.is_draining() && self.streams.lock().is_empty() {
            self.send_goaway(GoawayStatus::Ok);
            self.finalize();
        }
    }

    fn new_flow_window(&self) -> FlowWindow {
        FlowWindow::new(
            self.send_initial_window.load(Ordering::SeqCst),
            self.config.flow_control.initial_window_size(),
        )
    }

    fn conn_send_guard(&self) -> Option<MutexGuard<'_, i64>> {
        if self.config.version.has_connection_window() {
            Some(self.conn_send_window.lock())
        } else {
            None
        }
    }

    // Error accounting and teardown.

    /// Count a benign anomaly; past the ceiling the connection escalates
    /// to GOAWAY(INTERNAL_ERROR) and closes.
    pub(crate) fn note_benign(&self, reason: &str) -> Result<(), ConnectionError> {
        let count = self.benign_errors.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(%reason, count, "benign protocol anomaly");
        if count > self.config.max_benign_errors {
            self.send_goaway(GoawayStatus::InternalError);
            return Err(ConnectionError::TooManyBenignErrors);
        }
        Ok(())
    }

    fn rst_benign(&self, id: StreamId, status: StatusCode) -> Result<(), ConnectionError> {
        if let Some(record) = self.get_stream(id) {
            self.reset_stream(&record, status);
        } else {
            let _ = self.queue_control(Frame::RstStream(RstStreamFrame {
                stream_id: id,
                status,
            }));
        }
        self.note_benign(&format!("stream {} rejected with {}", id, status))
    }

    /// Locally terminate a stream: RST out, CLOSED, queues drained with an
    /// error. Idempotent.
    pub(crate) fn reset_stream(&self, record: &Arc<StreamRecord>, status: StatusCode) {
        if self.take_stream(record.id).is_none() {
            return;
        }
        debug!(stream = %record.id, %status, "resetting stream");
        record.close();
        record.fail(StreamError::Reset(status));
        let _ = self.queue_control(Frame::RstStream(RstStreamFrame {
            stream_id: record.id,
            status,
        }));
        self.config.events.stream_reset(record.id, status);
    }

    /// Emit GOAWAY once and stop admitting new streams in both directions.
    pub(crate) fn send_goaway(&self, status: GoawayStatus) {
        if self.goaway_sent.swap(true, Ordering::SeqCst) {
            return;
        }
        self.draining.store(true, Ordering::SeqCst);
        let last_good = StreamId::new(self.last_peer_stream_id.load(Ordering::SeqCst));
        debug!(%last_good, %status, "sending GOAWAY");
        let _ = self.queue_control(Frame::Goaway(GoawayFrame {
            last_good_stream_id: last_good,
            status,
        }));
    }

    /// Tear the connection down: close the queues (the writer drains its
    /// control queue and exits), raise the stop signal, and fail every
    /// remaining stream and pending ping.
    pub(crate) fn finalize(&self) {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outgoing.close();
        self.signal_stop();
        let records: Vec<_> = self.streams.lock().drain().map(|(_, r)| r).collect();
        for record in records {
            record.close();
            record.fail(StreamError::ConnectionClosed);
        }
        self.pings.lock().clear();
    }

    /// Begin a graceful shutdown: GOAWAY now, teardown once live streams
    /// complete.
    pub(crate) fn close_gracefully(&self) {
        self.send_goaway(GoawayStatus::Ok);
        self.check_drained();
    }

    // Ping correlation.

    /// Send a PING and hand back the single-use completion channel. The
    /// channel closes without a value if the connection dies first; any
    /// timeout is the caller's to impose.
    pub(crate) fn start_ping(&self) -> Result<oneshot::Receiver<Ping>, StreamError> {
        let id = self.next_ping_id.fetch_add(2, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pings.lock().insert(id, tx);
        if let Err(e) = self.queue_control(Frame::Ping(PingFrame { id })) {
            self.pings.lock().remove(&id);
            return Err(e);
        }
        Ok(rx)
    }

    // Outbound stream data paths, shared by the server and client bridges.

    /// Flow-controlled send. Whatever fits the windows goes out now; the
    /// rest is buffered against future WINDOW_UPDATEs. Never blocks.
    pub(crate) fn write_data(
        &self,
        record: &Arc<StreamRecord>,
        data: &[u8],
    ) -> Result<usize, StreamError> {
        if record.state().closed_here() {
            return Err(StreamError::StreamClosed);
        }
        if data.is_empty() {
            return Ok(0);
        }

        if !self.config.version.has_flow_control() {
            for chunk in data.chunks(MAX_DATA_SIZE) {
                self.queue_data_frame(
                    record.priority,
                    DataFrame {
                        stream_id: record.id,
                        fin: false,
                        data: Bytes::copy_from_slice(chunk),
                    },
                )?;
            }
            return Ok(data.len());
        }

        let chunks = {
            let mut conn = self.conn_send_guard();
            let mut flow = record.flow.lock();
            flow.write(data, conn.as_deref_mut(), MAX_DATA_SIZE)
        };
        let sent: usize = chunks.iter().map(|c| c.len()).sum();
        if sent < data.len() {
            debug!(stream = %record.id, buffered = data.len() - sent, "stream is now constrained");
        }
        for chunk in chunks {
            self.queue_data_frame(
                record.priority,
                DataFrame {
                    stream_id: record.id,
                    fin: false,
                    data: chunk,
                },
            )?;
        }
        Ok(data.len())
    }

    /// Half-close the local side: FIN on the frame that empties the send
    /// buffer, or an empty FIN DATA when nothing is pending. Idempotent.
    pub(crate) fn finish_stream(&self, record: &Arc<StreamRecord>) -> Result<(), StreamError> {
        if record.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if record.state().closed_here() {
            return Ok(());
        }

        if self.config.version.has_flow_control() {
            let mut flow = record.flow.lock();
            if flow.buffered() > 0 {
                // The buffered tail will carry FIN when the window lets
                // it drain.
                flow.set_fin_on_drain();
                return Ok(());
            }
        }

        // FIN rides the last frame still waiting in the output queues;
        // only an idle stream needs a dedicated empty FIN frame.
        if !self.outgoing.set_fin_on_last_data(record.id) {
            self.queue_data_frame(
                record.priority,
                DataFrame {
                    stream_id: record.id,
                    fin: true,
                    data: Bytes::new(),
                },
            )?;
        }
        if record.close_here().is_closed() {
            self.take_stream(record.id);
        }
        Ok(())
    }

    /// Run-down after a server handler returns: whatever it left unsent
    /// is completed for it, so a handler that simply returns still yields
    /// a well-formed response.
    pub(crate) fn complete_stream(&self, record: &Arc<StreamRecord>) {
        if self.get_stream(record.id).is_none() {
            return;
        }
        if !record.replied.swap(true, Ordering::SeqCst) {
            record.finished.store(true, Ordering::SeqCst);
            let mut headers = Headers::new();
            match self.config.version {
                Version::V2 => {
                    headers.set("status", "200 OK");
                    headers.set("version", "HTTP/1.1");
                }
                Version::V3 | Version::V3_1 => {
                    headers.set(":status", "200 OK");
                    headers.set(":version", "HTTP/1.1");
                }
            }
            let _ = self.queue_control(Frame::SynReply(SynReplyFrame {
                stream_id: record.id,
                fin: true,
                headers,
            }));
            if record.close_here().is_closed() {
                self.take_stream(record.id);
            }
            return;
        }
        let _ = self.finish_stream(record);
    }

    /// Push buffered data into a freshly grown window.
    fn drain_stream(&self, record: &Arc<StreamRecord>) {
        let (chunks, fin) = {
            let mut conn = self.conn_send_guard();
            let mut flow = record.flow.lock();
            flow.drain(conn.as_deref_mut(), MAX_DATA_SIZE)
        };
        if chunks.is_empty() {
            return;
        }
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            let _ = self.queue_data_frame(
                record.priority,
                DataFrame {
                    stream_id: record.id,
                    fin: fin && i == last,
                    data: chunk,
                },
            );
        }
        if fin && record.close_here().is_closed() {
            self.take_stream(record.id);
        }
    }

    /// Open a locally-initiated stream (client request or server push).
    /// `prepare` runs on the new record after it is in the table but
    /// before SYN_STREAM is queued, so consumer channels exist before any
    /// response frame can possibly arrive.
    pub(crate) fn open_stream(
        &self,
        headers: Headers,
        priority: Priority,
        associated: StreamId,
        fin: bool,
        unidirectional: bool,
        prepare: impl FnOnce(&Arc<StreamRecord>),
    ) -> Result<Arc<StreamRecord>, StreamError> {
        if self.is_draining() {
            return Err(StreamError::GoingAway);
        }
        if !self.initiate_limit.add() {
            return Err(StreamError::TooManyStreams);
        }

        let id = self.next_stream_id.fetch_add(2, Ordering::SeqCst);
        if id > MAX_STREAM_ID {
            // Id space exhausted: no new streams, existing ones continue.
            self.initiate_limit.release();
            return Err(StreamError::StreamsExhausted);
        }
        let id = StreamId::new(id);

        let mut state = StreamState::Open;
        if unidirectional {
            state = state.close_there();
        }
        if fin {
            state = state.close_here();
        }

        let record = Arc::new(StreamRecord::new(
            id,
            priority,
            true,
            state,
            self.new_flow_window(),
        ));
        self.streams.lock().insert(id.value(), record.clone());
        prepare(&record);

        if let Err(e) = self.queue_control(Frame::SynStream(SynStreamFrame {
            stream_id: id,
            associated_stream_id: associated,
            priority,
            slot: 0,
            fin,
            unidirectional,
            headers,
        })) {
            self.take_stream(id);
            return Err(e);
        }
        if record.state().is_closed() {
            self.take_stream(id);
        }
        Ok(record)
    }

    // Frame dispatch.

    pub(crate) fn dispatch(shared: &Arc<Shared>, frame: Frame) -> Result<(), ConnectionError> {
        match frame {
            Frame::SynStream(f) => Shared::on_syn_stream(shared, f),
            Frame::SynReply(f) => shared.on_syn_reply(f),
            Frame::RstStream(f) => shared.on_rst_stream(f),
            Frame::Settings(f) => shared.on_settings(f),
            Frame::Noop => Ok(()),
            Frame::Ping(f) => shared.on_ping(f),
            Frame::Goaway(f) => shared.on_goaway(f),
            Frame::Headers(f) => shared.on_headers(f),
            Frame::WindowUpdate(f) => shared.on_window_update(f),
            Frame::Credential(f) => {
                debug!(slot = f.slot, "storing credential");
                shared.certificates.lock().insert(f.slot, f.certificates);
                Ok(())
            }
            Frame::Data(f) => shared.on_data(f),
            Frame::Unknown(f) => {
                shared.note_benign(&format!("unknown frame type {}", f.frame_type))
            }
        }
    }

    fn on_syn_stream(shared: &Arc<Shared>, frame: SynStreamFrame) -> Result<(), ConnectionError> {
        let id = frame.stream_id;

        if shared.is_draining() {
            // Past GOAWAY in either direction nothing new is admitted.
            let _ = shared.queue_control(Frame::RstStream(RstStreamFrame {
                stream_id: id,
                status: StatusCode::RefusedStream,
            }));
            shared.config.events.stream_refused(id);
            return Ok(());
        }

        let parity_ok = match shared.role {
            Role::Server => id.is_client_initiated(),
            Role::Client => id.is_server_initiated(),
        };
        if !parity_ok {
            return shared.rst_benign(id, StatusCode::ProtocolError);
        }
        if id.value() <= shared.last_peer_stream_id.load(Ordering::SeqCst) {
            return shared.rst_benign(id, StatusCode::ProtocolError);
        }
        shared.last_peer_stream_id.store(id.value(), Ordering::SeqCst);

        if !shared.accept_limit.add() {
            debug!(stream = %id, "refusing stream, concurrency limit reached");
            let _ = shared.queue_control(Frame::RstStream(RstStreamFrame {
                stream_id: id,
                status: StatusCode::RefusedStream,
            }));
            shared.config.events.stream_refused(id);
            return Ok(());
        }

        let mut state = StreamState::Open;
        if frame.unidirectional {
            // The opener is the only sender on a unidirectional stream.
            state = state.close_here();
        }
        if frame.fin {
            state = state.close_there();
        }

        let record = Arc::new(StreamRecord::new(
            id,
            frame.priority,
            false,
            state,
            shared.new_flow_window(),
        ));
        *record.headers.lock() = frame.headers.clone();
        let data_rx = record.data_channel();
        if frame.fin {
            record.end_input();
        }
        shared.streams.lock().insert(id.value(), record.clone());
        debug!(stream = %id, priority = %frame.priority, "stream opened by peer");
        shared.config.events.stream_accepted(id);

        match &shared.bridge {
            Bridge::Server { handler } => {
                let request =
                    match server::build_request(shared.config.version, &frame, Body::new(data_rx)) {
                        Ok(request) => request,
                        Err(reason) => {
                            warn!(stream = %id, %reason, "rejecting malformed request");
                            shared.reset_stream(&record, StatusCode::ProtocolError);
                            return shared.note_benign("malformed request headers");
                        }
                    };
                let response = ResponseWriter::new(shared.clone(), record.clone());
                let task = tokio::spawn(handler.handle(request, response));

                let supervisor = shared.clone();
                tokio::spawn(async move {
                    match task.await {
                        Ok(()) => supervisor.complete_stream(&record),
                        Err(e) if e.is_panic() => {
                            error!(stream = %record.id, "stream handler panicked");
                            supervisor.reset_stream(&record, StatusCode::InternalError);
                        }
                        Err(_) => {}
                    }
                });
            }
            Bridge::Client { pushes } => {
                if !frame.unidirectional || frame.associated_stream_id.is_connection_level() {
                    shared.reset_stream(&record, StatusCode::ProtocolError);
                    return shared.note_benign("push stream without association");
                }
                let push = PushedStream {
                    stream_id: id,
                    associated_stream_id: frame.associated_stream_id,
                    priority: frame.priority,
                    headers: frame.headers,
                    body: Body::new(data_rx),
                };
                if pushes.send(push).is_err() {
                    // Nobody is consuming pushes on this connection.
                    shared.reset_stream(&record, StatusCode::Cancel);
                }
            }
        }
        Ok(())
    }

    fn on_syn_reply(&self, frame: SynReplyFrame) -> Result<(), ConnectionError> {
        let Some(record) = self.get_stream(frame.stream_id) else {
            return self.rst_benign(frame.stream_id, StatusCode::InvalidStream);
        };
        if record.replied.swap(true, Ordering::SeqCst) {
            self.reset_stream(&record, StatusCode::StreamInUse);
            return self.note_benign("duplicate SYN_REPLY");
        }

        record.headers.lock().merge(&frame.headers);
        record.deliver_reply(frame.headers, frame.fin);

        if frame.fin {
            let state = record.close_there();
            record.end_input();
            if state.is_closed() {
                self.take_stream(record.id);
            }
        }
        Ok(())
    }

    fn on_headers(&self, frame: crate::frame::HeadersFrame) -> Result<(), ConnectionError> {
        let Some(record) = self.get_stream(frame.stream_id) else {
            return self.rst_benign(frame.stream_id, StatusCode::InvalidStream);
        };
        record.headers.lock().merge(&frame.headers);
        if frame.fin {
            let state = record.close_there();
            record.end_input();
            if state.is_closed() {
                self.take_stream(record.id);
            }
        }
        Ok(())
    }

    fn on_data(&self, frame: DataFrame) -> Result<(), ConnectionError> {
        let Some(record) = self.get_stream(frame.stream_id) else {
            return self.rst_benign(frame.stream_id, StatusCode::InvalidStream);
        };
        if record.state().closed_there() {
            self.reset_stream(&record, StatusCode::StreamAlreadyClosed);
            return self.note_benign("data on a half-closed stream");
        }

        if self.config.version.has_flow_control() {
            let regrow = {
                let mut flow = record.flow.lock();
                match flow.on_receive(frame.data.len()) {
                    Ok(()) => flow.regrow(record.id, &*self.config.flow_control),
                    Err(_) => {
                        // Window already negative: reset, close, and take
                        // no further action on this stream.
                        drop(flow);
                        self.reset_stream(&record, StatusCode::FlowControlError);
                        return Ok(());
                    }
                }
            };
            if regrow != 0 {
                let _ = self.queue_control(Frame::WindowUpdate(WindowUpdateFrame {
                    stream_id: record.id,
                    delta: regrow,
                }));
            }

            if self.config.version.has_connection_window() {
                let delta = {
                    let mut window = self.conn_recv_window.lock();
                    *window -= frame.data.len() as i64;
                    let delta = self.config.flow_control.receive_data(
                        StreamId::CONNECTION,
                        self.conn_recv_initial,
                        *window,
                    );
                    *window += i64::from(delta);
                    delta
                };
                if delta != 0 {
                    let _ = self.queue_control(Frame::WindowUpdate(WindowUpdateFrame {
                        stream_id: StreamId::CONNECTION,
                        delta,
                    }));
                }
            }
        }

        if !frame.data.is_empty() {
            record.deliver_data(frame.data);
        }
        if frame.fin {
            let state = record.close_there();
            record.end_input();
            if state.is_closed() {
                self.take_stream(record.id);
            }
        }
        Ok(())
    }

    fn on_rst_stream(&self, frame: RstStreamFrame) -> Result<(), ConnectionError> {
        if frame.status.is_fatal() {
            error!(stream = %frame.stream_id, status = %frame.status, "peer reported fatal error");
            let status = match frame.status {
                StatusCode::InternalError => GoawayStatus::InternalError,
                _ => GoawayStatus::ProtocolError,
            };
            self.send_goaway(status);
            return Err(ConnectionError::PeerFatal(frame.status));
        }

        if let Some(record) = self.take_stream(frame.stream_id) {
            debug!(stream = %frame.stream_id, status = %frame.status, "stream reset by peer");
            record.close();
            record.fail(StreamError::Reset(frame.status));
            self.config.events.stream_reset(frame.stream_id, frame.status);
        }
        Ok(())
    }

    fn on_settings(&self, frame: SettingsFrame) -> Result<(), ConnectionError> {
        for setting in &frame.settings {
            match setting.id {
                SettingId::MaxConcurrentStreams => {
                    self.initiate_limit.set_limit(setting.value);
                }
                SettingId::InitialWindowSize if self.config.version.has_flow_control() => {
                    let old = self
                        .send_initial_window
                        .swap(setting.value, Ordering::SeqCst);
                    if old != setting.value {
                        debug!(old, new = setting.value, "initial window renegotiated");
                        let records: Vec<_> = self.streams.lock().values().cloned().collect();
                        for record in &records {
                            record.flow.lock().adjust_send_initial(setting.value);
                        }
                        if setting.value > old {
                            for record in &records {
                                self.drain_stream(record);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        self.settings.lock().store(&frame);
        Ok(())
    }

    fn on_ping(&self, frame: PingFrame) -> Result<(), ConnectionError> {
        let peer_originated = match self.role {
            Role::Server => frame.id % 2 == 1,
            Role::Client => frame.id % 2 == 0,
        };
        if peer_originated {
            // Echo the probe straight back at top priority.
            let _ = self.queue_control(Frame::Ping(frame));
        } else if let Some(tx) = self.pings.lock().remove(&frame.id) {
            let _ = tx.send(Ping { id: frame.id });
        } else {
            debug!(id = frame.id, "ignoring unsolicited ping reply");
        }
        Ok(())
    }

    fn on_goaway(&self, frame: GoawayFrame) -> Result<(), ConnectionError> {
        debug!(last_good = %frame.last_good_stream_id, status = %frame.status, "peer sent GOAWAY");
        self.goaway_received.store(true, Ordering::SeqCst);
        self.remote_last_good
            .store(frame.last_good_stream_id.value(), Ordering::SeqCst);
        self.draining.store(true, Ordering::SeqCst);

        // Locally-initiated streams beyond last-good will never be
        // processed; everything at or below it completes normally.
        let doomed: Vec<_> = self
            .streams
            .lock()
            .values()
            .filter(|r| r.local_origin && r.id.value() > frame.last_good_stream_id.value())
            .cloned()
            .collect();
        for record in doomed {
            debug!(stream = %record.id, "terminating stream past GOAWAY last-good");
            record.close();
            record.fail(StreamError::GoingAway);
            self.take_stream(record.id);
        }
        self.check_drained();
        Ok(())
    }

    fn on_window_update(&self, frame: WindowUpdateFrame) -> Result<(), ConnectionError> {
        if !self.config.version.has_flow_control() {
            return Ok(());
        }

        if frame.stream_id.is_connection_level() {
            if !self.config.version.has_connection_window() {
                return self.note_benign("window update for stream 0");
            }
            {
                let mut window = self.conn_send_window.lock();
                if i64::from(frame.delta) + *window > MAX_TRANSFER_WINDOW_SIZE {
                    drop(window);
                    self.send_goaway(GoawayStatus::ProtocolError);
                    return Err(ConnectionError::FlowControl);
                }
                *window += i64::from(frame.delta);
            }
            // The shared window grew; revisit constrained streams in id
            // order.
            let mut records: Vec<_> = self.streams.lock().values().cloned().collect();
            records.sort_by_key(|r| r.id);
            for record in records {
                let constrained = record.flow.lock().is_constrained();
                if constrained {
                    self.drain_stream(&record);
                }
            }
            return Ok(());
        }

        let Some(record) = self.get_stream(frame.stream_id) else {
            // Updates for finished streams are routine.
            return Ok(());
        };
        let result = record.flow.lock().window_update(frame.delta);
        match result {
            Ok(()) => {
                trace!(stream = %record.id, delta = frame.delta, "send window grew");
                self.drain_stream(&record);
            }
            Err(_) => {
                warn!(stream = %record.id, delta = frame.delta, "window update overflow");
                self.reset_stream(&record, StatusCode::FlowControlError);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    impl StreamHandler for NoopHandler {
        fn handle(&self, _request: Request, _response: ResponseWriter) -> HandlerFuture {
            Box::pin(async {})
        }
    }

    fn server_shared(config: Config) -> Arc<Shared> {
        Shared::new(
            Role::Server,
            config,
            Bridge::Server {
                handler: Arc::new(NoopHandler),
            },
        )
    }

    fn syn_stream(id: u32) -> Frame {
        let mut headers = Headers::new();
        headers.set(":method", "GET");
        headers.set(":path", "/");
        headers.set(":version", "HTTP/1.1");
        headers.set(":host", "example.com");
        headers.set(":scheme", "https");
        Frame::SynStream(SynStreamFrame {
            stream_id: StreamId::new(id),
            associated_stream_id: StreamId::CONNECTION,
            priority: Priority::new(3),
            slot: 0,
            fin: true,
            unidirectional: false,
            headers,
        })
    }

    fn drain_frames(shared: &Shared) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = shared.outgoing.try_pop() {
            frames.push(frame);
        }
        frames
    }

    // Admission tests

    #[tokio::test]
    async fn test_refused_stream_at_zero_limit() {
        let shared = server_shared(Config::server(Version::V3).max_concurrent_streams(0));
        Shared::dispatch(&shared, syn_stream(1)).unwrap();

        let frames = drain_frames(&shared);
        assert!(frames.iter().any(|f| matches!(
            f,
            Frame::RstStream(RstStreamFrame {
                status: StatusCode::RefusedStream,
                ..
            })
        )));
        assert_eq!(shared.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_even_stream_id_from_client_is_rejected() {
        let shared = server_shared(Config::server(Version::V3));
        Shared::dispatch(&shared, syn_stream(2)).unwrap();

        let frames = drain_frames(&shared);
        assert!(frames.iter().any(|f| matches!(
            f,
            Frame::RstStream(RstStreamFrame {
                status: StatusCode::ProtocolError,
                ..
            })
        )));
        assert_eq!(shared.benign_errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_ids_must_increase() {
        let shared = server_shared(Config::server(Version::V3));
        Shared::dispatch(&shared, syn_stream(5)).unwrap();
        Shared::dispatch(&shared, syn_stream(3)).unwrap();

        assert_eq!(shared.stream_count(), 1);
        assert_eq!(shared.benign_errors.load(Ordering::SeqCst), 1);
    }

    // Event hook tests

    #[derive(Debug, Default)]
    struct CountingEvents {
        accepted: AtomicU32,
        refused: AtomicU32,
        reset: AtomicU32,
    }

    impl ConnectionEvents for CountingEvents {
        fn stream_accepted(&self, _stream_id: StreamId) {
            self.accepted.fetch_add(1, Ordering::SeqCst);
        }

        fn stream_refused(&self, _stream_id: StreamId) {
            self.refused.fetch_add(1, Ordering::SeqCst);
        }

        fn stream_reset(&self, _stream_id: StreamId, _status: StatusCode) {
            self.reset.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_stream_events_reach_the_observer() {
        let events = Arc::new(CountingEvents::default());
        let config = Config::server(Version::V3)
            .max_concurrent_streams(1)
            .events(events.clone());
        let shared = server_shared(config);

        // Admitted.
        Shared::dispatch(&shared, syn_stream(1)).unwrap();
        assert_eq!(events.accepted.load(Ordering::SeqCst), 1);

        // Refused: the single slot is taken by stream 1.
        Shared::dispatch(&shared, syn_stream(3)).unwrap();
        assert_eq!(events.refused.load(Ordering::SeqCst), 1);

        // Reset by the peer.
        Shared::dispatch(&shared, Frame::RstStream(RstStreamFrame {
                stream_id: StreamId::new(1),
                status: StatusCode::Cancel,
            }))
            .unwrap();
        assert_eq!(events.reset.load(Ordering::SeqCst), 1);

        assert_eq!(events.accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_reset_reaches_the_observer() {
        let events = Arc::new(CountingEvents::default());
        let shared = server_shared(Config::server(Version::V3).events(events.clone()));

        Shared::dispatch(&shared, syn_stream(1)).unwrap();
        let record = shared.get_stream(StreamId::new(1)).unwrap();
        shared.reset_stream(&record, StatusCode::Cancel);
        // A second reset of the same stream is a no-op.
        shared.reset_stream(&record, StatusCode::Cancel);

        assert_eq!(events.reset.load(Ordering::SeqCst), 1);
    }

    // Ping tests

    #[tokio::test]
    async fn test_peer_ping_is_echoed() {
        let shared = server_shared(Config::server(Version::V3));
        // Odd id: client-originated, so the server echoes it.
        Shared::dispatch(&shared, Frame::Ping(PingFrame { id: 7 })).unwrap();
        let frames = drain_frames(&shared);
        assert!(frames
            .iter()
            .any(|f| matches!(f, Frame::Ping(PingFrame { id: 7 }))));
    }

    #[tokio::test]
    async fn test_own_ping_correlates() {
        let shared = server_shared(Config::server(Version::V3));
        let rx = shared.start_ping().unwrap();

        let frames = drain_frames(&shared);
        let id = frames
            .iter()
            .find_map(|f| match f {
                Frame::Ping(p) => Some(p.id),
                _ => None,
            })
            .expect("ping queued");
        assert_eq!(id % 2, 0);

        Shared::dispatch(&shared, Frame::Ping(PingFrame { id })).unwrap();
        assert_eq!(rx.await.unwrap(), Ping { id });
    }

    #[tokio::test]
    async fn test_pending_ping_dies_with_connection() {
        let shared = server_shared(Config::server(Version::V3));
        let rx = shared.start_ping().unwrap();
        shared.finalize();
        assert!(rx.await.is_err());
    }

    // Benign-error ceiling

    #[tokio::test]
    async fn test_benign_ceiling_escalates_to_goaway() {
        let shared = server_shared(Config::server(Version::V3).max_benign_errors(2));
        assert!(shared.note_benign("one").is_ok());
        assert!(shared.note_benign("two").is_ok());
        let err = shared.note_benign("three").unwrap_err();
        assert!(matches!(err, ConnectionError::TooManyBenignErrors));

        let frames = drain_frames(&shared);
        assert!(frames.iter().any(|f| matches!(
            f,
            Frame::Goaway(GoawayFrame {
                status: GoawayStatus::InternalError,
                ..
            })
        )));
    }

    // Fatal status receipt

    #[tokio::test]
    async fn test_fatal_rst_status_terminates_connection() {
        let shared = server_shared(Config::server(Version::V3));
        let err = Shared::dispatch(&shared, Frame::RstStream(RstStreamFrame {
                stream_id: StreamId::new(1),
                status: StatusCode::ProtocolError,
            }))
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::PeerFatal(StatusCode::ProtocolError)
        ));
        let frames = drain_frames(&shared);
        assert!(frames.iter().any(|f| matches!(f, Frame::Goaway(_))));
    }

    // Settings handling

    #[tokio::test]
    async fn test_settings_update_initial_window_and_limit() {
        let shared = server_shared(Config::server(Version::V3));
        Shared::dispatch(&shared, syn_stream(1)).unwrap();
        let record = shared.get_stream(StreamId::new(1)).unwrap();
        assert_eq!(record.flow.lock().send_window(), 65_536);

        Shared::dispatch(&shared, Frame::Settings(SettingsFrame {
                clear_persisted: false,
                settings: vec![
                    crate::frame::Setting::new(SettingId::InitialWindowSize, 70_000),
                    crate::frame::Setting::new(SettingId::MaxConcurrentStreams, 5),
                ],
            }))
            .unwrap();

        assert_eq!(record.flow.lock().send_window(), 70_000);
        assert_eq!(shared.initiate_limit.limit(), 5);
        assert_eq!(
            shared
                .settings
                .lock()
                .get(SettingId::InitialWindowSize)
                .map(|s| s.value),
            Some(70_000)
        );
    }

    // Stream id exhaustion

    #[tokio::test]
    async fn test_outbound_stream_id_exhaustion() {
        let shared = server_shared(Config::server(Version::V3));
        shared
            .next_stream_id
            .store(MAX_STREAM_ID, Ordering::SeqCst);

        // MAX_STREAM_ID itself is usable.
        let record = shared
            .open_stream(Headers::new(), Priority::new(7), StreamId::new(1), false, true, |_| {})
            .unwrap();
        assert_eq!(record.id.value(), MAX_STREAM_ID);

        // Beyond it no new stream may open.
        let err = shared
            .open_stream(Headers::new(), Priority::new(7), StreamId::new(1), false, true, |_| {})
            .unwrap_err();
        assert_eq!(err, StreamError::StreamsExhausted);

        // Existing streams continue to work.
        assert!(shared.write_data(&record, b"still going").is_ok());
    }

    // GOAWAY drain

    #[tokio::test]
    async fn test_goaway_terminates_streams_past_last_good() {
        let shared = server_shared(Config::server(Version::V3));
        shared.next_stream_id.store(2, Ordering::SeqCst);

        let s2 = shared
            .open_stream(Headers::new(), Priority::new(7), StreamId::new(1), false, true, |_| {})
            .unwrap();
        let s4 = shared
            .open_stream(Headers::new(), Priority::new(7), StreamId::new(1), false, true, |_| {})
            .unwrap();
        assert_eq!((s2.id.value(), s4.id.value()), (2, 4));

        Shared::dispatch(&shared, Frame::Goaway(GoawayFrame {
                last_good_stream_id: StreamId::new(2),
                status: GoawayStatus::Ok,
            }))
            .unwrap();

        // Stream 4 died; stream 2 survives to completion.
        assert!(shared.get_stream(StreamId::new(4)).is_none());
        assert!(shared.get_stream(StreamId::new(2)).is_some());
        assert!(s4.state().is_closed());

        // No new outbound streams while draining.
        assert_eq!(
            shared
                .open_stream(Headers::new(), Priority::new(7), StreamId::new(1), false, true, |_| {})
                .unwrap_err(),
            StreamError::GoingAway
        );
    }
}
