//! Per-stream state.

use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::flow_control::FlowWindow;
use super::StreamError;
use crate::frame::{Priority, StreamId};
use crate::headers::Headers;

/// Stream state machine.
///
/// FIN flags half-close one direction at a time; RST_STREAM jumps straight
/// to `Closed`. `Closed` is terminal and transitions never move backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Both directions open.
    Open,
    /// We sent FIN; the peer may still send.
    HalfClosedHere,
    /// The peer sent FIN; we may still send.
    HalfClosedThere,
    /// Both directions closed.
    Closed,
}

impl StreamState {
    /// State after we send FIN.
    pub fn close_here(self) -> StreamState {
        match self {
            StreamState::Open => StreamState::HalfClosedHere,
            StreamState::HalfClosedThere => StreamState::Closed,
            other => other,
        }
    }

    /// State after the peer sends FIN.
    pub fn close_there(self) -> StreamState {
        match self {
            StreamState::Open => StreamState::HalfClosedThere,
            StreamState::HalfClosedHere => StreamState::Closed,
            other => other,
        }
    }

    /// Whether our sending direction is closed.
    pub fn closed_here(self) -> bool {
        matches!(self, StreamState::HalfClosedHere | StreamState::Closed)
    }

    /// Whether the peer's sending direction is closed.
    pub fn closed_there(self) -> bool {
        matches!(self, StreamState::HalfClosedThere | StreamState::Closed)
    }

    pub fn is_closed(self) -> bool {
        self == StreamState::Closed
    }
}

/// One live stream's record in the connection's stream table.
///
/// The record is shared between the reader task, the writer-facing send
/// paths, and the stream's handler task; each piece of mutable state sits
/// behind its own lock.
pub(crate) struct StreamRecord {
    pub(crate) id: StreamId,
    pub(crate) priority: Priority,
    /// True when this side opened the stream.
    pub(crate) local_origin: bool,
    state: Mutex<StreamState>,
    pub(crate) flow: Mutex<FlowWindow>,
    /// Headers accumulated from SYN_STREAM/SYN_REPLY plus HEADERS frames.
    pub(crate) headers: Mutex<Headers>,
    /// SYN_REPLY has been sent (server) or received (client).
    pub(crate) replied: AtomicBool,
    /// The local side called finish; used for idempotence.
    pub(crate) finished: AtomicBool,
    data_tx: Mutex<Option<mpsc::UnboundedSender<Result<Bytes, StreamError>>>>,
    reply_tx: Mutex<Option<oneshot::Sender<Result<(Headers, bool), StreamError>>>>,
}

impl StreamRecord {
    pub(crate) fn new(
        id: StreamId,
        priority: Priority,
        local_origin: bool,
        initial_state: StreamState,
        flow: FlowWindow,
    ) -> Self {
        StreamRecord {
            id,
            priority,
            local_origin,
            state: Mutex::new(initial_state),
            flow: Mutex::new(flow),
            headers: Mutex::new(Headers::new()),
            replied: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            data_tx: Mutex::new(None),
            reply_tx: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Record that we sent FIN.
    pub(crate) fn close_here(&self) -> StreamState {
        let mut state = self.state.lock();
        *state = state.close_here();
        *state
    }

    /// Record that the peer sent FIN.
    pub(crate) fn close_there(&self) -> StreamState {
        let mut state = self.state.lock();
        *state = state.close_there();
        *state
    }

    /// Jump to `Closed` (RST_STREAM in either direction).
    pub(crate) fn close(&self) {
        *self.state.lock() = StreamState::Closed;
    }

    /// Open the inbound data channel, handing back the receiving end.
    pub(crate) fn data_channel(&self) -> mpsc::UnboundedReceiver<Result<Bytes, StreamError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.data_tx.lock() = Some(tx);
        rx
    }

    /// Open the reply channel (client side), handing back the receiver.
    pub(crate) fn reply_channel(
        &self,
    ) -> oneshot::Receiver<Result<(Headers, bool), StreamError>> {
        let (tx, rx) = oneshot::channel();
        *self.reply_tx.lock() = Some(tx);
        rx
    }

    /// Deliver inbound payload bytes to the stream's consumer.
    pub(crate) fn deliver_data(&self, data: Bytes) {
        if let Some(tx) = self.data_tx.lock().as_ref() {
            // The consumer may have gone away; that is not an error here.
            let _ = tx.send(Ok(data));
        }
    }

    /// Deliver the reply head to a waiting client request.
    pub(crate) fn deliver_reply(&self, headers: Headers, fin: bool) {
        if let Some(tx) = self.reply_tx.lock().take() {
            let _ = tx.send(Ok((headers, fin)));
        }
    }

    /// Signal clean end-of-input to the stream's consumer.
    pub(crate) fn end_input(&self) {
        self.data_tx.lock().take();
    }

    /// Terminate both consumer channels with an error.
    pub(crate) fn fail(&self, error: StreamError) {
        if let Some(tx) = self.reply_tx.lock().take() {
            let _ = tx.send(Err(error.clone()));
        }
        if let Some(tx) = self.data_tx.lock().take() {
            let _ = tx.send(Err(error));
        }
    }
}

impl std::fmt::Debug for StreamRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRecord")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .field("local_origin", &self.local_origin)
            .finish()
    }
}
