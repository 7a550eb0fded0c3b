//! The writer task and its prioritized output queues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tracing::{error, trace};

use super::{ConnectionError, Shared};
use crate::frame::{Frame, FrameEncoder, FrameError, Priority, StatusCode, StreamId};

/// Eight strictly prioritized outbound frame queues.
///
/// The writer always takes from the highest non-empty queue; within one
/// queue, frames leave in arrival order. Starvation of low priorities is
/// accepted by design. After `close`, only queue 0 keeps draining so
/// final control frames (GOAWAY in particular) still reach the wire.
pub(crate) struct OutputQueues {
    queues: Mutex<[VecDeque<Frame>; Priority::LEVELS]>,
    notify: Notify,
    closed: AtomicBool,
}

impl OutputQueues {
    pub(crate) fn new() -> Self {
        OutputQueues {
            queues: Mutex::new(Default::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a frame at the given priority. Fails once the queues are
    /// closed.
    pub(crate) fn push(&self, priority: Priority, frame: Frame) -> Result<(), ()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(());
        }
        self.queues.lock()[priority.index()].push_back(frame);
        self.notify.notify_one();
        Ok(())
    }

    /// Take the next frame by priority, or `None` if nothing is queued.
    pub(crate) fn try_pop(&self) -> Option<Frame> {
        let mut queues = self.queues.lock();
        if self.closed.load(Ordering::SeqCst) {
            // Shutdown: only the control queue still drains.
            return queues[0].pop_front();
        }
        for queue in queues.iter_mut() {
            if let Some(frame) = queue.pop_front() {
                return Some(frame);
            }
        }
        None
    }

    /// Wait for the next frame. Returns `None` once the queues are closed
    /// and the remaining control frames have drained.
    pub(crate) async fn pop(&self) -> Option<Frame> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.try_pop() {
                return Some(frame);
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Set FIN on the last queued DATA frame for a stream, if one is still
    /// waiting to be written. Returns false when nothing is pending and
    /// the caller must emit its own FIN frame.
    pub(crate) fn set_fin_on_last_data(&self, stream_id: StreamId) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let mut queues = self.queues.lock();
        for queue in queues.iter_mut() {
            for frame in queue.iter_mut().rev() {
                if let Frame::Data(data) = frame {
                    if data.stream_id == stream_id {
                        data.fin = true;
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Stop accepting frames and let the writer run down queue 0.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// The writer task: drains the output queues, serializes frames, and owns
/// the socket write half. Owning the encoder here is what guarantees that
/// compressed header blocks hit the wire in queue order without
/// interleaving.
pub(crate) async fn write_loop<W>(mut writer: W, shared: Arc<Shared>) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let mut encoder = FrameEncoder::new(shared.config.version);
    let mut buf = BytesMut::with_capacity(16 * 1024);

    while let Some(frame) = shared.outgoing.pop().await {
        buf.clear();
        if let Err(e) = encoder.encode(&frame, &mut buf) {
            match e {
                FrameError::HeaderBlock { stream_id, ref reason } => {
                    // Only that stream is poisoned; drop the frame and
                    // reset the stream.
                    error!(stream = %stream_id, %reason, "failed to encode header block");
                    if let Some(record) = shared.get_stream(stream_id) {
                        shared.reset_stream(&record, StatusCode::InternalError);
                    }
                    continue;
                }
                other => {
                    error!(error = %other, "failed to encode frame");
                    shared.signal_stop();
                    return Err(other.into());
                }
            }
        }

        let result = match shared.config.write_timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, write_all(&mut writer, &buf)).await {
                    Ok(result) => result,
                    Err(_) => {
                        shared.signal_stop();
                        return Err(ConnectionError::WriteTimeout);
                    }
                }
            }
            None => write_all(&mut writer, &buf).await,
        };
        if let Err(e) = result {
            shared.signal_stop();
            return Err(e.into());
        }
        trace!(bytes = buf.len(), "frame written");
    }

    writer.flush().await.ok();
    Ok(())
}

async fn write_all<W: AsyncWrite + Unpin>(writer: &mut W, buf: &[u8]) -> std::io::Result<()> {
    writer.write_all(buf).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PingFrame;

    fn ping(id: u32) -> Frame {
        Frame::Ping(PingFrame { id })
    }

    fn ping_id(frame: &Frame) -> u32 {
        match frame {
            Frame::Ping(f) => f.id,
            other => panic!("expected PING, got {:?}", other),
        }
    }

    #[test]
    fn test_priority_order_wins_over_arrival_order() {
        let queues = OutputQueues::new();
        queues.push(Priority::new(7), ping(7)).unwrap();
        queues.push(Priority::new(3), ping(3)).unwrap();
        queues.push(Priority::new(0), ping(0)).unwrap();

        assert_eq!(ping_id(&queues.try_pop().unwrap()), 0);
        assert_eq!(ping_id(&queues.try_pop().unwrap()), 3);
        assert_eq!(ping_id(&queues.try_pop().unwrap()), 7);
        assert!(queues.try_pop().is_none());
    }

    #[test]
    fn test_fifo_within_one_priority() {
        let queues = OutputQueues::new();
        for id in [1, 2, 3] {
            queues.push(Priority::new(4), ping(id)).unwrap();
        }
        assert_eq!(ping_id(&queues.try_pop().unwrap()), 1);
        assert_eq!(ping_id(&queues.try_pop().unwrap()), 2);
        assert_eq!(ping_id(&queues.try_pop().unwrap()), 3);
    }

    #[test]
    fn test_close_drains_only_queue_zero() {
        let queues = OutputQueues::new();
        queues.push(Priority::new(0), ping(1)).unwrap();
        queues.push(Priority::new(5), ping(2)).unwrap();
        queues.close();

        assert!(queues.push(Priority::new(0), ping(3)).is_err());
        assert_eq!(ping_id(&queues.try_pop().unwrap()), 1);
        // The priority-5 frame is discarded.
        assert!(queues.try_pop().is_none());
    }

    #[test]
    fn test_set_fin_on_last_queued_data() {
        use crate::frame::DataFrame;

        let queues = OutputQueues::new();
        assert!(!queues.set_fin_on_last_data(StreamId::new(1)));

        for chunk in [&b"one"[..], &b"two"[..]] {
            queues
                .push(
                    Priority::new(2),
                    Frame::Data(DataFrame {
                        stream_id: StreamId::new(1),
                        fin: false,
                        data: bytes::Bytes::from_static(chunk),
                    }),
                )
                .unwrap();
        }
        assert!(queues.set_fin_on_last_data(StreamId::new(1)));

        // Only the final frame carries FIN.
        match queues.try_pop().unwrap() {
            Frame::Data(data) => assert!(!data.fin),
            other => panic!("expected DATA, got {:?}", other),
        }
        match queues.try_pop().unwrap() {
            Frame::Data(data) => {
                assert!(data.fin);
                assert_eq!(data.data.as_ref(), b"two");
            }
            other => panic!("expected DATA, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queues = Arc::new(OutputQueues::new());
        let popper = {
            let queues = queues.clone();
            tokio::spawn(async move { queues.pop().await })
        };
        tokio::task::yield_now().await;
        queues.push(Priority::new(2), ping(9)).unwrap();
        let frame = popper.await.unwrap().unwrap();
        assert_eq!(ping_id(&frame), 9);
    }

    #[tokio::test]
    async fn test_pop_returns_none_after_close() {
        let queues = Arc::new(OutputQueues::new());
        let popper = {
            let queues = queues.clone();
            tokio::spawn(async move { queues.pop().await })
        };
        tokio::task::yield_now().await;
        queues.close();
        assert!(popper.await.unwrap().is_none());
    }
}
