//! SPDY flow control (v3 and later).
//!
//! Each stream tracks a send window (how much the peer will accept) and a
//! receive window (how much we have offered the peer). Data that exceeds
//! the send window is buffered rather than blocking the writer; the buffer
//! drains as WINDOW_UPDATE frames arrive. Receive-window regrowth is
//! delegated to a replaceable policy.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;

use crate::frame::{StreamId, MAX_TRANSFER_WINDOW_SIZE};

/// Pluggable receive-window regrowth policy.
///
/// `initial_window_size` is the window advertised for new streams.
/// `receive_data` runs after inbound data shrinks a window; a non-zero
/// return is sent back to the peer as a WINDOW_UPDATE delta. In SPDY/3.1
/// the stream id may be zero for the connection-level window.
pub trait FlowControlPolicy: Send + Sync + fmt::Debug {
    fn initial_window_size(&self) -> u32;

    fn receive_data(
        &self,
        stream_id: StreamId,
        initial_window_size: u32,
        new_window_size: i64,
    ) -> u32;
}

/// Default policy: regrow to the initial size once the window has fallen
/// below half of it.
#[derive(Debug, Clone, Copy)]
pub struct DefaultFlowControl {
    initial: u32,
}

impl DefaultFlowControl {
    pub fn new(initial_window_size: u32) -> Self {
        DefaultFlowControl {
            initial: initial_window_size,
        }
    }
}

impl FlowControlPolicy for DefaultFlowControl {
    fn initial_window_size(&self) -> u32 {
        self.initial
    }

    fn receive_data(
        &self,
        _stream_id: StreamId,
        initial_window_size: u32,
        new_window_size: i64,
    ) -> u32 {
        if new_window_size < i64::from(initial_window_size) / 2 {
            (i64::from(initial_window_size) - new_window_size) as u32
        } else {
            0
        }
    }
}

/// Flow control violations detected while accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControlViolation {
    /// A WINDOW_UPDATE would push the send window past the maximum.
    SendWindowOverflow,
    /// Inbound data arrived while the receive window was already negative.
    ReceiveWindowNegative,
}

impl fmt::Display for FlowControlViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowControlViolation::SendWindowOverflow => {
                write!(f, "window update overflows the transfer window")
            }
            FlowControlViolation::ReceiveWindowNegative => {
                write!(f, "data received on a negative window")
            }
        }
    }
}

/// Per-stream flow control state.
pub(crate) struct FlowWindow {
    /// Peer-advertised initial window, governing our sends.
    send_initial: u32,
    /// Remaining bytes the peer will accept.
    send_window: i64,
    /// Data accepted from the application but not yet within the window.
    buffer: VecDeque<Bytes>,
    /// True while data sits in the buffer.
    constrained: bool,
    /// Emit FIN on the frame that empties the buffer.
    fin_on_drain: bool,
    /// Our advertised initial window, governing the peer's sends.
    recv_initial: u32,
    /// Remaining bytes we have offered the peer.
    recv_window: i64,
}

impl FlowWindow {
    pub(crate) fn new(send_initial: u32, recv_initial: u32) -> Self {
        FlowWindow {
            send_initial,
            send_window: i64::from(send_initial),
            buffer: VecDeque::new(),
            constrained: false,
            fin_on_drain: false,
            recv_initial,
            recv_window: i64::from(recv_initial),
        }
    }

    pub(crate) fn send_window(&self) -> i64 {
        self.send_window
    }

    pub(crate) fn recv_window(&self) -> i64 {
        self.recv_window
    }

    pub(crate) fn recv_initial(&self) -> u32 {
        self.recv_initial
    }

    pub(crate) fn is_constrained(&self) -> bool {
        self.constrained
    }

    pub(crate) fn buffered(&self) -> usize {
        self.buffer.iter().map(|b| b.len()).sum()
    }

    /// Accept application data for sending. Returns the chunks that fit
    /// the current window (each at most `max_data` bytes); the remainder
    /// is buffered and the stream marked constrained. `conn_window` is the
    /// connection-level send window for SPDY/3.1, or `None`.
    pub(crate) fn write(
        &mut self,
        data: &[u8],
        mut conn_window: Option<&mut i64>,
        max_data: usize,
    ) -> Vec<Bytes> {
        if data.is_empty() {
            return Vec::new();
        }

        // Anything already buffered must go out first; just extend it.
        if self.constrained {
            self.buffer.push_back(Bytes::copy_from_slice(data));
            return Vec::new();
        }

        let mut available = self.send_window.max(0) as usize;
        if let Some(cw) = conn_window.as_deref() {
            available = available.min((*cw).max(0) as usize);
        }

        let sendable = data.len().min(available);
        let mut chunks = Vec::new();
        let mut offset = 0;
        while offset < sendable {
            let end = (offset + max_data).min(sendable);
            chunks.push(Bytes::copy_from_slice(&data[offset..end]));
            offset = end;
        }

        self.send_window -= sendable as i64;
        if let Some(cw) = conn_window.as_deref_mut() {
            *cw -= sendable as i64;
        }

        if sendable < data.len() {
            self.buffer.push_back(Bytes::copy_from_slice(&data[sendable..]));
            self.constrained = true;
        }
        chunks
    }

    /// Grow the send window from a WINDOW_UPDATE.
    pub(crate) fn window_update(&mut self, delta: u32) -> Result<(), FlowControlViolation> {
        if i64::from(delta) + self.send_window > MAX_TRANSFER_WINDOW_SIZE {
            return Err(FlowControlViolation::SendWindowOverflow);
        }
        self.send_window += i64::from(delta);
        Ok(())
    }

    /// Drain buffered data into the grown window. Returns the chunks to
    /// send and whether the final chunk carries FIN. The constrained flag
    /// clears once the buffer is empty and the window positive.
    pub(crate) fn drain(
        &mut self,
        mut conn_window: Option<&mut i64>,
        max_data: usize,
    ) -> (Vec<Bytes>, bool) {
        let mut chunks = Vec::new();
        loop {
            let mut available = self.send_window.max(0) as usize;
            if let Some(cw) = conn_window.as_deref() {
                available = available.min((*cw).max(0) as usize);
            }
            if available == 0 {
                break;
            }
            let Some(mut front) = self.buffer.pop_front() else {
                break;
            };

            let take = front.len().min(available).min(max_data);
            let chunk = front.split_to(take);
            if !front.is_empty() {
                self.buffer.push_front(front);
            }
            self.send_window -= take as i64;
            if let Some(cw) = conn_window.as_deref_mut() {
                *cw -= take as i64;
            }
            chunks.push(chunk);
        }

        if self.buffer.is_empty() && self.send_window > 0 {
            self.constrained = false;
        }

        let fin = self.fin_on_drain && self.buffer.is_empty() && !chunks.is_empty();
        if fin {
            self.fin_on_drain = false;
        }
        (chunks, fin)
    }

    /// Ask for FIN on the frame that empties the send buffer.
    pub(crate) fn set_fin_on_drain(&mut self) {
        self.fin_on_drain = true;
    }

    /// Apply a renegotiated initial window size to the send side. The
    /// stream becomes constrained if the adjusted window is not positive.
    pub(crate) fn adjust_send_initial(&mut self, new_initial: u32) {
        let delta = i64::from(new_initial) - i64::from(self.send_initial);
        self.send_initial = new_initial;
        self.send_window += delta;
        if self.send_window <= 0 {
            self.constrained = true;
        }
    }

    /// Account for inbound data. Fails if the window was already negative
    /// before this data arrived; the caller must then reset the stream and
    /// take no further action on it.
    pub(crate) fn on_receive(&mut self, len: usize) -> Result<(), FlowControlViolation> {
        if self.recv_window < 0 {
            return Err(FlowControlViolation::ReceiveWindowNegative);
        }
        self.recv_window -= len as i64;
        Ok(())
    }

    /// Consult the policy and grow the receive window by whatever it
    /// returns. The returned delta, if non-zero, must be sent to the peer
    /// as a WINDOW_UPDATE.
    pub(crate) fn regrow(&mut self, stream_id: StreamId, policy: &dyn FlowControlPolicy) -> u32 {
        let delta = policy.receive_data(stream_id, self.recv_initial, self.recv_window);
        if delta != 0 {
            self.recv_window += i64::from(delta);
        }
        delta
    }
}

impl fmt::Debug for FlowWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowWindow")
            .field("send_window", &self.send_window)
            .field("recv_window", &self.recv_window)
            .field("buffered", &self.buffered())
            .field("constrained", &self.constrained)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Policy tests

    #[test]
    fn test_default_policy_regrows_at_half() {
        let policy = DefaultFlowControl::new(1000);
        assert_eq!(policy.initial_window_size(), 1000);

        // Above half: no regrowth.
        assert_eq!(policy.receive_data(StreamId::new(1), 1000, 600), 0);
        assert_eq!(policy.receive_data(StreamId::new(1), 1000, 500), 0);
        // Below half: regrow back to the initial size.
        assert_eq!(policy.receive_data(StreamId::new(1), 1000, 499), 501);
        assert_eq!(policy.receive_data(StreamId::new(1), 1000, 0), 1000);
        assert_eq!(policy.receive_data(StreamId::new(1), 1000, -20), 1020);
    }

    // Send-path tests

    #[test]
    fn test_write_within_window() {
        let mut flow = FlowWindow::new(100, 100);
        let chunks = flow.write(b"hello", None, 1024);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref(), b"hello");
        assert_eq!(flow.send_window(), 95);
        assert!(!flow.is_constrained());
    }

    #[test]
    fn test_write_beyond_window_buffers_remainder() {
        let mut flow = FlowWindow::new(4, 100);
        let chunks = flow.write(&[0u8; 10], None, 1024);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4);
        assert_eq!(flow.buffered(), 6);
        assert!(flow.is_constrained());
        assert_eq!(flow.send_window(), 0);
    }

    #[test]
    fn test_write_chunks_by_max_data_size() {
        let mut flow = FlowWindow::new(100, 100);
        let chunks = flow.write(&[0u8; 10], None, 4);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_constrained_write_goes_straight_to_buffer() {
        let mut flow = FlowWindow::new(4, 100);
        flow.write(&[0u8; 10], None, 1024);
        let chunks = flow.write(b"more", None, 1024);
        assert!(chunks.is_empty());
        assert_eq!(flow.buffered(), 10);
    }

    #[test]
    fn test_window_update_drains_buffer() {
        let mut flow = FlowWindow::new(4, 100);
        flow.write(&[1u8; 10], None, 1024);

        flow.window_update(10).unwrap();
        let (chunks, fin) = flow.drain(None, 1024);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 6);
        assert!(!fin);
        assert!(!flow.is_constrained());
        assert_eq!(flow.send_window(), 4);
    }

    #[test]
    fn test_fin_rides_the_draining_frame() {
        let mut flow = FlowWindow::new(4, 100);
        flow.write(&[1u8; 10], None, 1024);
        flow.set_fin_on_drain();

        // Partial drain: not yet empty, no FIN.
        flow.window_update(2).unwrap();
        let (chunks, fin) = flow.drain(None, 1024);
        assert_eq!(chunks[0].len(), 2);
        assert!(!fin);

        flow.window_update(10).unwrap();
        let (chunks, fin) = flow.drain(None, 1024);
        assert_eq!(chunks[0].len(), 4);
        assert!(fin);
    }

    #[test]
    fn test_window_update_overflow_rejected() {
        let mut flow = FlowWindow::new(100, 100);
        assert_eq!(
            flow.window_update(u32::MAX),
            Err(FlowControlViolation::SendWindowOverflow)
        );
    }

    #[test]
    fn test_connection_window_constrains_send() {
        let mut flow = FlowWindow::new(100, 100);
        let mut conn_window = 3i64;
        let chunks = flow.write(&[0u8; 10], Some(&mut conn_window), 1024);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(conn_window, 0);
        assert_eq!(flow.buffered(), 7);
        assert!(flow.is_constrained());
        // Stream window only shrank by what was actually sent.
        assert_eq!(flow.send_window(), 97);
    }

    #[test]
    fn test_drain_respects_connection_window() {
        let mut flow = FlowWindow::new(2, 100);
        flow.write(&[0u8; 10], None, 1024);
        flow.window_update(100).unwrap();

        let mut conn_window = 3i64;
        let (chunks, _) = flow.drain(Some(&mut conn_window), 1024);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 3);
        assert_eq!(conn_window, 0);
        assert!(flow.is_constrained());
    }

    // Renegotiation tests

    #[test]
    fn test_adjust_send_initial_grows_window() {
        let mut flow = FlowWindow::new(100, 100);
        flow.write(&[0u8; 40], None, 1024);
        assert_eq!(flow.send_window(), 60);

        flow.adjust_send_initial(200);
        assert_eq!(flow.send_window(), 160);
        assert!(!flow.is_constrained());
    }

    #[test]
    fn test_adjust_send_initial_can_constrain() {
        let mut flow = FlowWindow::new(100, 100);
        flow.write(&[0u8; 40], None, 1024);

        flow.adjust_send_initial(20);
        assert_eq!(flow.send_window(), -20);
        assert!(flow.is_constrained());
    }

    // Receive-path tests

    #[test]
    fn test_receive_accounting() {
        let mut flow = FlowWindow::new(100, 100);
        flow.on_receive(30).unwrap();
        assert_eq!(flow.recv_window(), 70);

        // The window may go negative once.
        flow.on_receive(80).unwrap();
        assert_eq!(flow.recv_window(), -10);

        // But data on an already-negative window is a violation.
        assert_eq!(
            flow.on_receive(1),
            Err(FlowControlViolation::ReceiveWindowNegative)
        );
        // And the failed call must not have changed the window.
        assert_eq!(flow.recv_window(), -10);
    }

    #[test]
    fn test_regrow_consults_policy() {
        let policy = DefaultFlowControl::new(100);
        let mut flow = FlowWindow::new(100, 100);

        flow.on_receive(30).unwrap();
        assert_eq!(flow.regrow(StreamId::new(1), &policy), 0);

        flow.on_receive(30).unwrap();
        let delta = flow.regrow(StreamId::new(1), &policy);
        assert_eq!(delta, 60);
        assert_eq!(flow.recv_window(), 100);
    }
}
