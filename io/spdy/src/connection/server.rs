//! The server-side handler bridge.
//!
//! Adapts a decoded SYN_STREAM into a request/response exchange: the
//! engine builds a [`Request`] from the pseudo-headers, hands it to the
//! application's [`StreamHandler`] in a task of its own, and captures the
//! handler's writes as SYN_REPLY (first write) plus DATA frames.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::debug;

use super::stream::StreamRecord;
use super::{Body, Ping, Shared, StreamError};
use crate::frame::{Frame, Priority, StatusCode, StreamId, SynReplyFrame, SynStreamFrame, Version};
use crate::headers::Headers;

/// The boxed future a handler returns.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Application hook invoked once per accepted request stream.
///
/// Each invocation runs in its own task; a panic inside a handler resets
/// only that stream with INTERNAL_ERROR.
pub trait StreamHandler: Send + Sync + 'static {
    fn handle(&self, request: Request, response: ResponseWriter) -> HandlerFuture;
}

/// A decoded request, built from a SYN_STREAM's pseudo-headers.
#[derive(Debug)]
pub struct Request {
    pub stream_id: StreamId,
    pub priority: Priority,
    pub method: String,
    pub path: String,
    /// The HTTP version string carried in the header block.
    pub http_version: String,
    pub host: String,
    pub scheme: String,
    /// Remaining headers with the pseudo-headers stripped.
    pub headers: Headers,
    pub body: Body,
}

/// Build a [`Request`] from an accepted SYN_STREAM. The pseudo-header set
/// differs between v2 (`method`, `url`, `version`) and v3 (`:method`,
/// `:path`, `:version`, `:host`, `:scheme`); missing entries reject the
/// stream.
pub(crate) fn build_request(
    version: Version,
    frame: &SynStreamFrame,
    body: Body,
) -> Result<Request, String> {
    let mut headers = frame.headers.clone();
    let (method, path, http_version, host, scheme) = match version {
        Version::V2 => {
            let method = headers.remove("method").ok_or("missing method header")?;
            let url = headers.remove("url").ok_or("missing url header")?;
            let http_version = headers.remove("version").ok_or("missing version header")?;
            let host_header = headers.remove("host");
            let (scheme, host, path) = split_url(&url, host_header.as_deref());
            (method, path, http_version, host, scheme)
        }
        Version::V3 | Version::V3_1 => {
            let method = headers.remove(":method").ok_or("missing :method header")?;
            let path = headers.remove(":path").ok_or("missing :path header")?;
            let http_version = headers.remove(":version").ok_or("missing :version header")?;
            let host = headers.remove(":host").ok_or("missing :host header")?;
            let scheme = headers.remove(":scheme").ok_or("missing :scheme header")?;
            (method, path, http_version, host, scheme)
        }
    };

    Ok(Request {
        stream_id: frame.stream_id,
        priority: frame.priority,
        method,
        path,
        http_version,
        host,
        scheme,
        headers,
        body,
    })
}

/// Split a v2 `url` header into scheme, host, and path. Relative targets
/// fall back to the `host` header.
fn split_url(url: &str, host_header: Option<&str>) -> (String, String, String) {
    for scheme in ["https", "http"] {
        if let Some(rest) = url.strip_prefix(&format!("{}://", scheme)) {
            let (host, path) = match rest.find('/') {
                Some(pos) => (&rest[..pos], &rest[pos..]),
                None => (rest, "/"),
            };
            return (scheme.to_string(), host.to_string(), path.to_string());
        }
    }
    (
        "https".to_string(),
        host_header.unwrap_or_default().to_string(),
        url.to_string(),
    )
}

/// The application's writing end of a request stream.
///
/// The first `write` implicitly sends `SYN_REPLY` with status `200 OK`;
/// use [`ResponseWriter::send_reply`] first for anything else. Writes
/// never block: data beyond the peer's flow control window is buffered
/// and drained as WINDOW_UPDATE frames arrive.
pub struct ResponseWriter {
    shared: Arc<Shared>,
    record: Arc<StreamRecord>,
    headers: Headers,
}

impl ResponseWriter {
    pub(crate) fn new(shared: Arc<Shared>, record: Arc<StreamRecord>) -> Self {
        ResponseWriter {
            shared,
            record,
            headers: Headers::new(),
        }
    }

    pub fn stream_id(&self) -> StreamId {
        self.record.id
    }

    pub fn priority(&self) -> Priority {
        self.record.priority
    }

    pub fn version(&self) -> Version {
        self.shared.config.version
    }

    /// Response headers staged for the SYN_REPLY.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Send SYN_REPLY with an explicit status line. A second reply on the
    /// same stream is ignored.
    pub fn send_reply(&mut self, status: &str) -> Result<(), StreamError> {
        self.reply(status, false)
    }

    fn reply(&mut self, status: &str, fin: bool) -> Result<(), StreamError> {
        if self.record.replied.swap(true, Ordering::SeqCst) {
            debug!(stream = %self.record.id, "reply already sent, ignoring");
            return Ok(());
        }

        let mut headers = Headers::new();
        match self.shared.config.version {
            Version::V2 => {
                headers.set("status", status);
                headers.set("version", "HTTP/1.1");
            }
            Version::V3 | Version::V3_1 => {
                headers.set(":status", status);
                headers.set(":version", "HTTP/1.1");
            }
        }
        for (name, value) in self.headers.iter() {
            headers.append(name, value);
        }

        self.shared.queue_control(Frame::SynReply(SynReplyFrame {
            stream_id: self.record.id,
            fin,
            headers,
        }))?;

        if fin {
            self.record.finished.store(true, Ordering::SeqCst);
            if self.record.close_here().is_closed() {
                self.shared.take_stream(self.record.id);
            }
        }
        Ok(())
    }

    /// Write response payload. Returns the number of bytes accepted
    /// (always the whole slice); delivery may be deferred by flow control.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        if !self.record.replied.load(Ordering::SeqCst) {
            self.reply("200 OK", false)?;
        }
        self.shared.write_data(&self.record, data)
    }

    /// Half-close the response: FIN rides the next outbound frame, or an
    /// empty FIN DATA frame if nothing is pending. Idempotent.
    pub fn finish(&mut self) -> Result<(), StreamError> {
        if !self.record.replied.load(Ordering::SeqCst) {
            // Nothing written yet: FIN rides the reply itself.
            return self.reply("200 OK", true);
        }
        self.shared.finish_stream(&self.record)
    }

    /// Cancel the stream with RST_STREAM(CANCEL). Idempotent; a stream
    /// that already completed is left alone.
    pub fn close(&mut self) {
        self.shared.reset_stream(&self.record, StatusCode::Cancel);
    }

    /// Send a PING and receive the completion channel. The channel closes
    /// without a value if the connection dies first; any timeout is the
    /// caller's to impose.
    pub fn ping(&self) -> Result<oneshot::Receiver<Ping>, StreamError> {
        self.shared.start_ping()
    }

    /// Push a resource to the peer from within this request's handler.
    ///
    /// Allocates the next even stream id and emits SYN_STREAM with
    /// UNIDIRECTIONAL, associated to this stream. The push inherits this
    /// stream's priority one level lower.
    pub fn push(&mut self, path: &str) -> Result<PushStream, StreamError> {
        let parent_headers = self.record.headers.lock().clone();
        let mut headers = Headers::new();
        match self.shared.config.version {
            Version::V2 => {
                let host = parent_headers.get("host").unwrap_or_default();
                headers.set("url", &format!("https://{}{}", host, path));
                headers.set("status", "200 OK");
                headers.set("version", "HTTP/1.1");
            }
            Version::V3 | Version::V3_1 => {
                headers.set(
                    ":scheme",
                    parent_headers.get(":scheme").unwrap_or("https"),
                );
                headers.set(":host", parent_headers.get(":host").unwrap_or_default());
                headers.set(":path", path);
                headers.set(":status", "200 OK");
                headers.set(":version", "HTTP/1.1");
            }
        }

        let record = self.shared.open_stream(
            headers,
            self.record.priority.lower(),
            self.record.id,
            false,
            true,
            |_| {},
        )?;
        debug!(stream = %record.id, parent = %self.record.id, %path, "push stream opened");
        Ok(PushStream {
            shared: self.shared.clone(),
            record,
        })
    }
}

impl std::fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("stream", &self.record.id)
            .finish()
    }
}

/// The writing end of a pushed stream. Headers travel in the SYN_STREAM,
/// so there is no reply step; only payload and FIN.
pub struct PushStream {
    shared: Arc<Shared>,
    record: Arc<StreamRecord>,
}

impl PushStream {
    pub fn stream_id(&self) -> StreamId {
        self.record.id
    }

    pub fn priority(&self) -> Priority {
        self.record.priority
    }

    /// Write pushed payload, subject to the same flow control as response
    /// data.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        self.shared.write_data(&self.record, data)
    }

    /// Finish the pushed stream.
    pub fn finish(&mut self) -> Result<(), StreamError> {
        self.shared.finish_stream(&self.record)
    }

    /// Cancel the pushed stream.
    pub fn close(&mut self) {
        self.shared.reset_stream(&self.record, StatusCode::Cancel);
    }
}

impl std::fmt::Debug for PushStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushStream")
            .field("stream", &self.record.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Bridge, Config, Role};
    use crate::frame::{DataFrame, Frame, Priority};

    fn syn_frame(version: Version) -> SynStreamFrame {
        let mut headers = Headers::new();
        match version {
            Version::V2 => {
                headers.set("method", "GET");
                headers.set("url", "https://example.com/page");
                headers.set("version", "HTTP/1.1");
            }
            _ => {
                headers.set(":method", "GET");
                headers.set(":path", "/page");
                headers.set(":version", "HTTP/1.1");
                headers.set(":host", "example.com");
                headers.set(":scheme", "https");
            }
        }
        headers.set("accept", "text/html");
        SynStreamFrame {
            stream_id: StreamId::new(1),
            associated_stream_id: StreamId::CONNECTION,
            priority: Priority::new(1),
            slot: 0,
            fin: true,
            unidirectional: false,
            headers,
        }
    }

    fn empty_body() -> Body {
        let (_, rx) = tokio::sync::mpsc::unbounded_channel();
        Body::new(rx)
    }

    // Request construction

    #[test]
    fn test_build_request_v3() {
        let request = build_request(Version::V3, &syn_frame(Version::V3), empty_body()).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/page");
        assert_eq!(request.http_version, "HTTP/1.1");
        assert_eq!(request.host, "example.com");
        assert_eq!(request.scheme, "https");
        // Pseudo-headers are stripped; ordinary headers remain.
        assert!(!request.headers.contains(":method"));
        assert_eq!(request.headers.get("accept"), Some("text/html"));
    }

    #[test]
    fn test_build_request_v2() {
        let request = build_request(Version::V2, &syn_frame(Version::V2), empty_body()).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/page");
        assert_eq!(request.host, "example.com");
        assert_eq!(request.scheme, "https");
    }

    #[test]
    fn test_build_request_missing_pseudo_header() {
        let mut frame = syn_frame(Version::V3);
        frame.headers.remove(":host");
        let err = build_request(Version::V3, &frame, empty_body()).unwrap_err();
        assert!(err.contains(":host"));
    }

    #[test]
    fn test_split_url() {
        assert_eq!(
            split_url("https://a.example/x/y", None),
            ("https".into(), "a.example".into(), "/x/y".into())
        );
        assert_eq!(
            split_url("http://a.example", None),
            ("http".into(), "a.example".into(), "/".into())
        );
        assert_eq!(
            split_url("/only/path", Some("b.example")),
            ("https".into(), "b.example".into(), "/only/path".into())
        );
    }

    // ResponseWriter behavior against a bare engine

    struct NoopHandler;

    impl StreamHandler for NoopHandler {
        fn handle(&self, _request: Request, _response: ResponseWriter) -> HandlerFuture {
            Box::pin(async {})
        }
    }

    fn writer_for_stream() -> (Arc<Shared>, ResponseWriter) {
        let shared = Shared::new(
            Role::Server,
            Config::server(Version::V3),
            Bridge::Server {
                handler: Arc::new(NoopHandler),
            },
        );
        let record = Arc::new(StreamRecord::new(
            StreamId::new(1),
            Priority::new(2),
            false,
            crate::connection::StreamState::Open,
            crate::connection::flow_control::FlowWindow::new(65_536, 65_536),
        ));
        shared
            .test_insert_stream(record.clone());
        let writer = ResponseWriter::new(shared.clone(), record);
        (shared, writer)
    }

    fn drain(shared: &Shared) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = shared.outgoing.try_pop() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_first_write_sends_implicit_reply() {
        let (shared, mut writer) = writer_for_stream();
        writer.write(b"hi").unwrap();

        let frames = drain(&shared);
        match &frames[0] {
            Frame::SynReply(f) => {
                assert_eq!(f.stream_id.value(), 1);
                assert!(!f.fin);
                assert_eq!(f.headers.get(":status"), Some("200 OK"));
            }
            other => panic!("expected SYN_REPLY first, got {:?}", other),
        }
        match &frames[1] {
            Frame::Data(DataFrame { data, fin, .. }) => {
                assert_eq!(data.as_ref(), b"hi");
                assert!(!fin);
            }
            other => panic!("expected DATA, got {:?}", other),
        }
    }

    #[test]
    fn test_finish_before_write_puts_fin_on_reply() {
        let (shared, mut writer) = writer_for_stream();
        writer.finish().unwrap();

        let frames = drain(&shared);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::SynReply(f) => assert!(f.fin),
            other => panic!("expected SYN_REPLY, got {:?}", other),
        }
    }

    #[test]
    fn test_finish_puts_fin_on_pending_data() {
        let (shared, mut writer) = writer_for_stream();
        writer.write(b"payload").unwrap();
        writer.finish().unwrap();
        writer.finish().unwrap();

        let frames = drain(&shared);
        // The queued payload frame carries the FIN; no extra frame and no
        // duplicate from the second finish().
        let last = frames.last().unwrap();
        match last {
            Frame::Data(DataFrame { data, fin, .. }) => {
                assert_eq!(data.as_ref(), b"payload");
                assert!(fin);
            }
            other => panic!("expected FIN on the payload frame, got {:?}", other),
        }
        let fin_count = frames
            .iter()
            .filter(|f| matches!(f, Frame::Data(DataFrame { fin: true, .. })))
            .count();
        assert_eq!(fin_count, 1);
    }

    #[test]
    fn test_finish_on_idle_stream_sends_empty_fin_data() {
        let (shared, mut writer) = writer_for_stream();
        writer.send_reply("200 OK").unwrap();
        // Drain so nothing is pending when finish runs.
        let _ = drain(&shared);

        writer.finish().unwrap();
        let frames = drain(&shared);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Data(DataFrame { data, fin, .. }) => {
                assert!(data.is_empty());
                assert!(fin);
            }
            other => panic!("expected empty FIN DATA, got {:?}", other),
        }
    }

    #[test]
    fn test_explicit_status_reply() {
        let (shared, mut writer) = writer_for_stream();
        writer.headers_mut().set("content-type", "text/plain");
        writer.send_reply("404 Not Found").unwrap();

        let frames = drain(&shared);
        match &frames[0] {
            Frame::SynReply(f) => {
                assert_eq!(f.headers.get(":status"), Some("404 Not Found"));
                assert_eq!(f.headers.get("content-type"), Some("text/plain"));
            }
            other => panic!("expected SYN_REPLY, got {:?}", other),
        }
    }
}
