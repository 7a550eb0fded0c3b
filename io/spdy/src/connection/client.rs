//! The client-side connection surface.
//!
//! The symmetric half of the handler bridge: requests originate
//! SYN_STREAM frames with odd ids, the inbound SYN_REPLY plus DATA frames
//! come back as a streamed [`Response`], and server-initiated pushed
//! streams surface through a channel.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{
    run_io, Body, Bridge, Config, ConnectionError, Ping, Role, Shared, StreamError,
};
use crate::frame::{Priority, StreamId, Version};
use crate::headers::Headers;

/// The request line and headers for an outgoing request.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub host: String,
    pub scheme: String,
    pub priority: Priority,
    pub headers: Headers,
}

impl RequestHead {
    /// A GET request with default priority.
    pub fn get(host: &str, path: &str) -> Self {
        RequestHead {
            method: "GET".to_string(),
            path: path.to_string(),
            host: host.to_string(),
            scheme: "https".to_string(),
            priority: Priority::new(2),
            headers: Headers::new(),
        }
    }

    pub fn method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Convert a request head into the version's header block.
fn request_headers(version: Version, head: &RequestHead) -> Headers {
    let mut headers = Headers::new();
    match version {
        Version::V2 => {
            headers.set("method", &head.method);
            headers.set("url", &head.path);
            headers.set("version", "HTTP/1.1");
            headers.set("host", &head.host);
            headers.set("scheme", &head.scheme);
        }
        Version::V3 | Version::V3_1 => {
            headers.set(":method", &head.method);
            headers.set(":path", &head.path);
            headers.set(":version", "HTTP/1.1");
            headers.set(":host", &head.host);
            headers.set(":scheme", &head.scheme);
        }
    }
    for (name, value) in head.headers.iter() {
        headers.append(name, value);
    }
    headers
}

/// A stream the server pushed, associated with one of our requests.
#[derive(Debug)]
pub struct PushedStream {
    pub stream_id: StreamId,
    pub associated_stream_id: StreamId,
    pub priority: Priority,
    pub headers: Headers,
    pub body: Body,
}

/// A response head plus its streamed body.
#[derive(Debug)]
pub struct Response {
    pub status: String,
    pub headers: Headers,
    pub body: Body,
}

/// A request in flight, waiting for its SYN_REPLY.
#[derive(Debug)]
pub struct PendingResponse {
    stream_id: StreamId,
    reply_rx: oneshot::Receiver<Result<(Headers, bool), StreamError>>,
    body: Body,
}

impl PendingResponse {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Wait for the reply head. The body streams independently of it.
    pub async fn response(self) -> Result<Response, StreamError> {
        let (mut headers, _fin) = self
            .reply_rx
            .await
            .map_err(|_| StreamError::ConnectionClosed)??;
        let status = headers
            .remove(":status")
            .or_else(|| headers.remove("status"))
            .unwrap_or_default();
        Ok(Response {
            status,
            headers,
            body: self.body,
        })
    }
}

/// A SPDY client connection.
///
/// Constructed over an established transport (typically TLS with the
/// version already negotiated); the engine's reader and writer tasks are
/// spawned on the current runtime.
pub struct Client {
    shared: Arc<Shared>,
    pushes: mpsc::UnboundedReceiver<PushedStream>,
    driver: JoinHandle<Result<(), ConnectionError>>,
}

/// Start a client connection. Must be called within a tokio runtime.
pub fn connect<S>(io: S, config: Config) -> Client
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let shared = Shared::new(Role::Client, config, Bridge::Client { pushes: push_tx });
    let driver = tokio::spawn(run_io(io, shared.clone()));
    Client {
        shared,
        pushes: push_rx,
        driver,
    }
}

impl Client {
    /// Originate a request. With `body` of `None` the stream opens
    /// half-closed (FIN on the SYN_STREAM); otherwise the body is sent,
    /// subject to flow control, and the stream finished.
    pub fn request(
        &self,
        head: RequestHead,
        body: Option<&[u8]>,
    ) -> Result<PendingResponse, StreamError> {
        let headers = request_headers(self.shared.config.version, &head);
        let fin = body.is_none();

        let mut channels = None;
        let record = self.shared.open_stream(
            headers,
            head.priority,
            StreamId::CONNECTION,
            fin,
            false,
            |record| {
                channels = Some((record.reply_channel(), record.data_channel()));
            },
        )?;
        let Some((reply_rx, data_rx)) = channels else {
            return Err(StreamError::ConnectionClosed);
        };
        debug!(stream = %record.id, method = %head.method, path = %head.path, "request started");

        if let Some(data) = body {
            self.shared.write_data(&record, data)?;
            self.shared.finish_stream(&record)?;
        }

        Ok(PendingResponse {
            stream_id: record.id,
            reply_rx,
            body: Body::new(data_rx),
        })
    }

    /// Send a PING and receive the completion channel; parity of the id
    /// marks it as client-originated. The channel closes without a value
    /// if the connection dies first.
    pub fn ping(&self) -> Result<oneshot::Receiver<Ping>, StreamError> {
        self.shared.start_ping()
    }

    /// Receive the next server-pushed stream.
    pub async fn pushed(&mut self) -> Option<PushedStream> {
        self.pushes.recv().await
    }

    /// Begin a graceful shutdown: GOAWAY now, close when live streams
    /// finish.
    pub fn close(&self) {
        self.shared.close_gracefully();
    }

    /// Wait for the connection to finish.
    pub async fn join(self) -> Result<(), ConnectionError> {
        match self.driver.await {
            Ok(result) => result,
            Err(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish()
    }
}
