//! The accept loop and demo handler.

use std::sync::Arc;

use spdy::{
    ConnectionEvents, HandlerFuture, Request, ResponseWriter, StatusCode, StreamHandler, StreamId,
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics::{
    CONNECTIONS_ACCEPTED, CONNECTIONS_ACTIVE, CONNECTION_ERRORS, REQUESTS_HANDLED,
    STREAMS_ACCEPTED, STREAMS_REFUSED, STREAMS_RESET,
};

/// Feeds the engine's stream lifecycle events into the process metrics.
#[derive(Debug)]
struct MetricsEvents;

impl ConnectionEvents for MetricsEvents {
    fn stream_accepted(&self, _stream_id: StreamId) {
        STREAMS_ACCEPTED.increment();
    }

    fn stream_refused(&self, _stream_id: StreamId) {
        STREAMS_REFUSED.increment();
    }

    fn stream_reset(&self, _stream_id: StreamId, _status: StatusCode) {
        STREAMS_RESET.increment();
    }
}

/// Bind the listener and serve connections until the task is aborted.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let engine_config = config
        .protocol
        .engine_config()?
        .events(Arc::new(MetricsEvents));
    let listener = TcpListener::bind(config.listen).await?;
    info!(
        addr = %config.listen,
        version = %engine_config.version,
        "spdy server listening"
    );

    let handler = Arc::new(DemoHandler);
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                CONNECTIONS_ACCEPTED.increment();
                CONNECTIONS_ACTIVE.increment();
                debug!(%addr, "connection accepted");

                let engine_config = engine_config.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Err(e) = spdy::serve(stream, engine_config, handler).await {
                        CONNECTION_ERRORS.increment();
                        debug!(%addr, error = %e, "connection ended with error");
                    }
                    CONNECTIONS_ACTIVE.decrement();
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

/// A small demonstration handler: answers every request with a plain-text
/// description of what it saw.
struct DemoHandler;

impl StreamHandler for DemoHandler {
    fn handle(&self, request: Request, mut response: ResponseWriter) -> HandlerFuture {
        Box::pin(async move {
            REQUESTS_HANDLED.increment();
            debug!(
                stream = %request.stream_id,
                method = %request.method,
                path = %request.path,
                priority = %request.priority,
                "handling request"
            );

            response.headers_mut().set("content-type", "text/plain");
            let body = format!(
                "spdy says hello\nmethod: {}\npath: {}\nhost: {}\n",
                request.method, request.path, request.host
            );
            let _ = response.write(body.as_bytes());
            let _ = response.finish();
        })
    }
}
