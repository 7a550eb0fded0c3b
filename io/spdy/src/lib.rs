//! spdy - a SPDY protocol engine.
//!
//! This crate terminates the SPDY wire protocol (versions 2, 3, and 3.1)
//! on either side of an established, ordered byte stream — typically TLS
//! with the version already negotiated via NPN/ALPN — and exposes a
//! request/response abstraction above it.
//!
//! # Features
//!
//! - Full frame encoding and decoding for SPDY v2 and v3
//! - zlib header-block compression with the protocol preset dictionaries
//! - Stream multiplexing with a strict eight-level priority writer
//! - Per-stream and (v3.1) per-connection flow control with pluggable
//!   window regrowth
//! - Server push, ping correlation, settings negotiation, GOAWAY draining
//!
//! # Architecture
//!
//! The crate is organized into three modules:
//!
//! - `frame`: frame types, encoding, and decoding
//! - `headers`: the NAME/VALUE header block and its compression
//! - `connection`: the connection engine, streams, and flow control
//!
//! TLS negotiation, the accept loop, and the HTTP-layer mapping are the
//! embedder's job; see the `spdy-server` crate for a worked example.

pub mod connection;
pub mod frame;
pub mod headers;

// Re-export commonly used types
pub use connection::{
    connect, default_client_settings, default_server_settings, serve, Body, Client, Config,
    ConnectionError, ConnectionEvents, DefaultFlowControl, FlowControlPolicy, HandlerFuture,
    NoEvents, PendingResponse, Ping, PushStream, PushedStream, Request, RequestHead, Response,
    ResponseWriter, Role, SettingsStore, StreamError, StreamHandler, StreamLimit, StreamState,
    NO_STREAM_LIMIT,
};
pub use frame::{
    flags, CredentialFrame, DataFrame, Frame, FrameDecoder, FrameEncoder, FrameError, FrameType,
    GoawayFrame, GoawayStatus, HeadersFrame, PingFrame, Priority, RstStreamFrame, Setting,
    SettingId, SettingsFrame, StatusCode, StreamId, SynReplyFrame, SynStreamFrame, Version,
    WindowUpdateFrame, DEFAULT_INITIAL_CLIENT_WINDOW_SIZE, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_CONCURRENT_STREAMS, FRAME_HEADER_SIZE, MAX_DATA_SIZE, MAX_DELTA_WINDOW_SIZE,
    MAX_FRAME_SIZE, MAX_STREAM_ID, MAX_TRANSFER_WINDOW_SIZE,
};
pub use headers::{HeaderCompressor, HeaderDecompressor, HeaderError, Headers};

/// The NPN/ALPN protocol identifiers to advertise for a set of enabled
/// versions, most recent first, with `http/1.1` as the fallback.
pub fn npn_protocols(versions: &[Version]) -> Vec<&'static str> {
    let mut tokens = Vec::with_capacity(versions.len() + 1);
    for version in [Version::V3_1, Version::V3, Version::V2] {
        if versions.contains(&version) && !tokens.contains(&version.npn_token()) {
            tokens.push(version.npn_token());
        }
    }
    tokens.push("http/1.1");
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npn_protocols_order() {
        let tokens = npn_protocols(&[Version::V2, Version::V3, Version::V3_1]);
        assert_eq!(tokens, vec!["spdy/3.1", "spdy/3", "spdy/2", "http/1.1"]);
    }

    #[test]
    fn test_npn_protocols_subset() {
        let tokens = npn_protocols(&[Version::V3]);
        assert_eq!(tokens, vec!["spdy/3", "http/1.1"]);
    }

    #[test]
    fn test_npn_protocols_empty() {
        assert_eq!(npn_protocols(&[]), vec!["http/1.1"]);
    }

    #[test]
    fn test_npn_protocols_duplicates() {
        let tokens = npn_protocols(&[Version::V3, Version::V3]);
        assert_eq!(tokens, vec!["spdy/3", "http/1.1"]);
    }
}
