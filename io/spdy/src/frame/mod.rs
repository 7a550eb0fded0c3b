//! SPDY frame types, encoding, and decoding.
//!
//! Every SPDY frame is either a control frame (first bit set, carrying a
//! version and a 16-bit type) or a data frame (first bit clear, carrying a
//! 31-bit stream id). Both share an 8-byte header followed by a 24-bit
//! length of payload.

mod decode;
mod encode;
mod error;
mod types;

pub use decode::FrameDecoder;
pub use encode::FrameEncoder;
pub use error::{FrameError, GoawayStatus, StatusCode};
pub use types::{
    flags, CredentialFrame, DataFrame, Frame, FrameType, GoawayFrame, HeadersFrame, PingFrame,
    Priority, RstStreamFrame, Setting, SettingId, SettingsFrame, StreamId, SynReplyFrame,
    SynStreamFrame, UnknownFrame, Version, WindowUpdateFrame,
};

/// Size of the fixed frame header shared by control and data frames.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Maximum frame payload length (24-bit length field).
pub const MAX_FRAME_SIZE: u32 = 0xff_ffff;

/// Maximum payload carried by a single DATA frame.
pub const MAX_DATA_SIZE: usize = 0xff_ffff;

/// Maximum stream identifier (31 bits).
pub const MAX_STREAM_ID: u32 = 0x7fff_ffff;

/// Maximum number of bytes in a transfer window.
pub const MAX_TRANSFER_WINDOW_SIZE: i64 = 0x8000_0000;

/// Maximum delta window size carried by a WINDOW_UPDATE frame.
pub const MAX_DELTA_WINDOW_SIZE: u32 = 0x7fff_ffff;

/// Default initial per-stream transfer window, as defined by the protocol.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_536;

/// Default initial transfer window advertised by clients, which accept a
/// much larger receive window than servers do.
pub const DEFAULT_INITIAL_CLIENT_WINDOW_SIZE: u32 = 10_485_760;

/// Default maximum number of concurrent streams.
pub const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 1000;
