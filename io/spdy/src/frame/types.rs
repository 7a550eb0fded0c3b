//! SPDY frame type definitions.

use bytes::Bytes;

use super::error::{GoawayStatus, StatusCode};
use crate::headers::Headers;

/// Protocol versions supported by the engine.
///
/// SPDY/3.1 shares version number 3 on the wire; the distinction only
/// changes connection-level flow control behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Version {
    V2,
    V3,
    V3_1,
}

impl Version {
    /// The version number carried in control frame headers.
    pub fn wire(self) -> u16 {
        match self {
            Version::V2 => 2,
            Version::V3 | Version::V3_1 => 3,
        }
    }

    /// The NPN/ALPN protocol identifier for this version.
    pub fn npn_token(self) -> &'static str {
        match self {
            Version::V2 => "spdy/2",
            Version::V3 => "spdy/3",
            Version::V3_1 => "spdy/3.1",
        }
    }

    /// Resolve an NPN/ALPN protocol identifier.
    pub fn from_npn(token: &str) -> Option<Self> {
        match token {
            "spdy/2" => Some(Version::V2),
            "spdy/3" => Some(Version::V3),
            "spdy/3.1" => Some(Version::V3_1),
            _ => None,
        }
    }

    /// Whether this version carries per-stream flow control (v3 and later).
    pub fn has_flow_control(self) -> bool {
        !matches!(self, Version::V2)
    }

    /// Whether this version carries a connection-level flow control window.
    pub fn has_connection_window(self) -> bool {
        matches!(self, Version::V3_1)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.npn_token())
    }
}

/// SPDY control frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FrameType {
    SynStream = 1,
    SynReply = 2,
    RstStream = 3,
    Settings = 4,
    Noop = 5,
    Ping = 6,
    Goaway = 7,
    Headers = 8,
    WindowUpdate = 9,
    Credential = 10,
}

impl FrameType {
    /// Try to convert a 16-bit type field to a frame type.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FrameType::SynStream),
            2 => Some(FrameType::SynReply),
            3 => Some(FrameType::RstStream),
            4 => Some(FrameType::Settings),
            5 => Some(FrameType::Noop),
            6 => Some(FrameType::Ping),
            7 => Some(FrameType::Goaway),
            8 => Some(FrameType::Headers),
            9 => Some(FrameType::WindowUpdate),
            10 => Some(FrameType::Credential),
            _ => None,
        }
    }
}

/// Frame flags.
pub mod flags {
    /// Half-closes the stream in the sender's direction.
    pub const FIN: u8 = 0x1;
    /// SYN_STREAM: the stream opens already half-closed.
    pub const UNIDIRECTIONAL: u8 = 0x2;
    /// SETTINGS frame: clear previously persisted settings.
    pub const SETTINGS_CLEAR_SETTINGS: u8 = 0x1;
    /// SETTINGS entry: the receiver should persist this value.
    pub const SETTING_PERSIST_VALUE: u8 = 0x1;
    /// SETTINGS entry: this value was previously persisted.
    pub const SETTING_PERSISTED: u8 = 0x2;
}

/// Stream identifier (31 bits, high bit reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Connection-level pseudo-stream (id 0), used by WINDOW_UPDATE in
    /// SPDY/3.1 and by the flow control policy hook.
    pub const CONNECTION: StreamId = StreamId(0);

    /// Create a new stream ID, masking the reserved bit.
    #[inline]
    pub fn new(id: u32) -> Self {
        StreamId(id & 0x7fff_ffff)
    }

    /// Get the raw stream ID value.
    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }

    /// Check if this is the connection-level pseudo-stream.
    #[inline]
    pub fn is_connection_level(self) -> bool {
        self.0 == 0
    }

    /// Check if this is a client-initiated stream (odd numbers).
    #[inline]
    pub fn is_client_initiated(self) -> bool {
        self.0 % 2 == 1
    }

    /// Check if this is a server-initiated stream (even numbers, non-zero).
    #[inline]
    pub fn is_server_initiated(self) -> bool {
        self.0 != 0 && self.0 % 2 == 0
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        StreamId::new(id)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stream priority. Zero is the most urgent, seven the least.
///
/// The numeric inversion is easy to get wrong, so ordering goes through
/// [`Priority::higher_than`] rather than raw comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Priority(u8);

impl Priority {
    /// The most urgent priority (0).
    pub const HIGHEST: Priority = Priority(0);
    /// The least urgent priority (7).
    pub const LOWEST: Priority = Priority(7);

    /// Number of distinct priority levels.
    pub const LEVELS: usize = 8;

    /// Create a priority, clamping out-of-range values to the least urgent.
    pub fn new(value: u8) -> Self {
        Priority(value.min(7))
    }

    /// The raw priority value (0 highest, 7 lowest).
    pub fn value(self) -> u8 {
        self.0
    }

    /// Queue index for this priority.
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this priority is more urgent than `other`.
    pub fn higher_than(self, other: Priority) -> bool {
        self.0 < other.0
    }

    /// One level less urgent, clamped to the least urgent.
    pub fn lower(self) -> Priority {
        Priority((self.0 + 1).min(7))
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recognized setting identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingId {
    UploadBandwidth,
    DownloadBandwidth,
    RoundTripTime,
    MaxConcurrentStreams,
    CurrentCwnd,
    DownloadRetransRate,
    InitialWindowSize,
    ClientCertificateVectorSize,
    /// Unknown setting ID (stored, otherwise ignored).
    Unknown(u32),
}

impl SettingId {
    pub fn from_u32(id: u32) -> Self {
        match id {
            1 => SettingId::UploadBandwidth,
            2 => SettingId::DownloadBandwidth,
            3 => SettingId::RoundTripTime,
            4 => SettingId::MaxConcurrentStreams,
            5 => SettingId::CurrentCwnd,
            6 => SettingId::DownloadRetransRate,
            7 => SettingId::InitialWindowSize,
            8 => SettingId::ClientCertificateVectorSize,
            _ => SettingId::Unknown(id),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            SettingId::UploadBandwidth => 1,
            SettingId::DownloadBandwidth => 2,
            SettingId::RoundTripTime => 3,
            SettingId::MaxConcurrentStreams => 4,
            SettingId::CurrentCwnd => 5,
            SettingId::DownloadRetransRate => 6,
            SettingId::InitialWindowSize => 7,
            SettingId::ClientCertificateVectorSize => 8,
            SettingId::Unknown(id) => id,
        }
    }
}

/// Individual setting in a SETTINGS frame: `(flags, id, value)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub flags: u8,
    pub id: SettingId,
    pub value: u32,
}

impl Setting {
    /// A setting with no flags.
    pub fn new(id: SettingId, value: u32) -> Self {
        Setting { flags: 0, id, value }
    }
}

/// Parsed SPDY frame.
#[derive(Debug, Clone)]
pub enum Frame {
    SynStream(SynStreamFrame),
    SynReply(SynReplyFrame),
    RstStream(RstStreamFrame),
    Settings(SettingsFrame),
    /// NOOP (v2 only). Carries nothing and is ignored on receipt.
    Noop,
    Ping(PingFrame),
    Goaway(GoawayFrame),
    Headers(HeadersFrame),
    WindowUpdate(WindowUpdateFrame),
    Credential(CredentialFrame),
    Data(DataFrame),
    /// Unknown control frame type (counted as a benign anomaly).
    Unknown(UnknownFrame),
}

impl Frame {
    /// Get the stream ID this frame applies to, if any.
    pub fn stream_id(&self) -> StreamId {
        match self {
            Frame::SynStream(f) => f.stream_id,
            Frame::SynReply(f) => f.stream_id,
            Frame::RstStream(f) => f.stream_id,
            Frame::Settings(_) => StreamId::CONNECTION,
            Frame::Noop => StreamId::CONNECTION,
            Frame::Ping(_) => StreamId::CONNECTION,
            Frame::Goaway(_) => StreamId::CONNECTION,
            Frame::Headers(f) => f.stream_id,
            Frame::WindowUpdate(f) => f.stream_id,
            Frame::Credential(_) => StreamId::CONNECTION,
            Frame::Data(f) => f.stream_id,
            Frame::Unknown(_) => StreamId::CONNECTION,
        }
    }

    /// Whether this frame is a control frame (everything except DATA).
    pub fn is_control(&self) -> bool {
        !matches!(self, Frame::Data(_))
    }
}

/// SYN_STREAM frame (type 1): opens a new stream.
#[derive(Debug, Clone)]
pub struct SynStreamFrame {
    pub stream_id: StreamId,
    /// For pushed streams, the stream this one is associated with; zero
    /// otherwise.
    pub associated_stream_id: StreamId,
    pub priority: Priority,
    /// Credential vector slot (v3; always zero in v2).
    pub slot: u8,
    pub fin: bool,
    pub unidirectional: bool,
    pub headers: Headers,
}

/// SYN_REPLY frame (type 2): the response half of a stream.
#[derive(Debug, Clone)]
pub struct SynReplyFrame {
    pub stream_id: StreamId,
    pub fin: bool,
    pub headers: Headers,
}

/// RST_STREAM frame (type 3): terminates a stream.
#[derive(Debug, Clone, Copy)]
pub struct RstStreamFrame {
    pub stream_id: StreamId,
    pub status: StatusCode,
}

/// SETTINGS frame (type 4).
#[derive(Debug, Clone)]
pub struct SettingsFrame {
    /// FLAG_SETTINGS_CLEAR_SETTINGS was set.
    pub clear_persisted: bool,
    pub settings: Vec<Setting>,
}

/// PING frame (type 6): a round-trip probe. Id parity encodes the
/// originating role (even for servers, odd for clients).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingFrame {
    pub id: u32,
}

/// GOAWAY frame (type 7): announces the highest stream id the sender
/// promises to process.
#[derive(Debug, Clone, Copy)]
pub struct GoawayFrame {
    pub last_good_stream_id: StreamId,
    /// Status code (v3 only; absent on the wire in v2).
    pub status: GoawayStatus,
}

/// HEADERS frame (type 8): additional headers for an existing stream.
#[derive(Debug, Clone)]
pub struct HeadersFrame {
    pub stream_id: StreamId,
    pub fin: bool,
    pub headers: Headers,
}

/// WINDOW_UPDATE frame (type 9, v3 and later). Stream id zero addresses
/// the connection-level window in SPDY/3.1.
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdateFrame {
    pub stream_id: StreamId,
    pub delta: u32,
}

/// CREDENTIAL frame (type 10, v3): client certificate material for a
/// certificate vector slot.
#[derive(Debug, Clone)]
pub struct CredentialFrame {
    pub slot: u16,
    pub proof: Bytes,
    pub certificates: Vec<Bytes>,
}

/// DATA frame: stream payload bytes.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub stream_id: StreamId,
    pub fin: bool,
    pub data: Bytes,
}

/// Unknown control frame, preserved as raw bytes.
#[derive(Debug, Clone)]
pub struct UnknownFrame {
    pub frame_type: u16,
    pub flags: u8,
    pub payload: Bytes,
}
