//! SPDY frame errors and status codes.

use std::fmt;

use super::types::StreamId;

/// RST_STREAM status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StatusCode {
    /// Generic protocol violation.
    ProtocolError = 1,
    /// Frame for a stream that is not active.
    InvalidStream = 2,
    /// Stream was declined before any processing.
    RefusedStream = 3,
    /// Unsupported protocol version.
    UnsupportedVersion = 4,
    /// Stream is no longer needed.
    Cancel = 5,
    /// Implementation fault.
    InternalError = 6,
    /// Flow control limits violated.
    FlowControlError = 7,
    /// Stream id already in use.
    StreamInUse = 8,
    /// Frame for a stream that is already half-closed.
    StreamAlreadyClosed = 9,
    /// CREDENTIAL frame was not accepted.
    InvalidCredentials = 10,
    /// Frame exceeded the permitted size.
    FrameTooLarge = 11,
}

impl StatusCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            1 => StatusCode::ProtocolError,
            2 => StatusCode::InvalidStream,
            3 => StatusCode::RefusedStream,
            4 => StatusCode::UnsupportedVersion,
            5 => StatusCode::Cancel,
            6 => StatusCode::InternalError,
            7 => StatusCode::FlowControlError,
            8 => StatusCode::StreamInUse,
            9 => StatusCode::StreamAlreadyClosed,
            10 => StatusCode::InvalidCredentials,
            11 => StatusCode::FrameTooLarge,
            // Unknown status codes are treated as PROTOCOL_ERROR
            _ => StatusCode::ProtocolError,
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Whether receiving this status code ends the whole connection.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            StatusCode::ProtocolError
                | StatusCode::InternalError
                | StatusCode::FrameTooLarge
                | StatusCode::UnsupportedVersion
        )
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::ProtocolError => write!(f, "PROTOCOL_ERROR"),
            StatusCode::InvalidStream => write!(f, "INVALID_STREAM"),
            StatusCode::RefusedStream => write!(f, "REFUSED_STREAM"),
            StatusCode::UnsupportedVersion => write!(f, "UNSUPPORTED_VERSION"),
            StatusCode::Cancel => write!(f, "CANCEL"),
            StatusCode::InternalError => write!(f, "INTERNAL_ERROR"),
            StatusCode::FlowControlError => write!(f, "FLOW_CONTROL_ERROR"),
            StatusCode::StreamInUse => write!(f, "STREAM_IN_USE"),
            StatusCode::StreamAlreadyClosed => write!(f, "STREAM_ALREADY_CLOSED"),
            StatusCode::InvalidCredentials => write!(f, "INVALID_CREDENTIALS"),
            StatusCode::FrameTooLarge => write!(f, "FRAME_TOO_LARGE"),
        }
    }
}

/// GOAWAY status codes (v3; v2 GOAWAY carries no status on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum GoawayStatus {
    Ok = 0,
    ProtocolError = 1,
    InternalError = 2,
}

impl GoawayStatus {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0 => GoawayStatus::Ok,
            1 => GoawayStatus::ProtocolError,
            _ => GoawayStatus::InternalError,
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for GoawayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoawayStatus::Ok => write!(f, "OK"),
            GoawayStatus::ProtocolError => write!(f, "PROTOCOL_ERROR"),
            GoawayStatus::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// Frame parsing/encoding errors.
#[derive(Debug)]
pub enum FrameError {
    /// Control frame carried a version other than the negotiated one.
    /// Connection-fatal.
    UnsupportedVersion { received: u16 },
    /// Frame exceeds the configured size ceiling. Connection-fatal.
    FrameTooLarge { size: u32, max: u32 },
    /// The shared compression context failed; it cannot recover, so this is
    /// connection-fatal.
    Compression(String),
    /// A header block decompressed but did not parse (duplicate names,
    /// malformed length prefixes). Affects only the carrying stream.
    HeaderBlock { stream_id: StreamId, reason: String },
    /// Frame payload has the wrong length for its type.
    InvalidPayloadLength {
        frame_type: u16,
        expected: usize,
        actual: usize,
    },
    /// A frame that requires a non-zero stream id carried stream id zero.
    StreamIdRequired { frame_type: u16 },
}

impl FrameError {
    /// Whether this error terminates the whole connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FrameError::UnsupportedVersion { .. }
                | FrameError::FrameTooLarge { .. }
                | FrameError::Compression(_)
        )
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::UnsupportedVersion { received } => {
                write!(f, "unsupported protocol version {}", received)
            }
            FrameError::FrameTooLarge { size, max } => {
                write!(f, "frame size {} exceeds maximum {}", size, max)
            }
            FrameError::Compression(reason) => {
                write!(f, "header compression failure: {}", reason)
            }
            FrameError::HeaderBlock { stream_id, reason } => {
                write!(f, "bad header block on stream {}: {}", stream_id, reason)
            }
            FrameError::InvalidPayloadLength {
                frame_type,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "frame type {} expected {} payload bytes, got {}",
                    frame_type, expected, actual
                )
            }
            FrameError::StreamIdRequired { frame_type } => {
                write!(f, "frame type {} requires a non-zero stream id", frame_type)
            }
        }
    }
}

impl std::error::Error for FrameError {}

#[cfg(test)]
mod tests {
    use super::*;

    // StatusCode tests

    #[test]
    fn test_status_code_roundtrip() {
        for code in 1..=11 {
            assert_eq!(StatusCode::from_u32(code).to_u32(), code);
        }
    }

    #[test]
    fn test_status_code_unknown_maps_to_protocol_error() {
        assert_eq!(StatusCode::from_u32(0), StatusCode::ProtocolError);
        assert_eq!(StatusCode::from_u32(99), StatusCode::ProtocolError);
    }

    #[test]
    fn test_status_code_fatal() {
        assert!(StatusCode::ProtocolError.is_fatal());
        assert!(StatusCode::InternalError.is_fatal());
        assert!(StatusCode::FrameTooLarge.is_fatal());
        assert!(StatusCode::UnsupportedVersion.is_fatal());

        assert!(!StatusCode::InvalidStream.is_fatal());
        assert!(!StatusCode::RefusedStream.is_fatal());
        assert!(!StatusCode::Cancel.is_fatal());
        assert!(!StatusCode::FlowControlError.is_fatal());
        assert!(!StatusCode::StreamInUse.is_fatal());
        assert!(!StatusCode::StreamAlreadyClosed.is_fatal());
        assert!(!StatusCode::InvalidCredentials.is_fatal());
    }

    #[test]
    fn test_status_code_display() {
        assert_eq!(format!("{}", StatusCode::ProtocolError), "PROTOCOL_ERROR");
        assert_eq!(format!("{}", StatusCode::RefusedStream), "REFUSED_STREAM");
        assert_eq!(
            format!("{}", StatusCode::FlowControlError),
            "FLOW_CONTROL_ERROR"
        );
        assert_eq!(
            format!("{}", StatusCode::StreamAlreadyClosed),
            "STREAM_ALREADY_CLOSED"
        );
    }

    // GoawayStatus tests

    #[test]
    fn test_goaway_status_roundtrip() {
        for status in [
            GoawayStatus::Ok,
            GoawayStatus::ProtocolError,
            GoawayStatus::InternalError,
        ] {
            assert_eq!(GoawayStatus::from_u32(status.to_u32()), status);
        }
    }

    // FrameError tests

    #[test]
    fn test_frame_error_fatal() {
        assert!(FrameError::UnsupportedVersion { received: 9 }.is_fatal());
        assert!(FrameError::FrameTooLarge { size: 10, max: 5 }.is_fatal());
        assert!(FrameError::Compression("bad".into()).is_fatal());

        assert!(!FrameError::HeaderBlock {
            stream_id: StreamId::new(1),
            reason: "duplicate".into(),
        }
        .is_fatal());
        assert!(!FrameError::InvalidPayloadLength {
            frame_type: 3,
            expected: 8,
            actual: 4,
        }
        .is_fatal());
    }

    #[test]
    fn test_frame_error_display() {
        let err = FrameError::FrameTooLarge {
            size: 2048,
            max: 1024,
        };
        assert_eq!(format!("{}", err), "frame size 2048 exceeds maximum 1024");

        let err = FrameError::UnsupportedVersion { received: 5 };
        assert_eq!(format!("{}", err), "unsupported protocol version 5");
    }
}
