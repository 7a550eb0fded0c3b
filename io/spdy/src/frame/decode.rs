//! SPDY frame decoding.

use bytes::{Buf, Bytes, BytesMut};

use super::error::{FrameError, GoawayStatus, StatusCode};
use super::types::*;
use super::{FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
use crate::headers::{HeaderDecompressor, Headers};

/// Frame decoder that parses SPDY frames from a byte buffer.
///
/// The decoder owns the receive-direction decompression context, so frames
/// must be fed in exact arrival order. Decompression failures poison the
/// context and are therefore connection-fatal.
pub struct FrameDecoder {
    version: Version,
    max_frame_size: u32,
    decompressor: HeaderDecompressor,
}

impl std::fmt::Debug for FrameDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDecoder")
            .field("version", &self.version)
            .field("max_frame_size", &self.max_frame_size)
            .finish()
    }
}

impl FrameDecoder {
    /// Create a new frame decoder for the negotiated version.
    pub fn new(version: Version) -> Self {
        FrameDecoder {
            version,
            max_frame_size: MAX_FRAME_SIZE,
            decompressor: HeaderDecompressor::new(version),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Set the payload-size ceiling above which frames are rejected as
    /// FRAME_TOO_LARGE.
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Try to decode a frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol error.
    /// On success the consumed bytes are removed from the buffer.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let control = buf[0] & 0x80 != 0;
        if control {
            let version = (((buf[0] & 0x7f) as u16) << 8) | buf[1] as u16;
            if version != self.version.wire() {
                return Err(FrameError::UnsupportedVersion { received: version });
            }
        }

        // 24-bit payload length.
        let length = ((buf[5] as u32) << 16) | ((buf[6] as u32) << 8) | buf[7] as u32;
        if length > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_SIZE + length as usize;
        if buf.len() < total {
            return Ok(None);
        }

        if control {
            let frame_type = ((buf[2] as u16) << 8) | buf[3] as u16;
            let frame_flags = buf[4];
            buf.advance(FRAME_HEADER_SIZE);
            let payload = buf.split_to(length as usize).freeze();
            self.parse_control(frame_type, frame_flags, payload)
                .map(Some)
        } else {
            let stream_id = StreamId::new(
                ((buf[0] as u32) << 24)
                    | ((buf[1] as u32) << 16)
                    | ((buf[2] as u32) << 8)
                    | buf[3] as u32,
            );
            let frame_flags = buf[4];
            buf.advance(FRAME_HEADER_SIZE);
            let data = buf.split_to(length as usize).freeze();
            Ok(Some(Frame::Data(DataFrame {
                stream_id,
                fin: frame_flags & flags::FIN != 0,
                data,
            })))
        }
    }

    fn parse_control(
        &mut self,
        frame_type: u16,
        frame_flags: u8,
        payload: Bytes,
    ) -> Result<Frame, FrameError> {
        match FrameType::from_u16(frame_type) {
            Some(FrameType::SynStream) => self.parse_syn_stream(frame_flags, payload),
            Some(FrameType::SynReply) => self.parse_syn_reply(frame_flags, payload),
            Some(FrameType::RstStream) => self.parse_rst_stream(payload),
            Some(FrameType::Settings) => self.parse_settings(frame_flags, payload),
            Some(FrameType::Noop) if self.version == Version::V2 => Ok(Frame::Noop),
            Some(FrameType::Ping) => self.parse_ping(payload),
            Some(FrameType::Goaway) => self.parse_goaway(payload),
            Some(FrameType::Headers) => self.parse_headers(frame_flags, payload),
            Some(FrameType::WindowUpdate) => self.parse_window_update(payload),
            Some(FrameType::Credential) => self.parse_credential(payload),
            // NOOP outside v2 falls through to Unknown with the rest.
            _ => Ok(Frame::Unknown(UnknownFrame {
                frame_type,
                flags: frame_flags,
                payload,
            })),
        }
    }

    /// Decompress and parse a header block, attributing parse failures to
    /// the carrying stream. Decompression always runs first so the shared
    /// context stays aligned even when the block's contents are rejected.
    fn read_headers(&mut self, stream_id: StreamId, block: &[u8]) -> Result<Headers, FrameError> {
        let plain = self
            .decompressor
            .decompress(block)
            .map_err(FrameError::Compression)?;
        Headers::parse(self.version, &plain).map_err(|e| FrameError::HeaderBlock {
            stream_id,
            reason: e.to_string(),
        })
    }

    fn parse_syn_stream(&mut self, frame_flags: u8, payload: Bytes) -> Result<Frame, FrameError> {
        if payload.len() < 10 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: FrameType::SynStream as u16,
                expected: 10,
                actual: payload.len(),
            });
        }

        let stream_id = StreamId::new(read_u32(&payload[0..4]));
        let associated_stream_id = StreamId::new(read_u32(&payload[4..8]));
        let priority = match self.version {
            Version::V2 => Priority::new(payload[8] >> 6),
            Version::V3 | Version::V3_1 => Priority::new(payload[8] >> 5),
        };
        let slot = match self.version {
            Version::V2 => 0,
            Version::V3 | Version::V3_1 => payload[9],
        };
        let headers = self.read_headers(stream_id, &payload[10..])?;

        Ok(Frame::SynStream(SynStreamFrame {
            stream_id,
            associated_stream_id,
            priority,
            slot,
            fin: frame_flags & flags::FIN != 0,
            unidirectional: frame_flags & flags::UNIDIRECTIONAL != 0,
            headers,
        }))
    }

    fn parse_syn_reply(&mut self, frame_flags: u8, payload: Bytes) -> Result<Frame, FrameError> {
        let fixed = if self.version == Version::V2 { 6 } else { 4 };
        if payload.len() < fixed {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: FrameType::SynReply as u16,
                expected: fixed,
                actual: payload.len(),
            });
        }

        let stream_id = StreamId::new(read_u32(&payload[0..4]));
        let headers = self.read_headers(stream_id, &payload[fixed..])?;

        Ok(Frame::SynReply(SynReplyFrame {
            stream_id,
            fin: frame_flags & flags::FIN != 0,
            headers,
        }))
    }

    fn parse_rst_stream(&mut self, payload: Bytes) -> Result<Frame, FrameError> {
        if payload.len() != 8 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: FrameType::RstStream as u16,
                expected: 8,
                actual: payload.len(),
            });
        }
        Ok(Frame::RstStream(RstStreamFrame {
            stream_id: StreamId::new(read_u32(&payload[0..4])),
            status: StatusCode::from_u32(read_u32(&payload[4..8])),
        }))
    }

    fn parse_settings(&mut self, frame_flags: u8, payload: Bytes) -> Result<Frame, FrameError> {
        if payload.len() < 4 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: FrameType::Settings as u16,
                expected: 4,
                actual: payload.len(),
            });
        }
        let count = read_u32(&payload[0..4]) as usize;
        let expected = 4 + count * 8;
        if payload.len() != expected {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: FrameType::Settings as u16,
                expected,
                actual: payload.len(),
            });
        }

        let mut settings = Vec::with_capacity(count);
        for i in 0..count {
            let entry = &payload[4 + i * 8..12 + i * 8];
            let (setting_flags, id) = match self.version {
                // v2 quirk: the id is 24 bits little-endian, then flags.
                Version::V2 => {
                    let id = entry[0] as u32 | ((entry[1] as u32) << 8) | ((entry[2] as u32) << 16);
                    (entry[3], id)
                }
                Version::V3 | Version::V3_1 => {
                    let id =
                        ((entry[1] as u32) << 16) | ((entry[2] as u32) << 8) | entry[3] as u32;
                    (entry[0], id)
                }
            };
            settings.push(Setting {
                flags: setting_flags,
                id: SettingId::from_u32(id),
                value: read_u32(&entry[4..8]),
            });
        }

        Ok(Frame::Settings(SettingsFrame {
            clear_persisted: frame_flags & flags::SETTINGS_CLEAR_SETTINGS != 0,
            settings,
        }))
    }

    fn parse_ping(&mut self, payload: Bytes) -> Result<Frame, FrameError> {
        if payload.len() != 4 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: FrameType::Ping as u16,
                expected: 4,
                actual: payload.len(),
            });
        }
        Ok(Frame::Ping(PingFrame {
            id: read_u32(&payload[0..4]),
        }))
    }

    fn parse_goaway(&mut self, payload: Bytes) -> Result<Frame, FrameError> {
        let expected = if self.version == Version::V2 { 4 } else { 8 };
        if payload.len() != expected {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: FrameType::Goaway as u16,
                expected,
                actual: payload.len(),
            });
        }
        let status = if self.version == Version::V2 {
            GoawayStatus::Ok
        } else {
            GoawayStatus::from_u32(read_u32(&payload[4..8]))
        };
        Ok(Frame::Goaway(GoawayFrame {
            last_good_stream_id: StreamId::new(read_u32(&payload[0..4])),
            status,
        }))
    }

    fn parse_headers(&mut self, frame_flags: u8, payload: Bytes) -> Result<Frame, FrameError> {
        let fixed = if self.version == Version::V2 { 6 } else { 4 };
        if payload.len() < fixed {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: FrameType::Headers as u16,
                expected: fixed,
                actual: payload.len(),
            });
        }

        let stream_id = StreamId::new(read_u32(&payload[0..4]));
        let headers = self.read_headers(stream_id, &payload[fixed..])?;

        Ok(Frame::Headers(HeadersFrame {
            stream_id,
            fin: frame_flags & flags::FIN != 0,
            headers,
        }))
    }

    fn parse_window_update(&mut self, payload: Bytes) -> Result<Frame, FrameError> {
        if payload.len() != 8 {
            return Err(FrameError::InvalidPayloadLength {
                frame_type: FrameType::WindowUpdate as u16,
                expected: 8,
                actual: payload.len(),
            });
        }
        Ok(Frame::WindowUpdate(WindowUpdateFrame {
            stream_id: StreamId::new(read_u32(&payload[0..4])),
            delta: read_u32(&payload[4..8]) & 0x7fff_ffff,
        }))
    }

    fn parse_credential(&mut self, payload: Bytes) -> Result<Frame, FrameError> {
        let err = |actual| FrameError::InvalidPayloadLength {
            frame_type: FrameType::Credential as u16,
            expected: 6,
            actual,
        };

        if payload.len() < 6 {
            return Err(err(payload.len()));
        }
        let slot = ((payload[0] as u16) << 8) | payload[1] as u16;
        let proof_len = read_u32(&payload[2..6]) as usize;
        if payload.len() < 6 + proof_len {
            return Err(err(payload.len()));
        }
        let proof = payload.slice(6..6 + proof_len);

        let mut certificates = Vec::new();
        let mut pos = 6 + proof_len;
        while pos < payload.len() {
            if payload.len() - pos < 4 {
                return Err(err(payload.len()));
            }
            let cert_len = read_u32(&payload[pos..pos + 4]) as usize;
            pos += 4;
            if payload.len() - pos < cert_len {
                return Err(err(payload.len()));
            }
            certificates.push(payload.slice(pos..pos + cert_len));
            pos += cert_len;
        }

        Ok(Frame::Credential(CredentialFrame {
            slot,
            proof,
            certificates,
        }))
    }
}

#[inline]
fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
