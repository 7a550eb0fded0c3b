//! SPDY frame encoding.

use bytes::{BufMut, BytesMut};

use super::error::FrameError;
use super::types::*;
use super::{FRAME_HEADER_SIZE, MAX_DATA_SIZE};
use crate::headers::{HeaderCompressor, Headers};

/// Frame encoder that writes SPDY frames in their exact wire form.
///
/// The encoder owns the send-direction compression context, so it must see
/// every header-carrying frame in the order the bytes go out on the wire.
/// A single task owning the encoder is what keeps compressed header blocks
/// from interleaving.
pub struct FrameEncoder {
    version: Version,
    compressor: HeaderCompressor,
}

impl std::fmt::Debug for FrameEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEncoder")
            .field("version", &self.version)
            .finish()
    }
}

impl FrameEncoder {
    /// Create a new frame encoder for the negotiated version.
    pub fn new(version: Version) -> Self {
        FrameEncoder {
            version,
            compressor: HeaderCompressor::new(version),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Encode a frame to the buffer.
    pub fn encode(&mut self, frame: &Frame, buf: &mut BytesMut) -> Result<(), FrameError> {
        match frame {
            Frame::SynStream(f) => self.encode_syn_stream(f, buf),
            Frame::SynReply(f) => self.encode_syn_reply(f, buf),
            Frame::RstStream(f) => self.encode_rst_stream(f, buf),
            Frame::Settings(f) => self.encode_settings(f, buf),
            Frame::Noop => self.encode_noop(buf),
            Frame::Ping(f) => self.encode_ping(f, buf),
            Frame::Goaway(f) => self.encode_goaway(f, buf),
            Frame::Headers(f) => self.encode_headers(f, buf),
            Frame::WindowUpdate(f) => self.encode_window_update(f, buf),
            Frame::Credential(f) => self.encode_credential(f, buf),
            Frame::Data(f) => self.encode_data(f, buf),
            Frame::Unknown(f) => self.encode_unknown(f, buf),
        }
    }

    /// Write a control frame header.
    fn write_control_header(
        &self,
        buf: &mut BytesMut,
        frame_type: u16,
        flags: u8,
        length: u32,
    ) {
        let version = self.version.wire();
        buf.put_u8(0x80 | (version >> 8) as u8);
        buf.put_u8(version as u8);
        buf.put_u16(frame_type);
        buf.put_u8(flags);
        buf.put_u8((length >> 16) as u8);
        buf.put_u8((length >> 8) as u8);
        buf.put_u8(length as u8);
    }

    /// Serialize and compress a header block.
    fn compress_headers(
        &mut self,
        stream_id: StreamId,
        headers: &Headers,
    ) -> Result<Vec<u8>, FrameError> {
        let mut plain = Vec::new();
        headers
            .serialize(self.version, &mut plain)
            .map_err(|e| FrameError::HeaderBlock {
                stream_id,
                reason: e.to_string(),
            })?;
        self.compressor
            .compress(&plain)
            .map_err(FrameError::Compression)
    }

    fn encode_syn_stream(
        &mut self,
        frame: &SynStreamFrame,
        buf: &mut BytesMut,
    ) -> Result<(), FrameError> {
        let block = self.compress_headers(frame.stream_id, &frame.headers)?;

        let mut frame_flags = 0u8;
        if frame.fin {
            frame_flags |= flags::FIN;
        }
        if frame.unidirectional {
            frame_flags |= flags::UNIDIRECTIONAL;
        }

        let length = 10 + block.len() as u32;
        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_control_header(buf, FrameType::SynStream as u16, frame_flags, length);
        buf.put_u32(frame.stream_id.value());
        buf.put_u32(frame.associated_stream_id.value());
        match self.version {
            // Priority is left-aligned: two bits in v2, three in v3.
            Version::V2 => {
                buf.put_u8((frame.priority.value().min(3) & 0x3) << 6);
                buf.put_u8(0);
            }
            Version::V3 | Version::V3_1 => {
                buf.put_u8((frame.priority.value() & 0x7) << 5);
                buf.put_u8(frame.slot);
            }
        }
        buf.extend_from_slice(&block);
        Ok(())
    }

    fn encode_syn_reply(
        &mut self,
        frame: &SynReplyFrame,
        buf: &mut BytesMut,
    ) -> Result<(), FrameError> {
        let block = self.compress_headers(frame.stream_id, &frame.headers)?;

        let frame_flags = if frame.fin { flags::FIN } else { 0 };
        // v2 carries two unused bytes between the stream id and the block.
        let fixed = if self.version == Version::V2 { 6 } else { 4 };
        let length = fixed + block.len() as u32;

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_control_header(buf, FrameType::SynReply as u16, frame_flags, length);
        buf.put_u32(frame.stream_id.value());
        if self.version == Version::V2 {
            buf.put_u16(0);
        }
        buf.extend_from_slice(&block);
        Ok(())
    }

    fn encode_rst_stream(
        &mut self,
        frame: &RstStreamFrame,
        buf: &mut BytesMut,
    ) -> Result<(), FrameError> {
        buf.reserve(FRAME_HEADER_SIZE + 8);
        self.write_control_header(buf, FrameType::RstStream as u16, 0, 8);
        buf.put_u32(frame.stream_id.value());
        buf.put_u32(frame.status.to_u32());
        Ok(())
    }

    fn encode_settings(
        &mut self,
        frame: &SettingsFrame,
        buf: &mut BytesMut,
    ) -> Result<(), FrameError> {
        let frame_flags = if frame.clear_persisted {
            flags::SETTINGS_CLEAR_SETTINGS
        } else {
            0
        };
        let length = 4 + 8 * frame.settings.len() as u32;

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_control_header(buf, FrameType::Settings as u16, frame_flags, length);
        buf.put_u32(frame.settings.len() as u32);
        for setting in &frame.settings {
            let id = setting.id.to_u32();
            match self.version {
                // v2 quirk: the id is 24 bits little-endian, then flags.
                Version::V2 => {
                    buf.put_u8(id as u8);
                    buf.put_u8((id >> 8) as u8);
                    buf.put_u8((id >> 16) as u8);
                    buf.put_u8(setting.flags);
                }
                Version::V3 | Version::V3_1 => {
                    buf.put_u8(setting.flags);
                    buf.put_u8((id >> 16) as u8);
                    buf.put_u8((id >> 8) as u8);
                    buf.put_u8(id as u8);
                }
            }
            buf.put_u32(setting.value);
        }
        Ok(())
    }

    fn encode_noop(&mut self, buf: &mut BytesMut) -> Result<(), FrameError> {
        buf.reserve(FRAME_HEADER_SIZE);
        self.write_control_header(buf, FrameType::Noop as u16, 0, 0);
        Ok(())
    }

    fn encode_ping(&mut self, frame: &PingFrame, buf: &mut BytesMut) -> Result<(), FrameError> {
        buf.reserve(FRAME_HEADER_SIZE + 4);
        self.write_control_header(buf, FrameType::Ping as u16, 0, 4);
        buf.put_u32(frame.id);
        Ok(())
    }

    fn encode_goaway(&mut self, frame: &GoawayFrame, buf: &mut BytesMut) -> Result<(), FrameError> {
        let length = if self.version == Version::V2 { 4 } else { 8 };
        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_control_header(buf, FrameType::Goaway as u16, 0, length);
        buf.put_u32(frame.last_good_stream_id.value());
        if self.version != Version::V2 {
            buf.put_u32(frame.status.to_u32());
        }
        Ok(())
    }

    fn encode_headers(
        &mut self,
        frame: &HeadersFrame,
        buf: &mut BytesMut,
    ) -> Result<(), FrameError> {
        let block = self.compress_headers(frame.stream_id, &frame.headers)?;

        let frame_flags = if frame.fin { flags::FIN } else { 0 };
        let fixed = if self.version == Version::V2 { 6 } else { 4 };
        let length = fixed + block.len() as u32;

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_control_header(buf, FrameType::Headers as u16, frame_flags, length);
        buf.put_u32(frame.stream_id.value());
        if self.version == Version::V2 {
            buf.put_u16(0);
        }
        buf.extend_from_slice(&block);
        Ok(())
    }

    fn encode_window_update(
        &mut self,
        frame: &WindowUpdateFrame,
        buf: &mut BytesMut,
    ) -> Result<(), FrameError> {
        buf.reserve(FRAME_HEADER_SIZE + 8);
        self.write_control_header(buf, FrameType::WindowUpdate as u16, 0, 8);
        buf.put_u32(frame.stream_id.value());
        buf.put_u32(frame.delta & 0x7fff_ffff);
        Ok(())
    }

    fn encode_credential(
        &mut self,
        frame: &CredentialFrame,
        buf: &mut BytesMut,
    ) -> Result<(), FrameError> {
        let certs_len: usize = frame.certificates.iter().map(|c| 4 + c.len()).sum();
        let length = (2 + 4 + frame.proof.len() + certs_len) as u32;

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_control_header(buf, FrameType::Credential as u16, 0, length);
        buf.put_u16(frame.slot);
        buf.put_u32(frame.proof.len() as u32);
        buf.extend_from_slice(&frame.proof);
        for cert in &frame.certificates {
            buf.put_u32(cert.len() as u32);
            buf.extend_from_slice(cert);
        }
        Ok(())
    }

    fn encode_data(&mut self, frame: &DataFrame, buf: &mut BytesMut) -> Result<(), FrameError> {
        if frame.data.len() > MAX_DATA_SIZE {
            return Err(FrameError::FrameTooLarge {
                size: frame.data.len() as u32,
                max: MAX_DATA_SIZE as u32,
            });
        }
        let frame_flags = if frame.fin { flags::FIN } else { 0 };
        let length = frame.data.len() as u32;

        buf.reserve(FRAME_HEADER_SIZE + frame.data.len());
        buf.put_u32(frame.stream_id.value() & 0x7fff_ffff);
        buf.put_u8(frame_flags);
        buf.put_u8((length >> 16) as u8);
        buf.put_u8((length >> 8) as u8);
        buf.put_u8(length as u8);
        buf.extend_from_slice(&frame.data);
        Ok(())
    }

    fn encode_unknown(&mut self, frame: &UnknownFrame, buf: &mut BytesMut) -> Result<(), FrameError> {
        let length = frame.payload.len() as u32;
        buf.reserve(FRAME_HEADER_SIZE + frame.payload.len());
        self.write_control_header(buf, frame.frame_type, frame.flags, length);
        buf.extend_from_slice(&frame.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::error::{GoawayStatus, StatusCode};

    fn encode(version: Version, frame: &Frame) -> BytesMut {
        let mut encoder = FrameEncoder::new(version);
        let mut buf = BytesMut::new();
        encoder.encode(frame, &mut buf).unwrap();
        buf
    }

    // Header layout tests

    #[test]
    fn test_control_header_layout_v3() {
        let buf = encode(Version::V3, &Frame::Ping(PingFrame { id: 1 }));
        // Control bit + version 3.
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 0x03);
        // Type PING.
        assert_eq!(&buf[2..4], &[0x00, 0x06]);
        // Flags, then 24-bit length of 4.
        assert_eq!(buf[4], 0);
        assert_eq!(&buf[5..8], &[0x00, 0x00, 0x04]);
        assert_eq!(&buf[8..12], &[0x00, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn test_control_header_layout_v2() {
        let buf = encode(Version::V2, &Frame::Ping(PingFrame { id: 1 }));
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 0x02);
    }

    #[test]
    fn test_data_header_layout() {
        let buf = encode(
            Version::V3,
            &Frame::Data(DataFrame {
                stream_id: StreamId::new(5),
                fin: true,
                data: bytes::Bytes::from_static(b"hi"),
            }),
        );
        // First bit clear, 31-bit stream id.
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x05]);
        assert_eq!(buf[4], flags::FIN);
        assert_eq!(&buf[5..8], &[0x00, 0x00, 0x02]);
        assert_eq!(&buf[8..], b"hi".as_slice());
    }

    // Priority bit-position tests

    #[test]
    fn test_syn_stream_priority_bits_v3() {
        // Three bits, left-aligned: bits 5-7 of the byte at offset 16.
        let frame = Frame::SynStream(SynStreamFrame {
            stream_id: StreamId::new(1),
            associated_stream_id: StreamId::new(0),
            priority: Priority::new(5),
            slot: 0,
            fin: false,
            unidirectional: false,
            headers: Headers::new(),
        });
        let buf = encode(Version::V3, &frame);
        assert_eq!(buf[16], 5 << 5);
        assert_eq!(buf[16] & 0x1f, 0);
    }

    #[test]
    fn test_syn_stream_priority_bits_v2() {
        // Two bits, left-aligned: bits 6-7 of the byte at offset 16.
        let frame = Frame::SynStream(SynStreamFrame {
            stream_id: StreamId::new(1),
            associated_stream_id: StreamId::new(0),
            priority: Priority::new(3),
            slot: 0,
            fin: false,
            unidirectional: false,
            headers: Headers::new(),
        });
        let buf = encode(Version::V2, &frame);
        assert_eq!(buf[16], 3 << 6);
        assert_eq!(buf[16] & 0x3f, 0);
    }

    #[test]
    fn test_syn_stream_priority_clamped_in_v2() {
        // v2 has only four levels; lower priorities clamp to 3.
        let frame = Frame::SynStream(SynStreamFrame {
            stream_id: StreamId::new(1),
            associated_stream_id: StreamId::new(0),
            priority: Priority::new(7),
            slot: 0,
            fin: false,
            unidirectional: false,
            headers: Headers::new(),
        });
        let buf = encode(Version::V2, &frame);
        assert_eq!(buf[16] >> 6, 3);
    }

    #[test]
    fn test_syn_stream_flags() {
        let frame = Frame::SynStream(SynStreamFrame {
            stream_id: StreamId::new(2),
            associated_stream_id: StreamId::new(1),
            priority: Priority::HIGHEST,
            slot: 0,
            fin: false,
            unidirectional: true,
            headers: Headers::new(),
        });
        let buf = encode(Version::V3, &frame);
        assert_eq!(buf[4], flags::UNIDIRECTIONAL);
        // Associated stream id sits at offset 12.
        assert_eq!(&buf[12..16], &[0x00, 0x00, 0x00, 0x01]);
    }

    // SETTINGS layout tests

    #[test]
    fn test_settings_entry_layout_v3() {
        let frame = Frame::Settings(SettingsFrame {
            clear_persisted: false,
            settings: vec![Setting {
                flags: flags::SETTING_PERSIST_VALUE,
                id: SettingId::InitialWindowSize,
                value: 0x0102_0304,
            }],
        });
        let buf = encode(Version::V3, &frame);
        // count
        assert_eq!(&buf[8..12], &[0x00, 0x00, 0x00, 0x01]);
        // flags byte then 24-bit big-endian id (7)
        assert_eq!(&buf[12..16], &[0x01, 0x00, 0x00, 0x07]);
        assert_eq!(&buf[16..20], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_settings_entry_layout_v2_little_endian_id() {
        let frame = Frame::Settings(SettingsFrame {
            clear_persisted: false,
            settings: vec![Setting::new(SettingId::MaxConcurrentStreams, 100)],
        });
        let buf = encode(Version::V2, &frame);
        // 24-bit little-endian id (4) then flags byte.
        assert_eq!(&buf[12..16], &[0x04, 0x00, 0x00, 0x00]);
        assert_eq!(&buf[16..20], &[0x00, 0x00, 0x00, 0x64]);
    }

    // GOAWAY tests

    #[test]
    fn test_goaway_v3_carries_status() {
        let frame = Frame::Goaway(GoawayFrame {
            last_good_stream_id: StreamId::new(3),
            status: GoawayStatus::InternalError,
        });
        let buf = encode(Version::V3, &frame);
        assert_eq!(&buf[5..8], &[0x00, 0x00, 0x08]);
        assert_eq!(&buf[12..16], &[0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_goaway_v2_has_no_status() {
        let frame = Frame::Goaway(GoawayFrame {
            last_good_stream_id: StreamId::new(3),
            status: GoawayStatus::Ok,
        });
        let buf = encode(Version::V2, &frame);
        assert_eq!(&buf[5..8], &[0x00, 0x00, 0x04]);
        assert_eq!(buf.len(), 12);
    }

    // RST_STREAM test

    #[test]
    fn test_rst_stream_layout() {
        let frame = Frame::RstStream(RstStreamFrame {
            stream_id: StreamId::new(9),
            status: StatusCode::RefusedStream,
        });
        let buf = encode(Version::V3, &frame);
        assert_eq!(&buf[8..12], &[0x00, 0x00, 0x00, 0x09]);
        assert_eq!(&buf[12..16], &[0x00, 0x00, 0x00, 0x03]);
    }

    // WINDOW_UPDATE test

    #[test]
    fn test_window_update_masks_delta() {
        let frame = Frame::WindowUpdate(WindowUpdateFrame {
            stream_id: StreamId::new(1),
            delta: 0xffff_ffff,
        });
        let buf = encode(Version::V3, &frame);
        assert_eq!(&buf[12..16], &[0x7f, 0xff, 0xff, 0xff]);
    }

    // DATA size limit

    #[test]
    fn test_data_frame_rejects_oversized_payload() {
        let mut encoder = FrameEncoder::new(Version::V3);
        let mut buf = BytesMut::new();
        let frame = Frame::Data(DataFrame {
            stream_id: StreamId::new(1),
            fin: false,
            data: bytes::Bytes::from(vec![0u8; MAX_DATA_SIZE + 1]),
        });
        assert!(matches!(
            encoder.encode(&frame, &mut buf),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }
}
