//! Stateful header-block decompression.

use flate2::{Decompress, FlushDecompress, Status};

use super::dictionary;
use crate::frame::Version;

/// One direction's zlib inflate stream.
///
/// Like the compressor, the inflate context is shared by every header
/// block received on the connection and cannot recover once poisoned, so
/// a decompression failure is connection-fatal. zlib signals the preset
/// dictionary requirement on the first block; the decompressor answers
/// with the dictionary for the negotiated version and resumes.
pub struct HeaderDecompressor {
    version: Version,
    inflate: Decompress,
    seeded: bool,
}

impl std::fmt::Debug for HeaderDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderDecompressor")
            .field("version", &self.version)
            .field("seeded", &self.seeded)
            .finish()
    }
}

impl HeaderDecompressor {
    pub fn new(version: Version) -> Self {
        HeaderDecompressor {
            version,
            inflate: Decompress::new(true),
            seeded: false,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Decompress one header block.
    pub fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>, String> {
        let mut out = Vec::with_capacity(input.len() * 4 + 128);
        let mut consumed = 0usize;
        loop {
            let before = self.inflate.total_in();
            match self
                .inflate
                .decompress_vec(&input[consumed..], &mut out, FlushDecompress::Sync)
            {
                Ok(status) => {
                    consumed += (self.inflate.total_in() - before) as usize;
                    if matches!(status, Status::StreamEnd) {
                        break;
                    }
                    if consumed == input.len() && out.len() < out.capacity() {
                        break;
                    }
                    out.reserve(out.capacity().max(128));
                }
                Err(e) => {
                    if e.needs_dictionary().is_some() && !self.seeded {
                        consumed += (self.inflate.total_in() - before) as usize;
                        self.inflate
                            .set_dictionary(dictionary::for_version(self.version))
                            .map_err(|e| e.to_string())?;
                        self.seeded = true;
                        continue;
                    }
                    return Err(e.to_string());
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{HeaderCompressor, Headers};

    #[test]
    fn test_roundtrip_v2_and_v3() {
        for version in [Version::V2, Version::V3, Version::V3_1] {
            let mut compressor = HeaderCompressor::new(version);
            let mut decompressor = HeaderDecompressor::new(version);

            let mut headers = Headers::new();
            headers.set(":method", "GET");
            headers.set(":path", "/");
            headers.set("accept-encoding", "gzip,deflate");

            let mut plain = Vec::new();
            headers.serialize(version, &mut plain).unwrap();

            let compressed = compressor.compress(&plain).unwrap();
            let restored = decompressor.decompress(&compressed).unwrap();
            assert_eq!(restored, plain);
            assert_eq!(Headers::parse(version, &restored).unwrap(), headers);
        }
    }

    #[test]
    fn test_garbage_input_fails() {
        let mut decompressor = HeaderDecompressor::new(Version::V3);
        assert!(decompressor.decompress(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }

    #[test]
    fn test_context_survives_many_blocks() {
        let mut compressor = HeaderCompressor::new(Version::V3);
        let mut decompressor = HeaderDecompressor::new(Version::V3);
        for i in 0..50 {
            let block = format!("block number {} with shared phrasing", i);
            let compressed = compressor.compress(block.as_bytes()).unwrap();
            assert_eq!(decompressor.decompress(&compressed).unwrap(), block.as_bytes());
        }
    }
}
