//! Stateful header-block compression.

use flate2::{Compress, Compression, FlushCompress};

use super::dictionary;
use crate::frame::Version;

/// One direction's zlib deflate stream.
///
/// The compressor is seeded once with the preset dictionary for the
/// negotiated version and then shared by every header block sent on the
/// connection, so blocks must be compressed in the exact order their
/// frames are written. Each block ends with a sync flush so the peer can
/// decompress it without waiting for more input.
pub struct HeaderCompressor {
    version: Version,
    deflate: Compress,
    seeded: bool,
}

impl std::fmt::Debug for HeaderCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderCompressor")
            .field("version", &self.version)
            .field("seeded", &self.seeded)
            .finish()
    }
}

impl HeaderCompressor {
    pub fn new(version: Version) -> Self {
        HeaderCompressor {
            version,
            deflate: Compress::new(Compression::default(), true),
            seeded: false,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Compress one serialized header block.
    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, String> {
        if !self.seeded {
            self.deflate
                .set_dictionary(dictionary::for_version(self.version))
                .map_err(|e| e.to_string())?;
            self.seeded = true;
        }

        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        let mut consumed = 0usize;
        loop {
            let before = self.deflate.total_in();
            self.deflate
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| e.to_string())?;
            consumed += (self.deflate.total_in() - before) as usize;

            // The sync flush is complete once all input is consumed and
            // zlib stopped short of filling the output buffer.
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
            out.reserve(out.capacity().max(64));
        }
        Ok(out)
    }
}
