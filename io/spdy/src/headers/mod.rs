//! SPDY header blocks.
//!
//! SYN_STREAM, SYN_REPLY, and HEADERS frames carry an ordered NAME/VALUE
//! block: a pair count followed by length-prefixed names and values (16-bit
//! lengths in v2, 32-bit in v3). Names are lowercase ASCII and appear at
//! most once; a value may hold several logical values separated by NUL
//! bytes. The serialized block is run through a stateful zlib deflate
//! stream seeded with a protocol-specific preset dictionary.

mod compress;
mod decompress;
mod dictionary;

pub use compress::HeaderCompressor;
pub use decompress::HeaderDecompressor;
pub use dictionary::{DICTIONARY_V2, DICTIONARY_V3};

use std::fmt;

use crate::frame::Version;

/// Separator between multiple logical values of one header name.
pub const VALUE_SEPARATOR: u8 = 0;

/// An ordered header block.
///
/// Order is preserved exactly as written; each name holds a single entry,
/// with repeated appends folded into a NUL-separated value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Set a header, replacing any existing value. The name is lowercased.
    pub fn set(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        for entry in &mut self.entries {
            if entry.0 == name {
                entry.1 = value.to_string();
                return;
            }
        }
        self.entries.push((name, value.to_string()));
    }

    /// Append a header value. If the name already exists the value is
    /// NUL-joined onto the existing entry, matching the wire form.
    pub fn append(&mut self, name: &str, value: &str) {
        let name = name.to_ascii_lowercase();
        for entry in &mut self.entries {
            if entry.0 == name {
                entry.1.push(VALUE_SEPARATOR as char);
                entry.1.push_str(value);
                return;
            }
        }
        self.entries.push((name, value.to_string()));
    }

    /// Get the raw value for a name (NUL-joined if multi-valued).
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate the logical values for a name.
    pub fn values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        let raw = self.get(name).unwrap_or("");
        raw.split('\0').filter(|v| !v.is_empty())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove a header, returning its raw value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        let pos = self.entries.iter().position(|(n, _)| *n == name)?;
        Some(self.entries.remove(pos).1)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Merge another block into this one (used when a HEADERS frame adds
    /// to a stream's existing headers).
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.append(name, value);
        }
    }

    /// Serialize to the uncompressed wire form for `version`.
    pub fn serialize(&self, version: Version, out: &mut Vec<u8>) -> Result<(), HeaderError> {
        match version {
            Version::V2 => {
                if self.entries.len() > u16::MAX as usize {
                    return Err(HeaderError::BlockTooLarge);
                }
                out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
                for (name, value) in &self.entries {
                    write_string_v2(out, name.as_bytes())?;
                    write_string_v2(out, value.as_bytes())?;
                }
            }
            Version::V3 | Version::V3_1 => {
                out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
                for (name, value) in &self.entries {
                    out.extend_from_slice(&(name.len() as u32).to_be_bytes());
                    out.extend_from_slice(name.as_bytes());
                    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
                    out.extend_from_slice(value.as_bytes());
                }
            }
        }
        Ok(())
    }

    /// Parse the uncompressed wire form for `version`.
    ///
    /// Enforces the protocol rules: names are non-empty lowercase ASCII and
    /// appear at most once.
    pub fn parse(version: Version, input: &[u8]) -> Result<Headers, HeaderError> {
        let mut cursor = Cursor { buf: input, pos: 0 };
        let count = match version {
            Version::V2 => cursor.read_u16()? as usize,
            Version::V3 | Version::V3_1 => cursor.read_u32()? as usize,
        };

        let mut headers = Headers::new();
        for _ in 0..count {
            let name = match version {
                Version::V2 => cursor.read_string_v2()?,
                _ => cursor.read_string_v3()?,
            };
            let value = match version {
                Version::V2 => cursor.read_string_v2()?,
                _ => cursor.read_string_v3()?,
            };

            if name.is_empty() {
                return Err(HeaderError::EmptyName);
            }
            if name.bytes().any(|b| b.is_ascii_uppercase()) {
                return Err(HeaderError::InvalidName(name));
            }
            if headers.contains(&name) {
                return Err(HeaderError::DuplicateName(name));
            }
            headers.entries.push((name, value));
        }

        if cursor.pos != input.len() {
            return Err(HeaderError::TrailingBytes);
        }
        Ok(headers)
    }
}

fn write_string_v2(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), HeaderError> {
    if bytes.len() > u16::MAX as usize {
        return Err(HeaderError::BlockTooLarge);
    }
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn read_u16(&mut self) -> Result<u16, HeaderError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, HeaderError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_string_v2(&mut self) -> Result<String, HeaderError> {
        let len = self.read_u16()? as usize;
        self.read_string(len)
    }

    fn read_string_v3(&mut self) -> Result<String, HeaderError> {
        let len = self.read_u32()? as usize;
        self.read_string(len)
    }

    fn read_string(&mut self, len: usize) -> Result<String, HeaderError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| HeaderError::InvalidEncoding)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], HeaderError> {
        if self.buf.len() - self.pos < len {
            return Err(HeaderError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }
}

/// Header block codec errors.
#[derive(Debug, PartialEq, Eq)]
pub enum HeaderError {
    /// A length prefix overruns the block.
    Truncated,
    /// Bytes remained after the declared pair count.
    TrailingBytes,
    /// A name appeared more than once.
    DuplicateName(String),
    /// A name contained uppercase ASCII.
    InvalidName(String),
    /// A name was empty.
    EmptyName,
    /// A name or value was not valid UTF-8.
    InvalidEncoding,
    /// The block does not fit the version's length fields.
    BlockTooLarge,
}

impl fmt::Display for HeaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderError::Truncated => write!(f, "header block truncated"),
            HeaderError::TrailingBytes => write!(f, "header block has trailing bytes"),
            HeaderError::DuplicateName(name) => write!(f, "duplicate header name {:?}", name),
            HeaderError::InvalidName(name) => write!(f, "invalid header name {:?}", name),
            HeaderError::EmptyName => write!(f, "empty header name"),
            HeaderError::InvalidEncoding => write!(f, "header block is not valid UTF-8"),
            HeaderError::BlockTooLarge => write!(f, "header block too large for version"),
        }
    }
}

impl std::error::Error for HeaderError {}
