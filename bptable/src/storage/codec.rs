//! Binary encoding for persisted artifacts.
//!
//! Every artifact written by the engine shares one frame:
//! ```text
//! +----------+--------------------------------------------------+
//! | 0-7      | magic (8 bytes, identifies the artifact kind)    |
//! | 8-11     | format version (4 bytes)                         |
//! | 12-N     | payload (variable)                               |
//! | N-N+3    | CRC32 checksum (4 bytes)                         |
//! +----------+--------------------------------------------------+
//! ```
//!
//! Integers are little-endian. Strings and sequences carry a u64 length
//! prefix.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

/// Current format version for every framed artifact.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the magic prefix.
const MAGIC_SIZE: usize = 8;

/// Magic (8) + version (4).
const HEADER_SIZE: usize = MAGIC_SIZE + 4;

/// CRC32 checksum size at end of frame.
const CHECKSUM_SIZE: usize = 4;

/// A type that can be written to and read back from the engine's byte format.
pub trait Codec: Sized {
    /// Append the encoded form of `self` to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    /// Decode one value, advancing the reader past it.
    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError>;
}

/// Cursor over an encoded byte slice.
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    /// Number of bytes not yet consumed.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(CodecError::Truncated {
                offset: self.offset,
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        let [byte] = self.read_array::<1>()?;
        Ok(byte)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Read a length prefix and check it against the bytes left, so a corrupt
    /// length can't trigger a huge allocation.
    pub fn read_len(&mut self) -> Result<usize, CodecError> {
        let raw = self.read_u64()?;
        let len = usize::try_from(raw).map_err(|_| CodecError::LengthOverflow(raw))?;
        if len > self.remaining() {
            return Err(CodecError::LengthOverflow(raw));
        }
        Ok(len)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Fail if anything is left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

pub fn write_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

pub fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn write_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn write_len(buf: &mut Vec<u8>, len: usize) {
    write_u64(buf, len as u64);
}

pub fn write_str(buf: &mut Vec<u8>, value: &str) {
    write_len(buf, value.len());
    buf.extend_from_slice(value.as_bytes());
}

/// Encode a length-prefixed sequence.
pub fn encode_seq<T: Codec>(buf: &mut Vec<u8>, items: &[T]) {
    write_len(buf, items.len());
    for item in items {
        item.encode(buf);
    }
}

/// Decode a length-prefixed sequence.
pub fn decode_seq<T: Codec>(reader: &mut Reader<'_>) -> Result<Vec<T>, CodecError> {
    let len = reader.read_len()?;
    // Every element takes at least one byte, so `len` is bounded by the input.
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(T::decode(reader)?);
    }
    Ok(items)
}

impl Codec for i64 {
    fn encode(&self, buf: &mut Vec<u8>) {
        write_i64(buf, *self);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        reader.read_i64()
    }
}

impl Codec for String {
    fn encode(&self, buf: &mut Vec<u8>) {
        write_str(buf, self);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        reader.read_string()
    }
}

impl<T: Codec> Codec for Arc<T> {
    fn encode(&self, buf: &mut Vec<u8>) {
        self.as_ref().encode(buf);
    }

    fn decode(reader: &mut Reader<'_>) -> Result<Self, CodecError> {
        T::decode(reader).map(Self::new)
    }
}

/// Wrap `payload` in the artifact frame.
#[must_use]
pub fn frame(magic: &[u8; MAGIC_SIZE], payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
    bytes.extend_from_slice(magic);
    write_u32(&mut bytes, FORMAT_VERSION);
    bytes.extend_from_slice(payload);

    // CRC32 checksum - computed over everything before it
    let checksum = crc32fast::hash(&bytes);
    write_u32(&mut bytes, checksum);
    bytes
}

/// Validate the artifact frame and return the payload it carries.
pub fn unframe<'a>(magic: &[u8; MAGIC_SIZE], bytes: &'a [u8]) -> Result<&'a [u8], CodecError> {
    if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(CodecError::Truncated { offset: 0 });
    }

    let body_len = bytes.len() - CHECKSUM_SIZE;
    let mut trailer = Reader::new(&bytes[body_len..]);
    let stored_checksum = trailer.read_u32()?;
    let computed_checksum = crc32fast::hash(&bytes[..body_len]);
    if stored_checksum != computed_checksum {
        return Err(CodecError::ChecksumMismatch {
            expected: stored_checksum,
            actual: computed_checksum,
        });
    }

    let mut header = Reader::new(&bytes[..HEADER_SIZE]);
    let mut found = [0u8; MAGIC_SIZE];
    found.copy_from_slice(header.read_bytes(MAGIC_SIZE)?);
    if &found != magic {
        return Err(CodecError::InvalidMagic(found));
    }

    let version = header.read_u32()?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    Ok(&bytes[HEADER_SIZE..body_len])
}

/// Read a whole file, treating a missing file as "no prior state".
pub fn read_if_exists(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Errors that can occur while decoding persisted bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input ended before a complete value was read.
    Truncated { offset: usize },
    /// A discriminant byte did not name a known variant.
    InvalidTag { what: &'static str, tag: u8 },
    /// A string was not valid UTF-8.
    InvalidUtf8,
    /// A length prefix exceeds the input.
    LengthOverflow(u64),
    /// Bytes were left over after the payload was decoded.
    TrailingBytes(usize),
    /// Artifact does not start with the expected magic number.
    InvalidMagic([u8; MAGIC_SIZE]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Stored checksum does not match the contents.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { offset } => write!(f, "input truncated at offset {offset}"),
            Self::InvalidTag { what, tag } => write!(f, "invalid {what} tag: {tag:#04x}"),
            Self::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            Self::LengthOverflow(len) => write!(f, "length prefix {len} exceeds input"),
            Self::TrailingBytes(n) => write!(f, "{n} trailing bytes after payload"),
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(
                    f,
                    "checksum mismatch: expected {expected:#010x}, got {actual:#010x}"
                )
            }
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: [u8; 8] = *b"TESTMAGC";

    #[test]
    fn test_frame_roundtrip() {
        let mut payload = Vec::new();
        write_str(&mut payload, "hello");
        write_i64(&mut payload, -42);

        let bytes = frame(&MAGIC, &payload);
        let body = unframe(&MAGIC, &bytes).expect("should unframe");

        let mut reader = Reader::new(body);
        assert_eq!(reader.read_string().expect("string"), "hello");
        assert_eq!(reader.read_i64().expect("i64"), -42);
        reader.finish().expect("no trailing bytes");
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = frame(&MAGIC, b"payload");
        bytes[HEADER_SIZE] ^= 0xFF;

        let result = unframe(&MAGIC, &bytes);
        assert!(matches!(result, Err(CodecError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_wrong_magic() {
        let bytes = frame(b"OTHERMAG", b"payload");
        let result = unframe(&MAGIC, &bytes);
        assert!(matches!(result, Err(CodecError::InvalidMagic(_))));
    }

    #[test]
    fn test_truncated_read() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert_eq!(
            reader.read_u64(),
            Err(CodecError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn test_length_prefix_larger_than_input() {
        let mut bytes = Vec::new();
        write_u64(&mut bytes, 1_000_000);
        bytes.extend_from_slice(b"abc");

        let mut reader = Reader::new(&bytes);
        assert_eq!(
            reader.read_string(),
            Err(CodecError::LengthOverflow(1_000_000))
        );
    }

    #[test]
    fn test_read_if_exists_missing_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let missing = read_if_exists(&dir.path().join("nope.bin")).expect("read");
        assert!(missing.is_none());
    }
}
