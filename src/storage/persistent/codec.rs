//! Binary framing for log entries.
//!
//! Every entry is serialized with:
//! - JSON for the payload (reuses the serde attributes of the data model)
//! - a length prefix for framing
//! - a CRC32 checksum for corruption detection
//! - a version byte for forward compatibility

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Current codec version.
pub const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying KyroLog files.
pub const MAGIC: [u8; 4] = *b"KYLG";

/// Largest payload accepted on decode (64 MiB).
pub const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// Serializes a value to a checksummed frame.
///
/// Format:
/// ```text
/// [version: 1 byte][length: 4 bytes LE][data: N bytes JSON][crc32: 4 bytes LE]
/// ```
pub fn encode<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let data = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    if data.len() > MAX_ENTRY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!("entry size {} exceeds maximum {MAX_ENTRY_SIZE}", data.len()),
        ));
    }

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let crc = hasher.finalize();

    let len = u32::try_from(data.len())
        .map_err(|_| IoError::new(ErrorKind::InvalidInput, "entry length does not fit in u32"))?;

    let mut out = Vec::with_capacity(1 + 4 + data.len() + 4);
    out.push(CODEC_VERSION);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Reads one frame and verifies its checksum.
///
/// # Errors
///
/// - `UnexpectedEof` if the frame is truncated
/// - `InvalidData` on a version, size or checksum mismatch, or if the
///   payload does not deserialize
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_ENTRY_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("entry size {len} exceeds maximum {MAX_ENTRY_SIZE}"),
        ));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut crc_bytes = [0u8; 4];
    reader.read_exact(&mut crc_bytes)?;
    let stored = u32::from_le_bytes(crc_bytes);

    let mut hasher = Hasher::new();
    hasher.update(&data);
    let computed = hasher.finalize();
    if stored != computed {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("CRC mismatch: stored={stored:08x}, computed={computed:08x}"),
        ));
    }

    serde_json::from_slice(&data)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

/// Writes the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])
}

/// Reads and validates the file header, returning its version.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    Ok(version[0])
}

/// Size of the file header in bytes.
pub const HEADER_LEN: u64 = 5;

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_detects_corruption() {
        let mut encoded = encode(&"knowledge".to_string()).unwrap();
        encoded[7] ^= 0xFF;

        let err = decode::<String>(&mut Cursor::new(encoded)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_frame_is_eof() {
        let encoded = encode(&vec![1u32, 2, 3]).unwrap();
        let truncated = encoded[..encoded.len() - 2].to_vec();

        let err = decode::<Vec<u32>>(&mut Cursor::new(truncated)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_rejects_oversized_entry() {
        let mut bad = vec![CODEC_VERSION];
        bad.extend_from_slice(&(200_000_000u32).to_le_bytes());

        let err = decode::<String>(&mut Cursor::new(bad)).unwrap_err();
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_header() {
        let mut buf = Vec::new();
        write_header(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, HEADER_LEN);
        assert_eq!(read_header(&mut Cursor::new(buf)).unwrap(), CODEC_VERSION);

        let err = read_header(&mut Cursor::new(b"KYRO\x01".to_vec())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
