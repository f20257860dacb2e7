//! Channel cache file codec.
//!
//! The bridge persists the raw `channel.list&extras=true` reply between
//! runs so startup does not depend on the backend answering quickly.  The
//! on-disk form is a gzip stream; decompressed, it starts with a 16 byte
//! little-endian header (update time, payload size) followed by the XML
//! payload exactly as the backend sent it.

use std::io::{Read, Write};

use bytes::Buf;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::digest;
use crate::error::CacheError;

/// Decompressed header size: two little-endian `u64` values.
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a plausible channel list payload.
pub const MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// A decoded cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    /// Backend update time recorded when the payload was fetched.
    pub update_time: u64,
    /// The raw XML reply.
    pub payload: String,
    /// Lowercase hex MD5 of the payload bytes.
    pub checksum: String,
}

/// Compresses `payload` with its header into `writer`.
///
/// Returns the payload checksum so the caller can record it without
/// re-reading the file.  `update_time` must be non-zero; zero is the
/// reader's marker for an unusable file.
pub fn encode<W: Write>(writer: W, update_time: u64, payload: &str) -> Result<String, CacheError> {
    if update_time == 0 {
        return Err(CacheError::InvalidTimestamp);
    }
    let mut gz = GzEncoder::new(writer, Compression::default());
    gz.write_all(&update_time.to_le_bytes())?;
    gz.write_all(&(payload.len() as u64).to_le_bytes())?;
    gz.write_all(payload.as_bytes())?;
    gz.finish()?;
    Ok(digest::md5_hex(payload.as_bytes()))
}

/// Decompresses and validates a cache file.
pub fn decode<R: Read>(reader: R) -> Result<CacheSnapshot, CacheError> {
    let mut gz = GzDecoder::new(reader);

    let mut header = Vec::with_capacity(HEADER_SIZE);
    (&mut gz).take(HEADER_SIZE as u64).read_to_end(&mut header)?;
    if header.len() < HEADER_SIZE {
        return Err(CacheError::Truncated {
            expected: HEADER_SIZE,
            actual: header.len(),
        });
    }

    let mut fields = header.as_slice();
    let update_time = fields.get_u64_le();
    let size = fields.get_u64_le();
    if update_time == 0 {
        return Err(CacheError::InvalidTimestamp);
    }
    if size > MAX_PAYLOAD_SIZE {
        return Err(CacheError::Oversized(size));
    }

    let mut payload = Vec::with_capacity(size as usize);
    gz.take(size).read_to_end(&mut payload)?;
    if payload.len() < size as usize {
        return Err(CacheError::Truncated {
            expected: size as usize,
            actual: payload.len(),
        });
    }

    let checksum = digest::md5_hex(&payload);
    let payload = String::from_utf8(payload).map_err(|_| CacheError::NotUtf8)?;
    Ok(CacheSnapshot {
        update_time,
        payload,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"<rsp stat="ok"><channels><channel><id>7</id></channel></channels></rsp>"#;

    #[test]
    fn test_round_trip() {
        let mut file = Vec::new();
        let written = encode(&mut file, 1700000456, PAYLOAD).unwrap();

        let snapshot = decode(&file[..]).unwrap();
        assert_eq!(snapshot.update_time, 1700000456);
        assert_eq!(snapshot.payload, PAYLOAD);
        assert_eq!(snapshot.checksum, written);
        assert_eq!(snapshot.checksum, digest::md5_hex(PAYLOAD.as_bytes()));
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let mut file = Vec::new();
        encode(&mut file, 0x0102030405060708, PAYLOAD).unwrap();

        let mut plain = Vec::new();
        GzDecoder::new(&file[..]).read_to_end(&mut plain).unwrap();
        assert_eq!(&plain[..8], &0x0102030405060708u64.to_le_bytes());
        assert_eq!(&plain[8..16], &(PAYLOAD.len() as u64).to_le_bytes());
        assert_eq!(&plain[16..], PAYLOAD.as_bytes());
    }

    #[test]
    fn test_zero_update_time_rejected_both_ways() {
        let mut file = Vec::new();
        assert!(matches!(
            encode(&mut file, 0, PAYLOAD),
            Err(CacheError::InvalidTimestamp)
        ));

        // Hand-build a file with a zeroed header.
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&0u64.to_le_bytes()).unwrap();
        gz.write_all(&(PAYLOAD.len() as u64).to_le_bytes()).unwrap();
        gz.write_all(PAYLOAD.as_bytes()).unwrap();
        let file = gz.finish().unwrap();
        assert!(matches!(
            decode(&file[..]),
            Err(CacheError::InvalidTimestamp)
        ));
    }

    #[test]
    fn test_truncated_header() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&[0xAA; 7]).unwrap();
        let file = gz.finish().unwrap();
        assert!(matches!(
            decode(&file[..]),
            Err(CacheError::Truncated {
                expected: HEADER_SIZE,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&1u64.to_le_bytes()).unwrap();
        gz.write_all(&100u64.to_le_bytes()).unwrap();
        gz.write_all(b"short").unwrap();
        let file = gz.finish().unwrap();
        assert!(matches!(
            decode(&file[..]),
            Err(CacheError::Truncated {
                expected: 100,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&1u64.to_le_bytes()).unwrap();
        gz.write_all(&(MAX_PAYLOAD_SIZE + 1).to_le_bytes()).unwrap();
        let file = gz.finish().unwrap();
        assert!(matches!(decode(&file[..]), Err(CacheError::Oversized(_))));
    }

    #[test]
    fn test_garbage_is_an_io_error() {
        let garbage = b"this is not a gzip stream";
        assert!(matches!(decode(&garbage[..]), Err(CacheError::Io(_))));
    }
}
