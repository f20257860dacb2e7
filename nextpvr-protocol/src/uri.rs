//! Percent-encoding in the exact dialect the backend expects.
//!
//! The backend compares group identifiers byte-for-byte against what it
//! handed out, so the encoder escapes every byte outside `0-9A-Za-z`.
//! Note that this includes the RFC 3986 unreserved set `-._~`.

const DEC2HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Encodes `input` for use as a query parameter value.
///
/// Multi-byte UTF-8 sequences are escaped byte by byte, hex digits are
/// always uppercase, and the output is stable for a given input.
pub fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for &byte in input.as_bytes() {
        if byte.is_ascii_alphanumeric() {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(DEC2HEX[(byte >> 4) as usize] as char);
            out.push(DEC2HEX[(byte & 0x0F) as usize] as char);
        }
    }
    out
}

/// Decodes a percent-encoded string.
///
/// Stray `%` sequences are passed through untouched rather than rejected;
/// the bridge only ever decodes strings it encoded itself.
pub fn decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        _ => None,
    }
}
