//! Login digest and payload fingerprints.

use md5::{Digest, Md5};

/// Lowercase hex MD5 of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// The salted PIN digest sent with `session.login`.
///
/// The backend computes `md5(":" + md5(pin) + ":" + salt)` where both MD5
/// values are lowercase hex strings; anything else is rejected as a bad
/// PIN.
pub fn login_digest(pin: &str, salt: &str) -> String {
    let pin_md5 = md5_hex(pin.as_bytes());
    let mut hasher = Md5::new();
    hasher.update(b":");
    hasher.update(pin_md5.as_bytes());
    hasher.update(b":");
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}
