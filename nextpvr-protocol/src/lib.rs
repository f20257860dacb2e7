//! Wire protocol definitions shared by the NextPVR bridge and its tools.
//!
//! The backend speaks a plain HTTP dialect: every control request is a GET
//! against `/service?method=...` and every reply is a small XML document
//! wrapped in a `<rsp stat="...">` envelope.  This crate owns the pieces of
//! that dialect that must stay bit-for-bit stable across callers:
//!
//! - [`methods`]: request strings and stream URL builders
//! - [`response`]: typed views of the XML replies
//! - [`uri`]: the backend's own percent-encoding rules
//! - [`digest`]: the salted PIN digest used by `session.login`
//! - [`cache`]: the gzip channel-cache file codec
//! - [`genre`]: genre text to DVB code translation tables
//!
//! The channel cache file is a gzip stream whose decompressed layout is:
//!
//! ```text
//! +--------------------+--------------------+=================+
//! | update_time (8 LE) | payload size (8 LE)| payload (XML)   |
//! +--------------------+--------------------+=================+
//! ```
//!
//! # Example
//!
//! ```
//! use nextpvr_protocol::{cache, digest, uri};
//!
//! // Group names round-trip through the backend's strict encoder.
//! assert_eq!(uri::encode("News & Sports"), "News%20%26%20Sports");
//!
//! // Login digests are always lowercase hex.
//! let md5 = digest::login_digest("0000", "a1b2c3");
//! assert_eq!(md5.len(), 32);
//!
//! // The cache codec returns the payload fingerprint on both paths.
//! let mut file = Vec::new();
//! let written = cache::encode(&mut file, 1700000000, "<rsp stat=\"ok\"/>").unwrap();
//! let snapshot = cache::decode(&file[..]).unwrap();
//! assert_eq!(snapshot.update_time, 1700000000);
//! assert_eq!(snapshot.checksum, written);
//! ```

pub mod cache;
pub mod digest;
pub mod error;
pub mod genre;
pub mod methods;
pub mod response;
pub mod types;
pub mod uri;

pub use error::{CacheError, ProtocolError};
pub use types::{AccessLevel, ChannelKind, StreamingMethod};
