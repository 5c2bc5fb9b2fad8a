//! Codec module - payload encodings carried inside protocol lines.
//!
//! - [`Base64Codec`] - standard-alphabet base64 with padding repair, used for
//!   image fragments
//!
//! # Design
//!
//! Codecs are implemented as marker structs with static methods rather than trait objects.
//!
//! # Example
//!
//! ```
//! use smartbin_link::codec::Base64Codec;
//!
//! let encoded = Base64Codec::encode(b"jpeg bytes");
//! let decoded = Base64Codec::decode(&encoded).unwrap();
//! assert_eq!(&decoded[..], b"jpeg bytes");
//! ```

mod base64;

pub use self::base64::Base64Codec;
