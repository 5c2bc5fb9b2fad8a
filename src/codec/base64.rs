//! Base64 codec for image payloads.
//!
//! The device encodes the JPEG with the standard alphabet and splits the text
//! into fixed-size parts. Reassembled text may arrive without its final
//! padding, so decoding first appends `=` until the length is a multiple of
//! four. Non-zero trailing bits are accepted.
//!
//! # Example
//!
//! ```
//! use smartbin_link::codec::Base64Codec;
//!
//! assert_eq!(Base64Codec::repair_padding("SGVsbG8"), "SGVsbG8=");
//! assert_eq!(&Base64Codec::decode("SGVsbG8").unwrap()[..], b"Hello");
//! assert_eq!(Base64Codec::encode(b"Hello"), "SGVsbG8=");
//! ```

use std::borrow::Cow;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use bytes::Bytes;

const ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(true)
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Standard-alphabet base64 with padding repair.
pub struct Base64Codec;

impl Base64Codec {
    /// Append `=` until the length is a multiple of four.
    pub fn repair_padding(data: &str) -> Cow<'_, str> {
        let missing = (4 - data.len() % 4) % 4;
        if missing == 0 {
            return Cow::Borrowed(data);
        }

        let mut repaired = String::with_capacity(data.len() + missing);
        repaired.push_str(data);
        repaired.extend(std::iter::repeat('=').take(missing));
        Cow::Owned(repaired)
    }

    /// Repair padding and decode.
    ///
    /// # Errors
    ///
    /// Returns the underlying decode error when the text is not base64.
    pub fn decode(data: &str) -> Result<Bytes, base64::DecodeError> {
        let repaired = Self::repair_padding(data);
        Ok(Bytes::from(ENGINE.decode(repaired.as_bytes())?))
    }

    /// Encode bytes as padded base64.
    pub fn encode(data: &[u8]) -> String {
        ENGINE.encode(data)
    }
}
