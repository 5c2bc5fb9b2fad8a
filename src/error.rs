//! Error types for smartbin-link.

use thiserror::Error;

/// Main error type for all link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O error on the serial device or a child process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (events, classifier output).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Protocol error (unexpected input that is not tied to one frame).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A frame matched the classifier rules but its content is unusable.
    #[error("Malformed frame {code}: {reason}")]
    MalformedFrame {
        /// The 5-character code of the offending frame.
        code: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A line exceeded the configured maximum length and was discarded.
    #[error("Line exceeds maximum length of {max} bytes")]
    LineTooLong {
        /// Configured limit.
        max: usize,
    },

    /// The classification collaborator failed.
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Why an image transfer could not be turned into bytes.
///
/// Every variant maps onto an `ERR0x` frame sent back to the device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    /// Part `n` (1-based) was never received.
    #[error("missing part {0}")]
    MissingPart(u32),

    /// The concatenated payload is not valid base64.
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The transfer declared zero parts, so there is no payload to decode.
    #[error("image has no parts")]
    Empty,

    /// The session outlived the configured maximum age.
    #[error("image session timed out")]
    Expired,

    /// The decoded image could not be classified.
    #[error("image processing failed: {0}")]
    Processing(String),
}

impl ReassemblyError {
    /// Error code sent to the device.
    pub fn error_code(&self) -> &'static str {
        use crate::protocol::codes;

        match self {
            ReassemblyError::MissingPart(_) => codes::ERR_MISSING_PARTS,
            ReassemblyError::Base64(_) | ReassemblyError::Empty => codes::ERR_BASE64,
            ReassemblyError::Processing(_) => codes::ERR_PROCESSING,
            ReassemblyError::Expired => codes::ERR_SESSION_TIMEOUT,
        }
    }

    /// Machine-readable reason token sent as the error payload.
    pub fn reason(&self) -> &'static str {
        match self {
            ReassemblyError::MissingPart(_) => "missing_image_parts",
            ReassemblyError::Base64(_) | ReassemblyError::Empty => "base64_decode_failed",
            ReassemblyError::Processing(_) => "image_processing_failed",
            ReassemblyError::Expired => "session_timeout",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reassembly_error_tokens() {
        let missing = ReassemblyError::MissingPart(2);
        assert_eq!(missing.error_code(), "ERR02");
        assert_eq!(missing.reason(), "missing_image_parts");
        assert_eq!(missing.to_string(), "missing part 2");

        let empty = ReassemblyError::Empty;
        assert_eq!(empty.error_code(), "ERR03");
        assert_eq!(empty.reason(), "base64_decode_failed");

        let failed = ReassemblyError::Processing("model not loaded".to_string());
        assert_eq!(failed.error_code(), "ERR04");
        assert_eq!(failed.reason(), "image_processing_failed");

        assert_eq!(ReassemblyError::Expired.error_code(), "ERR05");
    }

    #[test]
    fn test_malformed_frame_display() {
        let err = LinkError::MalformedFrame {
            code: "PAxyz".to_string(),
            reason: "part index is not numeric".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed frame PAxyz: part index is not numeric"
        );
    }
}
