//! Typed protocol messages.
//!
//! [`Message`] is produced once per received line and pattern-matched by the
//! state machine, so string prefixes are inspected in exactly one place.

use super::codes;
use super::frame::{classify, Frame, Line};
use crate::error::{LinkError, Result};

/// Connection handshake step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// `RTC00`: device is ready and asks for the host.
    Hello,
    /// `RTC01`: host is ready.
    Ready,
    /// `RTC02`: device confirms the connection.
    Confirmed,
}

impl Handshake {
    /// Wire code for this step.
    pub fn code(self) -> &'static str {
        match self {
            Handshake::Hello => codes::RTC_HELLO,
            Handshake::Ready => codes::RTC_READY,
            Handshake::Confirmed => codes::RTC_CONFIRMED,
        }
    }
}

/// A classified, typed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake frame; the payload is informational only.
    Handshake(Handshake),
    /// `PA000`: start of an image transfer.
    ImageMetadata(String),
    /// `PA<n>`: fragment `n` (1-based).
    ImagePart {
        /// Declared part index.
        index: u32,
        /// Base64 fragment.
        data: String,
    },
    /// `PX<n>`: fragment `n`, and the signal to reassemble.
    ImageFinal {
        /// Declared part index.
        index: u32,
        /// Base64 fragment.
        data: String,
    },
    /// `ERR<nn>`: error reported by the peer.
    ErrorFrame {
        /// Full error code (`ERR03`).
        code: String,
        /// Reason token or text.
        reason: String,
    },
    /// `CLS01`: classification result line.
    Classification(String),
    /// Free-text log line.
    Log(String),
}

impl TryFrom<Frame> for Message {
    type Error = LinkError;

    fn try_from(frame: Frame) -> Result<Self> {
        let code = frame.code().to_string();

        let message = match code.as_str() {
            codes::RTC_HELLO => Message::Handshake(Handshake::Hello),
            codes::RTC_READY => Message::Handshake(Handshake::Ready),
            codes::RTC_CONFIRMED => Message::Handshake(Handshake::Confirmed),
            codes::CLASSIFICATION => Message::Classification(frame.into_parts().1),
            codes::IMAGE_METADATA => Message::ImageMetadata(frame.into_parts().1),
            _ if code.starts_with(codes::ERROR_PREFIX) => {
                let (code, reason) = frame.into_parts();
                Message::ErrorFrame { code, reason }
            }
            _ if code.starts_with(codes::PART_PREFIX) || code.starts_with(codes::FINAL_PREFIX) => {
                let index = frame.suffix_index().ok_or_else(|| LinkError::MalformedFrame {
                    code: code.clone(),
                    reason: "part index is not numeric".to_string(),
                })?;
                let last = code.starts_with(codes::FINAL_PREFIX);
                let data = frame.into_parts().1;
                if last {
                    Message::ImageFinal { index, data }
                } else {
                    Message::ImagePart { index, data }
                }
            }
            _ => {
                return Err(LinkError::MalformedFrame {
                    code,
                    reason: "unrecognized code".to_string(),
                })
            }
        };

        Ok(message)
    }
}

/// Classify a line and convert frames into typed messages.
///
/// Log lines never fail; frames fail only when their content is malformed.
pub fn parse_line(line: &str) -> Result<Message> {
    match classify(line) {
        Line::Frame(frame) => Message::try_from(frame),
        Line::Log(text) => Ok(Message::Log(text)),
    }
}
