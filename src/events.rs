//! Operator-facing events.
//!
//! The link reports what happens on the wire as [`LinkEvent`]s. The binary
//! prints them either as human-readable log records or as JSON lines on
//! stdout.
//!
//! # Important
//!
//! - **stdout**: event JSON, one object per line
//! - **stderr**: tracing output
//! - Lines end in a bare `\n` regardless of platform

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use serde::Serialize;

use crate::session::ImageMetadata;

/// Something the operator may want to know about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    /// Device completed the handshake.
    Connected,
    /// Transport closed.
    Disconnected {
        /// Why the link ended.
        reason: String,
    },
    /// A full image was received.
    ImageReceived {
        /// Decoded size in bytes.
        bytes: usize,
        /// Metadata from `PA000`.
        metadata: ImageMetadata,
    },
    /// The image was classified and the result sent.
    Classified {
        /// Winning class.
        label: String,
        /// Its confidence.
        confidence: f32,
        /// Payload sent with `CLS01`.
        payload: String,
        /// Whether the `CLS01` line was written.
        delivered: bool,
        /// Confidence per class.
        scores: BTreeMap<String, f32>,
    },
    /// An image transfer failed and an error was sent to the device.
    TransferFailed {
        /// Error code sent (`ERR02`).
        code: String,
        /// Reason token sent.
        reason: String,
        /// Human-readable detail.
        detail: String,
    },
    /// The device reported an error.
    DeviceError {
        /// Error code received.
        code: String,
        /// Reason text received.
        reason: String,
    },
    /// Free-text line from the device.
    Log {
        /// The line as received.
        text: String,
    },
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Connected => f.write_str("connected"),
            LinkEvent::Disconnected { reason } => write!(f, "disconnected: {}", reason),
            LinkEvent::ImageReceived { bytes, metadata } => {
                write!(f, "image received: {} bytes", bytes)?;
                if let Some(id) = metadata.id() {
                    write!(f, " ({})", id)?;
                }
                Ok(())
            }
            LinkEvent::Classified {
                payload, delivered, ..
            } => {
                if *delivered {
                    write!(f, "classified: {}", payload)
                } else {
                    write!(f, "classified: {} (not delivered)", payload)
                }
            }
            LinkEvent::TransferFailed {
                code,
                reason,
                detail,
            } => write!(f, "transfer failed: {} {} ({})", code, reason, detail),
            LinkEvent::DeviceError { code, reason } => write!(f, "device error {}: {}", code, reason),
            LinkEvent::Log { text } => write!(f, "device: {}", text),
        }
    }
}

/// Write a line to stdout.
///
/// Writes the string followed by a single `\n` and flushes.
///
/// # Errors
///
/// Returns IO error if write or flush fails.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(line.as_bytes())?;
    handle.write_all(b"\n")?;
    handle.flush()?;
    Ok(())
}

/// Write a value to stdout as a single JSON line.
///
/// # Errors
///
/// Returns error if serialization or write fails.
pub fn write_stdout_json<T: Serialize>(value: &T) -> crate::error::Result<()> {
    let json = serde_json::to_string(value)?;
    write_stdout_line(&json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_json_shape() {
        let event = LinkEvent::TransferFailed {
            code: "ERR02".to_string(),
            reason: "missing_image_parts".to_string(),
            detail: "missing part 2".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "transfer_failed",
                "code": "ERR02",
                "reason": "missing_image_parts",
                "detail": "missing part 2",
            })
        );

        assert_eq!(
            serde_json::to_value(LinkEvent::Connected).unwrap(),
            json!({"event": "connected"})
        );
    }

    #[test]
    fn test_image_event_includes_metadata() {
        let event = LinkEvent::ImageReceived {
            bytes: 5,
            metadata: ImageMetadata::parse("id:img_9, parts:2"),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "image_received",
                "bytes": 5,
                "metadata": {"id": "img_9", "parts": "2"},
            })
        );
        assert_eq!(event.to_string(), "image received: 5 bytes (img_9)");
    }

    #[test]
    fn test_display() {
        let event = LinkEvent::Classified {
            label: "metal".to_string(),
            confidence: 0.8,
            payload: "metal 0.80".to_string(),
            delivered: false,
            scores: BTreeMap::new(),
        };
        assert_eq!(event.to_string(), "classified: metal 0.80 (not delivered)");
        assert_eq!(
            LinkEvent::Log {
                text: "Camera OK".to_string()
            }
            .to_string(),
            "device: Camera OK"
        );
    }

    #[test]
    fn test_write_stdout_json_serializes() {
        let result = write_stdout_json(&LinkEvent::Connected);
        assert!(result.is_ok());
    }
}
