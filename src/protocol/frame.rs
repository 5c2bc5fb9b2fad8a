//! Frame struct, line classification and outbound line encoding.
//!
//! A received line is either a protocol [`Frame`] (a known 5-character code,
//! a space, and a payload) or a free-text log line that the device printed
//! for the operator.
//!
//! # Example
//!
//! ```
//! use smartbin_link::protocol::{classify, encode_line, Line};
//!
//! match classify("PA001 SGVsbG8=") {
//!     Line::Frame(frame) => {
//!         assert_eq!(frame.code(), "PA001");
//!         assert_eq!(frame.payload(), "SGVsbG8=");
//!     }
//!     Line::Log(_) => unreachable!(),
//! }
//!
//! assert_eq!(encode_line("RTC01", "Laptop ready"), "RTC01 Laptop ready\n");
//! ```

use super::codes::{self, CODE_LEN, MIN_FRAME_LEN};

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    code: String,
    payload: String,
}

impl Frame {
    /// Create a frame from a code and payload.
    pub fn new(code: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            payload: payload.into(),
        }
    }

    /// The 5-character code.
    #[inline]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Everything after the separating space.
    #[inline]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Split into code and payload.
    pub fn into_parts(self) -> (String, String) {
        (self.code, self.payload)
    }

    /// Numeric suffix after a two-letter prefix (`PA012` → 12).
    ///
    /// Returns `None` when the remaining characters are not all digits, so
    /// signed (`PA+01`) and space-padded (`PA 01`) indices are rejected.
    pub fn suffix_index(&self) -> Option<u32> {
        let digits = self.code.get(2..)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    /// Encode this frame as a wire line (including the trailing newline).
    pub fn encode(&self) -> String {
        encode_line(&self.code, &self.payload)
    }
}

/// Outcome of classifying one received line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A protocol frame.
    Frame(Frame),
    /// Free text to surface unmodified.
    Log(String),
}

/// Decide whether a line is a protocol frame or a log line.
///
/// A line is a frame iff it is at least 6 characters long, character 5 is a
/// space, and the first 5 characters are one of `RTC00`, `RTC01`, `RTC02`,
/// `CLS01` or start with `PA`, `PX` or `ERR`. Matching is case-sensitive and
/// the characters after a prefix are not validated here.
pub fn classify(line: &str) -> Line {
    let bytes = line.as_bytes();
    if bytes.len() < MIN_FRAME_LEN || bytes[CODE_LEN] != b' ' {
        return Line::Log(line.to_string());
    }

    // Byte 5 is an ASCII space, so it is a char boundary.
    let code = &line[..CODE_LEN];
    if !code.is_ascii() || !codes::is_known(code) {
        return Line::Log(line.to_string());
    }

    Line::Frame(Frame::new(code, &line[MIN_FRAME_LEN..]))
}

/// Format a code and payload as a wire line.
///
/// The joined text is trimmed on both ends and terminated with `\n`, so an
/// empty payload produces just `CODE\n`.
pub fn encode_line(code: &str, payload: &str) -> String {
    let mut line = format!("{} {}", code, payload).trim().to_string();
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_frame(line: &str) -> Frame {
        match classify(line) {
            Line::Frame(f) => f,
            Line::Log(l) => panic!("expected frame, got log line {:?}", l),
        }
    }

    fn expect_log(line: &str) {
        assert_eq!(classify(line), Line::Log(line.to_string()));
    }

    #[test]
    fn test_control_codes_are_frames() {
        for code in ["RTC00", "RTC01", "RTC02", "CLS01"] {
            let frame = expect_frame(&format!("{} payload text", code));
            assert_eq!(frame.code(), code);
            assert_eq!(frame.payload(), "payload text");
        }
    }

    #[test]
    fn test_prefix_codes_are_frames() {
        assert_eq!(expect_frame("PA001 abc").code(), "PA001");
        assert_eq!(expect_frame("PX009 abc").code(), "PX009");
        assert_eq!(expect_frame("ERR04 reason").code(), "ERR04");
        // Prefix match alone qualifies.
        let frame = expect_frame("PAxyz content");
        assert_eq!(frame.code(), "PAxyz");
        assert_eq!(frame.payload(), "content");
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = expect_frame("PX002 ");
        assert_eq!(frame.code(), "PX002");
        assert_eq!(frame.payload(), "");
    }

    #[test]
    fn test_payload_keeps_inner_spaces() {
        let frame = expect_frame("PA000 parts:2, size:10");
        assert_eq!(frame.payload(), "parts:2, size:10");
    }

    #[test]
    fn test_log_lines() {
        expect_log("[Camera] Capturing image");
        expect_log("RTC00"); // no separating space
        expect_log("RTC0 hello"); // short code
        expect_log("RTC03 hello"); // not a known control code
        expect_log("rtc00 hello"); // case-sensitive
        expect_log("PA001xdata"); // byte 5 is not a space
        expect_log("");
        expect_log("ERR1 x"); // code shorter than 5 characters
    }

    #[test]
    fn test_non_ascii_code_is_log() {
        expect_log("PAé1 x");
    }

    #[test]
    fn test_suffix_index() {
        assert_eq!(Frame::new("PA001", "").suffix_index(), Some(1));
        assert_eq!(Frame::new("PX120", "").suffix_index(), Some(120));
        assert_eq!(Frame::new("PAxyz", "").suffix_index(), None);
        assert_eq!(Frame::new("PA-01", "").suffix_index(), None);
        assert_eq!(Frame::new("PA+01", "").suffix_index(), None);
        assert_eq!(Frame::new("PA 01", "").suffix_index(), None);
        assert_eq!(Frame::new("PX 1 ", "").suffix_index(), None);
    }

    #[test]
    fn test_encode_line() {
        assert_eq!(encode_line("RTC01", "Laptop ready"), "RTC01 Laptop ready\n");
        assert_eq!(encode_line("RTC01", ""), "RTC01\n");
        assert_eq!(encode_line("CLS01", "plastic 0.85 "), "CLS01 plastic 0.85\n");
        assert_eq!(Frame::new("ERR02", "missing_image_parts").encode(), "ERR02 missing_image_parts\n");
    }
}
