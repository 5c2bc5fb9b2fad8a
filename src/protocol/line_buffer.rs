//! Line buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` to collect bytes from the serial link until a
//! newline arrives. The Bluetooth link delivers data in arbitrary slices (a
//! byte at a time when the device is slow), so a line may span many reads and
//! one read may hold many lines.
//!
//! Implements a small state machine:
//! - `Collecting`: bytes belong to the current line
//! - `Discarding`: the current line overflowed `max_line_len`; drop bytes up
//!   to and including the next newline
//!
//! # Example
//!
//! ```
//! use smartbin_link::protocol::LineBuffer;
//!
//! let mut buffer = LineBuffer::new();
//! assert!(buffer.push(b"RTC00 ESP32 re").is_empty());
//! assert_eq!(buffer.push(b"ady\r\nPA0"), vec!["RTC00 ESP32 ready".to_string()]);
//! ```

use bytes::BytesMut;

/// Default maximum line length (bytes, excluding the newline).
pub const DEFAULT_MAX_LINE_LEN: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Collecting,
    Discarding,
}

/// Buffer for accumulating incoming bytes and extracting complete lines.
pub struct LineBuffer {
    buffer: BytesMut,
    state: State,
    max_line_len: usize,
    dropped: usize,
}

impl LineBuffer {
    /// Create a new line buffer with the default maximum line length.
    pub fn new() -> Self {
        Self::with_max_line_len(DEFAULT_MAX_LINE_LEN)
    }

    /// Create a new line buffer with a custom maximum line length.
    pub fn with_max_line_len(max_line_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
            state: State::Collecting,
            max_line_len,
            dropped: 0,
        }
    }

    /// Push data into the buffer and extract all complete lines.
    ///
    /// Lines are decoded as UTF-8 (invalid sequences replaced), have trailing
    /// whitespace stripped, and are skipped when nothing is left.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);

            if self.state == State::Discarding {
                self.state = State::Collecting;
                continue;
            }

            if pos > self.max_line_len {
                self.discard_line();
                continue;
            }

            if let Some(line) = decode_line(&raw[..pos]) {
                lines.push(line);
            }
        }

        if self.state == State::Collecting && self.buffer.len() > self.max_line_len {
            self.discard_line();
            self.state = State::Discarding;
        }

        if self.state == State::Discarding {
            self.buffer.clear();
        }

        lines
    }

    /// Take whatever is left as a final line (used at end of stream).
    pub fn take_remaining(&mut self) -> Option<String> {
        let raw = self.buffer.split();
        if self.state == State::Discarding {
            self.state = State::Collecting;
            return None;
        }
        decode_line(&raw)
    }

    /// Number of overlong lines dropped since the last call.
    pub fn take_dropped(&mut self) -> usize {
        std::mem::take(&mut self.dropped)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::Collecting;
    }

    fn discard_line(&mut self) {
        self.dropped += 1;
        tracing::warn!(
            "Discarding line longer than {} bytes",
            self.max_line_len
        );
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_line() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"RTC00 ESP32 ready to connect\n");

        assert_eq!(lines, vec!["RTC00 ESP32 ready to connect"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_lines_in_one_push() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"PA000 parts:2\nPA001 SGVs\nPX002 bG8=\n");

        assert_eq!(lines, vec!["PA000 parts:2", "PA001 SGVs", "PX002 bG8="]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = LineBuffer::new();
        let mut all = Vec::new();

        for byte in b"RTC02 ok\r\n" {
            all.extend(buffer.push(&[*byte]));
        }

        assert_eq!(all, vec!["RTC02 ok"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_line_is_kept() {
        let mut buffer = LineBuffer::new();

        assert!(buffer.push(b"[Camera] Capt").is_empty());
        assert_eq!(buffer.len(), 13);

        let lines = buffer.push(b"uring\n[Camera] Done");
        assert_eq!(lines, vec!["[Camera] Capturing"]);
        assert_eq!(buffer.take_remaining(), Some("[Camera] Done".to_string()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_trailing_whitespace_and_blank_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"hello  \t\r\n\r\n   \nworld\n");

        assert_eq!(lines, vec!["hello", "world"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"ok \xff\xfe done\n");

        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok "));
        assert!(lines[0].ends_with(" done"));
    }

    #[test]
    fn test_overlong_line_is_dropped_and_resyncs() {
        let mut buffer = LineBuffer::with_max_line_len(8);

        // Overflows while still incomplete.
        assert!(buffer.push(b"0123456789abc").is_empty());
        assert_eq!(buffer.take_dropped(), 1);
        assert!(buffer.is_empty());

        // Rest of the long line is skipped, next line survives.
        let lines = buffer.push(b"def\nshort\n");
        assert_eq!(lines, vec!["short"]);
        assert_eq!(buffer.take_dropped(), 0);
    }

    #[test]
    fn test_overlong_complete_line_in_one_push() {
        let mut buffer = LineBuffer::with_max_line_len(4);
        let lines = buffer.push(b"toolong\nok\n");

        assert_eq!(lines, vec!["ok"]);
        assert_eq!(buffer.take_dropped(), 1);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = LineBuffer::with_max_line_len(4);
        buffer.push(b"0123456789");
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.push(b"abc\n"), vec!["abc"]);
    }
}
