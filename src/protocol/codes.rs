//! Fixed-width command codes used on the wire.
//!
//! Every protocol line starts with a 5-character code followed by a single
//! space:
//! ```text
//! ┌──────────┬───────┬─────────────────────┬────┐
//! │ Code     │ Space │ Payload             │ LF │
//! │ 5 chars  │ 1     │ 0..n chars (UTF-8)  │ 1  │
//! └──────────┴───────┴─────────────────────┴────┘
//! ```

/// Length of a command code in characters.
pub const CODE_LEN: usize = 5;

/// Shortest line that can be a frame (code + separating space).
pub const MIN_FRAME_LEN: usize = CODE_LEN + 1;

/// Device → host: device ready to connect.
pub const RTC_HELLO: &str = "RTC00";
/// Host → device: host ready.
pub const RTC_READY: &str = "RTC01";
/// Device → host: connection confirmed.
pub const RTC_CONFIRMED: &str = "RTC02";
/// Host → device: classification result.
pub const CLASSIFICATION: &str = "CLS01";

/// Image metadata frame (part index 0).
pub const IMAGE_METADATA: &str = "PA000";
/// Prefix of image fragment frames.
pub const PART_PREFIX: &str = "PA";
/// Prefix of the final image fragment frame.
pub const FINAL_PREFIX: &str = "PX";
/// Prefix of error frames.
pub const ERROR_PREFIX: &str = "ERR";

/// Codes that are frames on an exact match.
pub const CONTROL_CODES: [&str; 4] = [RTC_HELLO, RTC_READY, RTC_CONFIRMED, CLASSIFICATION];

/// Payload the host answers `RTC00` with.
pub const HOST_READY_PAYLOAD: &str = "Laptop ready";

/// Reassembly failed because a part was missing.
pub const ERR_MISSING_PARTS: &str = "ERR02";
/// Reassembly failed because the payload was not base64.
pub const ERR_BASE64: &str = "ERR03";
/// The decoded image could not be processed.
pub const ERR_PROCESSING: &str = "ERR04";
/// An open image session exceeded its maximum age.
pub const ERR_SESSION_TIMEOUT: &str = "ERR05";

/// Host → device: lid servo control.
pub const LID: &str = "LID00";
/// Host → device: coin dispenser control.
pub const COIN: &str = "COIN0";
/// Host → device: buzzer sounds.
pub const BUZZER: &str = "BUZZ0";
/// Host → device: status request.
pub const STATUS: &str = "STA01";
/// Host → device: capture an image now.
pub const CAPTURE: &str = "IMG01";

/// Check whether a 5-character code is one the classifier accepts.
#[inline]
pub fn is_known(code: &str) -> bool {
    CONTROL_CODES.contains(&code)
        || code.starts_with(PART_PREFIX)
        || code.starts_with(FINAL_PREFIX)
        || code.starts_with(ERROR_PREFIX)
}

/// Format a 1-based part index as a fragment code (`PA001`, `PX012`).
pub fn part_code(index: u32, last: bool) -> String {
    let prefix = if last { FINAL_PREFIX } else { PART_PREFIX };
    format!("{}{:03}", prefix, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_known() {
        assert!(is_known("RTC00"));
        assert!(is_known("CLS01"));
        assert!(is_known("PA123"));
        assert!(is_known("PXabc"));
        assert!(is_known("ERR04"));
        assert!(!is_known("RTC03"));
        assert!(!is_known("pa001"));
        assert!(!is_known("LID00"));
    }

    #[test]
    fn test_part_code_padding() {
        assert_eq!(part_code(1, false), "PA001");
        assert_eq!(part_code(42, true), "PX042");
        assert_eq!(part_code(999, false), "PA999");
    }
}
