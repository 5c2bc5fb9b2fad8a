//! Protocol module - line framing, classification and frame types.
//!
//! This module implements the text protocol spoken over the serial link:
//! - Line buffer for accumulating partial reads
//! - Line classification into frames and free-text log lines
//! - Typed messages for the state machine
//! - Outbound line encoding, device commands and the device-side image encoder

pub mod codes;
mod command;
mod frame;
mod image_encoder;
mod line_buffer;
mod message;

pub use command::{DeviceCommand, LidAction, Sound};
pub use frame::{classify, encode_line, Frame, Line};
pub use image_encoder::{ImageEncoder, ImageInfo, DEFAULT_PART_SIZE, MAX_PARTS};
pub use line_buffer::{LineBuffer, DEFAULT_MAX_LINE_LEN};
pub use message::{parse_line, Handshake, Message};
