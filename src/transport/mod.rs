//! Transport module - access to the bound serial device.
//!
//! The link itself works over any `AsyncRead` / `AsyncWrite` pair; tests use
//! `tokio::io::duplex` in place of a device.

mod serial;

pub use serial::{SerialDevice, DEFAULT_DEVICE};
