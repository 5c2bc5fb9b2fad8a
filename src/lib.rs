//! # smartbin-link
//!
//! Host side of the SmartBin serial protocol.
//!
//! An ESP32-CAM in the bin photographs an item and streams the JPEG over a
//! Bluetooth RFCOMM serial link as base64 text lines. This crate frames and
//! classifies those lines, runs the handshake, reassembles the image,
//! classifies it and answers with a `CLS01` line so the bin can sort the
//! item.
//!
//! ## Architecture
//!
//! - **Protocol**: line framing, frame classification, typed messages
//! - **Session**: sans-IO state machine and image reassembly
//! - **Link**: reader, dispatch and writer tasks over any async byte stream
//!
//! ## Wire format
//!
//! ```text
//! device → host   RTC00 ESP32 ready
//! host → device   RTC01 Laptop ready
//! device → host   RTC02 connected
//! device → host   PA000 type:image, size:1234, format:JPEG, ..., parts:3
//! device → host   PA001 /9j/4AAQSkZJRgABAQ...
//! device → host   PA002 ...
//! device → host   PX003 ...
//! host → device   CLS01 plastic 0.87
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use smartbin_link::Link;
//!
//! #[tokio::main]
//! async fn main() -> smartbin_link::Result<()> {
//!     let mut link = Link::builder().open("/dev/rfcomm0").await?;
//!     while let Some(event) = link.next_event().await {
//!         println!("{}", event);
//!     }
//!     link.wait_for_disconnect().await
//! }
//! ```

pub mod classifier;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod reader;
pub mod session;
pub mod transport;
pub mod writer;

mod link;

pub use config::LinkConfig;
pub use error::{LinkError, ReassemblyError, Result};
pub use events::LinkEvent;
pub use link::{Link, LinkBuilder, DEFAULT_EVENT_CAPACITY, DEFAULT_JOIN_TIMEOUT};
pub use session::{ConnectionState, LinkState};
