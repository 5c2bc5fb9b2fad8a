//! Session module - connection state machine and image reassembly.

mod image;
mod state;

pub use image::{ImageMetadata, ImageSession, ReceivedImage};
pub use state::{Action, ConnectionState, LinkState};
