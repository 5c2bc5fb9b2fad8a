//! Device-side image encoder.
//!
//! Produces the frame sequence the camera firmware sends for one image:
//!
//! ```text
//! PA000 type:image, size:1234, format:JPEG, width:640, height:480, id:img_1, parts:3
//! PA001 <200 base64 chars>
//! PA002 <200 base64 chars>
//! PX003 <remaining base64 chars>
//! ```
//!
//! Used to simulate a device and to test reassembly end to end.

use super::codes::{self, part_code};
use super::frame::Frame;
use crate::codec::Base64Codec;
use crate::error::{LinkError, Result};

/// Part size used by the firmware to stay under the Bluetooth buffer size.
pub const DEFAULT_PART_SIZE: usize = 200;

/// Highest part index that still fits a 5-character code.
pub const MAX_PARTS: usize = 999;

/// Descriptive fields sent in the `PA000` metadata frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Image format (`JPEG`, `PNG`).
    pub format: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Transfer identifier.
    pub id: String,
}

impl Default for ImageInfo {
    fn default() -> Self {
        Self {
            format: "JPEG".to_string(),
            width: 0,
            height: 0,
            id: "img_0".to_string(),
        }
    }
}

/// Splits an image into metadata, part and final-part frames.
#[derive(Debug, Clone)]
pub struct ImageEncoder {
    part_size: usize,
}

impl ImageEncoder {
    /// Create an encoder with the given base64 characters per part.
    pub fn new(part_size: usize) -> Self {
        Self {
            part_size: part_size.max(1),
        }
    }

    /// Characters of base64 per part.
    pub fn part_size(&self) -> usize {
        self.part_size
    }

    /// Encode `image` into the full frame sequence.
    ///
    /// # Errors
    ///
    /// Fails for an empty image or one that needs more than [`MAX_PARTS`]
    /// parts at this part size.
    pub fn encode(&self, image: &[u8], info: &ImageInfo) -> Result<Vec<Frame>> {
        if image.is_empty() {
            return Err(LinkError::Protocol("cannot encode an empty image".to_string()));
        }

        let encoded = Base64Codec::encode(image);
        // Base64 output is ASCII, so byte chunks are valid str slices.
        let chunks: Vec<&str> = encoded
            .as_bytes()
            .chunks(self.part_size)
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect();

        if chunks.len() > MAX_PARTS {
            return Err(LinkError::Protocol(format!(
                "image needs {} parts, maximum is {}",
                chunks.len(),
                MAX_PARTS
            )));
        }

        let metadata = format!(
            "type:image, size:{}, format:{}, width:{}, height:{}, id:{}, parts:{}",
            image.len(),
            info.format,
            info.width,
            info.height,
            info.id,
            chunks.len()
        );

        let mut frames = Vec::with_capacity(chunks.len() + 1);
        frames.push(Frame::new(codes::IMAGE_METADATA, metadata));

        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let index = (i + 1) as u32;
            frames.push(Frame::new(part_code(index, i + 1 == total), chunk));
        }

        Ok(frames)
    }
}

impl Default for ImageEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_PART_SIZE)
    }
}
