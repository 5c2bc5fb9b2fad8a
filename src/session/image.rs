//! Image transfer session and reassembly.
//!
//! A session starts with a `PA000` metadata frame, collects base64 fragments
//! keyed by their declared 1-based index, and ends with a reassembly attempt
//! triggered by a `PX` frame. Fragments are joined strictly by index, never by
//! arrival order, so retried or reordered lines still reassemble correctly.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::time::Instant;

use crate::codec::Base64Codec;
use crate::error::{LinkError, ReassemblyError, Result};
use crate::protocol::codes;

/// Key/value pairs from a `PA000` payload.
///
/// `parts` drives reassembly; everything else is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ImageMetadata(BTreeMap<String, String>);

impl ImageMetadata {
    /// Parse `key:value` items separated by commas.
    ///
    /// Keys and values are trimmed, the split happens on the first `:`, and
    /// items without a `:` are skipped.
    pub fn parse(payload: &str) -> Self {
        let entries = payload
            .split(',')
            .filter_map(|item| item.split_once(':'))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect();
        Self(entries)
    }

    /// Look up a raw value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Declared fragment count. A missing key counts as zero parts.
    ///
    /// # Errors
    ///
    /// Returns `MalformedFrame` when the value is not a non-negative integer.
    pub fn parts(&self) -> Result<u32> {
        match self.get("parts") {
            None => Ok(0),
            Some(value) => value.parse().map_err(|_| LinkError::MalformedFrame {
                code: codes::IMAGE_METADATA.to_string(),
                reason: format!("invalid parts value: {:?}", value),
            }),
        }
    }

    /// Declared image size in bytes.
    pub fn size(&self) -> Option<usize> {
        self.get("size").and_then(|v| v.parse().ok())
    }

    /// Declared image format.
    pub fn format(&self) -> Option<&str> {
        self.get("format")
    }

    /// Declared width in pixels.
    pub fn width(&self) -> Option<u32> {
        self.get("width").and_then(|v| v.parse().ok())
    }

    /// Declared height in pixels.
    pub fn height(&self) -> Option<u32> {
        self.get("height").and_then(|v| v.parse().ok())
    }

    /// Transfer identifier.
    pub fn id(&self) -> Option<&str> {
        self.get("id")
    }

    /// Iterate over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A fully decoded image ready for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedImage {
    /// Metadata from the `PA000` frame.
    pub metadata: ImageMetadata,
    /// Decoded image bytes.
    pub data: Bytes,
}

/// In-progress reconstruction of one image.
#[derive(Debug, Default)]
pub struct ImageSession {
    metadata: ImageMetadata,
    parts: BTreeMap<u32, String>,
    expected_parts: u32,
    awaiting: bool,
    started_at: Option<Instant>,
}

impl ImageSession {
    /// Create an idle session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new transfer from a `PA000` payload, discarding any partial
    /// state from a previous one.
    ///
    /// On a malformed `parts` value the session stays idle.
    pub fn begin(&mut self, payload: &str) -> Result<u32> {
        self.reset();

        let metadata = ImageMetadata::parse(payload);
        let expected = metadata.parts()?;

        self.metadata = metadata;
        self.expected_parts = expected;
        self.awaiting = true;
        self.started_at = Some(Instant::now());

        Ok(expected)
    }

    /// Store a fragment under its declared index.
    ///
    /// Returns `false` (and stores nothing) when no transfer is in progress.
    /// A repeated index overwrites the earlier fragment.
    pub fn store_part(&mut self, index: u32, data: String) -> bool {
        if !self.awaiting {
            return false;
        }
        self.parts.insert(index, data);
        true
    }

    /// Join fragments `1..=expected_parts` and decode them.
    ///
    /// # Errors
    ///
    /// - `Empty` when zero parts were declared
    /// - `MissingPart(i)` for the first absent index
    /// - `Base64` when the joined text does not decode
    pub fn reassemble(&self) -> std::result::Result<Bytes, ReassemblyError> {
        if self.expected_parts == 0 {
            return Err(ReassemblyError::Empty);
        }

        let mut joined = String::new();
        for i in 1..=self.expected_parts {
            let part = self.parts.get(&i).ok_or(ReassemblyError::MissingPart(i))?;
            joined.push_str(part);
        }

        Ok(Base64Codec::decode(&joined)?)
    }

    /// Attempt reassembly and reset the session whatever the outcome.
    pub fn finish(&mut self) -> std::result::Result<ReceivedImage, ReassemblyError> {
        let result = self.reassemble().map(|data| ReceivedImage {
            metadata: std::mem::take(&mut self.metadata),
            data,
        });
        self.reset();
        result
    }

    /// Drop all state and stop awaiting fragments.
    pub fn reset(&mut self) {
        self.metadata = ImageMetadata::default();
        self.parts.clear();
        self.expected_parts = 0;
        self.awaiting = false;
        self.started_at = None;
    }

    /// Whether a transfer is in progress.
    #[inline]
    pub fn is_awaiting(&self) -> bool {
        self.awaiting
    }

    /// Fragment count declared by the metadata.
    #[inline]
    pub fn expected_parts(&self) -> u32 {
        self.expected_parts
    }

    /// Number of distinct fragments stored so far.
    #[inline]
    pub fn received_parts(&self) -> usize {
        self.parts.len()
    }

    /// Metadata of the current transfer.
    pub fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    /// Check whether an open transfer is older than `max_age`.
    pub fn is_expired(&self, max_age: Duration, now: Instant) -> bool {
        match self.started_at {
            Some(started) if self.awaiting => now.saturating_duration_since(started) > max_age,
            _ => false,
        }
    }
}
