//! Bound serial device node.
//!
//! On Linux an RFCOMM channel bound with `rfcomm bind` shows up as
//! `/dev/rfcomm0`. The node is opened twice, once per direction, so a read
//! that is waiting for the device never holds up a write.
//!
//! # Example
//!
//! ```ignore
//! use smartbin_link::transport::SerialDevice;
//!
//! let device = SerialDevice::open("/dev/rfcomm0").await?;
//! let (reader, writer) = device.into_split();
//! ```

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};

use crate::error::{LinkError, Result};

/// Default device node for the first bound RFCOMM channel.
pub const DEFAULT_DEVICE: &str = "/dev/rfcomm0";

/// An opened serial device.
#[derive(Debug)]
pub struct SerialDevice {
    path: PathBuf,
    reader: File,
    writer: File,
}

impl SerialDevice {
    /// Open the device node for reading and writing.
    ///
    /// # Errors
    ///
    /// Returns `Io` with the path in the message when the node is missing
    /// or cannot be opened (typically not bound yet, or no permission).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let reader = OpenOptions::new()
            .read(true)
            .open(path)
            .await
            .map_err(|e| open_error(path, e))?;
        let writer = OpenOptions::new()
            .write(true)
            .open(path)
            .await
            .map_err(|e| open_error(path, e))?;

        tracing::info!("Opened {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            writer,
        })
    }

    /// Path of the device node.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Split into read and write halves.
    pub fn into_split(self) -> (File, File) {
        (self.reader, self.writer)
    }
}

fn open_error(path: &Path, e: std::io::Error) -> LinkError {
    LinkError::Io(std::io::Error::new(
        e.kind(),
        format!("cannot open {}: {}", path.display(), e),
    ))
}
