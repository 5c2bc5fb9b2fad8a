//! Reader task: serial bytes to text lines.
//!
//! Reads are bounded by `read_timeout` so the shared `running` flag is
//! observed promptly even when the device is silent. Complete lines are
//! forwarded through an mpsc channel; dropping the sender on exit is how the
//! dispatch side learns that the transport went away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{LinkError, Result};
use crate::protocol::{LineBuffer, DEFAULT_MAX_LINE_LEN};

/// Default bound on a single read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Default line channel capacity.
pub const DEFAULT_LINE_CAPACITY: usize = 256;

const READ_BUFFER_SIZE: usize = 4 * 1024;

/// Configuration for the reader task.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Upper bound on one read before the `running` flag is checked again.
    pub read_timeout: Duration,
    /// Longest accepted line in bytes.
    pub max_line_len: usize,
    /// Capacity of the line channel.
    pub channel_capacity: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            channel_capacity: DEFAULT_LINE_CAPACITY,
        }
    }
}

/// Why the reader stopped without an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// The device closed the stream.
    Eof,
    /// The `running` flag was cleared or the line consumer went away.
    Stopped,
}

/// Spawn the reader task.
///
/// Returns the line receiver and the task handle. The task resolves to
/// `Err` only on a transport I/O failure.
pub fn spawn_reader_task<R>(
    reader: R,
    config: ReaderConfig,
    running: Arc<AtomicBool>,
) -> (mpsc::Receiver<String>, JoinHandle<Result<ReadEnd>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let task = tokio::spawn(read_loop(reader, config, running, tx));
    (rx, task)
}

async fn read_loop<R>(
    mut reader: R,
    config: ReaderConfig,
    running: Arc<AtomicBool>,
    tx: mpsc::Sender<String>,
) -> Result<ReadEnd>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = LineBuffer::with_max_line_len(config.max_line_len);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    while running.load(Ordering::Acquire) {
        let n = match tokio::time::timeout(config.read_timeout, reader.read(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(0)) => {
                if let Some(line) = buffer.take_remaining() {
                    let _ = tx.send(line).await;
                }
                info!("Device closed the connection");
                return Ok(ReadEnd::Eof);
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                warn!("Read from device failed: {}", e);
                return Err(LinkError::Io(e));
            }
        };

        let lines = buffer.push(&buf[..n]);

        let dropped = buffer.take_dropped();
        if dropped > 0 {
            let err = LinkError::LineTooLong {
                max: config.max_line_len,
            };
            warn!("{} ({} dropped)", err, dropped);
        }

        for line in lines {
            debug!("<< {}", line);
            if tx.send(line).await.is_err() {
                return Ok(ReadEnd::Stopped);
            }
        }
    }

    debug!("Reader stopped");
    Ok(ReadEnd::Stopped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    fn running() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    #[tokio::test]
    async fn test_lines_across_partial_writes() {
        let (mut device, host) = duplex(1024);
        let (mut lines, task) = spawn_reader_task(host, ReaderConfig::default(), running());

        device.write_all(b"RTC00 ESP").await.unwrap();
        device.write_all(b"32 ready\r\nCamera ").await.unwrap();
        device.write_all(b"OK\n\n  \nPA000 parts:1\n").await.unwrap();

        assert_eq!(lines.recv().await.unwrap(), "RTC00 ESP32 ready");
        assert_eq!(lines.recv().await.unwrap(), "Camera OK");
        assert_eq!(lines.recv().await.unwrap(), "PA000 parts:1");

        drop(device);
        assert_eq!(task.await.unwrap().unwrap(), ReadEnd::Eof);
        assert!(lines.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_eof_flushes_partial_line() {
        let (mut device, host) = duplex(1024);
        let (mut lines, task) = spawn_reader_task(host, ReaderConfig::default(), running());

        device.write_all(b"ERR01 camera_init_failed").await.unwrap();
        drop(device);

        assert_eq!(lines.recv().await.unwrap(), "ERR01 camera_init_failed");
        assert_eq!(task.await.unwrap().unwrap(), ReadEnd::Eof);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let (mut device, host) = duplex(1024);
        let (mut lines, _task) = spawn_reader_task(host, ReaderConfig::default(), running());

        device.write_all(b"boot \xff\xfe ok\n").await.unwrap();
        assert_eq!(lines.recv().await.unwrap(), "boot \u{fffd}\u{fffd} ok");
    }

    #[tokio::test]
    async fn test_overlong_line_is_skipped() {
        let (mut device, host) = duplex(4096);
        let config = ReaderConfig {
            max_line_len: 16,
            ..ReaderConfig::default()
        };
        let (mut lines, _task) = spawn_reader_task(host, config, running());

        device.write_all(&[b'x'; 64]).await.unwrap();
        device.write_all(b"\nRTC02 ok\n").await.unwrap();

        assert_eq!(lines.recv().await.unwrap(), "RTC02 ok");
    }

    #[tokio::test]
    async fn test_stop_flag_ends_silent_reader() {
        let (_device, host) = duplex(1024);
        let flag = running();
        let config = ReaderConfig {
            read_timeout: Duration::from_millis(10),
            ..ReaderConfig::default()
        };
        let (_lines, task) = spawn_reader_task(host, config, flag.clone());

        flag.store(false, Ordering::Release);
        let end = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reader did not observe the stop flag")
            .unwrap()
            .unwrap();
        assert_eq!(end, ReadEnd::Stopped);
    }
}
