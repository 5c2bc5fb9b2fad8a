//! Dedicated writer task for outbound protocol lines.
//!
//! The serial link is shared by the dispatch task (handshake replies,
//! classification results, error frames) and the operator (actuator
//! commands). Every line goes through one mpsc channel into a single task
//! that owns the write half, so two lines can never interleave on the wire.
//!
//! # Architecture
//!
//! ```text
//! Dispatch ─┐
//! Operator ─┼─► mpsc::Sender<OutboundLine> ─► Writer Task ─► Serial device
//! Tests    ─┘
//! ```
//!
//! [`WriterHandle::send`] resolves once the line has been written and
//! flushed, and reports failure as `false` instead of an error.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{LinkError, Result};
use crate::protocol::encode_line;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Maximum lines written before a flush.
const MAX_BATCH_SIZE: usize = 16;

/// A line ready to be written to the device.
#[derive(Debug)]
pub struct OutboundLine {
    /// Encoded line including the trailing newline.
    pub line: Bytes,
    /// Completion signal: `true` once written and flushed.
    done: Option<oneshot::Sender<bool>>,
}

impl OutboundLine {
    /// Encode `code` and `payload` into an outbound line.
    pub fn new(code: &str, payload: &str) -> Self {
        Self {
            line: Bytes::from(encode_line(code, payload)),
            done: None,
        }
    }

    fn with_completion(mut self) -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        self.done = Some(tx);
        (self, rx)
    }

    fn complete(self, ok: bool) {
        if let Some(done) = self.done {
            let _ = done.send(ok);
        }
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the line queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending lines to the writer task.
///
/// Cheap to clone; all clones feed the same task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundLine>,
    pending: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundLine>, pending: Arc<AtomicUsize>, closed: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            pending,
            closed,
        }
    }

    /// Write `code` and `payload` as one line and wait for the flush.
    ///
    /// Returns `false` when the transport is closed or the write failed.
    pub async fn send(&self, code: &str, payload: &str) -> bool {
        if self.is_closed() {
            debug!("Dropping {} line, writer is closed", code);
            return false;
        }

        let (line, done) = OutboundLine::new(code, payload).with_completion();

        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(line).await.is_err() {
            self.pending.fetch_sub(1, Ordering::Release);
            return false;
        }

        done.await.unwrap_or(false)
    }

    /// Queue a line without waiting for it to be written.
    pub fn try_send(&self, code: &str, payload: &str) -> Result<()> {
        if self.is_closed() {
            return Err(LinkError::ConnectionClosed);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(OutboundLine::new(code, payload)).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    LinkError::Protocol("writer queue is full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => LinkError::ConnectionClosed,
            }
        })
    }

    /// Whether the writer task has stopped accepting lines.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Lines queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending lines.
///
/// The task ends cleanly when every handle is dropped, or with an error
/// when a write fails.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));

    let handle = WriterHandle::new(tx, pending.clone(), closed.clone());
    let task = tokio::spawn(writer_loop(rx, writer, pending, closed));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundLine>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(line) => line,
            None => {
                debug!("Writer channel closed");
                return Ok(());
            }
        };

        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(line) => batch.push(line),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let result = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(batch_size, Ordering::Release);

        let ok = result.is_ok();
        for line in batch {
            line.complete(ok);
        }

        if let Err(e) = result {
            error!("Write to device failed: {}", e);
            closed.store(true, Ordering::Release);
            rx.close();
            while let Some(line) = rx.recv().await {
                pending.fetch_sub(1, Ordering::Release);
                line.complete(false);
            }
            return Err(e);
        }
    }
}

async fn write_batch<W>(writer: &mut W, batch: &[OutboundLine]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for line in batch {
        writer.write_all(&line.line).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    struct FailingWriter;

    impl AsyncWrite for FailingWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "link down",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn test_outbound_line_encoding() {
        let line = OutboundLine::new("RTC01", "Laptop ready");
        assert_eq!(&line.line[..], b"RTC01 Laptop ready\n");

        let line = OutboundLine::new("STA01", "");
        assert_eq!(&line.line[..], b"STA01\n");
    }

    #[tokio::test]
    async fn test_send_writes_line() {
        let (client, server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        assert!(handle.send("CLS01", "plastic 0.87").await);

        let mut lines = BufReader::new(server).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "CLS01 plastic 0.87");
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (client, server) = duplex(64 * 1024);
        let (handle, _task) = spawn_writer_task_default(client);

        let mut tasks = Vec::new();
        for i in 0..20u32 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let payload = format!("{}", i).repeat(50);
                handle.send("LID00", &payload).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap());
        }
        drop(handle);

        let mut lines = BufReader::new(server).lines();
        for _ in 0..20 {
            let line = lines.next_line().await.unwrap().unwrap();
            let payload = line.strip_prefix("LID00 ").unwrap();
            let first = &payload[..payload.len() / 50];
            assert_eq!(payload, first.repeat(50));
        }
    }

    #[tokio::test]
    async fn test_write_batch_and_try_send() {
        let mut buf = Cursor::new(Vec::new());
        let batch = vec![OutboundLine::new("BUZZ0", "startup"), OutboundLine::new("STA01", "")];
        write_batch(&mut buf, &batch).await.unwrap();
        assert_eq!(buf.into_inner(), b"BUZZ0 startup\nSTA01\n");

        let (client, server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);
        handle.try_send("IMG01", "").unwrap();

        let mut lines = BufReader::new(server).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "IMG01");
    }

    #[tokio::test]
    async fn test_send_after_write_failure_returns_false() {
        let (handle, task) = spawn_writer_task_default(FailingWriter);

        assert!(!handle.send("RTC01", "Laptop ready").await);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(LinkError::Io(_))));
        assert!(handle.is_closed());
        assert!(!handle.send("RTC01", "Laptop ready").await);
        assert!(matches!(
            handle.try_send("STA01", ""),
            Err(LinkError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
