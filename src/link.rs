//! Link builder and runtime.
//!
//! The [`LinkBuilder`] provides a fluent API for choosing the classifier and
//! tuning timeouts. The running [`Link`] owns three tasks:
//! 1. Reader: device bytes to lines
//! 2. Dispatch: lines through [`LinkState`], classification, replies
//! 3. Writer: serialised line output
//!
//! # Example
//!
//! ```ignore
//! use smartbin_link::classifier::{MockClassifier, ResultMapping};
//! use smartbin_link::Link;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut link = Link::builder()
//!         .classifier(MockClassifier::new())
//!         .mapping(ResultMapping::Binary)
//!         .open("/dev/rfcomm0")
//!         .await?;
//!
//!     while let Some(event) = link.next_event().await {
//!         println!("{}", event);
//!     }
//!     link.wait_for_disconnect().await?;
//!     Ok(())
//! }
//! ```

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, MockClassifier, ResultMapping};
use crate::config::LinkConfig;
use crate::error::{LinkError, Result};
use crate::events::LinkEvent;
use crate::protocol::{codes, DeviceCommand};
use crate::reader::{spawn_reader_task, ReadEnd, ReaderConfig};
use crate::session::{Action, ConnectionState, LinkState, ReceivedImage};
use crate::transport::SerialDevice;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default event channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Default time `stop` waits for the tasks before aborting them.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Longest interval between session expiry checks.
const EXPIRY_CHECK_INTERVAL: Duration = Duration::from_secs(1);

const MIN_EXPIRY_CHECK_INTERVAL: Duration = Duration::from_millis(1);

/// Builder for configuring and starting a [`Link`].
pub struct LinkBuilder {
    classifier: Option<Arc<dyn Classifier>>,
    mapping: ResultMapping,
    reader_config: ReaderConfig,
    writer_config: WriterConfig,
    session_timeout: Option<Duration>,
    join_timeout: Duration,
    event_capacity: usize,
}

impl LinkBuilder {
    /// Create a builder with default settings and the mock classifier.
    pub fn new() -> Self {
        Self {
            classifier: None,
            mapping: ResultMapping::default(),
            reader_config: ReaderConfig::default(),
            writer_config: WriterConfig::default(),
            session_timeout: None,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Create a builder from a loaded configuration.
    pub fn from_config(config: &LinkConfig) -> Self {
        Self {
            classifier: Some(config.classifier.build()),
            mapping: config.mapping,
            reader_config: config.reader_config(),
            writer_config: config.writer_config(),
            session_timeout: config.session_timeout().filter(|t| !t.is_zero()),
            join_timeout: config.join_timeout(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Set the classifier.
    pub fn classifier<C: Classifier>(mut self, classifier: C) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Set an already shared classifier.
    pub fn shared_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set how results are rendered into `CLS01`.
    ///
    /// Default: label
    pub fn mapping(mut self, mapping: ResultMapping) -> Self {
        self.mapping = mapping;
        self
    }

    /// Set the upper bound on a single read.
    ///
    /// Default: 50 ms
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.reader_config.read_timeout = timeout;
        self
    }

    /// Set the longest accepted line.
    ///
    /// Default: 8 KiB
    pub fn max_line_len(mut self, len: usize) -> Self {
        self.reader_config.max_line_len = len;
        self
    }

    /// Set the maximum age of an open image transfer.
    ///
    /// A zero duration disables the timeout.
    ///
    /// Default: none
    pub fn session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    /// Set how long `stop` waits before aborting the tasks.
    ///
    /// Default: 2 seconds
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Set the outbound line queue capacity.
    ///
    /// Default: 64
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the event channel capacity.
    ///
    /// Default: 256
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Open a bound serial device and start the link on it.
    pub async fn open(self, path: impl AsRef<Path>) -> Result<Link> {
        let device = SerialDevice::open(path).await?;
        let (reader, writer) = device.into_split();
        Ok(self.start(reader, writer))
    }

    /// Start the link over an arbitrary byte stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<R, W>(self, reader: R, writer: W) -> Link
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Link::start(self, reader, writer)
    }
}

impl Default for LinkBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running device link.
///
/// Use `next_event()` to follow what happens, `send()` or `send_command()`
/// to talk to the device, and `stop()` or `wait_for_disconnect()` to end.
pub struct Link {
    writer: WriterHandle,
    events: mpsc::Receiver<LinkEvent>,
    connection: watch::Receiver<ConnectionState>,
    running: Arc<AtomicBool>,
    join_timeout: Duration,
    reader_abort: AbortHandle,
    dispatch_task: Option<JoinHandle<Result<()>>>,
    writer_task: JoinHandle<Result<()>>,
}

impl Link {
    /// Create a new link builder.
    pub fn builder() -> LinkBuilder {
        LinkBuilder::new()
    }

    fn start<R, W>(builder: LinkBuilder, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));

        let (writer_handle, writer_task) = spawn_writer_task(writer, builder.writer_config);
        let writer_task = tokio::spawn(watch_writer(writer_task, running.clone()));
        let (lines, reader_task) = spawn_reader_task(reader, builder.reader_config, running.clone());
        let reader_abort = reader_task.abort_handle();

        let (event_tx, events) = mpsc::channel(builder.event_capacity.max(1));
        let (connection_tx, connection) = watch::channel(ConnectionState::Disconnected);

        let dispatcher = Dispatcher {
            state: LinkState::new().with_session_timeout(builder.session_timeout),
            writer: writer_handle.clone(),
            classifier: builder
                .classifier
                .unwrap_or_else(|| Arc::new(MockClassifier::new())),
            mapping: builder.mapping,
            events: event_tx,
            connection: connection_tx,
        };

        let dispatch_task = tokio::spawn(dispatcher.run(lines, reader_task));

        Link {
            writer: writer_handle,
            events,
            connection,
            running,
            join_timeout: builder.join_timeout,
            reader_abort,
            dispatch_task: Some(dispatch_task),
            writer_task,
        }
    }

    /// Send a raw line to the device.
    ///
    /// Returns `false` when the transport is closed.
    pub async fn send(&self, code: &str, payload: &str) -> bool {
        self.writer.send(code, payload).await
    }

    /// Send an actuator command to the device.
    pub async fn send_command(&self, command: &DeviceCommand) -> bool {
        self.writer.send(command.code(), &command.payload()).await
    }

    /// A handle for sending lines from other tasks.
    pub fn writer(&self) -> WriterHandle {
        self.writer.clone()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Subscribe to connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    /// Wait until the device completed the handshake.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the link ends first.
    pub async fn wait_for_connection(&self) -> Result<()> {
        let mut connection = self.connection.clone();
        connection
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .map(|_| ())
            .map_err(|_| LinkError::ConnectionClosed)
    }

    /// Receive the next event. Returns `None` once the link has ended and
    /// all events were drained.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    /// Whether the link has not been told to stop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Wait until the transport closes.
    ///
    /// # Errors
    ///
    /// Returns the read error that ended the link, or `ConnectionClosed`
    /// when the device stopped accepting writes.
    pub async fn wait_for_disconnect(&mut self) -> Result<()> {
        match self.dispatch_task.take() {
            Some(task) => task
                .await
                .map_err(|e| LinkError::Protocol(format!("dispatch task failed: {}", e)))?,
            None => Ok(()),
        }
    }

    /// Stop the link.
    ///
    /// Clears the running flag, closes this handle's side of the writer
    /// queue and waits up to the join timeout for the tasks to finish,
    /// aborting whatever is still running afterwards.
    pub async fn stop(self) -> Result<()> {
        let Link {
            writer,
            events,
            running,
            join_timeout,
            reader_abort,
            dispatch_task,
            mut writer_task,
            ..
        } = self;

        info!("Stopping link");
        running.store(false, Ordering::Release);
        drop(writer);
        drop(events);

        let mut dispatch_task = dispatch_task;
        let joined = tokio::time::timeout(join_timeout, async {
            let dispatched = match dispatch_task.as_mut() {
                Some(task) => task.await.unwrap_or(Ok(())),
                None => Ok(()),
            };
            let _ = (&mut writer_task).await;
            dispatched
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(_) => {
                warn!("Link tasks did not finish within {:?}, aborting", join_timeout);
                reader_abort.abort();
                if let Some(task) = dispatch_task {
                    task.abort();
                }
                writer_task.abort();
                Ok(())
            }
        }
    }
}

/// Await the writer task and stop the reader once writes fail.
async fn watch_writer(task: JoinHandle<Result<()>>, running: Arc<AtomicBool>) -> Result<()> {
    let result = match task.await {
        Ok(result) => result,
        Err(e) => Err(LinkError::Protocol(format!("writer task failed: {}", e))),
    };

    if result.is_err() {
        warn!("Device stopped accepting writes, closing link");
        running.store(false, Ordering::Release);
    }
    result
}

/// State owned by the dispatch task.
struct Dispatcher {
    state: LinkState,
    writer: WriterHandle,
    classifier: Arc<dyn Classifier>,
    mapping: ResultMapping,
    events: mpsc::Sender<LinkEvent>,
    connection: watch::Sender<ConnectionState>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut lines: mpsc::Receiver<String>,
        reader_task: JoinHandle<Result<ReadEnd>>,
    ) -> Result<()> {
        let timeout = self.state.session_timeout();
        let expiry_enabled = timeout.is_some();
        let period = timeout
            .map_or(EXPIRY_CHECK_INTERVAL, |t| t.min(EXPIRY_CHECK_INTERVAL))
            .max(MIN_EXPIRY_CHECK_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => {
                        let actions = self.state.handle_line(&line);
                        self.apply(actions).await;
                    }
                    None => break,
                },
                _ = ticker.tick(), if expiry_enabled => {
                    let actions = self.state.check_expired(Instant::now());
                    self.apply(actions).await;
                }
            }
        }

        let (reason, result) = match reader_task.await {
            Ok(Ok(ReadEnd::Eof)) => ("device closed the connection".to_string(), Ok(())),
            Ok(Ok(ReadEnd::Stopped)) if self.writer.is_closed() => (
                "write to device failed".to_string(),
                Err(LinkError::ConnectionClosed),
            ),
            Ok(Ok(ReadEnd::Stopped)) => ("stopped".to_string(), Ok(())),
            Ok(Err(e)) => (e.to_string(), Err(e)),
            Err(e) => (format!("reader task failed: {}", e), Ok(())),
        };

        self.state.on_disconnect();
        self.publish_connection();
        self.emit(LinkEvent::Disconnected { reason });

        result
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                Action::Send { code, payload } => {
                    if !self.writer.send(&code, &payload).await {
                        warn!("Could not send {} to device", code);
                    }
                }
                Action::Connected => {
                    self.emit(LinkEvent::Connected);
                }
                Action::ImageReady(image) => {
                    if let Some(failure) = self.classify(image).await {
                        queue.extend(failure);
                    }
                }
                Action::ReassemblyFailed(err) => {
                    self.emit(LinkEvent::TransferFailed {
                        code: err.error_code().to_string(),
                        reason: err.reason().to_string(),
                        detail: err.to_string(),
                    });
                }
                Action::DeviceError { code, reason } => {
                    self.emit(LinkEvent::DeviceError { code, reason });
                }
                Action::Log(text) => {
                    info!("device: {}", text);
                    self.emit(LinkEvent::Log { text });
                }
                Action::Ignored(reason) => {
                    debug!("Ignored: {}", reason);
                }
            }
        }

        self.publish_connection();
    }

    /// Classify a received image and send the result.
    ///
    /// Returns the follow-up actions when classification failed.
    async fn classify(&mut self, image: ReceivedImage) -> Option<Vec<Action>> {
        self.emit(LinkEvent::ImageReceived {
            bytes: image.data.len(),
            metadata: image.metadata.clone(),
        });

        match self.classifier.classify(image.data).await {
            Ok(result) => {
                let payload = self.mapping.render(&result);
                info!("Classified as {}", payload);
                let delivered = self.writer.send(codes::CLASSIFICATION, &payload).await;
                if !delivered {
                    warn!("Could not send {} to device", codes::CLASSIFICATION);
                }
                self.emit(LinkEvent::Classified {
                    label: result.label,
                    confidence: result.confidence,
                    payload,
                    delivered,
                    scores: result.scores,
                });
                None
            }
            Err(e) => Some(self.state.processing_failed(e.to_string())),
        }
    }

    fn publish_connection(&self) {
        let current = self.state.connection();
        self.connection.send_if_modified(|state| {
            if *state == current {
                false
            } else {
                *state = current;
                true
            }
        });
    }

    fn emit(&self, event: LinkEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Event queue full, dropping {}", event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
