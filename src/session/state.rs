//! Protocol state machine.
//!
//! [`LinkState`] consumes typed messages one at a time and returns the
//! [`Action`]s the runtime has to carry out. It performs no I/O itself, which
//! keeps frame handling strictly serial and easy to test.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::image::{ImageSession, ReceivedImage};
use crate::error::ReassemblyError;
use crate::protocol::{codes, parse_line, Handshake, Message};

/// Connection progress for one transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing heard from the device yet.
    #[default]
    Disconnected,
    /// `RTC00` was answered with `RTC01`; waiting for `RTC02`.
    HandshakeRequested,
    /// The device confirmed with `RTC02`.
    Connected,
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write a line to the device.
    Send {
        /// 5-character code.
        code: String,
        /// Payload, possibly empty.
        payload: String,
    },
    /// The handshake completed.
    Connected,
    /// An image was reassembled and should be classified.
    ImageReady(ReceivedImage),
    /// An image transfer failed; the matching `ERR0x` is also queued.
    ReassemblyFailed(ReassemblyError),
    /// The device reported an error.
    DeviceError {
        /// Error code (`ERR01`).
        code: String,
        /// Reason text.
        reason: String,
    },
    /// Free text to show to the operator.
    Log(String),
    /// A frame was dropped without side effects.
    Ignored(String),
}

impl Action {
    fn send(code: impl Into<String>, payload: impl Into<String>) -> Self {
        Action::Send {
            code: code.into(),
            payload: payload.into(),
        }
    }

    fn failure(err: ReassemblyError) -> Vec<Action> {
        vec![
            Action::send(err.error_code(), err.reason()),
            Action::ReassemblyFailed(err),
        ]
    }
}

/// Connection and image-session state for one device link.
#[derive(Debug, Default)]
pub struct LinkState {
    connection: ConnectionState,
    session: ImageSession,
    session_timeout: Option<Duration>,
}

impl LinkState {
    /// Create a state machine without a session timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a maximum age for an open image session.
    pub fn with_session_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Current connection state.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Configured maximum session age.
    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout
    }

    /// The image session (for inspection).
    pub fn session(&self) -> &ImageSession {
        &self.session
    }

    /// Classify and handle one received line.
    ///
    /// Malformed frames are logged and dropped.
    pub fn handle_line(&mut self, line: &str) -> Vec<Action> {
        match parse_line(line) {
            Ok(message) => self.handle(message),
            Err(e) => {
                warn!("Dropping frame: {}", e);
                vec![Action::Ignored(e.to_string())]
            }
        }
    }

    /// Handle one typed message.
    pub fn handle(&mut self, message: Message) -> Vec<Action> {
        let mut actions = match &message {
            Message::ImageMetadata(_) | Message::ImagePart { .. } | Message::ImageFinal { .. } => {
                self.check_expired(Instant::now())
            }
            _ => Vec::new(),
        };

        match message {
            Message::Handshake(Handshake::Hello) => {
                info!("Device ready, answering handshake");
                if self.connection == ConnectionState::Disconnected {
                    self.connection = ConnectionState::HandshakeRequested;
                }
                actions.push(Action::send(codes::RTC_READY, codes::HOST_READY_PAYLOAD));
            }
            Message::Handshake(Handshake::Confirmed) => {
                info!("Connection confirmed");
                self.connection = ConnectionState::Connected;
                actions.push(Action::Connected);
            }
            Message::Handshake(Handshake::Ready) => {
                debug!("Peer sent {}", codes::RTC_READY);
                actions.push(Action::Log(format!("peer sent {}", codes::RTC_READY)));
            }
            Message::ImageMetadata(payload) => match self.session.begin(&payload) {
                Ok(parts) => {
                    info!("Image transfer started, expecting {} parts", parts);
                }
                Err(e) => {
                    warn!("Dropping frame: {}", e);
                    actions.push(Action::Ignored(e.to_string()));
                }
            },
            Message::ImagePart { index, data } => {
                if self.session.store_part(index, data) {
                    debug!(
                        "Stored part {} ({}/{})",
                        index,
                        self.session.received_parts(),
                        self.session.expected_parts()
                    );
                } else {
                    warn!("Unexpected part {} with no transfer in progress", index);
                    actions.push(Action::Ignored(format!("unexpected part {}", index)));
                }
            }
            Message::ImageFinal { index, data } => {
                if !self.session.store_part(index, data) {
                    warn!("Unexpected final part {} with no transfer in progress", index);
                    actions.push(Action::Ignored(format!("unexpected final part {}", index)));
                    return actions;
                }

                match self.session.finish() {
                    Ok(image) => {
                        info!("Image reassembled: {} bytes", image.data.len());
                        actions.push(Action::ImageReady(image));
                    }
                    Err(e) => {
                        error!("Image reassembly failed: {}", e);
                        actions.extend(Action::failure(e));
                    }
                }
            }
            Message::ErrorFrame { code, reason } => {
                warn!("Device error {}: {}", code, reason);
                actions.push(Action::DeviceError { code, reason });
            }
            Message::Classification(payload) => {
                debug!("Peer sent {} {}", codes::CLASSIFICATION, payload);
                actions.push(Action::Log(format!("{} {}", codes::CLASSIFICATION, payload)));
            }
            Message::Log(text) => actions.push(Action::Log(text)),
        }

        actions
    }

    /// Discard the open session if it is older than the configured timeout.
    ///
    /// Returns the `ERR05` send plus the failure when a session was dropped.
    pub fn check_expired(&mut self, now: Instant) -> Vec<Action> {
        let Some(timeout) = self.session_timeout else {
            return Vec::new();
        };

        if !self.session.is_expired(timeout, now) {
            return Vec::new();
        }

        warn!(
            "Image transfer expired after {:?} with {}/{} parts",
            timeout,
            self.session.received_parts(),
            self.session.expected_parts()
        );
        self.session.reset();
        Action::failure(ReassemblyError::Expired)
    }

    /// Report that a reassembled image could not be classified.
    pub fn processing_failed(&mut self, detail: impl Into<String>) -> Vec<Action> {
        let err = ReassemblyError::Processing(detail.into());
        error!("{}", err);
        self.session.reset();
        Action::failure(err)
    }

    /// Reset after the transport closed.
    pub fn on_disconnect(&mut self) {
        if self.session.is_awaiting() {
            warn!("Transport closed during an image transfer");
        }
        self.connection = ConnectionState::Disconnected;
        self.session.reset();
    }
}
