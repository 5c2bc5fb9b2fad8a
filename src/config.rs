//! Link configuration.
//!
//! Loaded from a TOML file and overridden by command-line flags. Every field
//! has a default, so an empty file is a valid configuration.
//!
//! ```toml
//! device = "/dev/rfcomm0"
//! read_timeout_ms = 50
//! join_timeout_ms = 2000
//! session_timeout_secs = 30
//! mapping = "binary"
//!
//! [classifier]
//! kind = "command"
//! program = "python3"
//! args = ["yolo_backend.py"]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::{Classifier, CommandClassifier, MockClassifier, ResultMapping};
use crate::error::{LinkError, Result};
use crate::protocol::DEFAULT_MAX_LINE_LEN;
use crate::reader::{ReaderConfig, DEFAULT_LINE_CAPACITY};
use crate::transport::DEFAULT_DEVICE;
use crate::writer::{WriterConfig, DEFAULT_CHANNEL_CAPACITY};

/// Which classifier backs the link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ClassifierConfig {
    /// Random labels.
    #[default]
    Mock,
    /// External program, see [`CommandClassifier`].
    Command {
        /// Executable to run.
        program: String,
        /// Arguments placed before `--image <file> --json`.
        #[serde(default)]
        args: Vec<String>,
    },
}

impl ClassifierConfig {
    /// Instantiate the configured classifier.
    pub fn build(&self) -> Arc<dyn Classifier> {
        match self {
            ClassifierConfig::Mock => Arc::new(MockClassifier::new()),
            ClassifierConfig::Command { program, args } => {
                Arc::new(CommandClassifier::new(program.clone(), args.clone()))
            }
        }
    }
}

/// Settings for one device link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Bound serial device node.
    pub device: PathBuf,
    /// Upper bound on one read, in milliseconds.
    pub read_timeout_ms: u64,
    /// How long `stop` waits for tasks to finish, in milliseconds.
    pub join_timeout_ms: u64,
    /// Longest accepted line in bytes.
    pub max_line_len: usize,
    /// Maximum age of an open image transfer; unset means no limit.
    pub session_timeout_secs: Option<u64>,
    /// Capacity of the outbound line queue.
    pub channel_capacity: usize,
    /// Capacity of the inbound line queue.
    pub line_capacity: usize,
    /// Rendering of the `CLS01` payload.
    pub mapping: ResultMapping,
    /// Classifier backend.
    pub classifier: ClassifierConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from(DEFAULT_DEVICE),
            read_timeout_ms: 50,
            join_timeout_ms: 2000,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            session_timeout_secs: None,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            line_capacity: DEFAULT_LINE_CAPACITY,
            mapping: ResultMapping::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl LinkConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: LinkConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            LinkError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot read {}: {}", path.display(), e),
            ))
        })?;
        Self::from_toml(&text)
    }

    /// Check values that would leave the link unusable.
    pub fn validate(&self) -> Result<()> {
        if self.session_timeout_secs == Some(0) {
            return Err(LinkError::Protocol(
                "session_timeout_secs must be positive; omit it to disable".to_string(),
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err(LinkError::Protocol("read_timeout_ms must be positive".to_string()));
        }
        if self.max_line_len == 0 {
            return Err(LinkError::Protocol("max_line_len must be positive".to_string()));
        }
        Ok(())
    }

    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Join timeout as a duration.
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Session timeout as a duration.
    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_secs.map(Duration::from_secs)
    }

    /// Reader task settings.
    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            read_timeout: self.read_timeout(),
            max_line_len: self.max_line_len,
            channel_capacity: self.line_capacity,
        }
    }

    /// Writer task settings.
    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            channel_capacity: self.channel_capacity,
        }
    }
}
