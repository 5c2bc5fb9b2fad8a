//! Classification collaborators.
//!
//! A reassembled image is handed to a [`Classifier`], and the result is
//! rendered into the `CLS01` payload according to a [`ResultMapping`].
//!
//! Provides:
//! - [`MockClassifier`] - random label, for running without a model
//! - [`FixedClassifier`] - always the same answer
//! - [`FnClassifier`] - wraps an async closure
//! - [`CommandClassifier`] - runs an external model backend per image
//!
//! # Example
//!
//! ```
//! use smartbin_link::classifier::{Classification, ResultMapping};
//!
//! let result = Classification::new("plastic", 0.874);
//! assert_eq!(ResultMapping::Label.render(&result), "plastic 0.87");
//! assert_eq!(ResultMapping::Binary.render(&result), "recyclable 0.87");
//! ```

mod command;
mod mock;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

pub use command::CommandClassifier;
pub use mock::{MockClassifier, DEFAULT_CLASSES};

/// Boxed future returned by classifiers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Labels mapped to `recyclable` by [`ResultMapping::Binary`].
pub const RECYCLABLE_LABELS: &[&str] = &[
    "plastic",
    "metal",
    "paper",
    "cardboard",
    "glass",
    "bottle",
    "can",
];

/// Outcome of classifying one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Winning class.
    pub label: String,
    /// Confidence of the winning class, 0.0 to 1.0.
    pub confidence: f32,
    /// Confidence per class.
    #[serde(default)]
    pub scores: BTreeMap<String, f32>,
}

impl Classification {
    /// Create a result with no per-class scores.
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            scores: BTreeMap::new(),
        }
    }

    /// Attach per-class scores.
    pub fn with_scores(mut self, scores: BTreeMap<String, f32>) -> Self {
        self.scores = scores;
        self
    }

    /// Whether the label counts as recyclable (case-insensitive).
    pub fn is_recyclable(&self) -> bool {
        let label = self.label.to_ascii_lowercase();
        RECYCLABLE_LABELS.contains(&label.as_str())
    }
}

/// How a classification is rendered into the `CLS01` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultMapping {
    /// `<label> <confidence>`
    #[default]
    Label,
    /// `<recyclable|non-recyclable> <confidence>`
    Binary,
}

impl ResultMapping {
    /// Render the `CLS01` payload with a two-decimal confidence.
    pub fn render(self, result: &Classification) -> String {
        let confidence = result.confidence.clamp(0.0, 1.0);
        match self {
            ResultMapping::Label => format!("{} {:.2}", result.label, confidence),
            ResultMapping::Binary => {
                let class = if result.is_recyclable() {
                    "recyclable"
                } else {
                    "non-recyclable"
                };
                format!("{} {:.2}", class, confidence)
            }
        }
    }
}

impl fmt::Display for ResultMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultMapping::Label => f.write_str("label"),
            ResultMapping::Binary => f.write_str("binary"),
        }
    }
}

impl FromStr for ResultMapping {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "label" => Ok(ResultMapping::Label),
            "binary" => Ok(ResultMapping::Binary),
            other => Err(LinkError::Protocol(format!("unknown result mapping: {}", other))),
        }
    }
}

/// Turns decoded image bytes into a label.
pub trait Classifier: Send + Sync + 'static {
    /// Classify one image.
    fn classify(&self, image: Bytes) -> BoxFuture<'static, Result<Classification>>;
}

/// Always returns the same classification.
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    result: Classification,
}

impl FixedClassifier {
    /// Create a classifier that always answers `result`.
    pub fn new(result: Classification) -> Self {
        Self { result }
    }
}

impl Classifier for FixedClassifier {
    fn classify(&self, _image: Bytes) -> BoxFuture<'static, Result<Classification>> {
        let result = self.result.clone();
        Box::pin(async move { Ok(result) })
    }
}

/// Adapter that turns an async closure into a [`Classifier`].
pub struct FnClassifier<F, Fut>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Classification>> + Send + 'static,
{
    classify: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnClassifier<F, Fut>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Classification>> + Send + 'static,
{
    /// Wrap `classify`.
    pub fn new(classify: F) -> Self {
        Self {
            classify,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Classifier for FnClassifier<F, Fut>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Classification>> + Send + 'static,
{
    fn classify(&self, image: Bytes) -> BoxFuture<'static, Result<Classification>> {
        Box::pin((self.classify)(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_mapping() {
        let result = Classification::new("metal", 0.8);
        assert_eq!(ResultMapping::Label.render(&result), "metal 0.80");

        let result = Classification::new("misc", 0.6549);
        assert_eq!(ResultMapping::Label.render(&result), "misc 0.65");
    }

    #[test]
    fn test_binary_mapping() {
        for label in ["plastic", "Glass", "can", "cardboard"] {
            let result = Classification::new(label, 0.9);
            assert_eq!(ResultMapping::Binary.render(&result), "recyclable 0.90");
        }

        let result = Classification::new("misc", 0.7);
        assert_eq!(ResultMapping::Binary.render(&result), "non-recyclable 0.70");
    }

    #[test]
    fn test_confidence_is_clamped() {
        let result = Classification::new("paper", 1.7);
        assert_eq!(ResultMapping::Label.render(&result), "paper 1.00");
    }

    #[test]
    fn test_mapping_from_str() {
        assert_eq!("label".parse::<ResultMapping>().unwrap(), ResultMapping::Label);
        assert_eq!("BINARY".parse::<ResultMapping>().unwrap(), ResultMapping::Binary);
        assert!("colour".parse::<ResultMapping>().is_err());
        assert_eq!(ResultMapping::Binary.to_string(), "binary");
    }

    #[tokio::test]
    async fn test_fixed_classifier() {
        let classifier = FixedClassifier::new(Classification::new("glass", 0.93));
        let result = classifier.classify(Bytes::from_static(b"jpeg")).await.unwrap();
        assert_eq!(result.label, "glass");
    }

    #[tokio::test]
    async fn test_fn_classifier() {
        let classifier = FnClassifier::new(|image: Bytes| async move {
            if image.is_empty() {
                Err(LinkError::Classifier("empty image".to_string()))
            } else {
                Ok(Classification::new("paper", 0.7))
            }
        });

        assert!(classifier.classify(Bytes::new()).await.is_err());
        let result = classifier.classify(Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(result.label, "paper");
    }
}
