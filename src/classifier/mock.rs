//! Random classifier for running the link without a model.

use std::collections::BTreeMap;

use bytes::Bytes;
use rand::seq::SliceRandom;
use rand::Rng;

use super::{BoxFuture, Classification, Classifier};
use crate::error::{LinkError, Result};

/// Classes the mock picks from by default.
pub const DEFAULT_CLASSES: &[&str] = &["plastic", "metal", "paper", "misc"];

/// Picks a random class with a confidence between 0.60 and 0.95.
#[derive(Debug, Clone)]
pub struct MockClassifier {
    classes: Vec<String>,
}

impl MockClassifier {
    /// Mock over [`DEFAULT_CLASSES`].
    pub fn new() -> Self {
        Self::with_classes(DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect())
    }

    /// Mock over a custom class list.
    pub fn with_classes(classes: Vec<String>) -> Self {
        Self { classes }
    }

    /// Classes this mock chooses from.
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    fn pick(&self) -> Result<Classification> {
        let mut rng = rand::thread_rng();

        let label = self
            .classes
            .choose(&mut rng)
            .ok_or_else(|| LinkError::Classifier("mock classifier has no classes".to_string()))?
            .clone();
        let confidence = round2(rng.gen_range(0.60..0.95));

        let remaining = 1.0 - confidence;
        let scores: BTreeMap<String, f32> = self
            .classes
            .iter()
            .map(|class| {
                let score = if *class == label {
                    confidence
                } else {
                    round2(rng.gen_range(0.0..remaining))
                };
                (class.clone(), score)
            })
            .collect();

        Ok(Classification::new(label, confidence).with_scores(scores))
    }
}

impl Default for MockClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for MockClassifier {
    fn classify(&self, image: Bytes) -> BoxFuture<'static, Result<Classification>> {
        tracing::debug!("Mock classifying {} bytes", image.len());
        let result = self.pick();
        Box::pin(async move { result })
    }
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_results_are_in_range() {
        let classifier = MockClassifier::new();

        for _ in 0..100 {
            let result = classifier.classify(Bytes::from_static(b"img")).await.unwrap();
            assert!(DEFAULT_CLASSES.contains(&result.label.as_str()));
            assert!((0.60..=0.95).contains(&result.confidence));
            assert_eq!(result.scores.len(), DEFAULT_CLASSES.len());
            assert_eq!(result.scores[&result.label], result.confidence);
        }
    }

    #[tokio::test]
    async fn test_custom_classes() {
        let classifier = MockClassifier::with_classes(vec!["bottle".to_string()]);
        let result = classifier.classify(Bytes::new()).await.unwrap();
        assert_eq!(result.label, "bottle");
        assert_eq!(classifier.classes(), &["bottle".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_class_list_fails() {
        let classifier = MockClassifier::with_classes(Vec::new());
        let err = classifier.classify(Bytes::new()).await.unwrap_err();
        assert!(matches!(err, LinkError::Classifier(_)));
    }
}
