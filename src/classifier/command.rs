//! External model backend.
//!
//! Each image is written to a temporary file and the backend is run as
//!
//! ```text
//! <program> <args...> --image <file> --json
//! ```
//!
//! It must print a JSON object on stdout, compact or indented:
//!
//! ```text
//! {"success": true, "result": "plastic", "confidence": 0.91,
//!  "all_confidences": {"plastic": 0.91, "metal": 0.05}}
//! ```
//!
//! or `{"success": false, "error": "..."}`. Log lines printed before the
//! object are skipped; the last object that parses wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tokio::process::Command;

use super::{BoxFuture, Classification, Classifier};
use crate::error::{LinkError, Result};

#[derive(Debug, Deserialize)]
struct BackendOutput {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    all_confidences: BTreeMap<String, f32>,
}

impl BackendOutput {
    fn into_classification(self) -> Result<Classification> {
        if !self.success {
            let reason = self.error.unwrap_or_else(|| "backend reported failure".to_string());
            return Err(LinkError::Classifier(reason));
        }

        let label = self
            .result
            .ok_or_else(|| LinkError::Classifier("backend output has no result".to_string()))?;
        let confidence = self
            .confidence
            .or_else(|| self.all_confidences.get(&label).copied())
            .unwrap_or(0.0);

        Ok(Classification::new(label, confidence).with_scores(self.all_confidences))
    }
}

#[derive(Debug)]
struct CommandSpec {
    program: String,
    args: Vec<String>,
    temp_dir: PathBuf,
}

/// Runs an external program once per image.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    spec: Arc<CommandSpec>,
}

impl CommandClassifier {
    /// Create a classifier running `program` with leading `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            spec: Arc::new(CommandSpec {
                program: program.into(),
                args,
                temp_dir: std::env::temp_dir(),
            }),
        }
    }

    /// Write temporary images to `dir` instead of the system temp directory.
    pub fn with_temp_dir(self, dir: impl Into<PathBuf>) -> Self {
        let spec = CommandSpec {
            program: self.spec.program.clone(),
            args: self.spec.args.clone(),
            temp_dir: dir.into(),
        };
        Self {
            spec: Arc::new(spec),
        }
    }

    /// Program being run.
    pub fn program(&self) -> &str {
        &self.spec.program
    }
}

impl Classifier for CommandClassifier {
    fn classify(&self, image: Bytes) -> BoxFuture<'static, Result<Classification>> {
        let spec = self.spec.clone();
        Box::pin(async move {
            // Removed on drop, including when this future is cancelled.
            let path = tempfile::Builder::new()
                .prefix("smartbin-")
                .suffix(".jpg")
                .tempfile_in(&spec.temp_dir)?
                .into_temp_path();
            tokio::fs::write(&path, &image).await?;

            let result = run_backend(&spec, &path).await;

            if let Err(e) = path.close() {
                tracing::warn!("Failed to remove temporary image: {}", e);
            }
            result
        })
    }
}

async fn run_backend(spec: &CommandSpec, image_path: &Path) -> Result<Classification> {
    tracing::debug!("Running {} on {}", spec.program, image_path.display());

    let output = Command::new(&spec.program)
        .args(&spec.args)
        .arg("--image")
        .arg(image_path)
        .arg("--json")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| LinkError::Classifier(format!("cannot run {}: {}", spec.program, e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    let parsed = match parse_backend_output(&stdout) {
        Some(parsed) => parsed?,
        None if !output.status.success() => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LinkError::Classifier(format!(
                "{} exited with {}: {}",
                spec.program,
                output.status,
                stderr.trim()
            )));
        }
        None => {
            return Err(LinkError::Classifier(format!(
                "{} printed no JSON result",
                spec.program
            )))
        }
    };

    parsed.into_classification()
}

/// Find the backend result in `stdout`.
///
/// Tries every line that opens an object, last first, and parses from
/// there to the end of the object. Returns `None` if no line opens one,
/// otherwise the first success or the error of the earliest candidate.
fn parse_backend_output(stdout: &str) -> Option<Result<BackendOutput>> {
    let starts: Vec<usize> = std::iter::once(0)
        .chain(stdout.match_indices('\n').map(|(i, _)| i + 1))
        .filter(|&i| stdout[i..].trim_start_matches([' ', '\t']).starts_with('{'))
        .collect();

    let mut last_err = None;
    for &start in starts.iter().rev() {
        let mut values = serde_json::Deserializer::from_str(&stdout[start..]).into_iter::<BackendOutput>();
        match values.next() {
            Some(Ok(output)) => return Some(Ok(output)),
            Some(Err(e)) => last_err = Some(e),
            None => {}
        }
    }

    last_err.map(|e| Err(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_output_success() {
        let output: BackendOutput = serde_json::from_str(
            r#"{"success": true, "result": "metal", "confidence": 0.91,
                "all_confidences": {"metal": 0.91, "plastic": 0.09}}"#,
        )
        .unwrap();

        let result = output.into_classification().unwrap();
        assert_eq!(result.label, "metal");
        assert_eq!(result.confidence, 0.91);
        assert_eq!(result.scores.len(), 2);
    }

    #[test]
    fn test_backend_output_confidence_from_scores() {
        let output: BackendOutput = serde_json::from_str(
            r#"{"success": true, "result": "paper", "all_confidences": {"paper": 0.66}}"#,
        )
        .unwrap();

        assert_eq!(output.into_classification().unwrap().confidence, 0.66);
    }

    #[test]
    fn test_backend_output_failure() {
        let output: BackendOutput =
            serde_json::from_str(r#"{"success": false, "error": "model not found"}"#).unwrap();

        let err = output.into_classification().unwrap_err();
        assert_eq!(err.to_string(), "Classifier error: model not found");
    }

    #[test]
    fn test_parse_indented_output() {
        let stdout = "Loading model best.pt\n{\n  \"success\": true,\n  \"result\": \"plastic\",\n  \"confidence\": 0.87,\n  \"all_confidences\": {\n    \"plastic\": 0.87,\n    \"metal\": 0.13\n  }\n}\n";

        let output = parse_backend_output(stdout).unwrap().unwrap();
        let result = output.into_classification().unwrap();
        assert_eq!(result.label, "plastic");
        assert_eq!(result.confidence, 0.87);
        assert_eq!(result.scores.len(), 2);
    }

    #[test]
    fn test_parse_output_takes_last_object() {
        let stdout = "{\"success\": false, \"error\": \"warming up\"}\n{\"success\": true, \"result\": \"paper\", \"confidence\": 0.5}\n";
        let output = parse_backend_output(stdout).unwrap().unwrap();
        assert_eq!(output.result.as_deref(), Some("paper"));

        assert!(parse_backend_output("no json here\n").is_none());
        assert!(matches!(
            parse_backend_output("{\"success\": tru"),
            Some(Err(LinkError::Json(_)))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_backend_with_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"test "$1" = --image && test -s "$2" && test "$3" = --json || exit 3
echo "loading model"
echo '{"success": true, "result": "plastic", "confidence": 0.88, "all_confidences": {"plastic": 0.88}}'"#;

        let classifier = CommandClassifier::new(
            "sh",
            vec!["-c".to_string(), script.to_string(), "backend".to_string()],
        )
        .with_temp_dir(dir.path());

        let result = classifier
            .classify(Bytes::from_static(b"\xff\xd8jpeg"))
            .await
            .unwrap();
        assert_eq!(result.label, "plastic");
        assert_eq!(result.confidence, 0.88);

        // The temporary image is cleaned up.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_backend_failure_exit() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = CommandClassifier::new(
            "sh",
            vec!["-c".to_string(), "echo boom >&2; exit 1".to_string()],
        )
        .with_temp_dir(dir.path());

        let err = classifier.classify(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, LinkError::Classifier(ref msg) if msg.contains("boom")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_backend_with_indented_json() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"echo 'Loading model'
printf '{\n  "success": true,\n  "result": "metal",\n  "confidence": 0.93\n}\n'"#;

        let classifier = CommandClassifier::new("sh", vec!["-c".to_string(), script.to_string()])
            .with_temp_dir(dir.path());

        let result = classifier.classify(Bytes::from_static(b"jpeg")).await.unwrap();
        assert_eq!(result.label, "metal");
        assert_eq!(result.confidence, 0.93);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_classification_removes_image() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = CommandClassifier::new("sh", vec!["-c".to_string(), "sleep 5".to_string()])
            .with_temp_dir(dir.path());

        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            classifier.classify(Bytes::from_static(b"jpeg")),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = CommandClassifier::new("/nonexistent/yolo-backend", Vec::new())
            .with_temp_dir(dir.path());

        let err = classifier.classify(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, LinkError::Classifier(_)));
    }
}
