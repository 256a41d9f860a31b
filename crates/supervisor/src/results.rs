//! Benchmark result collection and validation.
//!
//! The benchmark subprocess writes a JSON document to a well-known path;
//! the same schema is served by the control-plane `results` endpoint. The
//! schema is externally defined, so every field is optional at the parse
//! layer and [`BenchmarkResults::validate`] decides what a usable document
//! must carry. A document that fails validation is rejected whole — no
//! partial results.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fields a result document must carry to be usable.
const REQUIRED_FIELDS: &[&str] = &[
    "date",
    "backend",
    "model_id",
    "num_prompts",
    "completed",
    "duration",
    "request_throughput",
    "output_throughput",
];

/// Errors raised while collecting a result document.
#[derive(Error, Debug)]
pub enum CollectError {
    /// The result file could not be read.
    #[error("cannot read result file: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid JSON for the result schema.
    #[error("cannot parse result document: {0}")]
    Parse(#[from] serde_json::Error),

    /// Required fields are absent.
    #[error("result document missing required fields: {}", .0.join(", "))]
    Validation(Vec<&'static str>),
}

/// Instance environment echoed back by the benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvironment {
    pub id: Option<String>,
    pub regions: Option<String>,
    pub cpu_instance_type: Option<String>,
    pub gpu_instance_type: Option<String>,
}

/// Model identity echoed back by the benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultModel {
    pub id: Option<String>,
    pub name: Option<String>,
}

/// Parsed benchmark result document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResults {
    pub date: Option<String>,
    pub backend: Option<String>,
    pub model_id: Option<String>,
    pub tokenizer_id: Option<String>,
    pub num_prompts: Option<i64>,
    pub duration: Option<f64>,
    pub completed: Option<i64>,
    pub total_input_tokens: Option<i64>,
    pub total_output_tokens: Option<i64>,
    pub request_throughput: Option<f64>,
    pub output_throughput: Option<f64>,
    pub total_token_throughput: Option<f64>,
    pub mean_ttft_ms: Option<f64>,
    pub median_ttft_ms: Option<f64>,
    pub std_ttft_ms: Option<f64>,
    pub p99_ttft_ms: Option<f64>,
    pub mean_tpot_ms: Option<f64>,
    pub median_tpot_ms: Option<f64>,
    pub ttfts: Option<Vec<f64>>,
    pub itls: Option<Vec<Vec<f64>>>,
    pub generated_texts: Option<Vec<String>>,
    pub errors: Option<Vec<String>>,
    pub benchmark_id: Option<String>,
    pub dataset_path: Option<String>,
    pub dataset_revision: Option<String>,
    pub dataset_split: Option<String>,
    pub environment: Option<ResultEnvironment>,
    pub model: Option<ResultModel>,
}

impl BenchmarkResults {
    /// Parse and validate a JSON document. Returns the document only when
    /// every required field is present.
    ///
    /// # Errors
    /// [`CollectError::Parse`] for malformed JSON, [`CollectError::Validation`]
    /// naming every missing required field.
    pub fn from_json(text: &str) -> Result<Self, CollectError> {
        let results: Self = serde_json::from_str(text)?;
        results.validate()?;
        Ok(results)
    }

    /// Check that every required field is present.
    ///
    /// # Errors
    /// [`CollectError::Validation`] listing all missing fields at once, so
    /// a broken producer is diagnosed in one pass.
    pub fn validate(&self) -> Result<(), CollectError> {
        let mut missing = Vec::new();

        for &field in REQUIRED_FIELDS {
            let present = match field {
                "date" => self.date.is_some(),
                "backend" => self.backend.is_some(),
                "model_id" => self.model_id.is_some(),
                "num_prompts" => self.num_prompts.is_some(),
                "completed" => self.completed.is_some(),
                "duration" => self.duration.is_some(),
                "request_throughput" => self.request_throughput.is_some(),
                "output_throughput" => self.output_throughput.is_some(),
                _ => unreachable!("unknown required field {field}"),
            };

            if !present {
                missing.push(field);
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(CollectError::Validation(missing))
        }
    }
}

/// Collect and validate the result document at `path`.
///
/// # Errors
/// [`CollectError::Io`] when the file is unreadable, otherwise the errors
/// of [`BenchmarkResults::from_json`].
pub async fn collect_file(path: impl AsRef<Path>) -> Result<BenchmarkResults, CollectError> {
    let text = tokio::fs::read_to_string(path.as_ref()).await?;
    BenchmarkResults::from_json(&text)
}
