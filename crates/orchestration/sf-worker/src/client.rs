//! Classification service client.
//!
//! [`Classifier`] is the seam the scheduler and executor are written
//! against; [`HttpClassifier`] is the production implementation speaking the
//! service's `/predict` + `/health` contract. Tests substitute mock
//! classifiers to exercise retry and concurrency behavior without a network.

use async_trait::async_trait;
use serde::Deserialize;
use sf_error::{classify_status, ClientError, StatusClass};
use sf_types::Classification;
use std::time::Duration;
use tracing::debug;

/// Query parameters for a predict call.
#[derive(Debug, Clone, Copy)]
pub struct PredictParams {
    /// Number of labels requested per record.
    pub top_k: u32,

    /// Minimum score threshold.
    pub threshold: f32,
}

impl Default for PredictParams {
    fn default() -> Self {
        Self {
            top_k: 2,
            threshold: 0.0,
        }
    }
}

/// Tagged outcome of one classify call.
///
/// Modeling the retry decision as data keeps the executor's logic
/// exhaustive and testable without exercising real network failures.
#[derive(Debug)]
pub enum CallOutcome {
    /// Positionally aligned classifications, one per submitted text.
    Success(Vec<Classification>),

    /// Transient failure (5xx, timeout, connection error, malformed or
    /// misaligned response). Retried with backoff.
    Retryable(String),

    /// The service refused the request (4xx). Never retried: resubmitting
    /// an invalid payload cannot succeed.
    Rejected(String),
}

/// The inference service seam.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify an ordered slice of texts. The response is positionally
    /// aligned with the input.
    async fn classify(&self, texts: &[String], params: &PredictParams) -> CallOutcome;

    /// Pre-flight readiness check. Not polled during steady state.
    async fn health(&self) -> Result<(), ClientError>;
}

/// Shape of one entry of the service's predict response.
#[derive(Debug, Deserialize)]
struct RawPrediction {
    labels: Vec<String>,
    scores: Vec<f64>,
}

/// Shape of the service's error body.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

/// HTTP implementation of [`Classifier`].
pub struct HttpClassifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpClassifier {
    /// Build a client with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, texts: &[String], params: &PredictParams) -> CallOutcome {
        let url = format!("{}/predict", self.base_url);

        let response = match self
            .client
            .post(&url)
            .query(&[
                ("k", params.top_k.to_string()),
                ("threshold", params.threshold.to_string()),
            ])
            .json(texts)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return CallOutcome::Retryable(format!("request timed out: {e}"));
            }
            Err(e) => {
                return CallOutcome::Retryable(format!("connection error: {e}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let detail = match response.json::<ErrorBody>().await {
                Ok(body) => format!(
                    "HTTP {status}: {} (code {:?})",
                    body.message, body.code
                ),
                Err(_) => format!("HTTP {status}"),
            };
            return match classify_status(status.as_u16()) {
                StatusClass::Rejected => CallOutcome::Rejected(detail),
                StatusClass::Retryable => CallOutcome::Retryable(detail),
            };
        }

        let predictions = match response.json::<Vec<RawPrediction>>().await {
            Ok(predictions) => predictions,
            Err(e) => {
                // A garbled 2xx body is a protocol error: transient by policy.
                return CallOutcome::Retryable(format!("malformed response body: {e}"));
            }
        };

        if predictions.len() != texts.len() {
            return CallOutcome::Retryable(format!(
                "protocol error: response length {} != request length {}",
                predictions.len(),
                texts.len()
            ));
        }

        debug!(url = %url, records = texts.len(), "Predict call succeeded");

        CallOutcome::Success(
            predictions
                .into_iter()
                .map(|p| Classification {
                    labels: p.labels,
                    scores: p.scores,
                })
                .collect(),
        )
    }

    async fn health(&self) -> Result<(), ClientError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Unhealthy(format!("cannot reach service: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::Unhealthy(format!(
                "service returned HTTP {}",
                response.status()
            )))
        }
    }
}
