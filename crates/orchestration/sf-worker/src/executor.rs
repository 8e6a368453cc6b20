//! Request executor: retry, backoff and per-record outcome mapping.

use crate::client::{CallOutcome, Classifier, PredictParams};
use crate::stats::PipelineStats;
use rand::Rng;
use sf_types::{Batch, RecordOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry behavior for transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per batch (first try included).
    pub max_attempts: u32,

    /// Initial backoff in milliseconds.
    pub initial_backoff_ms: u64,

    /// Backoff cap in milliseconds.
    pub max_backoff_ms: u64,

    /// Whether to add jitter to backoff times.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Set the attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial backoff in milliseconds.
    pub fn with_initial_backoff_ms(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before retry number `retry` (0-indexed), exponential with
    /// optional 25% jitter, capped.
    pub fn backoff_duration(&self, retry: u32) -> Duration {
        let base_ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(retry));
        let capped_ms = base_ms.min(self.max_backoff_ms);

        let final_ms = if self.jitter {
            let jitter_range = capped_ms / 4;
            let jitter = rand::rng().random_range(0..=jitter_range);
            capped_ms.saturating_add(jitter)
        } else {
            capped_ms
        };

        Duration::from_millis(final_ms)
    }
}

/// Result of executing one batch through the classifier.
#[derive(Debug)]
pub struct BatchResult {
    /// One outcome per batch record, in batch order.
    pub outcomes: Vec<RecordOutcome>,

    /// True when the whole call failed (rejected or retries exhausted).
    /// The batch is still written and checkpointed so the run never stalls
    /// on one bad batch.
    pub batch_failed: bool,

    /// Attempts consumed.
    pub attempts: u32,
}

/// Issues inference calls for batches with bounded retry.
///
/// Oversized and empty payloads are partitioned out before the call and
/// merged back positionally afterwards, so the response arity always
/// matches what was actually sent.
pub struct RequestExecutor<C: Classifier> {
    classifier: Arc<C>,
    retry: RetryConfig,
    params: PredictParams,
    max_payload_bytes: usize,
    truncate_oversized: bool,
    stats: Arc<PipelineStats>,
}

impl<C: Classifier> RequestExecutor<C> {
    /// Create an executor over a classifier.
    pub fn new(
        classifier: Arc<C>,
        retry: RetryConfig,
        params: PredictParams,
        max_payload_bytes: usize,
        truncate_oversized: bool,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            classifier,
            retry,
            params,
            max_payload_bytes,
            truncate_oversized,
            stats,
        }
    }

    /// Execute one batch: partition, call with retry, map outcomes.
    pub async fn execute(&self, batch: &Batch) -> BatchResult {
        let mut outcomes: Vec<Option<RecordOutcome>> = vec![None; batch.len()];
        let mut send_indices: Vec<usize> = Vec::with_capacity(batch.len());
        let mut texts: Vec<String> = Vec::with_capacity(batch.len());

        for (i, record) in batch.records.iter().enumerate() {
            let trimmed = record.text.trim();
            if trimmed.is_empty() {
                outcomes[i] = Some(RecordOutcome::failed(
                    "empty_content",
                    "record has no text payload",
                ));
            } else if record.payload_len() > self.max_payload_bytes {
                if self.truncate_oversized {
                    texts.push(truncate_at_char_boundary(trimmed, self.max_payload_bytes));
                    send_indices.push(i);
                } else {
                    outcomes[i] = Some(RecordOutcome::failed(
                        "payload_too_large",
                        format!(
                            "{} bytes exceeds limit of {}",
                            record.payload_len(),
                            self.max_payload_bytes
                        ),
                    ));
                }
            } else {
                texts.push(trimmed.to_string());
                send_indices.push(i);
            }
        }

        let (call_outcome, attempts) = if texts.is_empty() {
            (None, 0)
        } else {
            let (outcome, attempts) = self.call_with_retry(batch, &texts).await;
            (Some(outcome), attempts)
        };

        let mut batch_failed = false;
        if let Some(outcome) = call_outcome {
            match outcome {
                CallOutcome::Success(classifications) => {
                    for (slot, classification) in send_indices.iter().zip(classifications) {
                        outcomes[*slot] = Some(match classification.validate() {
                            Ok(()) => RecordOutcome::Classified(classification),
                            Err(reason) => RecordOutcome::failed(
                                "invalid_prediction",
                                format!("service returned malformed prediction: {reason}"),
                            ),
                        });
                    }
                }
                CallOutcome::Rejected(reason) => {
                    batch_failed = true;
                    for slot in &send_indices {
                        outcomes[*slot] =
                            Some(RecordOutcome::failed("rejected_by_service", reason.clone()));
                    }
                }
                CallOutcome::Retryable(reason) => {
                    batch_failed = true;
                    for slot in &send_indices {
                        outcomes[*slot] = Some(RecordOutcome::failed(
                            "max_attempts_exhausted",
                            format!(
                                "gave up after {} attempts, last error: {reason}",
                                self.retry.max_attempts
                            ),
                        ));
                    }
                }
            }
        }

        BatchResult {
            outcomes: outcomes
                .into_iter()
                .map(|o| {
                    o.unwrap_or_else(|| {
                        RecordOutcome::failed("internal", "record received no outcome")
                    })
                })
                .collect(),
            batch_failed,
            attempts,
        }
    }

    /// Call the classifier with exponential backoff on retryable outcomes.
    ///
    /// Returns the terminal outcome: `Success`, `Rejected`, or the last
    /// `Retryable` reason once attempts are exhausted.
    async fn call_with_retry(&self, batch: &Batch, texts: &[String]) -> (CallOutcome, u32) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let start = Instant::now();
            let outcome = self.classifier.classify(texts, &self.params).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            self.stats.record_attempt();

            match outcome {
                CallOutcome::Success(results) => {
                    debug!(
                        shard = %batch.shard_id,
                        batch = batch.index,
                        attempt,
                        latency_ms = elapsed_ms,
                        records = texts.len(),
                        "Predict attempt succeeded"
                    );
                    return (CallOutcome::Success(results), attempt);
                }
                CallOutcome::Rejected(reason) => {
                    warn!(
                        shard = %batch.shard_id,
                        batch = batch.index,
                        attempt,
                        latency_ms = elapsed_ms,
                        reason = %reason,
                        "Batch rejected by service, not retrying"
                    );
                    return (CallOutcome::Rejected(reason), attempt);
                }
                CallOutcome::Retryable(reason) => {
                    if attempt >= self.retry.max_attempts {
                        warn!(
                            shard = %batch.shard_id,
                            batch = batch.index,
                            attempt,
                            latency_ms = elapsed_ms,
                            reason = %reason,
                            "Retries exhausted for batch"
                        );
                        return (CallOutcome::Retryable(reason), attempt);
                    }

                    let backoff = self.retry.backoff_duration(attempt - 1);
                    warn!(
                        shard = %batch.shard_id,
                        batch = batch.index,
                        attempt,
                        latency_ms = elapsed_ms,
                        backoff_ms = backoff.as_millis() as u64,
                        reason = %reason,
                        "Transient failure, backing off"
                    );
                    self.stats.record_retry();
                    sleep(backoff).await;
                }
            }
        }
    }
}

/// Truncate to at most `max_bytes`, never splitting a UTF-8 char.
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sf_error::ClientError;
    use sf_types::{Classification, Record};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn make_batch(texts: &[&str]) -> Batch {
        let records = texts
            .iter()
            .enumerate()
            .map(|(i, t)| Record::new(i as u64, format!("r{i}"), *t))
            .collect();
        Batch::new("shard-a", 0, records)
    }

    fn ok_classification() -> Classification {
        Classification {
            labels: vec!["__label__1".into(), "__label__0".into()],
            scores: vec![0.7, 0.3],
        }
    }

    /// Classifier that fails transiently `failures` times, then succeeds.
    struct FlakyClassifier {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Classifier for FlakyClassifier {
        async fn classify(&self, texts: &[String], _params: &PredictParams) -> CallOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                CallOutcome::Retryable("503 Service Unavailable".to_string())
            } else {
                CallOutcome::Success(texts.iter().map(|_| ok_classification()).collect())
            }
        }

        async fn health(&self) -> Result<(), ClientError> {
            Ok(())
        }
    }

    /// Classifier that always rejects.
    struct RejectingClassifier {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Classifier for RejectingClassifier {
        async fn classify(&self, _texts: &[String], _params: &PredictParams) -> CallOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            CallOutcome::Rejected("HTTP 400: malformed payload".to_string())
        }

        async fn health(&self) -> Result<(), ClientError> {
            Ok(())
        }
    }

    fn executor<C: Classifier>(classifier: Arc<C>, max_attempts: u32) -> RequestExecutor<C> {
        RequestExecutor::new(
            classifier,
            RetryConfig::default()
                .with_max_attempts(max_attempts)
                .with_initial_backoff_ms(1)
                .with_jitter(false),
            PredictParams::default(),
            1024,
            false,
            Arc::new(PipelineStats::new()),
        )
    }

    #[test]
    fn test_backoff_exponential_no_jitter() {
        let retry = RetryConfig::default()
            .with_initial_backoff_ms(100)
            .with_jitter(false);
        assert_eq!(retry.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_duration(2), Duration::from_millis(400));
        // Capped.
        assert_eq!(retry.backoff_duration(20), Duration::from_millis(10_000));
    }

    #[test]
    fn test_backoff_jitter_bounded() {
        let retry = RetryConfig::default().with_initial_backoff_ms(100);
        for _ in 0..50 {
            let d = retry.backoff_duration(0).as_millis() as u64;
            assert!((100..=125).contains(&d));
        }
    }

    #[tokio::test]
    async fn test_two_failures_then_success_takes_three_attempts() {
        let classifier = Arc::new(FlakyClassifier {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let exec = executor(classifier.clone(), 4);

        let result = exec.execute(&make_batch(&["a", "b"])).await;

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.attempts, 3);
        assert!(!result.batch_failed);
        assert!(result.outcomes.iter().all(|o| o.is_classified()));
    }

    #[tokio::test]
    async fn test_rejection_takes_one_attempt() {
        let classifier = Arc::new(RejectingClassifier {
            calls: AtomicU32::new(0),
        });
        let exec = executor(classifier.clone(), 4);

        let result = exec.execute(&make_batch(&["a"])).await;

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.attempts, 1);
        assert!(result.batch_failed);
        match &result.outcomes[0] {
            RecordOutcome::Failed { error_type, .. } => {
                assert_eq!(error_type, "rejected_by_service")
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exhaustion_marks_batch_failed() {
        let classifier = Arc::new(FlakyClassifier {
            failures: 100,
            calls: AtomicU32::new(0),
        });
        let exec = executor(classifier.clone(), 3);

        let result = exec.execute(&make_batch(&["a", "b", "c"])).await;

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
        assert!(result.batch_failed);
        for outcome in &result.outcomes {
            match outcome {
                RecordOutcome::Failed { error_type, .. } => {
                    assert_eq!(error_type, "max_attempts_exhausted")
                }
                other => panic!("expected Failed, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_oversized_and_empty_records_are_partitioned() {
        let classifier = Arc::new(FlakyClassifier {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let exec = executor(classifier, 1);

        let big = "x".repeat(2000);
        let result = exec.execute(&make_batch(&["ok", "", &big, "also ok"])).await;

        assert!(!result.batch_failed);
        assert!(result.outcomes[0].is_classified());
        assert!(matches!(
            &result.outcomes[1],
            RecordOutcome::Failed { error_type, .. } if error_type == "empty_content"
        ));
        assert!(matches!(
            &result.outcomes[2],
            RecordOutcome::Failed { error_type, .. } if error_type == "payload_too_large"
        ));
        assert!(result.outcomes[3].is_classified());
    }

    #[tokio::test]
    async fn test_all_records_invalid_makes_no_call() {
        let classifier = Arc::new(FlakyClassifier {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let exec = executor(classifier.clone(), 4);

        let result = exec.execute(&make_batch(&["", "  "])).await;

        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.attempts, 0);
        assert!(!result.batch_failed);
        assert_eq!(result.outcomes.len(), 2);
    }

    #[tokio::test]
    async fn test_http_backend_retries_through_transient_errors() {
        use crate::client::HttpClassifier;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        // Two 503s, then a well-formed 200. Mocks match in mount order.
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"labels": ["__label__1"], "scores": [0.9]}
            ])))
            .mount(&server)
            .await;

        let classifier = Arc::new(
            HttpClassifier::new(server.uri(), Duration::from_secs(5)).unwrap(),
        );
        let exec = RequestExecutor::new(
            classifier,
            RetryConfig::default()
                .with_max_attempts(4)
                .with_initial_backoff_ms(1)
                .with_jitter(false),
            PredictParams::default(),
            1024,
            false,
            Arc::new(PipelineStats::new()),
        );

        let result = exec.execute(&make_batch(&["hello"])).await;
        assert_eq!(result.attempts, 3);
        assert!(!result.batch_failed);
        assert!(result.outcomes[0].is_classified());
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate_at_char_boundary("hello", 10), "hello");
        assert_eq!(truncate_at_char_boundary("hello", 3), "hel");
        // multibyte: é is 2 bytes, do not split it
        assert_eq!(truncate_at_char_boundary("aé", 2), "a");
    }
}
