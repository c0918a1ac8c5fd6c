use crate::error::{IndexError, UpsertError};
use crate::models::InsertableRecord;
use crate::traits::RecordIndex;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_PACING_DELAY: Duration = Duration::from_secs(1);

/// Exponential backoff for batches the index rejected with a retryable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpsertOptions {
    pub batch_size: usize,
    pub pacing_delay: Duration,
    /// Absolute position of the first record to send; earlier records are assumed loaded.
    pub start_offset: usize,
    pub backoff: BackoffPolicy,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pacing_delay: DEFAULT_PACING_DELAY,
            start_offset: 0,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchStatus {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// Zero-based batch number within this run.
    pub index: usize,
    /// Absolute position of the batch's first record.
    pub offset: usize,
    pub size: usize,
    pub status: BatchStatus,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, BatchStatus::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub offset: usize,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpsertReport {
    pub namespace: String,
    pub start_offset: usize,
    /// Records this run attempted, i.e. everything from `start_offset` on.
    pub total_records: usize,
    pub batch_size: usize,
    pub batches: Vec<BatchOutcome>,
    pub first_failure: Option<BatchFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl UpsertReport {
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn records_upserted(&self) -> usize {
        self.batches
            .iter()
            .filter(|batch| batch.succeeded())
            .map(|batch| batch.size)
            .sum()
    }

    /// Offset to pass as `start_offset` when re-running after a failure.
    pub fn resume_offset(&self) -> usize {
        match &self.first_failure {
            Some(failure) => failure.offset,
            None => self.start_offset + self.total_records,
        }
    }
}

/// Loads `records[start_offset..]` into `namespace` one paced batch at a time.
///
/// Stops at the first batch that still fails after the backoff policy is exhausted.
/// Batches already sent stay in the index; upserts are keyed by `_id`, so re-running
/// from [`UpsertReport::resume_offset`] is safe.
pub async fn upsert_records<I>(
    index: &I,
    namespace: &str,
    records: &[InsertableRecord],
    options: &UpsertOptions,
) -> Result<UpsertReport, UpsertError>
where
    I: RecordIndex + Sync,
{
    if options.batch_size == 0 {
        return Err(UpsertError::InvalidOptions(
            "batch size must be at least 1".to_string(),
        ));
    }
    if options.start_offset > records.len() {
        return Err(UpsertError::InvalidOptions(format!(
            "start offset {} is past the end of {} records",
            options.start_offset,
            records.len()
        )));
    }

    let pending = &records[options.start_offset..];
    let mut report = UpsertReport {
        namespace: namespace.to_string(),
        start_offset: options.start_offset,
        total_records: pending.len(),
        batch_size: options.batch_size,
        batches: Vec::new(),
        first_failure: None,
        started_at: Utc::now(),
        finished_at: Utc::now(),
    };

    if pending.is_empty() {
        warn!(namespace, "no records to upsert");
        return Ok(report);
    }

    let total_batches = pending.len().div_ceil(options.batch_size);
    info!(
        namespace,
        records = pending.len(),
        batches = total_batches,
        start_offset = options.start_offset,
        "upserting records"
    );

    for (batch_index, batch) in pending.chunks(options.batch_size).enumerate() {
        let offset = options.start_offset + batch_index * options.batch_size;
        info!(
            batch = batch_index + 1,
            total_batches,
            size = batch.len(),
            offset,
            "processing batch"
        );
        tokio::time::sleep(options.pacing_delay).await;

        let (attempts, outcome) = submit_with_backoff(index, namespace, batch, &options.backoff).await;
        match outcome {
            Ok(()) => {
                info!(batch = batch_index + 1, attempts, "batch upserted");
                report.batches.push(BatchOutcome {
                    index: batch_index,
                    offset,
                    size: batch.len(),
                    status: BatchStatus::Succeeded { attempts },
                });
            }
            Err(source) => {
                error!(batch = batch_index + 1, attempts, offset, error = %source, "batch upsert failed");
                report.batches.push(BatchOutcome {
                    index: batch_index,
                    offset,
                    size: batch.len(),
                    status: BatchStatus::Failed {
                        attempts,
                        error: source.to_string(),
                    },
                });
                report.first_failure = Some(BatchFailure {
                    batch_index,
                    offset,
                    error: source.to_string(),
                });
                report.finished_at = Utc::now();
                return Err(UpsertError::BatchFailed {
                    batch_index,
                    offset,
                    source,
                    report: Box::new(report),
                });
            }
        }
    }

    report.finished_at = Utc::now();
    info!(
        namespace,
        upserted = report.records_upserted(),
        batches = report.batch_count(),
        "upsert finished"
    );
    Ok(report)
}

async fn submit_with_backoff<I>(
    index: &I,
    namespace: &str,
    batch: &[InsertableRecord],
    backoff: &BackoffPolicy,
) -> (u32, Result<(), IndexError>)
where
    I: RecordIndex + Sync,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match index.upsert_records(namespace, batch).await {
            Ok(()) => return (attempt, Ok(())),
            Err(error) if error.is_retryable() && attempt <= backoff.max_retries => {
                let delay = backoff.delay_for(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying batch after backoff"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return (attempt, Err(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchHit, SearchRequest, PRIMARY_KEY};
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingIndex {
        calls: Mutex<Vec<(Instant, Vec<String>)>>,
        scripted_failures: Mutex<VecDeque<Option<IndexError>>>,
    }

    impl RecordingIndex {
        fn failing_with(failures: Vec<Option<IndexError>>) -> Self {
            Self {
                scripted_failures: Mutex::new(failures.into()),
                ..Self::default()
            }
        }

        fn batch_sizes(&self) -> Vec<usize> {
            self.calls.lock().unwrap().iter().map(|(_, ids)| ids.len()).collect()
        }
    }

    #[async_trait]
    impl RecordIndex for RecordingIndex {
        async fn upsert_records(
            &self,
            _namespace: &str,
            records: &[InsertableRecord],
        ) -> Result<(), IndexError> {
            let ids = records.iter().map(|record| record.id().to_string()).collect();
            self.calls.lock().unwrap().push((Instant::now(), ids));
            match self.scripted_failures.lock().unwrap().pop_front().flatten() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }

        async fn search_records(
            &self,
            _namespace: &str,
            _request: &SearchRequest,
        ) -> Result<Vec<SearchHit>, IndexError> {
            Ok(Vec::new())
        }
    }

    fn records(count: usize) -> Vec<InsertableRecord> {
        (0..count)
            .map(|position| {
                let mut fields = Map::new();
                fields.insert(PRIMARY_KEY.to_string(), json!(format!("job-{position}")));
                InsertableRecord(fields)
            })
            .collect()
    }

    fn rate_limited() -> IndexError {
        IndexError::BackendResponse {
            backend: "pinecone".to_string(),
            status: 429,
            details: "too many requests".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forty_five_records_go_out_as_three_paced_batches() {
        let index = RecordingIndex::default();
        let started = Instant::now();

        let report = upsert_records(&index, "jobs", &records(45), &UpsertOptions::default())
            .await
            .expect("all batches succeed");

        assert_eq!(index.batch_sizes(), vec![20, 20, 5]);
        assert_eq!(report.batch_count(), 3);
        assert_eq!(report.records_upserted(), 45);
        assert_eq!(report.resume_offset(), 45);
        assert!(report.first_failure.is_none());

        let calls = index.calls.lock().unwrap();
        for (position, (at, _)) in calls.iter().enumerate() {
            let expected = DEFAULT_PACING_DELAY * (position as u32 + 1);
            assert!(at.duration_since(started) >= expected);
        }
        assert_eq!(calls[2].1.first().map(String::as_str), Some("job-40"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_is_a_no_op() {
        let index = RecordingIndex::default();
        let report = upsert_records(&index, "jobs", &[], &UpsertOptions::default())
            .await
            .expect("empty input is not an error");

        assert_eq!(report.total_records, 0);
        assert_eq!(report.batch_count(), 0);
        assert!(index.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_stops_the_run_and_reports_resume_offset() {
        let index = RecordingIndex::failing_with(vec![
            None,
            Some(IndexError::Request("bad record".to_string())),
        ]);

        let result = upsert_records(&index, "jobs", &records(50), &UpsertOptions::default()).await;

        match result {
            Err(UpsertError::BatchFailed {
                batch_index,
                offset,
                report,
                ..
            }) => {
                assert_eq!(batch_index, 1);
                assert_eq!(offset, 20);
                assert_eq!(report.records_upserted(), 20);
                assert_eq!(report.resume_offset(), 20);
                assert_eq!(report.batch_count(), 2);
            }
            other => panic!("expected a batch failure, got {other:?}"),
        }
        assert_eq!(index.batch_sizes(), vec![20, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn start_offset_resumes_from_absolute_position() {
        let index = RecordingIndex::default();
        let options = UpsertOptions {
            start_offset: 40,
            ..UpsertOptions::default()
        };

        let report = upsert_records(&index, "jobs", &records(45), &options)
            .await
            .expect("resumed run succeeds");

        assert_eq!(index.batch_sizes(), vec![5]);
        assert_eq!(report.batches[0].offset, 40);
        assert_eq!(report.total_records, 5);
        assert_eq!(report.resume_offset(), 45);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_options_are_rejected() {
        let index = RecordingIndex::default();
        let zero_batch = UpsertOptions {
            batch_size: 0,
            ..UpsertOptions::default()
        };
        let past_end = UpsertOptions {
            start_offset: 11,
            ..UpsertOptions::default()
        };

        assert!(matches!(
            upsert_records(&index, "jobs", &records(10), &zero_batch).await,
            Err(UpsertError::InvalidOptions(_))
        ));
        assert!(matches!(
            upsert_records(&index, "jobs", &records(10), &past_end).await,
            Err(UpsertError::InvalidOptions(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_batches_are_retried_with_backoff() {
        let index = RecordingIndex::failing_with(vec![Some(rate_limited()), Some(rate_limited())]);
        let options = UpsertOptions {
            pacing_delay: Duration::ZERO,
            ..UpsertOptions::default()
        };
        let started = Instant::now();

        let report = upsert_records(&index, "jobs", &records(3), &options)
            .await
            .expect("third attempt succeeds");

        assert_eq!(report.batches[0].status, BatchStatus::Succeeded { attempts: 3 });
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_when_policy_is_exhausted() {
        let index = RecordingIndex::failing_with(vec![Some(rate_limited()), Some(rate_limited())]);
        let options = UpsertOptions {
            pacing_delay: Duration::ZERO,
            backoff: BackoffPolicy {
                max_retries: 1,
                ..BackoffPolicy::default()
            },
            ..UpsertOptions::default()
        };

        let result = upsert_records(&index, "jobs", &records(3), &options).await;
        assert!(matches!(result, Err(UpsertError::BatchFailed { batch_index: 0, .. })));
        assert_eq!(index.batch_sizes(), vec![3, 3]);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = BackoffPolicy {
            max_retries: 10,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(3),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(3));
        assert_eq!(BackoffPolicy::none().max_retries, 0);
    }
}
