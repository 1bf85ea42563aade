//! Concurrent batch processing with backpressure.
//!
//! Rows stream in, get grouped into fixed-size batches, and flow through a
//! bounded channel to a pool of workers. The bounded channel is the
//! backpressure mechanism: when workers fall behind, the producer blocks on
//! `send` instead of buffering the whole file in memory. Closing the channel
//! is the drain signal; workers exit once the producer is done and the queue
//! is empty, never before.
//!
//! Each batch gets a per-attempt timeout and exponential-backoff retries. A
//! batch that exhausts its retries is recorded as fully failed and the run
//! continues; batch failures never abort the stream.

use std::future::Future;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Boxed error for batch handlers and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler reports back: `None` means the whole batch succeeded.
pub type HandlerResult = Result<Option<BatchOutcome>, BoxError>;

/// Invoked after each batch finishes (success or failure). Errors are
/// logged and never fail the run.
pub type CompletionCallback = Arc<dyn Fn(&BatchResult) -> Result<(), BoxError> + Send + Sync>;

/// Backoff cap between retry attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Channel capacity used when backpressure is disabled.
const UNBOUNDED_CAPACITY: usize = 1 << 20;

// =============================================================================
// Configuration
// =============================================================================

/// Batch processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Rows per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Concurrent workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Maximum queued batches before the producer blocks. Zero means no
    /// bound.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Per-attempt batch timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
    /// Attempts per batch before it counts as failed.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_backpressure_enabled")]
    pub backpressure_enabled: bool,
}

fn default_batch_size() -> usize {
    500
}
fn default_max_workers() -> usize {
    4
}
fn default_max_queue_size() -> usize {
    10
}
fn default_timeout_seconds() -> f64 {
    300.0
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_backpressure_enabled() -> bool {
    true
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_workers: default_max_workers(),
            max_queue_size: default_max_queue_size(),
            timeout_seconds: default_timeout_seconds(),
            retry_attempts: default_retry_attempts(),
            backpressure_enabled: default_backpressure_enabled(),
        }
    }
}

impl BatchConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds.max(0.0))
    }

    /// A `max_queue_size` of zero opts out of the bound entirely, same as
    /// disabling backpressure.
    fn queue_capacity(&self) -> usize {
        if self.backpressure_enabled && self.max_queue_size > 0 {
            self.max_queue_size
        } else {
            UNBOUNDED_CAPACITY
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Partial outcome a handler may report for a batch.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<Value>,
}

/// Result of processing a single batch, including retries.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<Value>,
    /// Wall time across all attempts, in seconds.
    pub processing_time: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Aggregate summary of one `process_stream` run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_processed: usize,
    pub total_errors: usize,
    pub total_batches: usize,
    pub duration_seconds: f64,
    pub throughput_rows_per_second: f64,
    pub batch_results: Vec<BatchResult>,
}

/// Point-in-time processing statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    pub total_processed: usize,
    pub total_errors: usize,
    pub batches_completed: usize,
    pub state: RunState,
}

/// Lifecycle of a processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    /// Producer finished, workers are emptying the queue.
    Draining,
    Stopped,
}

impl RunState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => RunState::Running,
            2 => RunState::Draining,
            3 => RunState::Stopped,
            _ => RunState::Idle,
        }
    }
}

// =============================================================================
// Processor
// =============================================================================

/// Processes a row stream in batches with a concurrent worker pool.
pub struct BatchProcessor {
    config: BatchConfig,
    state: AtomicU8,
    total_processed: AtomicUsize,
    total_errors: AtomicUsize,
    batches_completed: AtomicUsize,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(RunState::Idle as u8),
            total_processed: AtomicUsize::new(0),
            total_errors: AtomicUsize::new(0),
            batches_completed: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Current counters and lifecycle state, observable mid-run.
    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            state: RunState::from_u8(self.state.load(Ordering::Relaxed)),
        }
    }

    /// Consume a row stream, batching rows and processing batches on
    /// `max_workers` concurrent workers.
    ///
    /// `handler` is called once per attempt with the batch rows; rows must be
    /// cloneable so a timed-out attempt can be retried. `on_batch_complete`
    /// fires after each batch with its result.
    pub async fn process_stream<T, S, F, Fut>(
        &self,
        stream: S,
        handler: F,
        on_batch_complete: Option<CompletionCallback>,
    ) -> RunSummary
    where
        T: Clone + Send,
        S: Stream<Item = T> + Send,
        F: Fn(Vec<T>) -> Fut + Sync,
        Fut: Future<Output = HandlerResult> + Send,
    {
        let run_start = Utc::now();
        self.state.store(RunState::Running as u8, Ordering::Relaxed);
        self.total_processed.store(0, Ordering::Relaxed);
        self.total_errors.store(0, Ordering::Relaxed);
        self.batches_completed.store(0, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel::<(usize, Vec<T>)>(self.config.queue_capacity());
        let rx = Mutex::new(rx);
        let results = Mutex::new(Vec::<BatchResult>::new());

        let producer = async {
            self.produce_batches(stream, tx).await;
            // Channel closed: workers drain what remains and stop
            self.state.store(RunState::Draining as u8, Ordering::Relaxed);
        };

        let workers = futures::future::join_all((0..self.config.max_workers.max(1)).map(|id| {
            self.worker(id, &rx, &results, &handler, on_batch_complete.as_ref())
        }));

        tokio::join!(producer, workers);
        self.state.store(RunState::Stopped as u8, Ordering::Relaxed);

        let run_end = Utc::now();
        let duration_seconds = (run_end - run_start)
            .to_std()
            .unwrap_or_default()
            .as_secs_f64();
        let total_processed = self.total_processed.load(Ordering::Relaxed);
        let batch_results = results.into_inner();

        RunSummary {
            total_processed,
            total_errors: self.total_errors.load(Ordering::Relaxed),
            total_batches: batch_results.len(),
            duration_seconds,
            throughput_rows_per_second: if duration_seconds > 0.0 {
                total_processed as f64 / duration_seconds
            } else {
                0.0
            },
            batch_results,
        }
    }

    /// Group the stream into batches and queue them; blocks when the queue
    /// is full and backpressure is on. Dropping the sender signals drain.
    async fn produce_batches<T, S>(&self, stream: S, tx: mpsc::Sender<(usize, Vec<T>)>)
    where
        S: Stream<Item = T> + Send,
    {
        futures::pin_mut!(stream);
        let mut batch_id = 0usize;
        let mut current: Vec<T> = Vec::with_capacity(self.config.batch_size);

        while let Some(row) = stream.next().await {
            current.push(row);
            if current.len() >= self.config.batch_size.max(1) {
                let rows = std::mem::replace(
                    &mut current,
                    Vec::with_capacity(self.config.batch_size),
                );
                debug!(batch_id, rows = rows.len(), "queued batch");
                if tx.send((batch_id, rows)).await.is_err() {
                    return;
                }
                batch_id += 1;
            }
        }

        if !current.is_empty() {
            debug!(batch_id, rows = current.len(), "queued final batch");
            let _ = tx.send((batch_id, current)).await;
        }
    }

    async fn worker<T, F, Fut>(
        &self,
        worker_id: usize,
        rx: &Mutex<mpsc::Receiver<(usize, Vec<T>)>>,
        results: &Mutex<Vec<BatchResult>>,
        handler: &F,
        on_batch_complete: Option<&CompletionCallback>,
    ) where
        T: Clone + Send,
        F: Fn(Vec<T>) -> Fut + Sync,
        Fut: Future<Output = HandlerResult> + Send,
    {
        debug!(worker_id, "worker started");
        loop {
            // Hold the receiver lock only while waiting for the next batch
            let next = rx.lock().await.recv().await;
            let Some((batch_id, rows)) = next else {
                break;
            };

            let result = self.process_with_retry(batch_id, rows, handler).await;
            self.total_processed
                .fetch_add(result.success_count, Ordering::Relaxed);
            self.total_errors
                .fetch_add(result.error_count, Ordering::Relaxed);
            self.batches_completed.fetch_add(1, Ordering::Relaxed);

            if let Some(callback) = on_batch_complete {
                if let Err(e) = callback(&result) {
                    warn!(batch_id, error = %e, "batch completion callback failed");
                }
            }

            debug!(
                worker_id,
                batch_id,
                success = result.success_count,
                errors = result.error_count,
                "batch done"
            );
            results.lock().await.push(result);
        }
        debug!(worker_id, "worker stopped");
    }

    /// Run one batch through the handler with timeout and backoff retries.
    async fn process_with_retry<T, F, Fut>(
        &self,
        batch_id: usize,
        rows: Vec<T>,
        handler: &F,
    ) -> BatchResult
    where
        T: Clone + Send,
        F: Fn(Vec<T>) -> Fut + Sync,
        Fut: Future<Output = HandlerResult> + Send,
    {
        let start_time = Utc::now();
        let attempts = self.config.retry_attempts.max(1);
        let row_count = rows.len();
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let attempt_result =
                tokio::time::timeout(self.config.timeout(), handler(rows.clone())).await;

            match attempt_result {
                Ok(Ok(outcome)) => {
                    let end_time = Utc::now();
                    let (success_count, error_count, errors) = match outcome {
                        Some(o) => (o.success_count, o.error_count, o.errors),
                        None => (row_count, 0, Vec::new()),
                    };
                    return BatchResult {
                        batch_id,
                        success_count,
                        error_count,
                        errors,
                        processing_time: elapsed_seconds(start_time, end_time),
                        start_time,
                        end_time,
                    };
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    warn!(batch_id, attempt, attempts, error = %last_error, "batch attempt failed");
                }
                Err(_) => {
                    last_error = format!(
                        "Batch {batch_id} timed out after {}s",
                        self.config.timeout_seconds
                    );
                    warn!(batch_id, attempt, attempts, "{last_error}");
                }
            }

            if attempt < attempts {
                let backoff = Duration::from_secs(1u64 << attempt.min(30));
                tokio::time::sleep(backoff.min(MAX_BACKOFF)).await;
            }
        }

        info!(batch_id, attempts, "batch exhausted retries");
        let end_time = Utc::now();
        BatchResult {
            batch_id,
            success_count: 0,
            error_count: row_count,
            errors: vec![serde_json::json!({
                "error": format!("Batch failed after {attempts} retries: {last_error}")
            })],
            processing_time: elapsed_seconds(start_time, end_time),
            start_time,
            end_time,
        }
    }
}

fn elapsed_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).to_std().unwrap_or_default().as_secs_f64()
}
