//! End-to-end import orchestration.
//!
//! A run walks fixed stages: initialize the job, open the row source, load
//! the template, then stream rows through the batch processor. Each batch is
//! mapped (columns to fields), transformed (per-field step chains),
//! validated, and persisted to the completeness cache as one record per row.
//! Row-level problems never abort a run; they are recorded and counted.
//! Only structural failures (unreadable source, missing template) do.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::batch::{BatchConfig, BatchOutcome, BatchProcessor, HandlerResult};
use crate::error::{PipelineError, PipelineResult, SinkResult};
use crate::source::RowSource;
use crate::template::{TemplateMapper, TemplateStore};
use crate::transform::{apply_steps, Execution};
use crate::types::{CompletenessRecord, JobStage, RowRecord, RunType, Template};
use crate::validation::validate_field;

// =============================================================================
// Collaborators
// =============================================================================

/// Destination for per-row completeness records.
#[async_trait]
pub trait CompletenessSink: Send + Sync {
    async fn write_batch(&self, records: &[CompletenessRecord]) -> SinkResult<()>;
}

/// Receives job lifecycle notifications.
#[async_trait]
pub trait StageReporter: Send + Sync {
    async fn stage_changed(&self, job_id: &str, stage: JobStage);
    async fn job_completed(&self, job_id: &str, summary: &ImportSummary);
    async fn job_failed(&self, job_id: &str, message: &str);
}

/// Reporter that only logs. The default when no external job tracker exists.
#[derive(Default)]
pub struct LogReporter;

#[async_trait]
impl StageReporter for LogReporter {
    async fn stage_changed(&self, job_id: &str, stage: JobStage) {
        info!(%job_id, stage = stage.as_str(), "job stage");
    }

    async fn job_completed(&self, job_id: &str, summary: &ImportSummary) {
        info!(
            %job_id,
            valid = summary.valid_rows,
            errors = summary.error_rows,
            "import completed"
        );
    }

    async fn job_failed(&self, job_id: &str, message: &str) {
        error!(%job_id, %message, "import failed");
    }
}

/// In-memory sink, for tests and embedded callers.
#[derive(Default)]
pub struct MemoryCompletenessSink {
    records: Mutex<Vec<CompletenessRecord>>,
}

impl MemoryCompletenessSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<CompletenessRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl CompletenessSink for MemoryCompletenessSink {
    async fn write_batch(&self, records: &[CompletenessRecord]) -> SinkResult<()> {
        self.records.lock().await.extend_from_slice(records);
        Ok(())
    }
}

// =============================================================================
// Configuration and summary
// =============================================================================

/// Configuration for one import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub template_id: String,
    pub tenant_id: String,
    /// Display name; generated from the start time when absent.
    pub job_name: Option<String>,
    pub batch: BatchConfig,
}

impl ImportConfig {
    pub fn new(template_id: &str, tenant_id: &str) -> Self {
        Self {
            template_id: template_id.to_string(),
            tenant_id: tenant_id.to_string(),
            job_name: None,
            batch: BatchConfig::default(),
        }
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }
}

/// Final accounting for an import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub job_id: String,
    pub job_name: String,
    pub valid_rows: usize,
    pub error_rows: usize,
    /// Rows excluded by a `rejects` transformation.
    pub rejected_rows: usize,
    pub total_batches: usize,
    pub duration_seconds: f64,
    pub throughput_rows_per_second: f64,
}

// =============================================================================
// Pipeline
// =============================================================================

/// Orchestrates a template-driven import run.
pub struct ImportPipeline {
    config: ImportConfig,
    mapper: TemplateMapper,
    processor: BatchProcessor,
    sink: Arc<dyn CompletenessSink>,
    reporter: Arc<dyn StageReporter>,
}

impl ImportPipeline {
    pub fn new(
        config: ImportConfig,
        store: Arc<dyn TemplateStore>,
        sink: Arc<dyn CompletenessSink>,
        reporter: Arc<dyn StageReporter>,
    ) -> Self {
        let processor = BatchProcessor::new(config.batch.clone());
        Self {
            config,
            mapper: TemplateMapper::new(store),
            processor,
            sink,
            reporter,
        }
    }

    /// Run the import end to end.
    ///
    /// Returns the aggregate summary; fails only on structural errors. An
    /// input with zero rows is [`PipelineError::EmptyInput`].
    pub async fn run(&self, source: &dyn RowSource) -> PipelineResult<ImportSummary> {
        let job_id = Uuid::new_v4().to_string();
        let job_name = self
            .config
            .job_name
            .clone()
            .unwrap_or_else(|| format!("Import-{}", Utc::now().format("%Y%m%d-%H%M%S")));
        info!(%job_id, %job_name, template_id = %self.config.template_id, "starting import");

        match self.run_stages(&job_id, &job_name, source).await {
            Ok(summary) => {
                self.reporter.stage_changed(&job_id, JobStage::Completed).await;
                self.reporter.job_completed(&job_id, &summary).await;
                Ok(summary)
            }
            Err(e) => {
                self.reporter.stage_changed(&job_id, JobStage::Failed).await;
                self.reporter.job_failed(&job_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        job_id: &str,
        job_name: &str,
        source: &dyn RowSource,
    ) -> PipelineResult<ImportSummary> {
        self.reporter.stage_changed(job_id, JobStage::ImportInit).await;

        self.reporter
            .stage_changed(job_id, JobStage::ImportFileParse)
            .await;
        // Row-level source errors are counted and skipped; only failing to
        // open the source at all aborts the run.
        let rows_seen = AtomicUsize::new(0);
        let source_errors = AtomicUsize::new(0);
        let rows = source.rows()?.filter_map(|item| {
            rows_seen.fetch_add(1, Ordering::Relaxed);
            let parsed = match item {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable source row");
                    source_errors.fetch_add(1, Ordering::Relaxed);
                    None
                }
            };
            futures::future::ready(parsed)
        });

        self.reporter
            .stage_changed(job_id, JobStage::ImportTemplateMap)
            .await;
        let template = self
            .mapper
            .load_template(&self.config.template_id, &self.config.tenant_id)
            .await?;

        // Transform, validate, and cache-write all happen per batch from
        // here on.
        self.reporter
            .stage_changed(job_id, JobStage::ImportTransform)
            .await;

        let rejected = AtomicUsize::new(0);
        let handler = |batch: Vec<RowRecord>| {
            let template = Arc::clone(&template);
            let rejected = &rejected;
            async move {
                self.process_batch(job_id, &template, batch, rejected).await
            }
        };
        let batch_summary = self.processor.process_stream(rows, handler, None).await;

        self.reporter
            .stage_changed(job_id, JobStage::ImportWriteCache)
            .await;

        if rows_seen.load(Ordering::Relaxed) == 0 {
            return Err(PipelineError::EmptyInput);
        }

        Ok(ImportSummary {
            job_id: job_id.to_string(),
            job_name: job_name.to_string(),
            valid_rows: batch_summary.total_processed,
            error_rows: batch_summary.total_errors + source_errors.load(Ordering::Relaxed),
            rejected_rows: rejected.load(Ordering::Relaxed),
            total_batches: batch_summary.total_batches,
            duration_seconds: batch_summary.duration_seconds,
            throughput_rows_per_second: batch_summary.throughput_rows_per_second,
        })
    }

    /// Map, transform, validate, and persist one batch of rows.
    async fn process_batch(
        &self,
        job_id: &str,
        template: &Template,
        batch: Vec<RowRecord>,
        rejected: &AtomicUsize,
    ) -> HandlerResult {
        let mut success_count = 0;
        let mut error_count = 0;
        let mut errors: Vec<Value> = Vec::new();
        let mut records = Vec::with_capacity(batch.len());

        for row in batch {
            match self.process_row(job_id, template, &row) {
                Ok(Some(record)) => {
                    if record.is_valid {
                        success_count += 1;
                    } else {
                        error_count += 1;
                    }
                    records.push(record);
                }
                Ok(None) => {
                    // Row rejected by its transformation chain
                    rejected.fetch_add(1, Ordering::Relaxed);
                    debug!(row = row.row_number, "row rejected");
                }
                Err(e) => {
                    error!(row = row.row_number, error = %e, "row processing failed");
                    error_count += 1;
                    errors.push(serde_json::json!({
                        "row": row.row_number,
                        "error": e.to_string(),
                    }));
                }
            }
        }

        // A sink failure fails the whole attempt so the batch is retried
        if !records.is_empty() {
            self.sink.write_batch(&records).await?;
        }

        Ok(Some(BatchOutcome {
            success_count,
            error_count,
            errors,
        }))
    }

    /// Process one row. `Ok(None)` means a `rejects` step excluded it.
    fn process_row(
        &self,
        job_id: &str,
        template: &Template,
        row: &RowRecord,
    ) -> PipelineResult<Option<CompletenessRecord>> {
        let mapped = self.mapper.map_row_to_fields(&row.data, template);

        // Transform each field; sibling raw values are the step context
        let mut transformed = Map::new();
        for (field, raw_value) in &mapped {
            let steps = self.mapper.transformation_steps(template, field);
            let Execution {
                value,
                rejected,
                faults,
            } = apply_steps(raw_value.clone(), steps, Some(&mapped))?;
            if rejected {
                return Ok(None);
            }
            for fault in faults {
                warn!(
                    row = row.row_number,
                    %field,
                    operation = %fault.operation,
                    message = %fault.message,
                    "transformation step fault"
                );
            }
            transformed.insert(field.clone(), value);
        }

        // Validate transformed values, cross-field rules see the whole row
        let mut validation_errors = Map::new();
        for (field, value) in &transformed {
            let rules = self.mapper.validation_rules(template, field);
            let faults = validate_field(field, value, rules, Some(&transformed));
            if !faults.is_empty() {
                validation_errors.insert(
                    field.clone(),
                    serde_json::to_value(&faults).unwrap_or_default(),
                );
            }
        }

        // error_count tallies failing fields, not individual faults
        let error_count = validation_errors.len();
        Ok(Some(CompletenessRecord {
            job_id: job_id.to_string(),
            run_type: RunType::Import,
            tenant_id: self.config.tenant_id.clone(),
            template_id: self.config.template_id.clone(),
            transformed_response: transformed,
            validation_errors,
            is_valid: error_count == 0,
            error_count,
            file_row_number: Some(row.row_number),
            raw_input_snapshot: Some(row.raw_snapshot.clone()),
            created_at: Utc::now(),
        }))
    }
}

/// Run an import with the given collaborators.
pub async fn run_import(
    config: ImportConfig,
    store: Arc<dyn TemplateStore>,
    sink: Arc<dyn CompletenessSink>,
    reporter: Arc<dyn StageReporter>,
    source: &dyn RowSource,
) -> PipelineResult<ImportSummary> {
    ImportPipeline::new(config, store, sink, reporter)
        .run(source)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryRowSource;
    use crate::template::MemoryTemplateStore;
    use crate::types::{AttributeDefinition, Step, ValidationRule};
    use serde_json::json;

    fn product_template() -> Template {
        Template {
            id: "tpl-1".into(),
            channel_name: "amazon".into(),
            template_name: "Amazon Standard Product".into(),
            attributes: vec![
                AttributeDefinition::new("sku", "product_sku")
                    .with_step(Step::bare("strip"))
                    .with_step(Step::bare("uppercase"))
                    .with_validation(ValidationRule::bare("required"))
                    .required(),
                AttributeDefinition::new("price", "selling_price")
                    .with_step(Step::bare("clean_numeric_value"))
                    .with_validation(ValidationRule::bare("required"))
                    .with_validation(ValidationRule::with_arg(
                        "numeric_range",
                        "min",
                        json!(0.01),
                    ))
                    .required(),
            ],
        }
    }

    fn row(sku: &str, price: &str) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("Product_SKU".into(), json!(sku));
        data.insert("selling_price".into(), json!(price));
        data
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    }

    /// Reporter that records the stage sequence.
    #[derive(Default)]
    struct RecordingReporter {
        stages: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl StageReporter for RecordingReporter {
        async fn stage_changed(&self, _job_id: &str, stage: JobStage) {
            self.stages.lock().await.push(stage.as_str());
        }
        async fn job_completed(&self, _job_id: &str, _summary: &ImportSummary) {}
        async fn job_failed(&self, _job_id: &str, _message: &str) {}
    }

    async fn run_with(
        template: Template,
        rows: Vec<Map<String, Value>>,
    ) -> (
        PipelineResult<ImportSummary>,
        Arc<MemoryCompletenessSink>,
        Arc<RecordingReporter>,
    ) {
        let store = Arc::new(MemoryTemplateStore::new());
        store.insert("tenant-1", template).await;
        let sink = Arc::new(MemoryCompletenessSink::new());
        let reporter = Arc::new(RecordingReporter::default());

        let config = ImportConfig::new("tpl-1", "tenant-1")
            .with_batch(BatchConfig::default().with_batch_size(2).with_max_workers(2));
        let pipeline = ImportPipeline::new(
            config,
            store,
            Arc::clone(&sink) as Arc<dyn CompletenessSink>,
            Arc::clone(&reporter) as Arc<dyn StageReporter>,
        );
        let result = pipeline.run(&MemoryRowSource::new(rows)).await;
        (result, sink, reporter)
    }

    #[tokio::test]
    async fn test_end_to_end_import() {
        init_tracing();
        let rows = vec![
            row("  abc-1  ", "$12.50"),
            row("abc-2", "free"), // price fails numeric_range after cleaning fails
            row("", "3.00"),      // missing sku
        ];
        let (result, sink, reporter) = run_with(product_template(), rows).await;
        let summary = result.unwrap();

        assert_eq!(summary.valid_rows, 1);
        assert_eq!(summary.error_rows, 2);
        assert_eq!(summary.rejected_rows, 0);
        assert_eq!(summary.total_batches, 2);

        let records = sink.records().await;
        assert_eq!(records.len(), 3);

        let good = records
            .iter()
            .find(|r| r.file_row_number == Some(1))
            .unwrap();
        assert!(good.is_valid);
        assert_eq!(good.transformed_response["sku"], json!("ABC-1"));
        assert_eq!(good.transformed_response["price"], json!(12.5));
        assert_eq!(good.raw_input_snapshot.as_ref().unwrap()["Product_SKU"], json!("  abc-1  "));

        let bad_price = records
            .iter()
            .find(|r| r.file_row_number == Some(2))
            .unwrap();
        assert!(!bad_price.is_valid);
        assert!(bad_price.validation_errors.contains_key("price"));

        let missing_sku = records
            .iter()
            .find(|r| r.file_row_number == Some(3))
            .unwrap();
        assert!(missing_sku.validation_errors.contains_key("sku"));

        let stages = reporter.stages.lock().await.clone();
        assert_eq!(
            stages,
            vec![
                "IMPORT_INIT",
                "IMPORT_FILE_PARSE",
                "IMPORT_TEMPLATE_MAP",
                "IMPORT_TRANSFORM",
                "IMPORT_WRITE_CACHE",
                "COMPLETED",
            ]
        );
    }

    #[tokio::test]
    async fn test_record_error_count_is_per_field() {
        let mut template = product_template();
        // price fails both rules below for a non-numeric value
        template.attributes[1] = AttributeDefinition::new("price", "selling_price")
            .with_validation(ValidationRule::with_arg("numeric_range", "min", json!(0)))
            .with_validation(ValidationRule::with_arg("max_length", "value", json!(2)));

        let (result, sink, _) = run_with(template, vec![row("SKU-1", "not-a-price")]).await;
        result.unwrap();

        let records = sink.records().await;
        let record = &records[0];
        assert!(!record.is_valid);
        // Two faults on one field: error_count counts the field once
        assert_eq!(record.validation_errors["price"].as_array().unwrap().len(), 2);
        assert_eq!(record.error_count, 1);
    }

    #[tokio::test]
    async fn test_rejected_rows_are_excluded_from_output() {
        let mut template = product_template();
        template.attributes[0] = AttributeDefinition::new("sku", "product_sku")
            .with_step(Step::bare("rejects"));

        let (result, sink, _) = run_with(template, vec![row("x", "1.00")]).await;
        let summary = result.unwrap();

        assert_eq!(summary.rejected_rows, 1);
        assert_eq!(summary.valid_rows, 0);
        assert_eq!(summary.error_rows, 0);
        assert!(sink.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_operation_counts_row_as_error() {
        let mut template = product_template();
        template.attributes[0] = AttributeDefinition::new("sku", "product_sku")
            .with_step(Step::bare("frobnicate"));

        let (result, sink, _) = run_with(template, vec![row("x", "1.00")]).await;
        let summary = result.unwrap();

        assert_eq!(summary.error_rows, 1);
        // No completeness record for the failed row
        assert!(sink.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_input_is_an_error() {
        let (result, _, reporter) = run_with(product_template(), vec![]).await;
        assert!(matches!(result, Err(PipelineError::EmptyInput)));
        let stages = reporter.stages.lock().await.clone();
        assert_eq!(stages.last(), Some(&"FAILED"));
    }

    #[tokio::test]
    async fn test_missing_template_fails_the_run() {
        let store = Arc::new(MemoryTemplateStore::new());
        let sink = Arc::new(MemoryCompletenessSink::new());
        let pipeline = ImportPipeline::new(
            ImportConfig::new("nope", "tenant-1"),
            store,
            sink,
            Arc::new(LogReporter),
        );
        let result = pipeline
            .run(&MemoryRowSource::new(vec![row("x", "1.00")]))
            .await;
        assert!(matches!(result, Err(PipelineError::Template(_))));
    }
}
