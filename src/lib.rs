//! # Feedforge - template-driven product data ETL
//!
//! Feedforge transforms raw product feeds (CSV and friends) into validated,
//! channel-ready records using per-tenant templates: each template field
//! names a source column, a chain of transformation steps, and a set of
//! validation rules.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Row source│────▶│  Batcher   │────▶│ Map/Transform│───▶│ Completeness │
//! │ (CSV, ...) │     │ (bounded)  │     │  /Validate   │    │    cache     │
//! └────────────┘     └────────────┘     └─────────────┘     └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use feedforge::transform::transform;
//! use serde_json::json;
//!
//! let value = transform(json!("  ivory tower  "), "strip + title_case").unwrap();
//! assert_eq!(value, json!("Ivory Tower"));
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`types`] - Domain models (RowRecord, Template, CompletenessRecord)
//! - [`transform`] - Operation registry, DSL parser, and executor
//! - [`validation`] - Rule-based field and row validation
//! - [`template`] - Template store, cache, and column mapping
//! - [`batch`] - Concurrent batch processing with backpressure
//! - [`source`] - Row sources (CSV, in-memory)
//! - [`pipeline`] - End-to-end import orchestration
//! - [`metrics`] - In-process counters and timers

// Core modules
pub mod error;
pub mod types;

// Transformation
pub mod transform;

// Validation
pub mod validation;

// Templates
pub mod template;

// Batch processing
pub mod batch;

// Row sources
pub mod source;

// Orchestration
pub mod pipeline;

// Metrics
pub mod metrics;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    PipelineError,
    SinkError,
    SourceError,
    TemplateError,
    TransformError,
};

// =============================================================================
// Re-exports - Domain models
// =============================================================================

pub use types::{
    AttributeDefinition,
    CompletenessRecord,
    JobStage,
    RowRecord,
    RunType,
    Step,
    Template,
    ValidationFault,
    ValidationRule,
};

// =============================================================================
// Re-exports - Transformation DSL
// =============================================================================

pub use transform::{
    apply_operation,
    apply_steps,
    bulk_apply,
    parse_rule,
    transform,
    Execution,
    OpError,
    RuleSet,
    StepFault,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{validate_batch, validate_field, validate_row, RowValidation};

// =============================================================================
// Re-exports - Templates
// =============================================================================

pub use template::{MemoryTemplateStore, TemplateMapper, TemplateStore};

// =============================================================================
// Re-exports - Batch processing
// =============================================================================

pub use batch::{
    BatchConfig,
    BatchOutcome,
    BatchProcessor,
    BatchResult,
    CompletionCallback,
    ProcessorStats,
    RunState,
    RunSummary,
};

// =============================================================================
// Re-exports - Sources
// =============================================================================

pub use source::{CsvRowSource, MemoryRowSource, RowSource, RowStream};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use pipeline::{
    run_import,
    CompletenessSink,
    ImportConfig,
    ImportPipeline,
    ImportSummary,
    LogReporter,
    MemoryCompletenessSink,
    StageReporter,
};

// =============================================================================
// Re-exports - Metrics
// =============================================================================

pub use metrics::MetricsCollector;
