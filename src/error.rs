//! Error types for the feedforge pipeline.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`TransformError`] - DSL parse and execution errors
//! - [`TemplateError`] - template loading/cache errors
//! - [`SourceError`] - row source errors
//! - [`SinkError`] - completeness-cache write errors
//! - [`PipelineError`] - top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Transformation Errors
// =============================================================================

/// Errors raised while parsing or executing DSL rules.
///
/// The parse-time variants (`EmptyDelimiter`, `MissingArgument`,
/// `BroadcastMismatch`) indicate a malformed rule or template and are never
/// retried. `UnknownOperation` surfaces only at execution time: parsing does
/// not validate registry membership.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Rule references an operation the registry does not know.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// A `split` token resolved to an empty delimiter.
    #[error("split requires a non-empty delimiter")]
    EmptyDelimiter,

    /// A parameterized token is missing a required argument.
    #[error("Missing argument in token: {0}")]
    MissingArgument(String),

    /// Value list and rule list have incompatible lengths.
    #[error("Broadcast mismatch: {values} values vs {rules} rules")]
    BroadcastMismatch { values: usize, rules: usize },
}

// =============================================================================
// Template Errors
// =============================================================================

/// Errors from template loading.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Template does not exist for this tenant.
    #[error("Template {template_id} not found for tenant {tenant_id}")]
    NotFound {
        template_id: String,
        tenant_id: String,
    },

    /// Backing store failed.
    #[error("Template store error: {0}")]
    Store(String),

    /// Template payload could not be deserialized.
    #[error("Invalid template: {0}")]
    Invalid(#[from] serde_json::Error),
}

// =============================================================================
// Row Source Errors
// =============================================================================

/// Errors from a row source (file parsing collaborators).
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to read the underlying file.
    #[error("Failed to read source: {0}")]
    Io(#[from] std::io::Error),

    /// CSV-level parse failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Malformed record in the source.
    #[error("Invalid record at row {row}: {message}")]
    InvalidRecord { row: usize, message: String },

    /// Source has no header row.
    #[error("No headers found in source")]
    NoHeaders,
}

// =============================================================================
// Completeness Sink Errors
// =============================================================================

/// Errors from the completeness-cache sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Write to the backing store failed.
    #[error("Failed to persist batch: {0}")]
    Write(String),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the main error type returned by
/// [`crate::pipeline::ImportPipeline::run`]. It wraps all lower-level errors
/// and adds pipeline-specific variants. Row-level problems never surface
/// here; a run always completes with an aggregate summary and only
/// structurally invalid configuration aborts early.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Transformation configuration error.
    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    /// Template error.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Row source error.
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Completeness sink error.
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// No rows to process.
    #[error("No rows to process")]
    EmptyInput,
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transformation operations.
pub type TransformResult<T> = Result<T, TransformError>;

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Result type for row source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
