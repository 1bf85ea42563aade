//! Core data model for the feedforge pipeline.
//!
//! Mirrors the wire shapes exchanged with external collaborators: raw rows
//! from file parsers, channel templates from the template store, and
//! completeness records written to the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw row produced by a file parser.
///
/// `data` holds column name to raw value; `raw_snapshot` preserves the
/// untouched input for the completeness cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRecord {
    /// 1-based row number within the source file.
    pub row_number: usize,
    /// Column name to raw value.
    pub data: Map<String, Value>,
    /// Untouched copy of the input row.
    pub raw_snapshot: Map<String, Value>,
}

impl RowRecord {
    /// Build a record from parsed column data, snapshotting the input.
    pub fn new(row_number: usize, data: Map<String, Value>) -> Self {
        Self {
            row_number,
            raw_snapshot: data.clone(),
            data,
        }
    }
}

/// A single transformation step: operation name plus a named argument bag.
///
/// Produced by the DSL parser or supplied directly as structured input
/// (`{"name": ..., "params": {...}}`). Immutable once parsed; the name is
/// resolved against the operation registry only at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Operation name.
    pub name: String,
    /// Named arguments for the operation.
    #[serde(default, rename = "params")]
    pub args: Map<String, Value>,
}

impl Step {
    /// A zero-argument step.
    pub fn bare(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Map::new(),
        }
    }

    /// A step with a single named argument.
    pub fn with_arg(name: &str, key: &str, value: Value) -> Self {
        let mut args = Map::new();
        args.insert(key.to_string(), value);
        Self {
            name: name.to_string(),
            args,
        }
    }
}

/// A single validation rule attached to a template attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    /// Rule name (e.g. `required`, `max_length`).
    pub rule: String,
    /// Named arguments for the rule.
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Override for the generated error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ValidationRule {
    /// A rule with no arguments.
    pub fn bare(rule: &str) -> Self {
        Self {
            rule: rule.to_string(),
            args: Map::new(),
            error_message: None,
        }
    }

    /// A rule with a single named argument.
    pub fn with_arg(rule: &str, key: &str, value: Value) -> Self {
        let mut args = Map::new();
        args.insert(key.to_string(), value);
        Self {
            rule: rule.to_string(),
            args,
            error_message: None,
        }
    }
}

/// A validation failure for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFault {
    pub field: String,
    pub rule: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// One field definition inside a channel template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDefinition {
    /// Target field name.
    pub name: String,
    /// Source column in the input file.
    pub column_name: String,
    /// Data type tag (`string`, `number`, `integer`, ...).
    #[serde(default = "default_data_type")]
    pub data_type: String,
    /// Whether the field must be present and valid.
    #[serde(default)]
    pub is_required: bool,
    /// Ordered transformation steps.
    #[serde(default)]
    pub transformations: Vec<Step>,
    /// Ordered validation rules.
    #[serde(default)]
    pub validations: Vec<ValidationRule>,
}

fn default_data_type() -> String {
    "string".to_string()
}

impl AttributeDefinition {
    /// Minimal attribute mapping a column to a field name.
    pub fn new(name: &str, column_name: &str) -> Self {
        Self {
            name: name.to_string(),
            column_name: column_name.to_string(),
            data_type: default_data_type(),
            is_required: false,
            transformations: Vec::new(),
            validations: Vec::new(),
        }
    }

    /// Append a transformation step.
    pub fn with_step(mut self, step: Step) -> Self {
        self.transformations.push(step);
        self
    }

    /// Append a validation rule.
    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validations.push(rule);
        self
    }

    /// Mark as required.
    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }
}

/// A per-channel template: field mappings, transformation pipelines, and
/// validation rules, as delivered by the template store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub channel_name: String,
    pub template_name: String,
    pub attributes: Vec<AttributeDefinition>,
}

impl Template {
    /// Parse a template from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Import job stages, reported to the job-status sink as the run progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStage {
    ImportInit,
    ImportFileFetch,
    ImportFileParse,
    ImportTemplateMap,
    ImportTransform,
    ImportValidate,
    ImportWriteCache,
    Completed,
    Failed,
}

impl JobStage {
    /// Stage name as reported to external sinks.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::ImportInit => "IMPORT_INIT",
            JobStage::ImportFileFetch => "IMPORT_FILE_FETCH",
            JobStage::ImportFileParse => "IMPORT_FILE_PARSE",
            JobStage::ImportTemplateMap => "IMPORT_TEMPLATE_MAP",
            JobStage::ImportTransform => "IMPORT_TRANSFORM",
            JobStage::ImportValidate => "IMPORT_VALIDATE",
            JobStage::ImportWriteCache => "IMPORT_WRITE_CACHE",
            JobStage::Completed => "COMPLETED",
            JobStage::Failed => "FAILED",
        }
    }
}

/// Run direction for completeness records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunType {
    Import,
    Export,
}

/// One row's persisted transformation/validation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletenessRecord {
    pub job_id: String,
    pub run_type: RunType,
    pub tenant_id: String,
    pub template_id: String,
    /// Transformed field values.
    pub transformed_response: Map<String, Value>,
    /// Validation faults grouped by field.
    pub validation_errors: Map<String, Value>,
    pub is_valid: bool,
    pub error_count: usize,
    pub file_row_number: Option<usize>,
    /// Raw input as parsed from the file.
    pub raw_input_snapshot: Option<Map<String, Value>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_serde_round_trip() {
        let step = Step::with_arg("replace", "old", json!("-"));
        let text = serde_json::to_string(&step).unwrap();
        assert!(text.contains("params"));
        let back: Step = serde_json::from_str(&text).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_structured_step_form() {
        // Programmatic callers bypass the DSL with {name, params} objects.
        let step: Step =
            serde_json::from_value(json!({"name": "strip", "params": {}})).unwrap();
        assert_eq!(step.name, "strip");
        assert!(step.args.is_empty());

        // params is optional for bare operations
        let bare: Step = serde_json::from_value(json!({"name": "uppercase"})).unwrap();
        assert_eq!(bare, Step::bare("uppercase"));
    }

    #[test]
    fn test_template_json_round_trip() {
        let template = Template {
            id: "tpl-1".into(),
            channel_name: "amazon".into(),
            template_name: "Amazon Standard Product".into(),
            attributes: vec![AttributeDefinition::new("title", "product_title")
                .with_step(Step::bare("strip"))
                .with_validation(ValidationRule::bare("required"))
                .required()],
        };
        let json = template.to_json().unwrap();
        let parsed = Template::from_json(&json).unwrap();
        assert_eq!(parsed.attributes.len(), 1);
        assert!(parsed.attributes[0].is_required);
        assert_eq!(parsed.attributes[0].data_type, "string");
    }

    #[test]
    fn test_job_stage_names() {
        assert_eq!(JobStage::ImportTransform.as_str(), "IMPORT_TRANSFORM");
        assert_eq!(JobStage::Completed.as_str(), "COMPLETED");
    }
}
