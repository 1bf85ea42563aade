//! Validation engine: applies named rules to transformed field values.
//!
//! Validation never aborts a run. Every failed rule becomes a
//! [`ValidationFault`], faults are grouped per field, and the row-level
//! verdict is simply "zero faults". A rule name the engine does not know
//! produces a fault too, so misconfigured templates are visible in the
//! output instead of silently passing.

pub mod rules;

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::types::{ValidationFault, ValidationRule};

pub use rules::RowContext;

/// Validation outcome for one row.
#[derive(Debug, Clone, Default)]
pub struct RowValidation {
    /// Faults grouped by field name. Fields with no faults are absent.
    pub errors: HashMap<String, Vec<ValidationFault>>,
    pub error_count: usize,
}

impl RowValidation {
    pub fn is_valid(&self) -> bool {
        self.error_count == 0
    }
}

/// Validate one field against its rules.
///
/// `context` carries the full row for cross-field rules. A rule's
/// `error_message` overrides the generated message when set.
pub fn validate_field(
    field: &str,
    value: &Value,
    rules: &[ValidationRule],
    context: Option<&RowContext>,
) -> Vec<ValidationFault> {
    let mut faults = Vec::new();

    for rule in rules {
        let outcome = rules::check(&rule.rule, value, &rule.args, context);
        let message = match outcome {
            None => Some(format!("Unknown validation rule: {}", rule.rule)),
            Some(Some(generated)) => {
                Some(rule.error_message.clone().unwrap_or(generated))
            }
            Some(None) => None,
        };
        if let Some(message) = message {
            faults.push(ValidationFault {
                field: field.to_string(),
                rule: rule.rule.clone(),
                message,
                value: Some(value.clone()),
            });
        }
    }

    faults
}

/// Validate a whole row against per-field rule sets.
///
/// Fields absent from the row validate as `Null`, so `required` still fires
/// for them.
pub fn validate_row(
    row: &Map<String, Value>,
    field_rules: &HashMap<String, Vec<ValidationRule>>,
) -> RowValidation {
    let mut result = RowValidation::default();

    for (field, rules) in field_rules {
        if rules.is_empty() {
            continue;
        }
        let value = row.get(field).cloned().unwrap_or(Value::Null);
        let faults = validate_field(field, &value, rules, Some(row));
        if !faults.is_empty() {
            result.error_count += faults.len();
            result.errors.insert(field.clone(), faults);
        }
    }

    result
}

/// Validate a batch of rows, one [`RowValidation`] per row, in order.
pub fn validate_batch(
    rows: &[Map<String, Value>],
    field_rules: &HashMap<String, Vec<ValidationRule>>,
) -> Vec<RowValidation> {
    rows.iter().map(|row| validate_row(row, field_rules)).collect()
}
