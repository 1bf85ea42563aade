//! Step execution and broadcasting.
//!
//! Execution is fail-soft: a step that errors at runtime is recorded and
//! skipped, the value carries on unchanged into the next step. Two signals
//! break that contract: `rejects` stops the chain and marks the value as
//! rejected, and an unknown operation name aborts the whole execution,
//! since it means the rule itself is wrong rather than the data.

use serde_json::Value;
use tracing::warn;

use crate::error::{TransformError, TransformResult};
use crate::transform::parser::parse_rule;
use crate::transform::registry::{apply_operation, Context, OpError};
use crate::types::Step;

/// A runtime fault from one step, recorded while execution continued.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFault {
    /// Operation that failed.
    pub operation: String,
    pub message: String,
}

/// Outcome of running a step chain over one value.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Final value. Null when the value was rejected.
    pub value: Value,
    /// Whether a `rejects` step fired.
    pub rejected: bool,
    /// Faults swallowed along the way.
    pub faults: Vec<StepFault>,
}

impl Execution {
    fn completed(value: Value, faults: Vec<StepFault>) -> Self {
        Self {
            value,
            rejected: false,
            faults,
        }
    }

    fn rejected(faults: Vec<StepFault>) -> Self {
        Self {
            value: Value::Null,
            rejected: true,
            faults,
        }
    }
}

/// Run an ordered step chain over a value.
///
/// `context` exposes sibling field values to context-aware operations.
pub fn apply_steps(
    value: Value,
    steps: &[Step],
    context: Option<&Context>,
) -> TransformResult<Execution> {
    let mut current = value;
    let mut faults = Vec::new();

    for step in steps {
        match apply_operation(&step.name, current.clone(), &step.args, context) {
            Ok(next) => current = next,
            Err(OpError::Reject) => return Ok(Execution::rejected(faults)),
            Err(OpError::Unknown) => {
                return Err(TransformError::UnknownOperation(step.name.clone()));
            }
            Err(OpError::Failed(message)) => {
                warn!(operation = %step.name, %message, "transformation step failed, value kept");
                faults.push(StepFault {
                    operation: step.name.clone(),
                    message,
                });
                // current keeps its pre-step value
            }
        }
    }

    Ok(Execution::completed(current, faults))
}

/// Rules for a bulk application: one rule broadcast over all values, or one
/// rule per value.
#[derive(Debug, Clone)]
pub enum RuleSet {
    Single(String),
    Many(Vec<String>),
}

impl From<&str> for RuleSet {
    fn from(rule: &str) -> Self {
        RuleSet::Single(rule.to_string())
    }
}

impl From<Vec<String>> for RuleSet {
    fn from(rules: Vec<String>) -> Self {
        RuleSet::Many(rules)
    }
}

/// Apply DSL rules to a list of values with broadcasting.
///
/// Shapes accepted:
/// - one rule, N values: the rule applies to every value
/// - N rules, N values: pairwise
/// - 1 rule in a list, N values: the rule is replicated
/// - N rules, 1 value: the value is replicated, producing N outputs
///
/// Any other shape is a [`TransformError::BroadcastMismatch`]. An empty rule
/// string passes its value through untouched. Rejected values come back as
/// `Null`.
pub fn bulk_apply(values: Vec<Value>, rules: impl Into<RuleSet>) -> TransformResult<Vec<Value>> {
    let (values, rules) = broadcast(values, rules.into())?;

    let mut results = Vec::with_capacity(values.len());
    for (value, rule) in values.into_iter().zip(rules) {
        if rule.is_empty() {
            results.push(value);
            continue;
        }
        let steps = parse_rule(&rule)?;
        let execution = apply_steps(value, &steps, None)?;
        results.push(execution.value);
    }
    Ok(results)
}

fn broadcast(
    mut values: Vec<Value>,
    rules: RuleSet,
) -> TransformResult<(Vec<Value>, Vec<String>)> {
    let rules = match rules {
        RuleSet::Single(rule) => vec![rule; values.len()],
        RuleSet::Many(mut rules) => {
            if rules.len() == 1 && values.len() > 1 {
                rules = vec![rules.remove(0); values.len()];
            } else if values.len() == 1 && rules.len() > 1 {
                values = vec![values.remove(0); rules.len()];
            } else if rules.len() != values.len() {
                return Err(TransformError::BroadcastMismatch {
                    values: values.len(),
                    rules: rules.len(),
                });
            }
            rules
        }
    };
    Ok((values, rules))
}

/// Apply one DSL rule to one value.
pub fn transform(value: Value, rule: &str) -> TransformResult<Value> {
    let mut results = bulk_apply(vec![value], rule)?;
    Ok(results.pop().unwrap_or(Value::Null))
}
