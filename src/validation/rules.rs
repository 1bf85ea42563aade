//! Individual validation rules.
//!
//! Every rule takes the field value, a named argument bag, and optional row
//! context, and returns `None` when the value passes or a human-readable
//! message when it does not. All rules except `required` skip null and
//! empty-string values: presence is `required`'s job alone.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::{Map, Value};

/// Row context for cross-field rules.
pub type RowContext = Map<String, Value>;

/// Dispatch one named rule. `None` means the rule name is unknown.
pub fn check(
    rule: &str,
    value: &Value,
    args: &Map<String, Value>,
    context: Option<&RowContext>,
) -> Option<Option<String>> {
    let outcome = match rule {
        "required" => required(value),
        "regex" => regex_match(value, args),
        "enum" => one_of(value, args),
        "min_length" => min_length(value, args),
        "max_length" => max_length(value, args),
        "numeric_range" => numeric_range(value, args),
        "date_before" => date_compare(value, args, context, Ordering::Before),
        "date_after" => date_compare(value, args, context, Ordering::After),
        _ => return None,
    };
    Some(outcome)
}

enum Ordering {
    Before,
    After,
}

fn skip_empty(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::String(s) if s.is_empty())
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn required(value: &Value) -> Option<String> {
    let missing = match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    };
    missing.then(|| "Field is required".to_string())
}

fn regex_match(value: &Value, args: &Map<String, Value>) -> Option<String> {
    if skip_empty(value) {
        return None;
    }
    let Some(pattern) = args.get("pattern").and_then(Value::as_str) else {
        return Some("Regex pattern not specified".to_string());
    };

    // i/m/s flags map onto inline flag groups
    let flags = args
        .get("flags")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let mut prefix = String::new();
    for flag in ['i', 'm', 's'] {
        if flags.contains(flag) {
            prefix.push_str(&format!("(?{flag})"));
        }
    }

    let compiled = match Regex::new(&format!("{prefix}{pattern}")) {
        Ok(re) => re,
        Err(e) => return Some(format!("Invalid regex pattern: {e}")),
    };
    // Anchored at the start of the value, not a substring search
    let text = stringify(value);
    let matched = compiled.find(&text).map_or(false, |m| m.start() == 0);
    (!matched).then(|| format!("Value does not match pattern: {pattern}"))
}

fn one_of(value: &Value, args: &Map<String, Value>) -> Option<String> {
    if skip_empty(value) {
        return None;
    }
    let Some(Value::Array(allowed)) = args.get("values") else {
        return Some("No allowed values specified".to_string());
    };
    if allowed.is_empty() {
        return Some("No allowed values specified".to_string());
    }
    if allowed.contains(value) {
        return None;
    }
    let listed = allowed
        .iter()
        .map(stringify)
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("Value must be one of: {listed}"))
}

fn length_arg(args: &Map<String, Value>) -> Option<usize> {
    args.get("value").and_then(Value::as_u64).map(|n| n as usize)
}

fn min_length(value: &Value, args: &Map<String, Value>) -> Option<String> {
    if skip_empty(value) {
        return None;
    }
    let Some(min_len) = length_arg(args) else {
        return Some("Minimum length not specified".to_string());
    };
    (stringify(value).chars().count() < min_len)
        .then(|| format!("Value must be at least {min_len} characters long"))
}

fn max_length(value: &Value, args: &Map<String, Value>) -> Option<String> {
    if skip_empty(value) {
        return None;
    }
    let Some(max_len) = length_arg(args) else {
        return Some("Maximum length not specified".to_string());
    };
    (stringify(value).chars().count() > max_len)
        .then(|| format!("Value must not exceed {max_len} characters"))
}

fn numeric_range(value: &Value, args: &Map<String, Value>) -> Option<String> {
    if skip_empty(value) {
        return None;
    }
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(number) = number else {
        return Some("Value must be numeric".to_string());
    };

    if let Some(min) = args.get("min").and_then(Value::as_f64) {
        if number < min {
            return Some(format!("Value must be at least {min}"));
        }
    }
    if let Some(max) = args.get("max").and_then(Value::as_f64) {
        if number > max {
            return Some(format!("Value must not exceed {max}"));
        }
    }
    None
}

/// ISO-8601 date or datetime, `Z` suffix accepted.
fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(&trimmed.replace('Z', "+00:00")) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn date_compare(
    value: &Value,
    args: &Map<String, Value>,
    context: Option<&RowContext>,
    ordering: Ordering,
) -> Option<String> {
    if skip_empty(value) {
        return None;
    }
    let Some(text) = value.as_str() else {
        return Some("Value must be a valid date".to_string());
    };
    let Some(value_date) = parse_iso(text) else {
        return Some("Invalid date format".to_string());
    };

    let holds = |other: NaiveDateTime| match ordering {
        Ordering::Before => value_date < other,
        Ordering::After => value_date > other,
    };
    let direction = match ordering {
        Ordering::Before => "before",
        Ordering::After => "after",
    };

    // Fixed comparison date
    if let Some(compare_str) = args.get("date").and_then(Value::as_str) {
        let Some(compare_date) = parse_iso(compare_str) else {
            return Some(format!("Invalid comparison date: {compare_str}"));
        };
        if !holds(compare_date) {
            return Some(format!("Date must be {direction} {compare_str}"));
        }
    }

    // Sibling field comparison
    if let (Some(field), Some(ctx)) = (args.get("field").and_then(Value::as_str), context) {
        if let Some(sibling) = ctx.get(field).filter(|v| !skip_empty(v)) {
            let Some(sibling_text) = sibling.as_str() else {
                return Some(format!("Field {field} is not a valid date"));
            };
            let Some(compare_date) = parse_iso(sibling_text) else {
                return Some(format!("Invalid date in field {field}"));
            };
            if !holds(compare_date) {
                return Some(format!("Date must be {direction} {field}"));
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(rule: &str, value: Value, args: Value) -> Option<String> {
        let Value::Object(args) = args else { panic!("args must be an object") };
        check(rule, &value, &args, None).expect("known rule")
    }

    #[test]
    fn test_required() {
        assert!(run("required", json!(null), json!({})).is_some());
        assert!(run("required", json!(""), json!({})).is_some());
        assert!(run("required", json!([]), json!({})).is_some());
        assert!(run("required", json!("x"), json!({})).is_none());
        assert!(run("required", json!(0), json!({})).is_none());
        assert!(run("required", json!(false), json!({})).is_none());
    }

    #[test]
    fn test_empty_values_skip_non_required_rules() {
        assert!(run("regex", json!(null), json!({"pattern": "x"})).is_none());
        assert!(run("enum", json!(""), json!({"values": ["a"]})).is_none());
        assert!(run("min_length", json!(""), json!({"value": 5})).is_none());
        assert!(run("numeric_range", json!(null), json!({"min": 0})).is_none());
        assert!(run("date_before", json!(""), json!({"date": "2024-01-01"})).is_none());
    }

    #[test]
    fn test_regex_anchored_at_start() {
        let args = json!({"pattern": r"\d{3}"});
        assert!(run("regex", json!("123abc"), args.clone()).is_none());
        // Substring matches later in the value do not count
        assert!(run("regex", json!("abc123"), args).is_some());
    }

    #[test]
    fn test_regex_flags() {
        assert!(run("regex", json!("ABC"), json!({"pattern": "abc", "flags": "i"})).is_none());
        assert!(run("regex", json!("ABC"), json!({"pattern": "abc"})).is_some());
    }

    #[test]
    fn test_regex_errors() {
        assert!(run("regex", json!("x"), json!({})).is_some());
        assert!(run("regex", json!("x"), json!({"pattern": "("}))
            .unwrap()
            .starts_with("Invalid regex pattern"));
    }

    #[test]
    fn test_enum() {
        let args = json!({"values": ["red", "green"]});
        assert!(run("enum", json!("red"), args.clone()).is_none());
        assert!(run("enum", json!("blue"), args).is_some());
        // Values compare typed: the string "5" is not the number 5
        assert!(run("enum", json!("5"), json!({"values": [5]})).is_some());
        assert!(run("enum", json!("x"), json!({"values": []})).is_some());
    }

    #[test]
    fn test_lengths() {
        assert!(run("min_length", json!("abc"), json!({"value": 3})).is_none());
        assert!(run("min_length", json!("ab"), json!({"value": 3})).is_some());
        assert!(run("max_length", json!("abc"), json!({"value": 3})).is_none());
        assert!(run("max_length", json!("abcd"), json!({"value": 3})).is_some());
        // Numbers are measured by their rendered form
        assert!(run("max_length", json!(12345), json!({"value": 4})).is_some());
        assert!(run("min_length", json!("ab"), json!({})).is_some());
    }

    #[test]
    fn test_numeric_range() {
        let args = json!({"min": 0, "max": 100});
        assert!(run("numeric_range", json!(50), args.clone()).is_none());
        assert!(run("numeric_range", json!("50.5"), args.clone()).is_none());
        assert!(run("numeric_range", json!(-1), args.clone()).is_some());
        assert!(run("numeric_range", json!(101), args.clone()).is_some());
        assert!(run("numeric_range", json!("abc"), args).is_some());
        // Open-ended bounds
        assert!(run("numeric_range", json!(1e9), json!({"min": 0})).is_none());
    }

    #[test]
    fn test_date_fixed_comparisons() {
        assert!(run("date_before", json!("2024-01-01"), json!({"date": "2024-06-01"})).is_none());
        assert!(run("date_before", json!("2024-06-01"), json!({"date": "2024-06-01"})).is_some());
        assert!(run("date_after", json!("2024-07-01"), json!({"date": "2024-06-01"})).is_none());
        assert!(run("date_after", json!("2024-05-01"), json!({"date": "2024-06-01"})).is_some());
        assert!(run("date_before", json!("not a date"), json!({"date": "2024-06-01"})).is_some());
        assert!(run("date_before", json!("2024-01-01"), json!({"date": "garbage"})).is_some());
        assert!(run("date_before", json!(5), json!({"date": "2024-06-01"})).is_some());
    }

    #[test]
    fn test_date_field_comparisons() {
        let mut ctx = RowContext::new();
        ctx.insert("end_date".into(), json!("2024-12-31"));
        let mut args = Map::new();
        args.insert("field".into(), json!("end_date"));

        let ok = check("date_before", &json!("2024-06-01"), &args, Some(&ctx)).unwrap();
        assert!(ok.is_none());
        let bad = check("date_after", &json!("2024-06-01"), &args, Some(&ctx)).unwrap();
        assert!(bad.is_some());
        // Absent sibling value: rule passes
        let mut args = Map::new();
        args.insert("field".into(), json!("missing"));
        let skipped = check("date_before", &json!("2024-06-01"), &args, Some(&ctx)).unwrap();
        assert!(skipped.is_none());
    }

    #[test]
    fn test_unknown_rule_is_none() {
        assert!(check("custom_expression", &json!("x"), &Map::new(), None).is_none());
    }
}
