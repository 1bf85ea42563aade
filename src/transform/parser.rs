//! DSL rule parser.
//!
//! A rule string chains operations with `" + "` (spaces required) and passes
//! positional arguments with `|`:
//!
//! ```text
//! strip + uppercase + replace|old|new
//! split|, + list_first
//! vlookup|ca:Composer,a:Author
//! ```
//!
//! The pipe doubles as an escape character for `split`, whose delimiter may
//! itself be a pipe or a space:
//!
//! - `split|||` and `split|\|` split on a literal `|`
//! - `split||` splits on a space
//! - `split||x` splits on `x` (leading `||` followed by a tail)
//!
//! Parsing never consults the operation registry: an unrecognized name
//! becomes a bare step and fails at execution time. This keeps templates
//! parseable even when they reference operations a deployment does not ship.

use serde_json::{Map, Value};

use crate::error::{TransformError, TransformResult};
use crate::types::Step;

/// Operations whose single positional argument has a well-known name.
const ARITHMETIC_PARAMS: &[(&str, &str)] = &[
    ("addition", "amount"),
    ("subtraction", "amount"),
    ("multiplication", "factor"),
    ("division", "divisor"),
    ("percentage", "factor"),
];

/// Parse a DSL rule string into an ordered list of steps.
pub fn parse_rule(rule: &str) -> TransformResult<Vec<Step>> {
    let mut steps = Vec::new();

    // The chain separator is exactly " + "; a bare "+" is argument text.
    for token_raw in rule.replace(" + ", "|;|").split("|;|") {
        let token = token_raw.trim_start();
        if token.is_empty() {
            continue;
        }

        if let Some(raw) = token.strip_prefix("split|") {
            steps.push(parse_split(raw)?);
            continue;
        }
        if let Some(delimiter) = token.strip_prefix("join|") {
            steps.push(Step::with_arg("join", "delimiter", delimiter.into()));
            continue;
        }
        if let Some(text) = token.strip_prefix("prefix|") {
            steps.push(Step::with_arg("prefix", "prefix_str", text.into()));
            continue;
        }
        if let Some(text) = token.strip_prefix("suffix|") {
            steps.push(Step::with_arg("suffix", "suffix_str", text.into()));
            continue;
        }
        if let Some(body) = token.strip_prefix("replace_regex|") {
            // "||" separates pattern from replacement so patterns may
            // contain single pipes (alternation).
            let (pattern, repl) = match body.split_once("||") {
                Some((pattern, repl)) => (pattern, repl),
                None => (body, ""),
            };
            let mut args = Map::new();
            args.insert("pattern".into(), pattern.into());
            args.insert("repl".into(), repl.into());
            steps.push(Step {
                name: "replace_regex".into(),
                args,
            });
            continue;
        }
        if let Some(body) = token.strip_prefix("replace|") {
            let (old, new) = body
                .split_once('|')
                .ok_or_else(|| TransformError::MissingArgument(token.to_string()))?;
            let mut args = Map::new();
            args.insert("old".into(), old.into());
            args.insert("new".into(), new.into());
            steps.push(Step {
                name: "replace".into(),
                args,
            });
            continue;
        }
        if let Some(body) = token.strip_prefix("vlookup|") {
            steps.push(parse_vlookup(token, body)?);
            continue;
        }

        if let Some(step) = parse_arithmetic(token) {
            steps.push(step);
            continue;
        }

        if let Some(chars) = token.strip_prefix("strip|") {
            steps.push(Step::with_arg("strip", "chars", chars.into()));
        } else if let Some(value) = token.strip_prefix("set|") {
            steps.push(Step::with_arg("set", "value", value.into()));
        } else if let Some(value) = token.strip_prefix("set_number|") {
            steps.push(Step::with_arg("set_number", "value", value.into()));
        } else if let Some(value) = token.strip_prefix("zero_padding|") {
            steps.push(Step::with_arg("zero_padding", "value", value.into()));
        } else {
            // Bare operation name; resolved against the registry at
            // execution time, not here.
            steps.push(Step::bare(token));
        }
    }

    Ok(steps)
}

/// Decode the split token's escaped delimiter.
fn parse_split(raw: &str) -> TransformResult<Step> {
    let delim: String = if raw == "||" || raw == r"\|" {
        "|".to_string()
    } else if let Some(rest) = raw.strip_prefix("|||") {
        if rest.is_empty() {
            "|".to_string()
        } else {
            rest.to_string()
        }
    } else if let Some(tail) = raw.strip_prefix("||") {
        if tail.is_empty() || tail == " " {
            " ".to_string()
        } else {
            tail.to_string()
        }
    } else if let Some(rest) = raw.strip_prefix(r"\|") {
        format!("|{rest}")
    } else {
        raw.to_string()
    };

    // A lone space is a legal delimiter; everything else is trimmed.
    let delim = if delim == " " {
        delim
    } else {
        delim.trim().to_string()
    };
    if delim.is_empty() {
        return Err(TransformError::EmptyDelimiter);
    }
    Ok(Step::with_arg("split", "delimiter", delim.into()))
}

/// Decode a `vlookup|k1:v1,k2:v2` token into a lowercased mapping with
/// typed values.
fn parse_vlookup(token: &str, body: &str) -> TransformResult<Step> {
    let mut mapping = Map::new();
    for pair in body.trim_end_matches('|').split(',') {
        let (key, val) = pair
            .split_once(':')
            .ok_or_else(|| TransformError::MissingArgument(token.to_string()))?;
        mapping.insert(
            key.trim().to_lowercase(),
            coerce_lookup_value(val.trim()),
        );
    }
    let mut args = Map::new();
    args.insert("mapping".into(), Value::Object(mapping));
    Ok(Step {
        name: "vlookup_map".into(),
        args,
    })
}

/// Coerce a lookup value literal: booleans, then decimals, then integers,
/// falling back to the raw string.
fn coerce_lookup_value(raw: &str) -> Value {
    let lowered = raw.to_lowercase();
    if lowered == "true" {
        return Value::Bool(true);
    }
    if lowered == "false" {
        return Value::Bool(false);
    }
    if is_decimal_literal(raw) {
        if let Ok(f) = raw.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    // Unsigned digit runs only; "-5" stays a string.
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(i) = raw.parse::<i64>() {
            return Value::from(i);
        }
    }
    Value::String(raw.to_string())
}

/// `-?\d+\.\d+` without pulling in a regex for a three-part shape.
fn is_decimal_literal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    match digits.split_once('.') {
        Some((int_part, frac_part)) => {
            !int_part.is_empty()
                && !frac_part.is_empty()
                && int_part.chars().all(|c| c.is_ascii_digit())
                && frac_part.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Arithmetic tokens carry one positional argument under an op-specific
/// parameter name. The literal stays a string here; numeric coercion is
/// deferred to execution so a bad literal degrades per-row instead of
/// failing the whole rule.
fn parse_arithmetic(token: &str) -> Option<Step> {
    for (op, param) in ARITHMETIC_PARAMS {
        if let Some(rest) = token.strip_prefix(op) {
            if let Some(literal) = rest.strip_prefix('|') {
                return Some(Step::with_arg(op, param, literal.into()));
            }
        }
    }
    None
}
