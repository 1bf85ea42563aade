//! Operation registry for the transformation DSL.
//!
//! Each operation takes a value and a named argument bag and returns a
//! transformed value. Operations are pure and handle type mismatches
//! gracefully: string operations pass non-string values through unchanged,
//! numeric operations attempt a best-effort coercion and return the original
//! value when coercion fails. The only operation allowed to abort a pipeline
//! is `rejects`, which raises the distinguished reject signal.
//!
//! Dispatch is a closed `match` on the operation name; an unrecognized name
//! surfaces as [`OpError::Unknown`] at execution time (never at parse time).

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Number, Value};

/// Sibling-field context for one row, read-only.
pub type Context = Map<String, Value>;

/// Outcome signals from a single operation.
#[derive(Debug)]
pub enum OpError {
    /// Operation name is not in the registry.
    Unknown,
    /// The `rejects` operation fired: exclude this row from output.
    Reject,
    /// Operation failed at runtime (bad argument, unformattable date, ...).
    Failed(String),
}

static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<.*?>").unwrap());
static NON_DIGIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d]").unwrap());
static NON_NUMERIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\d.]").unwrap());
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static SLUG_STRIP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s-]").unwrap());
static SLUG_DASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[-\s]+").unwrap());
static SNAKE_1_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(.)([A-Z][a-z]+)").unwrap());
static SNAKE_2_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z0-9])([A-Z])").unwrap());
static SPECIAL_CHARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\s]").unwrap());

/// Apply one named operation to a value.
///
/// `context` carries sibling field values already transformed for this row;
/// context-aware operations pass through when it is absent.
pub fn apply_operation(
    name: &str,
    value: Value,
    args: &Map<String, Value>,
    context: Option<&Context>,
) -> Result<Value, OpError> {
    let out = match name {
        // ── Text ────────────────────────────────────────────────────────
        "uppercase" => map_string(value, |s| s.to_uppercase()),
        "lowercase" => map_string(value, |s| s.to_lowercase()),
        "strip" => strip(value, args),
        "title_case" => map_string(value, |s| title_case(&s)),
        "capitalize" => map_string(value, |s| capitalize(&s)),
        "split_comma" => split_comma(value),
        "split" => split(value, args),
        "join" => join(value, args),
        "replace" => replace(value, args),
        "replace_regex" => replace_regex(value, args)?,
        "prefix" => affix(value, arg_str(args, "prefix_str").unwrap_or("-".into()), true),
        "suffix" => affix(value, arg_str(args, "suffix_str").unwrap_or("_".into()), false),
        "clean_html" => map_string(value, |s| HTML_TAG_RE.replace_all(&s, "").into_owned()),
        "clean_upc" => map_string(value, |s| NON_DIGIT_RE.replace_all(&s, "").into_owned()),
        "remove_whitespace" => map_string(value, |s| WHITESPACE_RE.replace_all(&s, "").into_owned()),
        "truncate" => truncate(value, args),
        "pad_left" => pad(value, args, true),
        "pad_right" => pad(value, args, false),
        "slugify" => map_string(value, |s| slugify(&s)),
        "extract_numbers" => map_string(value, |s| s.chars().filter(|c| c.is_ascii_digit()).collect()),
        "extract_letters" => map_string(value, |s| s.chars().filter(|c| c.is_ascii_alphabetic()).collect()),
        "reverse_string" => map_string(value, |s| s.chars().rev().collect()),
        "word_count" => count(value, |s| s.split_whitespace().count()),
        "char_count" => count(value, |s| s.chars().count()),
        "to_snake_case" => map_string(value, |s| to_snake_case(&s)),
        "to_camel_case" => map_string(value, |s| to_camel_case(&s)),
        "to_pascal_case" => map_string(value, |s| to_pascal_case(&s)),
        "remove_special_chars" => {
            map_string(value, |s| SPECIAL_CHARS_RE.replace_all(&s, "").into_owned())
        }
        "remove_accents" => map_string(value, |s| fold_diacritics(&s)),

        // ── Numeric ─────────────────────────────────────────────────────
        "clean_numeric_value" => clean_numeric_value(value),
        "addition" => arith(value, args, "amount", |v, a| v + a),
        "subtraction" => arith(value, args, "amount", |v, a| v - a),
        "multiplication" => arith(value, args, "factor", |v, a| v * a),
        "division" => division(value, args),
        "percentage" => percentage(value, args),
        "adjust_negative_to_zero" => map_number(value, |n| n.max(0.0)),
        "zero_padding" => zero_padding(value, args)?,
        "round_decimal" => round_decimal(value, args),
        "absolute_value" => map_number(value, f64::abs),
        "ceiling" => map_number_int(value, |n| n.ceil() as i64),
        "floor" => map_number_int(value, |n| n.floor() as i64),
        "square_root" => map_number(value, f64::sqrt),
        "power" => power(value, args),
        "modulo" => modulo(value, args),
        "clamp" => clamp(value, args),
        "scale" => arith(value, args, "factor", |v, a| v * a),
        "reciprocal" => reciprocal(value),

        // ── Date ────────────────────────────────────────────────────────
        "date_only" => date_only(value),
        "format_date" => format_date(value, args),
        "add_days" => shift_days(value, args, 1),
        "subtract_days" => shift_days(value, args, -1),
        "day_of_week" => date_part(value, |d| Value::from(d.weekday().num_days_from_monday() as i64), Value::Null),
        "day_name" => date_display(value, "%A"),
        "month_name" => date_display(value, "%B"),
        "year" => date_part(value, |d| Value::from(d.year() as i64), Value::Null),
        "month" => date_part(value, |d| Value::from(d.month() as i64), Value::Null),
        "day" => date_part(value, |d| Value::from(d.day() as i64), Value::Null),

        // ── List ────────────────────────────────────────────────────────
        "list_length" => match &value {
            Value::Array(a) => Value::from(a.len() as i64),
            _ => Value::from(0),
        },
        "list_first" => match value {
            Value::Array(a) => a.into_iter().next().unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "list_last" => match value {
            Value::Array(a) => a.into_iter().next_back().unwrap_or(Value::Null),
            _ => Value::Null,
        },
        "list_unique" => list_unique(value),
        "list_sort" => list_sort(value, args),

        // ── Conditional ─────────────────────────────────────────────────
        "if_empty" => {
            if is_empty_scalar(&value) {
                args.get("default").cloned().unwrap_or(Value::String(String::new()))
            } else {
                value
            }
        }
        "if_null" => {
            if value.is_null() {
                args.get("default").cloned().unwrap_or(Value::String(String::new()))
            } else {
                value
            }
        }
        "coalesce" => coalesce(value, args),

        // ── Control ─────────────────────────────────────────────────────
        "set" => args.get("value").cloned().unwrap_or(Value::Null),
        "set_number" => set_number(args)?,
        "copy" => value,
        "rejects" => return Err(OpError::Reject),

        // ── Lookup / context-aware ──────────────────────────────────────
        "vlookup_map" => vlookup_map(value, args),
        "addition_fields" => addition_fields(value, args, context),
        "concat" => concat(value, args, context),
        "field_copy_from" => field_copy_from(value, args, context),
        "date_diff_days" => date_diff_days(value, args, context),
        // Extension points: host-specific lookup resolution plugs in here.
        // Without a resolver the value passes through unchanged.
        "lookup_category_path" | "lookup_uom_conversion" => value,

        _ => return Err(OpError::Unknown),
    };
    Ok(out)
}

/// Whether a name resolves to a registered operation.
pub fn is_registered(name: &str) -> bool {
    let probe = apply_operation(name, Value::Null, &Map::new(), None);
    !matches!(probe, Err(OpError::Unknown))
}

// =============================================================================
// Coercion helpers
// =============================================================================

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Render a value the way it would appear in a joined string.
fn to_plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Best-effort numeric coercion: numbers directly, strings parsed as f64.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Wrap an f64 result, passing the original through for non-finite output.
fn num(original: Value, result: f64) -> Value {
    match Number::from_f64(result) {
        Some(n) if result.is_finite() => Value::Number(n),
        _ => original,
    }
}

fn arg_str(args: &Map<String, Value>, key: &str) -> Option<String> {
    args.get(key).map(to_plain_string)
}

fn arg_f64(args: &Map<String, Value>, key: &str) -> Option<f64> {
    args.get(key).and_then(as_f64)
}

fn arg_usize(args: &Map<String, Value>, key: &str) -> Option<usize> {
    args.get(key).and_then(|v| match v {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    })
}

fn is_empty_scalar(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn map_string<F: FnOnce(String) -> String>(value: Value, f: F) -> Value {
    match as_string(&value) {
        Some(s) => Value::String(f(s)),
        None => value,
    }
}

fn map_number<F: FnOnce(f64) -> f64>(value: Value, f: F) -> Value {
    match as_f64(&value) {
        Some(n) => {
            let result = f(n);
            num(value, result)
        }
        None => value,
    }
}

fn map_number_int<F: FnOnce(f64) -> i64>(value: Value, f: F) -> Value {
    match as_f64(&value) {
        Some(n) => Value::from(f(n)),
        None => value,
    }
}

fn count<F: FnOnce(&str) -> usize>(value: Value, f: F) -> Value {
    match value {
        Value::String(s) => Value::from(f(&s) as i64),
        _ => Value::from(0),
    }
}

// =============================================================================
// Text operations
// =============================================================================

fn strip(value: Value, args: &Map<String, Value>) -> Value {
    map_string(value, |s| match arg_str(args, "chars") {
        Some(chars) => s
            .trim_matches(|c: char| chars.contains(c))
            .to_string(),
        None => s.trim().to_string(),
    })
}

/// Capitalize the first letter of each word.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

fn split_comma(value: Value) -> Value {
    match as_string(&value) {
        Some(s) => Value::Array(
            s.split(',')
                .map(|part| Value::String(part.trim().to_string()))
                .collect(),
        ),
        None => value,
    }
}

fn split(value: Value, args: &Map<String, Value>) -> Value {
    let Some(delimiter) = arg_str(args, "delimiter") else {
        return value;
    };
    match as_string(&value) {
        Some(s) => Value::Array(
            s.split(delimiter.as_str())
                .map(|part| Value::String(part.to_string()))
                .collect(),
        ),
        None => value,
    }
}

fn join(value: Value, args: &Map<String, Value>) -> Value {
    let delimiter = arg_str(args, "delimiter").unwrap_or_default();
    // A bare string joins its whitespace-separated words.
    let items = match &value {
        Value::String(s) => s.split_whitespace().map(|w| w.to_string()).collect(),
        Value::Array(a) => a.iter().map(to_plain_string).collect::<Vec<_>>(),
        _ => return value,
    };
    Value::String(items.join(&delimiter))
}

fn replace(value: Value, args: &Map<String, Value>) -> Value {
    let (Some(old), Some(new)) = (arg_str(args, "old"), arg_str(args, "new")) else {
        return value;
    };
    map_string(value, |s| s.replace(&old, &new))
}

fn replace_regex(value: Value, args: &Map<String, Value>) -> Result<Value, OpError> {
    let Some(pattern) = arg_str(args, "pattern") else {
        return Ok(value);
    };
    let repl = arg_str(args, "repl").unwrap_or_default();
    match as_string(&value) {
        Some(s) => {
            let re = Regex::new(&pattern).map_err(|e| OpError::Failed(e.to_string()))?;
            Ok(Value::String(re.replace_all(&s, repl.as_str()).into_owned()))
        }
        None => Ok(value),
    }
}

/// Prepend or append a string; broadcasts over lists.
fn affix(value: Value, text: String, before: bool) -> Value {
    match value {
        Value::String(s) => Value::String(if before {
            format!("{text}{s}")
        } else {
            format!("{s}{text}")
        }),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| {
                    let s = to_plain_string(&item);
                    Value::String(if before {
                        format!("{text}{s}")
                    } else {
                        format!("{s}{text}")
                    })
                })
                .collect(),
        ),
        other => other,
    }
}

fn truncate(value: Value, args: &Map<String, Value>) -> Value {
    let max_length = arg_usize(args, "max_length").unwrap_or(100);
    let suffix = arg_str(args, "suffix").unwrap_or_else(|| "...".to_string());
    map_string(value, |s| {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() <= max_length {
            return s;
        }
        let keep = max_length.saturating_sub(suffix.chars().count());
        chars[..keep.min(chars.len())].iter().collect::<String>() + &suffix
    })
}

fn pad(value: Value, args: &Map<String, Value>, left: bool) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    let width = arg_usize(args, "width").unwrap_or(10);
    let fill = arg_str(args, "fill_char")
        .and_then(|s| s.chars().next())
        .unwrap_or(if left { '0' } else { ' ' });
    let s = to_plain_string(&value);
    let len = s.chars().count();
    if len >= width {
        return Value::String(s);
    }
    let padding: String = std::iter::repeat(fill).take(width - len).collect();
    Value::String(if left { padding + &s } else { s + &padding })
}

fn slugify(s: &str) -> String {
    let lowered = s.to_lowercase();
    let stripped = SLUG_STRIP_RE.replace_all(&lowered, "");
    let dashed = SLUG_DASH_RE.replace_all(&stripped, "-");
    dashed.trim_matches('-').to_string()
}

fn to_snake_case(s: &str) -> String {
    let pass1 = SNAKE_1_RE.replace_all(s, "${1}_${2}");
    SNAKE_2_RE.replace_all(&pass1, "${1}_${2}").to_lowercase()
}

fn to_camel_case(s: &str) -> String {
    let mut parts = s.split('_');
    let head = parts.next().unwrap_or_default().to_lowercase();
    let tail: String = parts.map(title_case).collect();
    head + &tail
}

fn to_pascal_case(s: &str) -> String {
    s.split('_').map(title_case).collect()
}

/// Strip combining marks from common Latin accented characters.
fn fold_diacritics(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
            'è' | 'é' | 'ê' | 'ë' => 'e',
            'ì' | 'í' | 'î' | 'ï' => 'i',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
            'ù' | 'ú' | 'û' | 'ü' => 'u',
            'ý' | 'ÿ' => 'y',
            'ç' => 'c',
            'ñ' => 'n',
            'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
            'È' | 'É' | 'Ê' | 'Ë' => 'E',
            'Ì' | 'Í' | 'Î' | 'Ï' => 'I',
            'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'Ù' | 'Ú' | 'Û' | 'Ü' => 'U',
            'Ý' => 'Y',
            'Ç' => 'C',
            'Ñ' => 'N',
            other => other,
        })
        .collect()
}

// =============================================================================
// Numeric operations
// =============================================================================

fn clean_numeric_value(value: Value) -> Value {
    match as_string(&value) {
        Some(s) => {
            let cleaned = NON_NUMERIC_RE.replace_all(&s, "");
            match cleaned.parse::<f64>() {
                Ok(n) => num(value, n),
                Err(_) => value,
            }
        }
        None => value,
    }
}

fn arith<F: FnOnce(f64, f64) -> f64>(
    value: Value,
    args: &Map<String, Value>,
    param: &str,
    f: F,
) -> Value {
    match (as_f64(&value), arg_f64(args, param)) {
        (Some(v), Some(a)) => num(value, f(v, a)),
        _ => value,
    }
}

fn division(value: Value, args: &Map<String, Value>) -> Value {
    let Some(divisor) = arg_f64(args, "divisor") else {
        return value;
    };
    if divisor == 0.0 {
        return Value::Null;
    }
    match as_f64(&value) {
        Some(v) => num(value, v / divisor),
        None => value,
    }
}

fn percentage(value: Value, args: &Map<String, Value>) -> Value {
    let factor = arg_f64(args, "factor").unwrap_or(100.0);
    match as_f64(&value) {
        Some(v) => num(value, v * factor),
        None => value,
    }
}

fn zero_padding(value: Value, args: &Map<String, Value>) -> Result<Value, OpError> {
    let width = arg_usize(args, "value")
        .ok_or_else(|| OpError::Failed("zero_padding requires an integer width".into()))?;
    let s = to_plain_string(&value);
    // zfill: zeros go between the sign and the digits
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s.as_str()),
    };
    let len = sign.len() + digits.chars().count();
    if len >= width {
        return Ok(Value::String(s));
    }
    let zeros: String = std::iter::repeat('0').take(width - len).collect();
    Ok(Value::String(format!("{sign}{zeros}{digits}")))
}

fn round_decimal(value: Value, args: &Map<String, Value>) -> Value {
    let decimals = arg_usize(args, "decimals").unwrap_or(2) as i32;
    match as_f64(&value) {
        Some(v) => {
            let factor = 10f64.powi(decimals);
            num(value, (v * factor).round() / factor)
        }
        None => value,
    }
}

fn power(value: Value, args: &Map<String, Value>) -> Value {
    let exponent = arg_f64(args, "exponent").unwrap_or(2.0);
    map_number(value, |v| v.powf(exponent))
}

fn modulo(value: Value, args: &Map<String, Value>) -> Value {
    let divisor = arg_f64(args, "divisor").unwrap_or(10.0);
    if divisor == 0.0 {
        return value;
    }
    map_number(value, |v| v.rem_euclid(divisor))
}

fn clamp(value: Value, args: &Map<String, Value>) -> Value {
    let min_val = arg_f64(args, "min_val").unwrap_or(0.0);
    let max_val = arg_f64(args, "max_val").unwrap_or(100.0);
    map_number(value, |v| v.max(min_val).min(max_val))
}

fn reciprocal(value: Value) -> Value {
    match as_f64(&value) {
        Some(v) if v != 0.0 => num(Value::Null, 1.0 / v),
        _ => Value::Null,
    }
}

// =============================================================================
// Date operations
// =============================================================================

/// Parse the date/time string shapes the pipeline encounters.
fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
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
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default()).ok()
}

/// Format a datetime, refusing invalid strftime specifiers instead of
/// panicking inside `Display`.
fn safe_format(dt: NaiveDateTime, fmt: &str) -> Option<String> {
    use chrono::format::{Item, StrftimeItems};
    let items: Vec<Item> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return None;
    }
    Some(dt.format_with_items(items.into_iter()).to_string())
}

fn date_only(value: Value) -> Value {
    match as_string(&value) {
        Some(s) => {
            let trimmed = s.trim();
            if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
                return Value::String(dt.format("%Y-%m-%d").to_string());
            }
            // Fall back to the date part when a time component exists
            match trimmed.split_once(' ') {
                Some((date, _)) => Value::String(date.to_string()),
                None => value,
            }
        }
        None => value,
    }
}

fn format_date(value: Value, args: &Map<String, Value>) -> Value {
    let fmt = arg_str(args, "format_string").unwrap_or_else(|| "%Y-%m-%d".to_string());
    match as_string(&value).as_deref().and_then(parse_datetime) {
        Some(dt) => safe_format(dt, &fmt).map(Value::String).unwrap_or(value),
        None => value,
    }
}

fn shift_days(value: Value, args: &Map<String, Value>, sign: i64) -> Value {
    let days = args
        .get("days")
        .and_then(as_f64)
        .map(|d| d as i64)
        .unwrap_or(0);
    match as_string(&value).as_deref().and_then(parse_datetime) {
        Some(dt) => {
            let shifted = dt + Duration::days(sign * days);
            Value::String(shifted.format("%Y-%m-%dT%H:%M:%S").to_string())
        }
        None => value,
    }
}

fn date_part<F: FnOnce(NaiveDateTime) -> Value>(value: Value, f: F, on_fail: Value) -> Value {
    match as_string(&value).as_deref().and_then(parse_datetime) {
        Some(dt) => f(dt),
        None => on_fail,
    }
}

fn date_display(value: Value, fmt: &str) -> Value {
    match as_string(&value).as_deref().and_then(parse_datetime) {
        Some(dt) => Value::String(dt.format(fmt).to_string()),
        None => value,
    }
}

// =============================================================================
// List operations
// =============================================================================

fn list_unique(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut seen: Vec<Value> = Vec::new();
            for item in items {
                if !seen.contains(&item) {
                    seen.push(item);
                }
            }
            Value::Array(seen)
        }
        other => other,
    }
}

fn list_sort(value: Value, args: &Map<String, Value>) -> Value {
    let reverse = args
        .get("reverse")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let Value::Array(items) = &value else {
        return value;
    };

    // Homogeneous lists only; a mixed list is left as-is.
    if items.iter().all(|v| v.is_string()) {
        let mut sorted = items.clone();
        sorted.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        if reverse {
            sorted.reverse();
        }
        return Value::Array(sorted);
    }
    if items.iter().all(|v| v.is_number()) {
        let mut sorted = items.clone();
        sorted.sort_by(|a, b| {
            let (a, b) = (as_f64(a).unwrap_or(0.0), as_f64(b).unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
        });
        if reverse {
            sorted.reverse();
        }
        return Value::Array(sorted);
    }
    value
}

// =============================================================================
// Conditional operations
// =============================================================================

fn coalesce(value: Value, args: &Map<String, Value>) -> Value {
    if !value.is_null() {
        return value;
    }
    if let Some(Value::Array(alternatives)) = args.get("values") {
        for alt in alternatives {
            if !alt.is_null() {
                return alt.clone();
            }
        }
    }
    Value::Null
}

// =============================================================================
// Control operations
// =============================================================================

fn set_number(args: &Map<String, Value>) -> Result<Value, OpError> {
    let raw = args
        .get("value")
        .ok_or_else(|| OpError::Failed("set_number requires a value".into()))?;
    let n = match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    n.map(Value::from)
        .ok_or_else(|| OpError::Failed(format!("set_number: not an integer: {raw}")))
}

// =============================================================================
// Lookup and context-aware operations
// =============================================================================

fn vlookup_map(value: Value, args: &Map<String, Value>) -> Value {
    let Some(Value::Object(mapping)) = args.get("mapping") else {
        return value;
    };
    match as_string(&value) {
        Some(s) => mapping
            .get(&s.trim().to_lowercase())
            .cloned()
            .unwrap_or(value),
        None => value,
    }
}

/// Sum the input value with the named sibling fields. Non-numeric siblings
/// are skipped; absent context is a pass-through.
fn addition_fields(value: Value, args: &Map<String, Value>, context: Option<&Context>) -> Value {
    let Some(ctx) = context else {
        return value;
    };
    let Some(Value::Array(fields)) = args.get("fields") else {
        return value;
    };
    let Some(base) = as_f64(&value) else {
        return value;
    };
    let total = fields
        .iter()
        .filter_map(|f| f.as_str())
        .filter_map(|name| ctx.get(name).and_then(as_f64))
        .fold(base, |acc, n| acc + n);
    num(value, total)
}

/// Concatenate the input value with named sibling fields.
fn concat(value: Value, args: &Map<String, Value>, context: Option<&Context>) -> Value {
    let Some(ctx) = context else {
        return value;
    };
    let Some(Value::Array(fields)) = args.get("fields") else {
        return value;
    };
    let separator = arg_str(args, "separator").unwrap_or_else(|| " ".to_string());
    let mut parts = vec![to_plain_string(&value)];
    for field in fields.iter().filter_map(|f| f.as_str()) {
        if let Some(sibling) = ctx.get(field) {
            if !is_empty_scalar(sibling) {
                parts.push(to_plain_string(sibling));
            }
        }
    }
    Value::String(parts.join(&separator))
}

fn field_copy_from(value: Value, args: &Map<String, Value>, context: Option<&Context>) -> Value {
    let Some(ctx) = context else {
        return value;
    };
    match arg_str(args, "field").and_then(|f| ctx.get(&f).cloned()) {
        Some(copied) => copied,
        None => value,
    }
}

/// Whole days between the input date and a sibling date field.
fn date_diff_days(value: Value, args: &Map<String, Value>, context: Option<&Context>) -> Value {
    let Some(ctx) = context else {
        return value;
    };
    let other = arg_str(args, "field")
        .and_then(|f| ctx.get(&f).cloned())
        .and_then(|v| as_string(&v))
        .as_deref()
        .and_then(parse_datetime);
    let own = as_string(&value).as_deref().and_then(parse_datetime);
    match (own, other) {
        (Some(a), Some(b)) => Value::from((a - b).num_days()),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(name: &str, value: Value) -> Value {
        apply_operation(name, value, &Map::new(), None).unwrap()
    }

    fn apply_args(name: &str, value: Value, args: Value) -> Value {
        let Value::Object(args) = args else { panic!("args must be an object") };
        apply_operation(name, value, &args, None).unwrap()
    }

    #[test]
    fn test_text_operations_on_strings() {
        assert_eq!(apply("uppercase", json!("hello")), json!("HELLO"));
        assert_eq!(apply("lowercase", json!("HeLLo")), json!("hello"));
        assert_eq!(apply("strip", json!("  hi  ")), json!("hi"));
        assert_eq!(apply("title_case", json!("red wine")), json!("Red Wine"));
        assert_eq!(apply("capitalize", json!("red WINE")), json!("Red wine"));
        assert_eq!(apply("reverse_string", json!("abc")), json!("cba"));
        assert_eq!(apply("clean_html", json!("<b>bold</b>")), json!("bold"));
        assert_eq!(apply("clean_upc", json!("0-12345-67890")), json!("01234567890"));
    }

    #[test]
    fn test_string_ops_pass_through_other_types() {
        assert_eq!(apply("uppercase", json!(42)), json!(42));
        assert_eq!(apply("strip", json!(null)), json!(null));
        assert_eq!(apply("replace_regex", json!(true)), json!(true));
        assert_eq!(apply("slugify", json!([1, 2])), json!([1, 2]));
    }

    #[test]
    fn test_strip_with_chars() {
        assert_eq!(
            apply_args("strip", json!("xxhixx"), json!({"chars": "x"})),
            json!("hi")
        );
    }

    #[test]
    fn test_split_and_join() {
        assert_eq!(
            apply_args("split", json!("a,b,c"), json!({"delimiter": ","})),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            apply_args("join", json!(["a", "b", "c"]), json!({"delimiter": ","})),
            json!("a,b,c")
        );
        // Joining a bare string first splits it on whitespace
        assert_eq!(
            apply_args("join", json!("a b  c"), json!({"delimiter": "-"})),
            json!("a-b-c")
        );
        // Numbers are rendered, not dropped
        assert_eq!(
            apply_args("join", json!([1, 2]), json!({"delimiter": "|"})),
            json!("1|2")
        );
    }

    #[test]
    fn test_split_comma_trims_elements() {
        assert_eq!(
            apply("split_comma", json!("a , b ,c")),
            json!(["a", "b", "c"])
        );
    }

    #[test]
    fn test_replace_and_replace_regex() {
        assert_eq!(
            apply_args("replace", json!("hello-world"), json!({"old": "-", "new": "_"})),
            json!("hello_world")
        );
        assert_eq!(
            apply_args(
                "replace_regex",
                json!("a1b2c3"),
                json!({"pattern": r"\d", "repl": ""})
            ),
            json!("abc")
        );
    }

    #[test]
    fn test_replace_regex_bad_pattern_fails() {
        let mut args = Map::new();
        args.insert("pattern".into(), json!("("));
        args.insert("repl".into(), json!(""));
        let result = apply_operation("replace_regex", json!("x"), &args, None);
        assert!(matches!(result, Err(OpError::Failed(_))));
    }

    #[test]
    fn test_prefix_suffix_broadcast_over_lists() {
        assert_eq!(
            apply_args("prefix", json!("sku"), json!({"prefix_str": "X-"})),
            json!("X-sku")
        );
        assert_eq!(
            apply_args("suffix", json!(["a", "b"]), json!({"suffix_str": "_"})),
            json!(["a_", "b_"])
        );
    }

    #[test]
    fn test_truncate_and_padding() {
        assert_eq!(
            apply_args("truncate", json!("abcdefgh"), json!({"max_length": 5})),
            json!("ab...")
        );
        assert_eq!(
            apply_args("pad_left", json!("7"), json!({"width": 3})),
            json!("007")
        );
        assert_eq!(
            apply_args("pad_right", json!("ab"), json!({"width": 4, "fill_char": "-"})),
            json!("ab--")
        );
        assert_eq!(apply("pad_left", json!(null)), json!(null));
    }

    #[test]
    fn test_case_conversions() {
        assert_eq!(apply("to_snake_case", json!("SomeFieldName")), json!("some_field_name"));
        assert_eq!(apply("to_camel_case", json!("some_field_name")), json!("someFieldName"));
        assert_eq!(apply("to_pascal_case", json!("some_field_name")), json!("SomeFieldName"));
        assert_eq!(apply("slugify", json!("Hello, World!")), json!("hello-world"));
    }

    #[test]
    fn test_extractors_and_counters() {
        assert_eq!(apply("extract_numbers", json!("a1b2")), json!("12"));
        assert_eq!(apply("extract_letters", json!("a1b2")), json!("ab"));
        assert_eq!(apply("word_count", json!("one two three")), json!(3));
        assert_eq!(apply("char_count", json!("abc")), json!(3));
        assert_eq!(apply("word_count", json!(5)), json!(0));
    }

    #[test]
    fn test_remove_accents() {
        assert_eq!(apply("remove_accents", json!("café naïve")), json!("cafe naive"));
    }

    #[test]
    fn test_clean_numeric_value() {
        assert_eq!(apply("clean_numeric_value", json!("$1,234.56")), json!(1234.56));
        // Unparseable after cleaning: original comes back
        assert_eq!(apply("clean_numeric_value", json!("n/a")), json!("n/a"));
        // Non-strings pass through
        assert_eq!(apply("clean_numeric_value", json!(12)), json!(12));
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(apply_args("addition", json!(10), json!({"amount": "5"})), json!(15.0));
        assert_eq!(apply_args("subtraction", json!(10), json!({"amount": 4})), json!(6.0));
        assert_eq!(apply_args("multiplication", json!(10), json!({"factor": "2"})), json!(20.0));
        assert_eq!(apply_args("division", json!(10), json!({"divisor": "4"})), json!(2.5));
        assert_eq!(apply_args("percentage", json!(0.5), json!({})), json!(50.0));
        // Strings holding numbers coerce
        assert_eq!(apply_args("addition", json!("10"), json!({"amount": "5"})), json!(15.0));
        // Bad coercion: original value returned
        assert_eq!(apply_args("addition", json!("ten"), json!({"amount": "5"})), json!("ten"));
        assert_eq!(apply_args("addition", json!(10), json!({"amount": "five"})), json!(10));
    }

    #[test]
    fn test_division_by_zero_is_null() {
        assert_eq!(apply_args("division", json!(10), json!({"divisor": "0"})), json!(null));
    }

    #[test]
    fn test_numeric_helpers() {
        assert_eq!(apply("adjust_negative_to_zero", json!(-3.5)), json!(0.0));
        assert_eq!(apply("absolute_value", json!(-4)), json!(4.0));
        assert_eq!(apply("ceiling", json!(1.2)), json!(2));
        assert_eq!(apply("floor", json!(1.8)), json!(1));
        assert_eq!(apply_args("round_decimal", json!(1.2345), json!({"decimals": 2})), json!(1.23));
        assert_eq!(apply_args("power", json!(3), json!({})), json!(9.0));
        assert_eq!(apply_args("modulo", json!(7), json!({"divisor": 3})), json!(1.0));
        assert_eq!(apply_args("clamp", json!(150), json!({})), json!(100.0));
        assert_eq!(apply_args("scale", json!(2), json!({"factor": 2.5})), json!(5.0));
        assert_eq!(apply("reciprocal", json!(4)), json!(0.25));
        assert_eq!(apply("reciprocal", json!(0)), json!(null));
        assert_eq!(apply("reciprocal", json!("x")), json!(null));
        // sqrt of a negative is not representable: pass through
        assert_eq!(apply("square_root", json!(-4)), json!(-4));
    }

    #[test]
    fn test_zero_padding() {
        assert_eq!(apply_args("zero_padding", json!(42), json!({"value": "5"})), json!("00042"));
        assert_eq!(apply_args("zero_padding", json!("-7"), json!({"value": 4})), json!("-007"));
        let mut args = Map::new();
        args.insert("value".into(), json!("bad"));
        assert!(matches!(
            apply_operation("zero_padding", json!(1), &args, None),
            Err(OpError::Failed(_))
        ));
    }

    #[test]
    fn test_date_operations() {
        assert_eq!(apply("date_only", json!("2024-03-15 10:30:00")), json!("2024-03-15"));
        assert_eq!(apply("date_only", json!("2024-03-15")), json!("2024-03-15"));
        assert_eq!(apply("year", json!("2024-03-15")), json!(2024));
        assert_eq!(apply("month", json!("2024-03-15")), json!(3));
        assert_eq!(apply("day", json!("2024-03-15")), json!(15));
        // 2024-03-15 was a Friday (Monday = 0)
        assert_eq!(apply("day_of_week", json!("2024-03-15")), json!(4));
        assert_eq!(apply("day_name", json!("2024-03-15")), json!("Friday"));
        assert_eq!(apply("month_name", json!("2024-03-15")), json!("March"));
        assert_eq!(apply("year", json!("not a date")), json!(null));
        assert_eq!(
            apply_args("format_date", json!("2024-03-15T10:30:00Z"), json!({"format_string": "%d/%m/%Y"})),
            json!("15/03/2024")
        );
        assert_eq!(
            apply_args("add_days", json!("2024-03-15"), json!({"days": 3})),
            json!("2024-03-18T00:00:00")
        );
        assert_eq!(
            apply_args("subtract_days", json!("2024-03-15"), json!({"days": 15})),
            json!("2024-02-29T00:00:00")
        );
    }

    #[test]
    fn test_list_operations() {
        assert_eq!(apply("list_length", json!(["a", "b"])), json!(2));
        assert_eq!(apply("list_length", json!("ab")), json!(0));
        assert_eq!(apply("list_first", json!([1, 2, 3])), json!(1));
        assert_eq!(apply("list_last", json!([1, 2, 3])), json!(3));
        assert_eq!(apply("list_first", json!([])), json!(null));
        assert_eq!(apply("list_unique", json!(["a", "b", "a"])), json!(["a", "b"]));
        assert_eq!(apply("list_sort", json!(["c", "a", "b"])), json!(["a", "b", "c"]));
        assert_eq!(
            apply_args("list_sort", json!([3, 1, 2]), json!({"reverse": true})),
            json!([3, 2, 1])
        );
        // Mixed list stays unchanged
        assert_eq!(apply("list_sort", json!([1, "a"])), json!([1, "a"]));
    }

    #[test]
    fn test_conditionals() {
        assert_eq!(apply_args("if_empty", json!(""), json!({"default": "x"})), json!("x"));
        assert_eq!(apply_args("if_empty", json!("v"), json!({"default": "x"})), json!("v"));
        assert_eq!(apply_args("if_null", json!(null), json!({"default": 0})), json!(0));
        assert_eq!(apply_args("if_null", json!(""), json!({"default": 0})), json!(""));
        assert_eq!(
            apply_args("coalesce", json!(null), json!({"values": [null, "fallback"]})),
            json!("fallback")
        );
        assert_eq!(
            apply_args("coalesce", json!("kept"), json!({"values": ["other"]})),
            json!("kept")
        );
    }

    #[test]
    fn test_control_operations() {
        assert_eq!(apply_args("set", json!("ignored"), json!({"value": "const"})), json!("const"));
        assert_eq!(apply_args("set_number", json!("ignored"), json!({"value": "7"})), json!(7));
        assert_eq!(apply("copy", json!("same")), json!("same"));
        assert!(matches!(
            apply_operation("rejects", json!("anything"), &Map::new(), None),
            Err(OpError::Reject)
        ));
    }

    #[test]
    fn test_unknown_operation() {
        assert!(matches!(
            apply_operation("frobnicate", json!(1), &Map::new(), None),
            Err(OpError::Unknown)
        ));
        assert!(is_registered("uppercase"));
        assert!(!is_registered("frobnicate"));
    }

    #[test]
    fn test_vlookup_map() {
        let args = json!({"mapping": {"ca": "Composer", "a": "Author"}});
        assert_eq!(apply_args("vlookup_map", json!("CA"), args.clone()), json!("Composer"));
        // Unmatched input returns unchanged
        assert_eq!(apply_args("vlookup_map", json!("ZZ"), args), json!("ZZ"));
    }

    #[test]
    fn test_context_aware_operations() {
        let mut ctx = Map::new();
        ctx.insert("tax".into(), json!(2.5));
        ctx.insert("shipping".into(), json!("1.5"));
        ctx.insert("brand".into(), json!("Acme"));
        ctx.insert("shipped_at".into(), json!("2024-03-10"));

        let mut args = Map::new();
        args.insert("fields".into(), json!(["tax", "shipping"]));
        let sum = apply_operation("addition_fields", json!(10), &args, Some(&ctx)).unwrap();
        assert_eq!(sum, json!(14.0));

        // No context: pass through
        let same = apply_operation("addition_fields", json!(10), &args, None).unwrap();
        assert_eq!(same, json!(10));

        let mut args = Map::new();
        args.insert("fields".into(), json!(["brand"]));
        args.insert("separator".into(), json!(" - "));
        let joined = apply_operation("concat", json!("Widget"), &args, Some(&ctx)).unwrap();
        assert_eq!(joined, json!("Widget - Acme"));

        let mut args = Map::new();
        args.insert("field".into(), json!("brand"));
        let copied = apply_operation("field_copy_from", json!(""), &args, Some(&ctx)).unwrap();
        assert_eq!(copied, json!("Acme"));

        let mut args = Map::new();
        args.insert("field".into(), json!("shipped_at"));
        let diff = apply_operation("date_diff_days", json!("2024-03-15"), &args, Some(&ctx)).unwrap();
        assert_eq!(diff, json!(5));
    }

    #[test]
    fn test_lookup_extension_points_pass_through() {
        assert_eq!(apply("lookup_category_path", json!("Home>Garden")), json!("Home>Garden"));
        assert_eq!(apply("lookup_uom_conversion", json!("12 oz")), json!("12 oz"));
    }
}
