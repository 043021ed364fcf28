//! Built-in transformers.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Number, Value};

use super::{TransformError, Transformer};
use crate::workflow::expression::format_value;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn param_str<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn required_str<'a>(
    transform: &str,
    params: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, TransformError> {
    param_str(params, key)
        .ok_or_else(|| TransformError::params(transform, format!("'{key}' is required")))
}

fn param_bool(params: &Map<String, Value>, key: &str) -> bool {
    match params.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

fn compile(transform: &str, pattern: &str) -> Result<Regex, TransformError> {
    Regex::new(pattern).map_err(|e| TransformError::params(transform, format!("bad pattern: {e}")))
}

/// Input as a list: arrays as-is, strings split into lines, anything else as
/// a single element.
fn as_items(input: &Value) -> Vec<Value> {
    match input {
        Value::Array(items) => items.clone(),
        Value::String(s) => s.lines().map(|l| Value::String(l.to_string())).collect(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// The value an item contributes: `field` of a map item, or the item itself.
fn pick<'a>(item: &'a Value, field: Option<&str>) -> Option<&'a Value> {
    match field {
        Some(f) => item.as_object().and_then(|m| m.get(f)),
        None => Some(item),
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// extract
// ---------------------------------------------------------------------------

/// Line extraction, optionally filtered by a regex.
///
/// Params: `pattern` (optional), `mode` = `lines` (default) | `count` |
/// `first` | `joined`, `separator` for `joined` (default newline).
pub struct ExtractTransformer;

impl Transformer for ExtractTransformer {
    fn name(&self) -> &'static str {
        "extract"
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), TransformError> {
        if let Some(pattern) = param_str(params, "pattern") {
            compile(self.name(), pattern)?;
        }
        match param_str(params, "mode").unwrap_or("lines") {
            "lines" | "count" | "first" | "joined" => Ok(()),
            other => Err(TransformError::params(self.name(), format!("unknown mode '{other}'"))),
        }
    }

    fn apply(&self, input: &Value, params: &Map<String, Value>) -> Result<Value, TransformError> {
        let pattern = param_str(params, "pattern")
            .map(|p| compile(self.name(), p))
            .transpose()?;
        let text = format_value(input);
        let lines: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| pattern.as_ref().is_none_or(|re| re.is_match(l)))
            .map(str::to_string)
            .collect();

        Ok(match param_str(params, "mode").unwrap_or("lines") {
            "count" => Value::from(lines.len()),
            "first" => lines.into_iter().next().map(Value::String).unwrap_or(Value::Null),
            "joined" => Value::String(lines.join(param_str(params, "separator").unwrap_or("\n"))),
            _ => Value::Array(lines.into_iter().map(Value::String).collect()),
        })
    }
}

// ---------------------------------------------------------------------------
// json_parse
// ---------------------------------------------------------------------------

/// Parse JSON text. Markdown code fences around the text are ignored;
/// already-structured input passes through.
pub struct JsonParseTransformer;

impl Transformer for JsonParseTransformer {
    fn name(&self) -> &'static str {
        "json_parse"
    }

    fn apply(&self, input: &Value, _params: &Map<String, Value>) -> Result<Value, TransformError> {
        let Value::String(text) = input else {
            return Ok(input.clone());
        };
        let body = strip_code_fence(text);
        serde_json::from_str(body).map_err(|e| TransformError::input(self.name(), e.to_string()))
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

// ---------------------------------------------------------------------------
// aggregate
// ---------------------------------------------------------------------------

/// `count | sum | average | min | max` over a list.
///
/// Params: `operation` (required), `field` (value field of map items),
/// `group_by` (produce `{group: result}`).
pub struct AggregateTransformer;

const AGGREGATE_OPS: [&str; 5] = ["count", "sum", "average", "min", "max"];

impl AggregateTransformer {
    fn aggregate(op: &str, items: &[&Value], field: Option<&str>) -> Value {
        if op == "count" {
            let n = match field {
                Some(_) => items
                    .iter()
                    .filter(|i| pick(i, field).is_some_and(|v| !v.is_null()))
                    .count(),
                None => items.len(),
            };
            return Value::from(n);
        }

        let nums: Vec<f64> = items
            .iter()
            .filter_map(|i| pick(i, field))
            .filter_map(as_f64)
            .collect();
        match op {
            "sum" => number(nums.iter().sum()),
            "average" if nums.is_empty() => Value::Null,
            "average" => number(nums.iter().sum::<f64>() / nums.len() as f64),
            "min" => nums.iter().copied().reduce(f64::min).map(number).unwrap_or(Value::Null),
            _ => nums.iter().copied().reduce(f64::max).map(number).unwrap_or(Value::Null),
        }
    }
}

impl Transformer for AggregateTransformer {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), TransformError> {
        let op = required_str(self.name(), params, "operation")?;
        if !AGGREGATE_OPS.contains(&op) {
            return Err(TransformError::params(
                self.name(),
                format!("unknown operation '{op}'"),
            ));
        }
        Ok(())
    }

    fn apply(&self, input: &Value, params: &Map<String, Value>) -> Result<Value, TransformError> {
        let op = required_str(self.name(), params, "operation")?;
        let field = param_str(params, "field");
        let items = as_items(input);

        match param_str(params, "group_by") {
            None => {
                let refs: Vec<&Value> = items.iter().collect();
                Ok(Self::aggregate(op, &refs, field))
            }
            Some(group_by) => {
                let mut groups: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
                for item in &items {
                    let key = pick(item, Some(group_by)).map(format_value).unwrap_or_default();
                    groups.entry(key).or_default().push(item);
                }
                Ok(Value::Object(
                    groups
                        .into_iter()
                        .map(|(k, vs)| (k, Self::aggregate(op, &vs, field)))
                        .collect(),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// filter
// ---------------------------------------------------------------------------

/// Keep list items matching `condition`: `contains:<s>`, `equals:<s>` or
/// `not_empty`, tested against `field` when given.
pub struct FilterTransformer;

enum FilterCondition<'a> {
    Contains(&'a str),
    Equals(&'a str),
    NotEmpty,
}

fn parse_filter(condition: &str) -> Option<FilterCondition<'_>> {
    if let Some(s) = condition.strip_prefix("contains:") {
        Some(FilterCondition::Contains(s))
    } else if let Some(s) = condition.strip_prefix("equals:") {
        Some(FilterCondition::Equals(s))
    } else if condition == "not_empty" {
        Some(FilterCondition::NotEmpty)
    } else {
        None
    }
}

impl Transformer for FilterTransformer {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), TransformError> {
        let condition = required_str(self.name(), params, "condition")?;
        parse_filter(condition).map(|_| ()).ok_or_else(|| {
            TransformError::params(self.name(), format!("unknown condition '{condition}'"))
        })
    }

    fn apply(&self, input: &Value, params: &Map<String, Value>) -> Result<Value, TransformError> {
        let condition = required_str(self.name(), params, "condition")?;
        let condition = parse_filter(condition).ok_or_else(|| {
            TransformError::params(self.name(), format!("unknown condition '{condition}'"))
        })?;
        let field = param_str(params, "field");

        let kept = as_items(input)
            .into_iter()
            .filter(|item| {
                let text = pick(item, field).map(format_value).unwrap_or_default();
                match condition {
                    FilterCondition::Contains(s) => text.contains(s),
                    FilterCondition::Equals(s) => text == s,
                    FilterCondition::NotEmpty => !text.trim().is_empty(),
                }
            })
            .collect();
        Ok(Value::Array(kept))
    }
}

// ---------------------------------------------------------------------------
// format
// ---------------------------------------------------------------------------

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern compiles")
});

/// Fill `template` with `{value}` (the whole item) and `{field}` placeholders.
/// Lists are formatted item by item.
pub struct FormatTransformer;

impl FormatTransformer {
    fn fill(template: &str, item: &Value) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &regex::Captures<'_>| {
                let key = &caps[1];
                match item.as_object().and_then(|m| m.get(key)) {
                    Some(v) => format_value(v),
                    None if key == "value" => format_value(item),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

impl Transformer for FormatTransformer {
    fn name(&self) -> &'static str {
        "format"
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), TransformError> {
        required_str(self.name(), params, "template").map(|_| ())
    }

    fn apply(&self, input: &Value, params: &Map<String, Value>) -> Result<Value, TransformError> {
        let template = required_str(self.name(), params, "template")?;
        Ok(match input {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|i| Value::String(Self::fill(template, i)))
                    .collect(),
            ),
            other => Value::String(Self::fill(template, other)),
        })
    }
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

/// Shallow-merge a map, or a list of maps, plus the optional `with` map.
/// Later keys win.
pub struct MergeTransformer;

impl Transformer for MergeTransformer {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), TransformError> {
        match params.get("with") {
            None | Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(TransformError::params(self.name(), "'with' must be a map")),
        }
    }

    fn apply(&self, input: &Value, params: &Map<String, Value>) -> Result<Value, TransformError> {
        let mut merged = Map::new();
        let sources: Vec<&Value> = match input {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        for source in sources.into_iter().chain(params.get("with")) {
            match source {
                Value::Object(map) => {
                    merged.extend(map.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                Value::Null => {}
                other => {
                    return Err(TransformError::input(
                        self.name(),
                        format!("expected maps, got '{}'", format_value(other)),
                    ));
                }
            }
        }
        Ok(Value::Object(merged))
    }
}

// ---------------------------------------------------------------------------
// dedupe
// ---------------------------------------------------------------------------

/// Drop repeated items, keeping the first. Keyed by `field` when given.
pub struct DedupeTransformer;

impl Transformer for DedupeTransformer {
    fn name(&self) -> &'static str {
        "dedupe"
    }

    fn apply(&self, input: &Value, params: &Map<String, Value>) -> Result<Value, TransformError> {
        let field = param_str(params, "field");
        let mut seen = HashSet::new();
        let kept = as_items(input)
            .into_iter()
            .filter(|item| {
                let key = match pick(item, field) {
                    Some(v) => v.to_string(),
                    None => String::new(),
                };
                seen.insert(key)
            })
            .collect();
        Ok(Value::Array(kept))
    }
}

// ---------------------------------------------------------------------------
// sort
// ---------------------------------------------------------------------------

/// Stable sort; numeric when both sides are numbers. `order` = `asc` | `desc`.
pub struct SortTransformer;

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (a, b) = (a.unwrap_or(&Value::Null), b.unwrap_or(&Value::Null));
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => format_value(a).cmp(&format_value(b)),
    }
}

impl Transformer for SortTransformer {
    fn name(&self) -> &'static str {
        "sort"
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), TransformError> {
        match param_str(params, "order").unwrap_or("asc") {
            "asc" | "desc" => Ok(()),
            other => Err(TransformError::params(self.name(), format!("unknown order '{other}'"))),
        }
    }

    fn apply(&self, input: &Value, params: &Map<String, Value>) -> Result<Value, TransformError> {
        let field = param_str(params, "field");
        let descending = param_str(params, "order") == Some("desc");
        let mut items = as_items(input);
        items.sort_by(|a, b| {
            let ord = compare_values(pick(a, field), pick(b, field));
            if descending { ord.reverse() } else { ord }
        });
        Ok(Value::Array(items))
    }
}

// ---------------------------------------------------------------------------
// regex_extract
// ---------------------------------------------------------------------------

/// Regex capture extraction.
///
/// Params: `pattern` (required), `group` (index or name; defaults to 1 when
/// the pattern has groups, else the whole match), `all` (every match as a list).
pub struct RegexExtractTransformer;

impl Transformer for RegexExtractTransformer {
    fn name(&self) -> &'static str {
        "regex_extract"
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), TransformError> {
        let re = compile(self.name(), required_str(self.name(), params, "pattern")?)?;
        if let Some(Value::String(name)) = params.get("group") {
            if name.parse::<usize>().is_err() && !re.capture_names().flatten().any(|n| n == name.as_str()) {
                return Err(TransformError::params(
                    self.name(),
                    format!("no capture group named '{name}'"),
                ));
            }
        }
        Ok(())
    }

    fn apply(&self, input: &Value, params: &Map<String, Value>) -> Result<Value, TransformError> {
        let re = compile(self.name(), required_str(self.name(), params, "pattern")?)?;
        let text = format_value(input);
        let default_group = usize::from(re.captures_len() > 1);

        let group = |caps: &regex::Captures<'_>| -> Option<String> {
            let m = match params.get("group") {
                Some(Value::Number(n)) => caps.get(n.as_u64().unwrap_or(0) as usize),
                Some(Value::String(s)) => match s.parse::<usize>() {
                    Ok(idx) => caps.get(idx),
                    Err(_) => caps.name(s),
                },
                _ => caps.get(default_group),
            };
            m.map(|m| m.as_str().to_string())
        };

        if param_bool(params, "all") {
            Ok(Value::Array(
                re.captures_iter(&text)
                    .filter_map(|c| group(&c))
                    .map(Value::String)
                    .collect(),
            ))
        } else {
            Ok(re
                .captures(&text)
                .and_then(|c| group(&c))
                .map(Value::String)
                .unwrap_or(Value::Null))
        }
    }
}

// ---------------------------------------------------------------------------
// string
// ---------------------------------------------------------------------------

/// String operations: `trim | upper | lower | replace | split | length`.
///
/// `replace` takes `from`/`to`; `split` takes `separator` (default ",").
pub struct StringTransformer;

const STRING_OPS: [&str; 6] = ["trim", "upper", "lower", "replace", "split", "length"];

impl Transformer for StringTransformer {
    fn name(&self) -> &'static str {
        "string"
    }

    fn validate_params(&self, params: &Map<String, Value>) -> Result<(), TransformError> {
        let op = required_str(self.name(), params, "operation")?;
        if !STRING_OPS.contains(&op) {
            return Err(TransformError::params(self.name(), format!("unknown operation '{op}'")));
        }
        if op == "replace" {
            required_str(self.name(), params, "from")?;
        }
        Ok(())
    }

    fn apply(&self, input: &Value, params: &Map<String, Value>) -> Result<Value, TransformError> {
        let text = format_value(input);
        Ok(match required_str(self.name(), params, "operation")? {
            "trim" => Value::String(text.trim().to_string()),
            "upper" => Value::String(text.to_uppercase()),
            "lower" => Value::String(text.to_lowercase()),
            "replace" => {
                let from = required_str(self.name(), params, "from")?;
                let to = param_str(params, "to").unwrap_or("");
                Value::String(text.replace(from, to))
            }
            "split" => {
                let sep = param_str(params, "separator").unwrap_or(",");
                Value::Array(
                    text.split(sep)
                        .map(|p| Value::String(p.trim().to_string()))
                        .collect(),
                )
            }
            "length" => Value::from(text.chars().count()),
            other => {
                return Err(TransformError::params(
                    self.name(),
                    format!("unknown operation '{other}'"),
                ));
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn extract_modes() {
        let t = ExtractTransformer;
        let input = json!("ERROR disk full\n\ninfo ok\nERROR net down\n");
        assert_eq!(
            t.apply(&input, &params(json!({ "pattern": "^ERROR" }))).unwrap(),
            json!(["ERROR disk full", "ERROR net down"])
        );
        assert_eq!(
            t.apply(&input, &params(json!({ "pattern": "^ERROR", "mode": "count" }))).unwrap(),
            json!(2)
        );
        assert_eq!(
            t.apply(&input, &params(json!({ "mode": "first" }))).unwrap(),
            json!("ERROR disk full")
        );
        assert_eq!(
            t.apply(&input, &params(json!({ "pattern": "ok|net", "mode": "joined", "separator": "; " })))
                .unwrap(),
            json!("info ok; ERROR net down")
        );
        assert!(t.validate_params(&params(json!({ "pattern": "(" }))).is_err());
        assert!(t.validate_params(&params(json!({ "mode": "weird" }))).is_err());
    }

    #[test]
    fn json_parse_handles_fences_and_errors() {
        let t = JsonParseTransformer;
        let fenced = json!("```json\n{\"a\": [1, 2]}\n```");
        assert_eq!(t.apply(&fenced, &Map::new()).unwrap(), json!({ "a": [1, 2] }));
        assert_eq!(t.apply(&json!({ "k": 1 }), &Map::new()).unwrap(), json!({ "k": 1 }));
        assert!(matches!(
            t.apply(&json!("not json"), &Map::new()),
            Err(TransformError::InvalidInput { .. })
        ));
    }

    #[test]
    fn aggregate_operations() {
        let t = AggregateTransformer;
        let rows = json!([
            { "team": "a", "score": 3 },
            { "team": "b", "score": "4.5" },
            { "team": "a", "score": 5 },
            { "team": "b" }
        ]);
        let run = |p: Value| t.apply(&rows, &params(p)).unwrap();
        assert_eq!(run(json!({ "operation": "count" })), json!(4));
        assert_eq!(run(json!({ "operation": "count", "field": "score" })), json!(3));
        assert_eq!(run(json!({ "operation": "sum", "field": "score" })), json!(12.5));
        assert_eq!(run(json!({ "operation": "min", "field": "score" })), json!(3));
        assert_eq!(run(json!({ "operation": "max", "field": "score" })), json!(5));
        assert_eq!(
            run(json!({ "operation": "sum", "field": "score", "group_by": "team" })),
            json!({ "a": 8, "b": 4.5 })
        );
        assert_eq!(
            t.apply(&json!([]), &params(json!({ "operation": "average" }))).unwrap(),
            Value::Null
        );
        assert!(t.validate_params(&params(json!({ "operation": "median" }))).is_err());
        assert!(t.validate_params(&Map::new()).is_err());
    }

    #[test]
    fn filter_conditions() {
        let t = FilterTransformer;
        let items = json!([{ "name": "alpha" }, { "name": "beta" }, { "name": "" }]);
        assert_eq!(
            t.apply(&items, &params(json!({ "condition": "contains:al", "field": "name" }))).unwrap(),
            json!([{ "name": "alpha" }])
        );
        assert_eq!(
            t.apply(&items, &params(json!({ "condition": "not_empty", "field": "name" })))
                .unwrap()
                .as_array()
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            t.apply(&json!("x\ny\nx"), &params(json!({ "condition": "equals:x" }))).unwrap(),
            json!(["x", "x"])
        );
        assert!(t.validate_params(&params(json!({ "condition": "regex:.*" }))).is_err());
    }

    #[test]
    fn format_fills_placeholders() {
        let t = FormatTransformer;
        let p = params(json!({ "template": "{name} ({role}) {missing}" }));
        assert_eq!(
            t.apply(&json!({ "name": "ada", "role": "admin" }), &p).unwrap(),
            json!("ada (admin) {missing}")
        );
        let list = t
            .apply(&json!([1, 2]), &params(json!({ "template": "- {value}" })))
            .unwrap();
        assert_eq!(list, json!(["- 1", "- 2"]));
    }

    #[test]
    fn merge_maps() {
        let t = MergeTransformer;
        let merged = t
            .apply(
                &json!([{ "a": 1, "b": 1 }, { "b": 2 }]),
                &params(json!({ "with": { "c": 3 } })),
            )
            .unwrap();
        assert_eq!(merged, json!({ "a": 1, "b": 2, "c": 3 }));
        assert!(t.apply(&json!("text"), &Map::new()).is_err());
        assert!(t.validate_params(&params(json!({ "with": 5 }))).is_err());
    }

    #[test]
    fn dedupe_keeps_first() {
        let t = DedupeTransformer;
        assert_eq!(
            t.apply(&json!([1, 2, 1, 3, 2]), &Map::new()).unwrap(),
            json!([1, 2, 3])
        );
        let rows = json!([{ "id": 1, "v": "a" }, { "id": 1, "v": "b" }, { "id": 2, "v": "c" }]);
        assert_eq!(
            t.apply(&rows, &params(json!({ "field": "id" }))).unwrap(),
            json!([{ "id": 1, "v": "a" }, { "id": 2, "v": "c" }])
        );
    }

    #[test]
    fn sort_is_numeric_aware_and_stable() {
        let t = SortTransformer;
        assert_eq!(
            t.apply(&json!([10, 9, "100", 1]), &Map::new()).unwrap(),
            json!([1, 9, 10, "100"])
        );
        let rows = json!([
            { "k": 2, "tag": "first" },
            { "k": 1, "tag": "x" },
            { "k": 2, "tag": "second" }
        ]);
        assert_eq!(
            t.apply(&rows, &params(json!({ "field": "k", "order": "desc" }))).unwrap(),
            json!([
                { "k": 2, "tag": "first" },
                { "k": 2, "tag": "second" },
                { "k": 1, "tag": "x" }
            ])
        );
        assert!(t.validate_params(&params(json!({ "order": "sideways" }))).is_err());
    }

    #[test]
    fn regex_extract_groups() {
        let t = RegexExtractTransformer;
        let text = json!("v1.2.3 and v4.5.6");
        assert_eq!(
            t.apply(&text, &params(json!({ "pattern": r"v(\d+)\.(\d+)" }))).unwrap(),
            json!("1")
        );
        assert_eq!(
            t.apply(&text, &params(json!({ "pattern": r"v(\d+)\.(\d+)", "group": 2, "all": true })))
                .unwrap(),
            json!(["2", "5"])
        );
        assert_eq!(
            t.apply(&text, &params(json!({ "pattern": r"v(?P<major>\d+)", "group": "major", "all": true })))
                .unwrap(),
            json!(["1", "4"])
        );
        assert_eq!(
            t.apply(&text, &params(json!({ "pattern": r"v\d+" }))).unwrap(),
            json!("v1")
        );
        assert_eq!(
            t.apply(&text, &params(json!({ "pattern": "zzz" }))).unwrap(),
            Value::Null
        );
        assert!(t
            .validate_params(&params(json!({ "pattern": "(a)", "group": "nope" })))
            .is_err());
    }

    #[test]
    fn string_operations() {
        let t = StringTransformer;
        let run = |input: Value, p: Value| t.apply(&input, &params(p)).unwrap();
        assert_eq!(run(json!("  hi "), json!({ "operation": "trim" })), json!("hi"));
        assert_eq!(run(json!("hi"), json!({ "operation": "upper" })), json!("HI"));
        assert_eq!(run(json!("HI"), json!({ "operation": "lower" })), json!("hi"));
        assert_eq!(
            run(json!("a-b"), json!({ "operation": "replace", "from": "-", "to": "+" })),
            json!("a+b")
        );
        assert_eq!(
            run(json!("a, b"), json!({ "operation": "split" })),
            json!(["a", "b"])
        );
        assert_eq!(run(json!("héllo"), json!({ "operation": "length" })), json!(5));
        assert!(t.validate_params(&params(json!({ "operation": "reverse" }))).is_err());
        assert!(t.validate_params(&params(json!({ "operation": "replace" }))).is_err());
    }
}
