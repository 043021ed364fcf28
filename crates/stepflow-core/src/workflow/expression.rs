//! Template rendering and expression resolution.
//!
//! Templates embed `{expr}` spans. An expression is one of:
//!
//! - a function call: `len(items)`, `join(names, ", ")`
//! - a simple reference: `name` -- a successful step's output (a `response`
//!   key is unwrapped from map outputs) or a data key
//! - a path: `fetch.items[0].title`, `users[*].name`, `rows[1:3]`,
//!   `headers['content-type']`, `fetch.error`
//!
//! Unresolvable spans are left verbatim, so rendering never fails.

use serde_json::Value;
use stepflow_types::result::StepResult;

use super::context::ExecutionContext;
use super::functions::FunctionRegistry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,

    #[error("cannot resolve '{0}'")]
    Unresolved(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{function}' expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },

    #[error("function '{function}' failed: {reason}")]
    Function { function: String, reason: String },
}

// ---------------------------------------------------------------------------
// Path grammar
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Accessor {
    Field(String),
    Key(String),
    Index(i64),
    Slice(Option<i64>, Option<i64>),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
struct Path {
    base: String,
    accessors: Vec<Accessor>,
}

fn parse_path(expr: &str) -> Result<Path, ExpressionError> {
    let invalid = |reason: &str| ExpressionError::InvalidPath {
        path: expr.to_string(),
        reason: reason.to_string(),
    };

    let base_end = expr.find(['.', '[']).unwrap_or(expr.len());
    let base = expr[..base_end].trim();
    if base.is_empty() {
        return Err(invalid("missing base name"));
    }

    let mut accessors = Vec::new();
    let mut rest = &expr[base_end..];
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('.') {
            let end = after.find(['.', '[']).unwrap_or(after.len());
            let field = after[..end].trim();
            if field.is_empty() {
                return Err(invalid("empty field name"));
            }
            accessors.push(Accessor::Field(field.to_string()));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let end = after.find(']').ok_or_else(|| invalid("unclosed '['"))?;
            accessors.push(parse_bracket(after[..end].trim()).ok_or_else(|| invalid("bad index"))?);
            rest = &after[end + 1..];
        } else {
            return Err(invalid("unexpected character"));
        }
    }

    Ok(Path {
        base: base.to_string(),
        accessors,
    })
}

fn parse_bracket(inner: &str) -> Option<Accessor> {
    if inner == "*" {
        return Some(Accessor::Wildcard);
    }
    if let Some(quoted) = unquote(inner) {
        return Some(Accessor::Key(quoted.to_string()));
    }
    if let Some((start, end)) = inner.split_once(':') {
        let bound = |s: &str| -> Option<Option<i64>> {
            let s = s.trim();
            if s.is_empty() {
                Some(None)
            } else {
                s.parse().ok().map(Some)
            }
        };
        return Some(Accessor::Slice(bound(start)?, bound(end)?));
    }
    if let Ok(idx) = inner.parse::<i64>() {
        return Some(Accessor::Index(idx));
    }
    if inner.is_empty() {
        return None;
    }
    Some(Accessor::Key(inner.to_string()))
}

fn unquote(s: &str) -> Option<&str> {
    let bytes = s.as_bytes();
    if bytes.len() >= 2
        && (bytes[0] == b'\'' || bytes[0] == b'"')
        && bytes[bytes.len() - 1] == bytes[0]
    {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Split `name(args)` into name and raw argument text.
fn parse_function_call(expr: &str) -> Option<(&str, &str)> {
    let open = expr.find('(')?;
    let name = expr[..open].trim();
    let mut chars = name.chars();
    let head = chars.next()?;
    if !(head.is_ascii_alphabetic() || head == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    let inner = expr[open + 1..].strip_suffix(')')?;
    // The opening paren must close at the very end.
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for c in inner.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some((name, inner))
}

/// Split function arguments on top-level commas.
fn split_args(inner: &str) -> Vec<&str> {
    if inner.trim().is_empty() {
        return Vec::new();
    }
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth -= 1,
            (None, ',') if depth == 0 => {
                args.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(inner[start..].trim());
    args
}

/// Literal fallback for arguments that do not resolve.
fn parse_literal(arg: &str) -> Value {
    if let Some(s) = unquote(arg) {
        return Value::String(s.to_string());
    }
    match arg {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = arg.parse::<i64>() {
        return Value::from(i);
    }
    if let Some(n) = arg
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        return Value::Number(n);
    }
    Value::String(arg.to_string())
}

/// Byte offset of the `}` closing a span opened just before `text`.
fn find_closing(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '{') => depth += 1,
            (None, '}') if depth == 0 => return Some(i),
            (None, '}') => depth -= 1,
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Render a value as template text. Null renders empty.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(format_value)
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{k}={}", format_value(v)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Map outputs carrying a `response` key stand for that response.
pub fn unwrap_response(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("response") => {
            map.remove("response").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// A named field of a step result (`output`, `success`, `error`, ...).
pub fn step_field(result: &StepResult, field: &str) -> Option<Value> {
    match field.to_ascii_lowercase().as_str() {
        "output" => Some(result.output.clone()),
        "success" => Some(Value::Bool(result.success)),
        "error" => Some(result.error.clone().map(Value::String).unwrap_or(Value::Null)),
        "metadata" => Some(Value::Object(result.metadata.clone())),
        "execution_time_ms" | "execution_time" => {
            Some(Value::from(result.execution_time.as_millis() as u64))
        }
        _ => None,
    }
}

fn lookup_key<'a>(map: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn normalize_index(idx: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if idx < 0 { len + idx } else { idx };
    (0..len).contains(&idx).then_some(idx as usize)
}

fn slice_bounds(start: Option<i64>, end: Option<i64>, len: usize) -> (usize, usize) {
    let clamp = |v: i64| -> usize {
        let len = len as i64;
        let v = if v < 0 { len + v } else { v };
        v.clamp(0, len) as usize
    };
    let s = start.map(clamp).unwrap_or(0);
    let e = end.map(clamp).unwrap_or(len);
    (s, e.max(s))
}

fn access(value: &Value, accessor: &Accessor) -> Option<Value> {
    match (accessor, value) {
        (Accessor::Field(name) | Accessor::Key(name), Value::Object(map)) => {
            lookup_key(map, name).cloned()
        }
        (Accessor::Field(name), Value::Array(items)) => {
            let idx = name.parse::<i64>().ok()?;
            normalize_index(idx, items.len()).map(|i| items[i].clone())
        }
        (Accessor::Index(idx), Value::Array(items)) => {
            normalize_index(*idx, items.len()).map(|i| items[i].clone())
        }
        (Accessor::Index(idx), Value::Object(map)) => lookup_key(map, &idx.to_string()).cloned(),
        (Accessor::Index(idx), Value::String(s)) => {
            let chars: Vec<char> = s.chars().collect();
            normalize_index(*idx, chars.len()).map(|i| Value::String(chars[i].to_string()))
        }
        (Accessor::Slice(start, end), Value::Array(items)) => {
            let (s, e) = slice_bounds(*start, *end, items.len());
            Some(Value::Array(items[s..e].to_vec()))
        }
        (Accessor::Slice(start, end), Value::String(text)) => {
            let chars: Vec<char> = text.chars().collect();
            let (s, e) = slice_bounds(*start, *end, chars.len());
            Some(Value::String(chars[s..e].iter().collect()))
        }
        _ => None,
    }
}

fn expand(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => Some(map.into_iter().map(|(_, v)| v).collect()),
        _ => None,
    }
}

enum Cursor {
    One(Value),
    Many(Vec<Value>),
}

// ---------------------------------------------------------------------------
// ExpressionResolver
// ---------------------------------------------------------------------------

/// Resolves expressions and renders templates against an execution context.
#[derive(Debug, Clone)]
pub struct ExpressionResolver {
    functions: FunctionRegistry,
}

impl Default for ExpressionResolver {
    fn default() -> Self {
        Self::new(FunctionRegistry::builtin())
    }
}

impl ExpressionResolver {
    pub fn new(functions: FunctionRegistry) -> Self {
        Self { functions }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Replace every resolvable `{expr}` span in `template`.
    pub fn render(&self, template: &str, ctx: &ExecutionContext) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = find_closing(after) else {
                out.push_str(&rest[open..]);
                return out;
            };
            let expr = &after[..close];
            match self.resolve(expr, ctx) {
                Ok(value) => out.push_str(&format_value(&value)),
                Err(e) => {
                    tracing::debug!(expr, error = %e, "leaving template span verbatim");
                    out.push('{');
                    out.push_str(expr);
                    out.push('}');
                }
            }
            rest = &after[close + 1..];
        }

        out.push_str(rest);
        out
    }

    /// Recursively render every string inside a JSON value.
    pub fn render_value(&self, value: &Value, ctx: &ExecutionContext) -> Value {
        match value {
            Value::String(s) => Value::String(self.render(s, ctx)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.render_value(v, ctx)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render_value(v, ctx)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve a single expression (without surrounding braces).
    pub fn resolve(&self, expr: &str, ctx: &ExecutionContext) -> Result<Value, ExpressionError> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(ExpressionError::Empty);
        }

        if let Some((name, inner)) = parse_function_call(expr) {
            return self.call_function(name, inner, ctx);
        }

        let path = parse_path(expr)?;
        if path.accessors.is_empty() {
            return self.resolve_reference(&path.base, ctx);
        }
        self.resolve_path(&path, ctx)
            .ok_or_else(|| ExpressionError::Unresolved(expr.to_string()))
    }

    fn call_function(
        &self,
        name: &str,
        inner: &str,
        ctx: &ExecutionContext,
    ) -> Result<Value, ExpressionError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| ExpressionError::UnknownFunction(name.to_string()))?;
        let args: Vec<Value> = split_args(inner)
            .into_iter()
            .map(|arg| {
                self.resolve(arg, ctx)
                    .unwrap_or_else(|_| parse_literal(arg))
            })
            .collect();
        function(&args)
    }

    fn resolve_reference(&self, name: &str, ctx: &ExecutionContext) -> Result<Value, ExpressionError> {
        if let Some(output) = ctx.step_output(name) {
            return Ok(unwrap_response(output));
        }
        ctx.get_data(name)
            .ok_or_else(|| ExpressionError::Unresolved(name.to_string()))
    }

    fn resolve_path(&self, path: &Path, ctx: &ExecutionContext) -> Option<Value> {
        let (base, accessors) = Self::resolve_base(&path.base, &path.accessors, ctx)?;

        let mut cursor = Cursor::One(base);
        for accessor in accessors {
            cursor = match (cursor, accessor) {
                (Cursor::One(v), Accessor::Wildcard) => Cursor::Many(expand(v)?),
                (Cursor::One(v), acc) => Cursor::One(access(&v, acc)?),
                (Cursor::Many(vs), Accessor::Wildcard) => Cursor::Many(
                    vs.into_iter()
                        .filter_map(expand)
                        .flatten()
                        .collect(),
                ),
                (Cursor::Many(vs), acc) => {
                    Cursor::Many(vs.iter().filter_map(|v| access(v, acc)).collect())
                }
            };
        }

        Some(match cursor {
            Cursor::One(v) => v,
            Cursor::Many(vs) => Value::Array(vs),
        })
    }

    /// Resolve a path base to a starting value, consuming a leading
    /// step-result field accessor when it applies.
    fn resolve_base<'a>(
        base: &str,
        accessors: &'a [Accessor],
        ctx: &ExecutionContext,
    ) -> Option<(Value, &'a [Accessor])> {
        if let Some(result) = ctx.step_result(base) {
            if let Some(Accessor::Field(field)) = accessors.first() {
                let shadowed = result
                    .output
                    .as_object()
                    .is_some_and(|m| lookup_key(m, field).is_some());
                if !shadowed || !result.success {
                    if let Some(value) = step_field(&result, field) {
                        return Some((value, &accessors[1..]));
                    }
                }
            }
            if result.success {
                return Some((result.output, accessors));
            }
        }
        ctx.get_data(base).map(|v| (v, accessors))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
