//! Built-in expression functions.
//!
//! Functions receive already-resolved arguments and return a value. The
//! registry is explicit: [`FunctionRegistry::builtin`] returns the standard
//! set and callers add their own with [`FunctionRegistry::with_function`].

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Number, Value};

use super::expression::{ExpressionError, format_value};

/// A callable expression function.
pub type ExpressionFn = Arc<dyn Fn(&[Value]) -> Result<Value, ExpressionError> + Send + Sync>;

/// Named expression functions.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, ExpressionFn>,
}

impl FunctionRegistry {
    /// A registry with no functions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard function set.
    pub fn builtin() -> Self {
        Self::empty()
            .with_function("len", len)
            .with_function("join", join)
            .with_function("filter", filter)
            .with_function("map", map)
            .with_function("first", first)
            .with_function("last", last)
            .with_function("contains", contains)
            .with_function("split", split)
            .with_function("add", |args| arithmetic("add", args))
            .with_function("subtract", |args| arithmetic("subtract", args))
            .with_function("multiply", |args| arithmetic("multiply", args))
            .with_function("divide", |args| arithmetic("divide", args))
            .with_function("timestamp", timestamp)
    }

    /// Add (or replace) a function.
    pub fn with_function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ExpressionError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn get(&self, name: &str) -> Option<&ExpressionFn> {
        self.functions.get(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn arity(function: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExpressionError> {
    if args.len() < min || args.len() > max {
        return Err(ExpressionError::Arity {
            function: function.to_string(),
            expected: if min == max {
                min.to_string()
            } else {
                format!("{min}..={max}")
            },
            got: args.len(),
        });
    }
    Ok(())
}

fn arg_str(args: &[Value], idx: usize, default: &str) -> String {
    args.get(idx)
        .map(format_value)
        .unwrap_or_else(|| default.to_string())
}

/// Numeric operand: integers stay integers.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn to_num(function: &str, value: &Value) -> Result<Num, ExpressionError> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .map(Num::Int)
            .or_else(|| n.as_f64().map(Num::Float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .map(Num::Int)
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(Num::Float))
        }
        Value::Bool(b) => Some(Num::Int(i64::from(*b))),
        _ => None,
    };
    parsed.ok_or_else(|| ExpressionError::Function {
        function: function.to_string(),
        reason: format!("'{}' is not a number", format_value(value)),
    })
}

fn float_value(function: &str, f: f64) -> Result<Value, ExpressionError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::Function {
            function: function.to_string(),
            reason: "result is not a finite number".to_string(),
        })
}

// ---------------------------------------------------------------------------
// Built-ins
// ---------------------------------------------------------------------------

fn len(args: &[Value]) -> Result<Value, ExpressionError> {
    arity("len", args, 1, 1)?;
    let n = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(m) => m.len(),
        Value::Null => 0,
        other => format_value(other).chars().count(),
    };
    Ok(Value::from(n))
}

fn join(args: &[Value]) -> Result<Value, ExpressionError> {
    arity("join", args, 1, 2)?;
    let sep = arg_str(args, 1, ",");
    Ok(match &args[0] {
        Value::Array(items) => Value::String(
            items
                .iter()
                .map(format_value)
                .collect::<Vec<_>>()
                .join(&sep),
        ),
        other => Value::String(format_value(other)),
    })
}

fn filter(args: &[Value]) -> Result<Value, ExpressionError> {
    arity("filter", args, 1, 2)?;
    let needle = args.get(1).map(format_value);
    let keep = |item: &Value| {
        let text = format_value(item);
        match &needle {
            Some(n) => text.contains(n.as_str()),
            None => !text.trim().is_empty(),
        }
    };
    Ok(match &args[0] {
        Value::Array(items) => Value::Array(items.iter().filter(|i| keep(i)).cloned().collect()),
        Value::String(s) => Value::Array(
            s.lines()
                .map(|l| Value::String(l.to_string()))
                .filter(|l| keep(l))
                .collect(),
        ),
        other => other.clone(),
    })
}

/// Identity; mapping logic belongs in transforms.
fn map(args: &[Value]) -> Result<Value, ExpressionError> {
    arity("map", args, 1, usize::MAX)?;
    Ok(args[0].clone())
}

fn first(args: &[Value]) -> Result<Value, ExpressionError> {
    arity("first", args, 1, 1)?;
    Ok(match &args[0] {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        Value::String(s) => s
            .chars()
            .next()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        other => other.clone(),
    })
}

fn last(args: &[Value]) -> Result<Value, ExpressionError> {
    arity("last", args, 1, 1)?;
    Ok(match &args[0] {
        Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
        Value::String(s) => s
            .chars()
            .last()
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        other => other.clone(),
    })
}

fn contains(args: &[Value]) -> Result<Value, ExpressionError> {
    arity("contains", args, 2, 2)?;
    let needle = &args[1];
    let found = match &args[0] {
        Value::Array(items) => items
            .iter()
            .any(|i| i == needle || format_value(i) == format_value(needle)),
        Value::Object(m) => m.contains_key(&format_value(needle)),
        other => format_value(other).contains(&format_value(needle)),
    };
    Ok(Value::Bool(found))
}

fn split(args: &[Value]) -> Result<Value, ExpressionError> {
    arity("split", args, 1, 2)?;
    let text = format_value(&args[0]);
    let sep = arg_str(args, 1, ",");
    if text.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let parts: Vec<Value> = if sep.is_empty() {
        text.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        text.split(sep.as_str())
            .map(|p| Value::String(p.to_string()))
            .collect()
    };
    Ok(Value::Array(parts))
}

fn arithmetic(op: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    arity(op, args, 2, 2)?;
    let a = to_num(op, &args[0])?;
    let b = to_num(op, &args[1])?;

    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        let exact = match op {
            "add" => x.checked_add(y),
            "subtract" => x.checked_sub(y),
            "multiply" => x.checked_mul(y),
            _ => {
                if y == 0 {
                    return Err(ExpressionError::Function {
                        function: op.to_string(),
                        reason: "division by zero".to_string(),
                    });
                }
                // i64::MIN / -1 overflows; the float path handles it.
                x.checked_rem(y)
                    .filter(|r| *r == 0)
                    .and_then(|_| x.checked_div(y))
            }
        };
        if let Some(v) = exact {
            return Ok(Value::from(v));
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let result = match op {
        "add" => x + y,
        "subtract" => x - y,
        "multiply" => x * y,
        _ => {
            if y == 0.0 {
                return Err(ExpressionError::Function {
                    function: op.to_string(),
                    reason: "division by zero".to_string(),
                });
            }
            x / y
        }
    };
    float_value(op, result)
}

fn timestamp(args: &[Value]) -> Result<Value, ExpressionError> {
    arity("timestamp", args, 0, 1)?;
    let now = chrono::Utc::now();
    let text = match args.first() {
        Some(fmt) => {
            use std::fmt::Write;

            let fmt = format_value(fmt);
            let mut out = String::new();
            write!(out, "{}", now.format(&fmt)).map_err(|_| ExpressionError::Function {
                function: "timestamp".to_string(),
                reason: format!("invalid format string '{fmt}'"),
            })?;
            out
        }
        None => now.to_rfc3339(),
    };
    Ok(Value::String(text))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
        let registry = FunctionRegistry::builtin();
        let f = registry.get(name).unwrap();
        f(args)
    }

    #[test]
    fn builtin_names() {
        let registry = FunctionRegistry::builtin();
        for name in [
            "len", "join", "filter", "map", "first", "last", "contains", "split", "add",
            "subtract", "multiply", "divide", "timestamp",
        ] {
            assert!(registry.get(name).is_some(), "missing {name}");
        }
        assert!(FunctionRegistry::empty().get("len").is_none());
    }

    #[test]
    fn len_counts_collections_and_chars() {
        assert_eq!(call("len", &[json!("héllo")]).unwrap(), json!(5));
        assert_eq!(call("len", &[json!([1, 2, 3])]).unwrap(), json!(3));
        assert_eq!(call("len", &[json!({ "a": 1 })]).unwrap(), json!(1));
        assert_eq!(call("len", &[Value::Null]).unwrap(), json!(0));
    }

    #[test]
    fn join_and_split() {
        assert_eq!(call("join", &[json!(["a", "b"]), json!("-")]).unwrap(), json!("a-b"));
        assert_eq!(call("join", &[json!([1, 2])]).unwrap(), json!("1,2"));
        assert_eq!(call("split", &[json!("a,b,c")]).unwrap(), json!(["a", "b", "c"]));
        assert_eq!(call("split", &[json!("")]).unwrap(), json!([]));
    }

    #[test]
    fn filter_first_last_contains() {
        let items = json!(["apple", "banana", "apricot"]);
        assert_eq!(call("filter", &[items.clone(), json!("ap")]).unwrap(), json!(["apple", "apricot"]));
        assert_eq!(call("first", &[items.clone()]).unwrap(), json!("apple"));
        assert_eq!(call("last", &[items.clone()]).unwrap(), json!("apricot"));
        assert_eq!(call("first", &[json!([])]).unwrap(), Value::Null);
        assert_eq!(call("contains", &[items, json!("banana")]).unwrap(), json!(true));
        assert_eq!(call("contains", &[json!("hello"), json!("ell")]).unwrap(), json!(true));
        assert_eq!(call("map", &[json!([1])]).unwrap(), json!([1]));
    }

    #[test]
    fn arithmetic_preserves_integers() {
        assert_eq!(call("add", &[json!(2), json!(3)]).unwrap(), json!(5));
        assert_eq!(call("subtract", &[json!("10"), json!(4)]).unwrap(), json!(6));
        assert_eq!(call("multiply", &[json!(2.5), json!(2)]).unwrap(), json!(5.0));
        assert_eq!(call("divide", &[json!(8), json!(2)]).unwrap(), json!(4));
        assert_eq!(call("divide", &[json!(7), json!(2)]).unwrap(), json!(3.5));
    }

    #[test]
    fn integer_overflow_falls_back_to_float() {
        let quotient = call("divide", &[json!(i64::MIN), json!(-1)]).unwrap();
        assert_eq!(quotient.as_f64(), Some(9.223372036854775808e18));
        assert!(quotient.as_i64().is_none());

        let product = call("multiply", &[json!(i64::MAX), json!(2)]).unwrap();
        assert_eq!(product.as_f64(), Some(i64::MAX as f64 * 2.0));
    }

    #[test]
    fn arithmetic_errors() {
        assert!(matches!(
            call("divide", &[json!(1), json!(0)]),
            Err(ExpressionError::Function { .. })
        ));
        assert!(matches!(
            call("add", &[json!("x"), json!(1)]),
            Err(ExpressionError::Function { .. })
        ));
        assert!(matches!(
            call("add", &[json!(1)]),
            Err(ExpressionError::Arity { got: 1, .. })
        ));
    }

    #[test]
    fn timestamp_formats() {
        let year = call("timestamp", &[json!("%Y")]).unwrap();
        assert_eq!(year.as_str().unwrap().len(), 4);
        let rfc = call("timestamp", &[]).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(rfc.as_str().unwrap()).is_ok());
    }

    #[test]
    fn custom_function() {
        let registry = FunctionRegistry::empty().with_function("double", |args| {
            Ok(json!(args[0].as_i64().unwrap_or(0) * 2))
        });
        let f = registry.get("double").unwrap();
        assert_eq!(f(&[json!(21)]).unwrap(), json!(42));
    }
}
