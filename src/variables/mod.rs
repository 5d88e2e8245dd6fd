//! Runtime variables and value resolution.
//!
//! - `store`: the per-run [`VariableStore`].
//! - `value`: the [`Value`] type shared by variables and resolvable fields.
//! - `expr`: the arithmetic expression parser/evaluator.
//!
//! Resolution of a string always substitutes `${Name}` / `{Name}` references first.
//! Numeric resolution then evaluates the text as an expression when it contains an
//! operator character, and parses it as a plain literal otherwise.

pub mod expr;
pub mod store;
pub mod value;

pub use expr::evaluate;
pub use store::VariableStore;
pub use value::Value;

use thiserror::Error;

/// Errors produced while resolving values at execution time.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(
        "variable '{name}' is not set; it may need to be produced by an earlier ImageSearch \
         output variable or defined as a macro-level variable"
    )]
    UnresolvedVariable { name: String },

    #[error("unterminated variable reference in '{text}'")]
    UnterminatedReference { text: String },

    #[error("variable name must not be empty")]
    EmptyVariableName,

    #[error("expression too complex: '{expression}'")]
    ExpressionTooComplex { expression: String },

    #[error("invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("cannot convert '{text}' to {expected}")]
    InvalidNumber {
        text: String,
        expected: &'static str,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

const OPERATOR_CHARS: [char; 7] = ['+', '-', '*', '/', '^', '(', ')'];

/// Replace every `${Name}` and `{Name}` in `text` with the current value of `Name`.
pub fn substitute(text: &str, vars: &VariableStore) -> Result<String, ResolveError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find('{') {
        // `${` and `{` open the same kind of reference; drop the `$` if present.
        let prefix = &rest[..open];
        out.push_str(prefix.strip_suffix('$').unwrap_or(prefix));

        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| ResolveError::UnterminatedReference {
                text: text.to_string(),
            })?;
        let name = after[..close].trim();
        if name.is_empty() {
            return Err(ResolveError::EmptyVariableName);
        }
        out.push_str(&vars.require(name)?.to_string());
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Resolve a value to a number, evaluating expressions where needed.
pub fn resolve_float(value: &Value, vars: &VariableStore) -> Result<f64, ResolveError> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Str(s) => parse_number(substitute(s, vars)?),
    }
}

/// Resolve a value to an integer. Fractional results are truncated toward zero.
pub fn resolve_int(value: &Value, vars: &VariableStore) -> Result<i64, ResolveError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Float(f) => float_to_int(*f, &value.to_string()),
        Value::Str(s) => {
            let text = substitute(s, vars)?;
            if let Ok(i) = text.trim().parse::<i64>() {
                return Ok(i);
            }
            let f = parse_number(text.clone())?;
            float_to_int(f, &text)
        }
    }
}

/// Resolve a value to text. Only variable references are substituted.
pub fn resolve_string(value: &Value, vars: &VariableStore) -> Result<String, ResolveError> {
    match value {
        Value::Str(s) => substitute(s, vars),
        other => Ok(other.to_string()),
    }
}

fn parse_number(text: String) -> Result<f64, ResolveError> {
    if text.contains(OPERATOR_CHARS) {
        return expr::evaluate_resolved(&text);
    }
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .ok_or(ResolveError::InvalidNumber {
            text,
            expected: "a number",
        })
}

fn float_to_int(f: f64, text: &str) -> Result<i64, ResolveError> {
    if !f.is_finite() || f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(ResolveError::InvalidNumber {
            text: text.to_string(),
            expected: "an integer",
        });
    }
    Ok(f.trunc() as i64)
}
