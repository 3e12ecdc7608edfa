//! Condition expression evaluation.
//!
//! Transition conditions (`on_condition` edges) are evaluated behind the
//! dyn-safe `Evaluator` trait, isolating the engine from any particular
//! expression language. The default implementation is `JexlEvaluator`.

use serde_json::Value;

pub mod jexl;

pub use jexl::JexlEvaluator;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// Evaluator trait
// ---------------------------------------------------------------------------

/// Pluggable expression evaluator.
///
/// The `context` is always passed as a JSON object; payload data is NEVER
/// interpolated into expression strings. Implementations may sandbox the
/// evaluation however they see fit.
pub trait Evaluator: Send + Sync {
    /// Evaluate an expression and return the raw JSON result.
    fn eval(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError>;

    /// Evaluate an expression and coerce the result to a boolean using
    /// JavaScript-like truthiness rules.
    fn eval_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        Ok(value_truthy(&self.eval(expression, context)?))
    }
}

/// JavaScript-like truthiness coercion for JSON values.
pub(crate) fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
