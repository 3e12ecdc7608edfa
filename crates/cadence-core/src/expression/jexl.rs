//! JEXL implementation of the `Evaluator` trait.
//!
//! Wraps `jexl_eval::Evaluator` with a pre-registered set of standard
//! transforms for string handling, truthiness, and length checks.

use serde_json::{Value, json};

use super::{Evaluator, ExpressionError, value_truthy};

/// JEXL expression evaluator with standard transforms pre-registered.
///
/// Used for `on_condition` transition expressions, evaluated against the
/// source step's output and the execution's accumulated data.
pub struct JexlEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl JexlEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            // String transforms
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            // Boolean transforms
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!value_truthy(&val)))
            })
            // String search transforms
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            // Length transform (strings, arrays, and objects)
            .with_transform("length", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let len = match &val {
                    Value::String(s) => s.len(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }
}

impl Default for JexlEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for JexlEvaluator {
    fn eval(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "output": { "rows": 12, "status": "ok", "items": ["a", "b"] },
            "data": {},
            "conditions": { "approved": true }
        })
    }

    #[test]
    fn test_eval_comparison() {
        let evaluator = JexlEvaluator::new();
        assert!(evaluator.eval_bool("output.rows > 10", &ctx()).unwrap());
        assert!(!evaluator.eval_bool("output.rows > 100", &ctx()).unwrap());
    }

    #[test]
    fn test_eval_string_equality() {
        let evaluator = JexlEvaluator::new();
        assert!(
            evaluator
                .eval_bool("output.status == 'ok'", &ctx())
                .unwrap()
        );
    }

    #[test]
    fn test_eval_condition_flag() {
        let evaluator = JexlEvaluator::new();
        assert!(
            evaluator
                .eval_bool("conditions.approved == true", &ctx())
                .unwrap()
        );
    }

    #[test]
    fn test_eval_transforms() {
        let evaluator = JexlEvaluator::new();
        assert_eq!(
            evaluator.eval("output.status|upper", &ctx()).unwrap(),
            json!("OK")
        );
        assert!(evaluator.eval_bool("output.items|length == 2", &ctx()).unwrap());
        assert!(
            evaluator
                .eval_bool("output.status|contains('o')", &ctx())
                .unwrap()
        );
        assert!(
            evaluator
                .eval_bool("output.status|startsWith('o')", &ctx())
                .unwrap()
        );
        assert!(!evaluator.eval_bool("output.status|not", &ctx()).unwrap());
    }

    #[test]
    fn test_eval_truthiness_coercion() {
        let evaluator = JexlEvaluator::new();
        // Non-boolean results are coerced.
        assert!(evaluator.eval_bool("output.rows", &ctx()).unwrap());
        assert!(evaluator.eval_bool("output.status", &ctx()).unwrap());
    }

    #[test]
    fn test_eval_rejects_non_object_context() {
        let evaluator = JexlEvaluator::new();
        let err = evaluator.eval("1 + 1", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, ExpressionError::InvalidContext(_)));
    }

    #[test]
    fn test_eval_invalid_expression() {
        let evaluator = JexlEvaluator::new();
        let err = evaluator.eval("output.rows >", &ctx()).unwrap_err();
        assert!(matches!(err, ExpressionError::EvalFailed(_)));
    }
}
