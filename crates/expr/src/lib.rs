//! Condition evaluation for `if` branches, `while` loops and assertion
//! expressions.
//!
//! Expressions are evaluated with a JEXL interpreter over a context object
//! built from the run's variables. Variables are always passed as context,
//! never interpolated into the expression string, so flow definitions
//! imported from untrusted sources cannot execute arbitrary code.

use std::collections::HashMap;

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("Expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("Empty expression")]
    Empty,
}

/// Condition evaluator with standard string/collection transforms
/// pre-registered.
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
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
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.len(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression to a boolean over the given variables.
    ///
    /// Variables are visible both at the top level (`count > 3`) and under
    /// a `vars` key (`vars.count > 3`). Results are coerced with
    /// JavaScript-like truthiness.
    pub fn evaluate_bool(
        &self,
        expression: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<bool, ExprError> {
        let value = self.evaluate_value(expression, vars)?;
        Ok(truthy(&value))
    }

    /// Evaluate an expression to its raw JSON value.
    pub fn evaluate_value(
        &self,
        expression: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<Value, ExprError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(ExprError::Empty);
        }

        let mut context = serde_json::Map::new();
        for (key, value) in vars {
            context.insert(key.clone(), value.clone());
        }
        context.insert("vars".into(), Value::Object(context.clone()));

        self.evaluator
            .eval_in_context(expression, &Value::Object(context))
            .map_err(|e| ExprError::EvalFailed(e.to_string()))
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// JavaScript-like truthiness coercion.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Legacy single-key comparison (`var`/`equals` step configs).
pub fn var_equals(vars: &HashMap<String, Value>, key: &str, expected: &Value) -> bool {
    match vars.get(key) {
        Some(actual) => actual == expected,
        None => expected.is_null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn comparison_over_variables() {
        let evaluator = ConditionEvaluator::new();
        let ctx = vars(&[("count", json!(5)), ("name", json!("checkout"))]);
        assert!(evaluator.evaluate_bool("count > 3", &ctx).unwrap());
        assert!(evaluator
            .evaluate_bool("name == 'checkout' && count != 0", &ctx)
            .unwrap());
        assert!(!evaluator.evaluate_bool("count > 10", &ctx).unwrap());
    }

    #[test]
    fn vars_prefix_is_available() {
        let evaluator = ConditionEvaluator::new();
        let ctx = vars(&[("ready", json!(true))]);
        assert!(evaluator.evaluate_bool("vars.ready", &ctx).unwrap());
    }

    #[test]
    fn transforms_apply() {
        let evaluator = ConditionEvaluator::new();
        let ctx = vars(&[("items", json!(["a", "b"])), ("label", json!("  Hi  "))]);
        assert!(evaluator.evaluate_bool("items|length == 2", &ctx).unwrap());
        assert!(evaluator
            .evaluate_bool("label|trim|lower == 'hi'", &ctx)
            .unwrap());
    }

    #[test]
    fn malformed_expression_is_a_typed_error() {
        let evaluator = ConditionEvaluator::new();
        let ctx = vars(&[]);
        assert!(matches!(
            evaluator.evaluate_bool("count >", &ctx),
            Err(ExprError::EvalFailed(_))
        ));
        assert!(matches!(
            evaluator.evaluate_bool("   ", &ctx),
            Err(ExprError::Empty)
        ));
    }

    #[test]
    fn legacy_var_equals_comparison() {
        let ctx = vars(&[("status", json!("ready"))]);
        assert!(var_equals(&ctx, "status", &json!("ready")));
        assert!(!var_equals(&ctx, "status", &json!("done")));
        assert!(var_equals(&ctx, "missing", &Value::Null));
    }
}
