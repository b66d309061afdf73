//! Restricted expression evaluator for condition steps and per-step gates.
//!
//! Wraps `jexl_eval::Evaluator` with a fixed allow-list of pure transforms
//! (`len`, `str`, `int`, `float`, `bool`). The only names visible to an
//! expression are the step's variable view, passed as the context object --
//! no builtins, no module access, no attribute traversal onto host objects.
//!
//! **Security note:** variable values are always passed as context data,
//! NEVER interpolated into expression strings.

use std::collections::HashMap;

use serde_json::{json, Value};

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
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// Expression evaluator with the allow-listed transforms pre-registered.
///
/// Used for:
/// - `condition` steps (`{"condition_met": bool}` results)
/// - per-step gate expressions (skip the step when falsy)
/// - `data_transform` projection rules (raw value results)
pub struct ConditionEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl ConditionEvaluator {
    /// Create an evaluator with the whitelist registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("len", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let len = match &val {
                    Value::String(s) => s.chars().count(),
                    Value::Array(a) => a.len(),
                    Value::Object(o) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("str", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let s = match &val {
                    Value::String(s) => s.clone(),
                    Value::Null => "null".to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    other => serde_json::to_string(other).unwrap_or_default(),
                };
                Ok(json!(s))
            })
            .with_transform("int", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let n = match &val {
                    Value::Number(n) => n.as_f64().unwrap_or(0.0).trunc(),
                    Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0).trunc(),
                    Value::Bool(true) => 1.0,
                    _ => 0.0,
                };
                Ok(json!(n))
            })
            .with_transform("float", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                let n = match &val {
                    Value::Number(n) => n.as_f64().unwrap_or(0.0),
                    Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
                    Value::Bool(true) => 1.0,
                    _ => 0.0,
                };
                Ok(json!(n))
            })
            .with_transform("bool", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(Self::truthy(&val)))
            });

        Self { evaluator }
    }

    /// Evaluate an expression against the step's variable view, coercing the
    /// result to boolean.
    pub fn evaluate_bool(
        &self,
        expression: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<bool, ExpressionError> {
        let result = self.evaluate_value(expression, variables)?;
        Ok(Self::truthy(&result))
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(
        &self,
        expression: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<Value, ExpressionError> {
        let context = serde_json::to_value(variables)
            .map_err(|e| ExpressionError::InvalidContext(e.to_string()))?;

        self.evaluator
            .eval_in_context(expression, &context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// JavaScript-like truthiness.
    fn truthy(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl Default for ConditionEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
