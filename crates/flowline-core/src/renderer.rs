//! Renderer (C4): evaluates template expressions against a context tree.
//!
//! The context tree is a nested JSON mapping whose top keys include
//! `workload`, `work`, `input`, `data`, `env`, `job`, `keychain`, and every
//! prior step's result under its step name. Expressions are pure (no side
//! effects) and strict-undefined: referencing an unknown identifier fails
//! the evaluation rather than silently producing an empty string.
//!
//! Used in exactly three places: transition `when` conditions
//! (errors become "false"), `with` mappings (errors propagate as step
//! errors), and a step's `result` mapping at finalization (same).

use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("template syntax error: {0}")]
    Syntax(String),
    #[error("undefined identifier: {0}")]
    Undefined(String),
    #[error("evaluation error: {0}")]
    Eval(String),
}

impl From<minijinja::Error> for RenderError {
    fn from(err: minijinja::Error) -> Self {
        use minijinja::ErrorKind;
        match err.kind() {
            ErrorKind::UndefinedError => RenderError::Undefined(err.to_string()),
            ErrorKind::SyntaxError => RenderError::Syntax(err.to_string()),
            _ => RenderError::Eval(err.to_string()),
        }
    }
}

/// Stateless expression/template evaluator. Cheap to construct; holds no
/// context of its own so a single instance is shared across the process.
pub struct Renderer {
    env: Environment<'static>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        Self { env }
    }

    /// Evaluate a bare or `{{ ... }}`-wrapped expression and return its raw
    /// minijinja value (before JSON conversion), so callers can inspect
    /// truthiness without round-tripping through a string.
    fn eval_raw(&self, expr: &str, context: &Value) -> Result<minijinja::Value, RenderError> {
        let inner = unwrap_braces(expr);
        let ctx = minijinja::Value::from_serialize(context);
        let compiled = self.env.compile_expression(inner)?;
        Ok(compiled.eval(ctx)?)
    }

    /// Evaluate `expr` to a JSON value.
    pub fn eval(&self, expr: &str, context: &Value) -> Result<Value, RenderError> {
        let raw = self.eval_raw(expr, context)?;
        Ok(serde_json::to_value(raw).unwrap_or(Value::Null))
    }

    /// Evaluate a transition `when` condition. Per §4.4, evaluation errors
    /// are treated as "condition false" rather than propagated.
    pub fn eval_condition(&self, expr: &str, context: &Value) -> bool {
        self.eval_raw(expr, context)
            .map(|v| v.is_true())
            .unwrap_or(false)
    }

    /// Recursively render every string leaf of `value` as a template against
    /// `context`. A leaf that is *entirely* one `{{ expr }}` interpolation
    /// (no surrounding text) evaluates to its native JSON type; any other
    /// string (literal text, or text with embedded interpolations) is
    /// rendered via normal Jinja string interpolation. Non-string leaves
    /// pass through unchanged.
    pub fn render_value(&self, value: &Value, context: &Value) -> Result<Value, RenderError> {
        match value {
            Value::String(s) => {
                if let Some(inner) = whole_expression(s) {
                    self.eval(inner, context)
                } else if s.contains("{{") || s.contains("{%") {
                    let ctx = minijinja::Value::from_serialize(context);
                    let rendered = self.env.render_str(s, ctx)?;
                    Ok(Value::String(rendered))
                } else {
                    Ok(Value::String(s.clone()))
                }
            }
            Value::Array(items) => {
                let rendered: Result<Vec<Value>, RenderError> =
                    items.iter().map(|v| self.render_value(v, context)).collect();
                Ok(Value::Array(rendered?))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.render_value(v, context)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }
}

/// If `s` trimmed is a single `{{ ... }}` block with no surrounding text,
/// returns the inner expression.
fn whole_expression(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    Some(inner.trim())
}

/// Accepts either a bare expression or one wrapped in `{{ }}`.
fn unwrap_braces(expr: &str) -> &str {
    whole_expression(expr).unwrap_or(expr.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "workload": {"mode": "fast", "cities": ["LDN", "PAR"]},
            "a": {"x": 21},
        })
    }

    #[test]
    fn condition_true_and_false() {
        let r = Renderer::new();
        assert!(r.eval_condition("{{ workload.mode == 'fast' }}", &ctx()));
        assert!(!r.eval_condition("{{ workload.mode == 'slow' }}", &ctx()));
    }

    #[test]
    fn undefined_identifier_treated_as_false() {
        let r = Renderer::new();
        assert!(!r.eval_condition("{{ workload.missing == 1 }}", &ctx()));
    }

    #[test]
    fn whole_expression_preserves_native_type() {
        let r = Renderer::new();
        let rendered = r
            .render_value(&json!("{{ workload.cities }}"), &ctx())
            .unwrap();
        assert_eq!(rendered, json!(["LDN", "PAR"]));
    }

    #[test]
    fn embedded_expression_renders_as_string() {
        let r = Renderer::new();
        let rendered = r
            .render_value(&json!("city={{ workload.mode }}"), &ctx())
            .unwrap();
        assert_eq!(rendered, json!("city=fast"));
    }

    #[test]
    fn nested_mapping_is_rendered_recursively() {
        let r = Renderer::new();
        let rendered = r
            .render_value(
                &json!({"x": "{{ a.x }}", "y": {"z": "{{ workload.mode }}"}}),
                &ctx(),
            )
            .unwrap();
        assert_eq!(rendered, json!({"x": 21, "y": {"z": "fast"}}));
    }

    #[test]
    fn with_mapping_error_propagates() {
        let r = Renderer::new();
        let err = r.render_value(&json!("{{ workload.missing }}"), &ctx());
        assert!(err.is_err());
    }
}
