//! Template resolution over step inputs.
//!
//! Input trees are `serde_json::Value`s; mappings and sequences are walked
//! recursively and only string leaves are passed through the resolver.
//! Placeholders use `{{name}}` / `{{name.path}}` syntax. An unresolved
//! placeholder is left verbatim in the output rather than erroring, since
//! the engine runs in non-strict mode by default (grounded in the teacher's
//! interpolation engine, adapted from its `${...}` syntax to `{{...}}`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").expect("valid placeholder regex"));

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Variable(Vec<String>),
}

#[derive(Debug, Clone)]
struct Template {
    segments: Vec<Segment>,
}

fn parse(raw: &str) -> Template {
    let mut segments = Vec::new();
    let mut last_end = 0;

    for capture in PLACEHOLDER.captures_iter(raw) {
        let whole = capture.get(0).expect("group 0 always present");
        let path_expr = capture.get(1).expect("group 1 always present").as_str();

        if whole.start() > last_end {
            segments.push(Segment::Literal(raw[last_end..whole.start()].to_string()));
        }
        let path = path_expr.split('.').map(str::to_string).collect();
        segments.push(Segment::Variable(path));
        last_end = whole.end();
    }

    if last_end < raw.len() {
        segments.push(Segment::Literal(raw[last_end..].to_string()));
    }

    Template { segments }
}

/// Lookup scope for template resolution: workflow `inputs` overlaid with
/// the run's mutable `variables`, with `variables` taking precedence since
/// they reflect the most recent step outputs.
pub struct TemplateContext<'a> {
    pub inputs: &'a HashMap<String, Value>,
    pub variables: &'a HashMap<String, Value>,
}

impl<'a> TemplateContext<'a> {
    fn resolve_path(&self, path: &[String]) -> Option<Value> {
        let root = path.first()?;
        let base = self
            .variables
            .get(root)
            .or_else(|| self.inputs.get(root))?;

        let mut current = base.clone();
        for segment in &path[1..] {
            current = current.get(segment)?.clone();
        }
        Some(current)
    }
}

fn value_to_interpolated_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve `{{name}}` / `{{name.path}}` placeholders in a string. Unresolved
/// placeholders are left verbatim.
pub fn resolve_string(raw: &str, context: &TemplateContext<'_>) -> String {
    let template = parse(raw);
    let mut result = String::new();
    for segment in &template.segments {
        match segment {
            Segment::Literal(text) => result.push_str(text),
            Segment::Variable(path) => match context.resolve_path(path) {
                Some(value) => result.push_str(&value_to_interpolated_string(&value)),
                None => {
                    result.push_str("{{");
                    result.push_str(&path.join("."));
                    result.push_str("}}");
                }
            },
        }
    }
    result
}

/// Recursively resolve templates in a `serde_json::Value` tree: mappings
/// are descended, sequences are mapped element-wise, string leaves go
/// through [`resolve_string`], and everything else passes through unchanged.
pub fn resolve_value(value: &Value, context: &TemplateContext<'_>) -> Value {
    match value {
        Value::String(s) => Value::String(resolve_string(s, context)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|item| resolve_value(item, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolve every value in a step's input map against `inputs ∪ variables`.
pub fn resolve_inputs(
    raw_inputs: &HashMap<String, Value>,
    inputs: &HashMap<String, Value>,
    variables: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    let context = TemplateContext { inputs, variables };
    raw_inputs
        .iter()
        .map(|(k, v)| (k.clone(), resolve_value(v, &context)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_simple_variable() {
        let variables = HashMap::from([("greeting".to_string(), json!("hello"))]);
        let inputs = HashMap::new();
        let context = TemplateContext {
            inputs: &inputs,
            variables: &variables,
        };
        assert_eq!(resolve_string("{{greeting}}", &context), "hello");
    }

    #[test]
    fn leaves_unresolved_placeholder_verbatim() {
        let inputs = HashMap::new();
        let variables = HashMap::new();
        let context = TemplateContext {
            inputs: &inputs,
            variables: &variables,
        };
        assert_eq!(resolve_string("{{missing}}", &context), "{{missing}}");
    }

    #[test]
    fn resolves_nested_path() {
        let variables = HashMap::from([("user".to_string(), json!({"name": "ada"}))]);
        let inputs = HashMap::new();
        let context = TemplateContext {
            inputs: &inputs,
            variables: &variables,
        };
        assert_eq!(resolve_string("{{user.name}}", &context), "ada");
    }

    #[test]
    fn variables_take_precedence_over_inputs() {
        let inputs = HashMap::from([("x".to_string(), json!("from-input"))]);
        let variables = HashMap::from([("x".to_string(), json!("from-variable"))]);
        let context = TemplateContext {
            inputs: &inputs,
            variables: &variables,
        };
        assert_eq!(resolve_string("{{x}}", &context), "from-variable");
    }

    #[test]
    fn non_string_leaves_pass_through_unchanged() {
        let inputs = HashMap::new();
        let variables = HashMap::new();
        let context = TemplateContext {
            inputs: &inputs,
            variables: &variables,
        };
        let value = json!({"count": 3, "enabled": true, "tag": null});
        assert_eq!(resolve_value(&value, &context), value);
    }

    #[test]
    fn resolves_within_nested_sequences_and_mappings() {
        let variables = HashMap::from([("greeting".to_string(), json!("hi"))]);
        let inputs = HashMap::new();
        let context = TemplateContext {
            inputs: &inputs,
            variables: &variables,
        };
        let value = json!({"list": ["{{greeting}}", "plain"], "nested": {"s": "{{greeting}}"}});
        let resolved = resolve_value(&value, &context);
        assert_eq!(resolved["list"][0], json!("hi"));
        assert_eq!(resolved["nested"]["s"], json!("hi"));
    }
}
