//! The `{{...}}` template resolver.
//!
//! A pure function of (template string, scope). The Orchestrator resolves
//! a node's whole `resolved_inputs` tree through this before dispatch — no
//! executor touches raw templates.

use std::collections::HashMap;

use serde_json::Value;

/// Everything a template expression can reference: prior node outputs
/// folded from the event log, `$env` secrets, and the `$map` injections
/// available to child runs spawned by a Map node.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub node_outputs: HashMap<String, Value>,
    pub env: HashMap<String, String>,
    pub map_item: Option<Value>,
    pub map_index: Option<i64>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node_output(mut self, node_id: impl Into<String>, output: Value) -> Self {
        self.node_outputs.insert(node_id.into(), output);
        self
    }

    pub fn with_map(mut self, item: Value, index: i64) -> Self {
        self.map_item = Some(item);
        self.map_index = Some(index);
        self
    }

    fn resolve_path(&self, path: &str) -> Option<Value> {
        let mut parts = path.split('.');
        let head = parts.next()?;

        let root = match head {
            "$env" => {
                let key = parts.next()?;
                return self.env.get(key).cloned().map(Value::String);
            }
            "$map" => {
                return match parts.next()? {
                    "item" => self.map_item.clone(),
                    "index" => self.map_index.map(Value::from),
                    _ => None,
                };
            }
            other => self.node_outputs.get(other)?.clone(),
        };

        parts.try_fold(root, |acc, key| match acc {
            Value::Object(map) => map.get(key).cloned(),
            Value::Array(arr) => key.parse::<usize>().ok().and_then(|i| arr.get(i).cloned()),
            _ => None,
        })
    }
}

/// Replace every `{{expr}}` in `template` with its resolved value
/// (stringified for non-string values). An unresolved reference collapses
/// to an empty string — explicit design, not an oversight, so a template
/// with a typo degrades rather than aborts the run.
pub fn render(template: &str, scope: &Scope) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        rest = &rest[start + 2..];

        let Some(end) = rest.find("}}") else {
            out.push_str("{{");
            out.push_str(rest);
            return out;
        };

        let expr = rest[..end].trim();
        rest = &rest[end + 2..];

        match scope.resolve_path(expr) {
            Some(Value::String(s)) => out.push_str(&s),
            Some(other) => out.push_str(&other.to_string()),
            None => {}
        }
    }

    out.push_str(rest);
    out
}

/// Render every string leaf of a JSON value against `scope` in one pass —
/// used to resolve a node's whole `config`/`resolved_inputs` tree rather
/// than field by field.
pub fn render_value(value: &Value, scope: &Scope) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, scope)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, scope)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), render_value(v, scope))).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_a_prior_node_output_path() {
        let scope = Scope::new().with_node_output("a", json!({"status": 200, "nested": {"x": 1}}));
        assert_eq!(render("{{a.status}}", &scope), "200");
        assert_eq!(render("{{a.nested.x}}", &scope), "1");
    }

    #[test]
    fn resolves_env() {
        let mut scope = Scope::new();
        scope.env.insert("API_KEY".into(), "secret".into());
        assert_eq!(render("bearer {{$env.API_KEY}}", &scope), "bearer secret");
    }

    #[test]
    fn resolves_map_injections() {
        let scope = Scope::new().with_map(json!(42), 3);
        assert_eq!(render("{{$map.item}} at {{$map.index}}", &scope), "42 at 3");
    }

    #[test]
    fn unresolved_path_collapses_to_empty_string() {
        let scope = Scope::new();
        assert_eq!(render("before {{a.missing}} after", &scope), "before  after");
    }

    #[test]
    fn unterminated_expression_is_emitted_verbatim() {
        let scope = Scope::new();
        assert_eq!(render("oops {{not closed", &scope), "oops {{not closed");
    }

    #[test]
    fn render_value_walks_nested_objects_and_arrays() {
        let scope = Scope::new().with_node_output("a", json!({"status": 200}));
        let input = json!({"url": "http://x/{{a.status}}", "tags": ["{{a.status}}", "literal"]});
        let out = render_value(&input, &scope);
        assert_eq!(out["url"], "http://x/200");
        assert_eq!(out["tags"][0], "200");
        assert_eq!(out["tags"][1], "literal");
    }
}
