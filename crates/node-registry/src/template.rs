//! `{varName}` template expansion, deep through nested config.

use std::collections::HashMap;

use serde_json::Value;

/// Expand `{name}` references against the variable map, recursively
/// through objects and arrays.
///
/// A string that is exactly one reference (`"{items}"`) is replaced by
/// the variable's value with its type preserved; mixed strings
/// interpolate the stringified value. Unknown names are left verbatim so
/// literal braces in recorded values survive.
pub fn expand_templates(value: &Value, vars: &HashMap<String, Value>) -> Value {
    match value {
        Value::String(s) => expand_string(s, vars),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_templates(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), expand_templates(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn expand_string(input: &str, vars: &HashMap<String, Value>) -> Value {
    // whole-string reference keeps the variable's type
    if let Some(name) = single_reference(input) {
        if let Some(value) = vars.get(name) {
            return value.clone();
        }
        return Value::String(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match vars.get(name) {
                    Some(value) if is_ident(name) => out.push_str(&stringify(value)),
                    _ => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    Value::String(out)
}

fn single_reference(input: &str) -> Option<&str> {
    let inner = input.strip_prefix('{')?.strip_suffix('}')?;
    is_ident(inner).then_some(inner)
}

fn is_ident(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> HashMap<String, Value> {
        [
            ("name".to_string(), json!("Ada")),
            ("count".to_string(), json!(3)),
            ("items".to_string(), json!(["a", "b"])),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn whole_string_reference_preserves_type() {
        assert_eq!(expand_templates(&json!("{items}"), &vars()), json!(["a", "b"]));
        assert_eq!(expand_templates(&json!("{count}"), &vars()), json!(3));
    }

    #[test]
    fn interpolation_stringifies() {
        assert_eq!(
            expand_templates(&json!("hello {name}, {count} left"), &vars()),
            json!("hello Ada, 3 left")
        );
    }

    #[test]
    fn unknown_names_stay_verbatim() {
        assert_eq!(
            expand_templates(&json!("keep {unknown} and {not a var}"), &vars()),
            json!("keep {unknown} and {not a var}")
        );
    }

    #[test]
    fn expansion_recurses_through_nested_config() {
        let config = json!({
            "target": { "selector": "#row-{count}" },
            "values": ["{name}", { "deep": "{count}" }]
        });
        let expanded = expand_templates(&config, &vars());
        assert_eq!(expanded["target"]["selector"], "#row-3");
        assert_eq!(expanded["values"][0], "Ada");
        assert_eq!(expanded["values"][1]["deep"], 3);
    }
}
