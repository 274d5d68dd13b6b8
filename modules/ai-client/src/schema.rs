use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// JSON schema for `T` with `$ref`s inlined and metadata keys removed.
///
/// Meant to be pasted into a prompt, so the output is self-contained.
pub fn response_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(schema).unwrap_or_default();

    let definitions = match &mut value {
        Value::Object(map) => {
            map.remove("$schema");
            map.remove("title");
            map.remove("definitions")
        }
        _ => None,
    };

    if let Some(defs) = definitions {
        inline(&mut value, &defs, 0);
    }
    value
}

// Recursive types would never terminate; cap the depth.
const MAX_INLINE_DEPTH: usize = 16;

fn inline(value: &mut Value, definitions: &Value, depth: usize) {
    if depth > MAX_INLINE_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(|r| r.as_str())
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| definitions.get(name))
                .cloned();
            if let Some(mut resolved) = target {
                inline(&mut resolved, definitions, depth + 1);
                *value = resolved;
                return;
            }
            for v in map.values_mut() {
                inline(v, definitions, depth + 1);
            }
        }
        Value::Array(items) => {
            for v in items.iter_mut() {
                inline(v, definitions, depth + 1);
            }
        }
        _ => {}
    }
}
