use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// Types usable as OpenAI strict structured output.
///
/// Blanket-implemented for anything deriving `JsonSchema + Deserialize`.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Schema conforming to OpenAI's strict-mode requirements:
    /// `additionalProperties: false` on every object, every property listed
    /// in `required`, and no `$ref` indirection.
    fn openai_schema() -> serde_json::Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();

        let definitions = value.get("definitions").cloned();
        conform(&mut value, definitions.as_ref());

        if let serde_json::Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
        }
        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// Recursively rewrite a schemars schema into strict-mode form: inline
/// `$ref`s, collapse single-element `allOf`, require all properties, and
/// forbid additional ones.
fn conform(value: &mut serde_json::Value, definitions: Option<&serde_json::Value>) {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(path)) = map.get("$ref").cloned() {
                if let Some(def) = path
                    .strip_prefix("#/definitions/")
                    .and_then(|name| definitions.and_then(|d| d.get(name)))
                {
                    *value = def.clone();
                    conform(value, definitions);
                    return;
                }
            }

            if let Some(serde_json::Value::Array(all_of)) = map.get("allOf").cloned() {
                if all_of.len() == 1 {
                    *value = all_of.into_iter().next().expect("len checked");
                    conform(value, definitions);
                    return;
                }
            }

            if map.get("type") == Some(&serde_json::Value::String("object".to_string())) {
                map.insert("additionalProperties".to_string(), serde_json::Value::Bool(false));
                if let Some(serde_json::Value::Object(props)) = map.get("properties") {
                    let keys: Vec<serde_json::Value> = props
                        .keys()
                        .map(|k| serde_json::Value::String(k.clone()))
                        .collect();
                    map.insert("required".to_string(), serde_json::Value::Array(keys));
                }
            }

            for (_, v) in map.iter_mut() {
                conform(v, definitions);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items.iter_mut() {
                conform(item, definitions);
            }
        }
        _ => {}
    }
}
