//! Argument synthesis for capability calls

use crate::harness::envelope::CapabilityDescriptor;
use serde_json::{Map, Value};
use tracing::debug;

/// External source of example arguments (an LLM given the schema, say)
#[async_trait::async_trait]
pub trait ArgumentSynthesizer: Send + Sync {
    async fn synthesize(&self, capability: &CapabilityDescriptor) -> Option<Value>;
}

/// Names of required inputs, in declaration order
pub fn required_inputs(schema: &Value) -> Vec<String> {
    schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

fn declared_type(property: Option<&Value>) -> Option<&str> {
    match property?.get("type")? {
        Value::String(t) => Some(t.as_str()),
        // ["string", "null"] style unions: first non-null member
        Value::Array(types) => types
            .iter()
            .filter_map(|t| t.as_str())
            .find(|t| *t != "null"),
        _ => None,
    }
}

/// Deterministic placeholder for an input of the given type
pub fn default_for_type(input_type: Option<&str>) -> Value {
    match input_type.unwrap_or("string") {
        "string" => Value::String("test".to_string()),
        "number" | "integer" => Value::from(1),
        "boolean" => Value::Bool(true),
        "array" => Value::Array(Vec::new()),
        "object" => Value::Object(Map::new()),
        _ => Value::Null,
    }
}

/// Arguments built purely from the schema, one value per required input.
///
/// Each value is picked in this order:
/// 1. the property's `default`
/// 2. the first member of its `enum`
/// 3. the placeholder for its declared type (see [`default_for_type`])
///
/// The first two go beyond a bare type mapping. A server that validates
/// against the enumeration would reject the `"test"` placeholder, and both
/// come from the schema itself, so the result stays deterministic.
pub fn fallback_arguments(schema: &Value) -> Value {
    let properties = schema.get("properties");
    let mut args = Map::new();

    for name in required_inputs(schema) {
        let property = properties.and_then(|p| p.get(&name));
        let value = property
            .and_then(|p| p.get("default").cloned())
            .or_else(|| {
                property
                    .and_then(|p| p.get("enum"))
                    .and_then(|e| e.as_array())
                    .and_then(|e| e.first().cloned())
            })
            .unwrap_or_else(|| default_for_type(declared_type(property)));
        args.insert(name, value);
    }

    Value::Object(args)
}

/// Pick arguments for one capability call.
///
/// The synthesizer's answer is used only if it is an object covering every
/// required input; otherwise the schema fallback applies.
pub async fn synthesize_arguments(
    capability: &CapabilityDescriptor,
    synthesizer: Option<&dyn ArgumentSynthesizer>,
) -> Value {
    let required = required_inputs(&capability.input_schema);
    if required.is_empty() {
        return Value::Object(Map::new());
    }

    if let Some(synthesizer) = synthesizer {
        if let Some(Value::Object(candidate)) = synthesizer.synthesize(capability).await {
            if required.iter().all(|name| candidate.contains_key(name)) {
                return Value::Object(candidate);
            }
            debug!(
                "Synthesized arguments for {} miss required inputs, using fallback",
                capability.name
            );
        }
    }

    fallback_arguments(&capability.input_schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capability(schema: Value) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: "lookup".to_string(),
            description: None,
            input_schema: schema,
        }
    }

    struct Fixed(Option<Value>);

    #[async_trait::async_trait]
    impl ArgumentSynthesizer for Fixed {
        async fn synthesize(&self, _capability: &CapabilityDescriptor) -> Option<Value> {
            self.0.clone()
        }
    }

    #[test]
    fn test_type_defaults() {
        let schema = json!({
            "type": "object",
            "properties": {
                "s": {"type": "string"},
                "n": {"type": "number"},
                "i": {"type": "integer"},
                "b": {"type": "boolean"},
                "a": {"type": "array"},
                "o": {"type": "object"},
                "u": {"type": ["null", "integer"]},
                "x": {"description": "untyped"}
            },
            "required": ["s", "n", "i", "b", "a", "o", "u", "x", "missing"]
        });
        assert_eq!(
            fallback_arguments(&schema),
            json!({
                "s": "test", "n": 1, "i": 1, "b": true, "a": [], "o": {},
                "u": 1, "x": "test", "missing": "test"
            })
        );
    }

    #[test]
    fn test_schema_default_and_enum_win() {
        let schema = json!({
            "properties": {
                "unit": {"type": "string", "enum": ["metric", "imperial"]},
                "days": {"type": "integer", "default": 3}
            },
            "required": ["unit", "days"]
        });
        assert_eq!(fallback_arguments(&schema), json!({"unit": "metric", "days": 3}));
    }

    #[test]
    fn test_default_beats_enum_and_type() {
        let schema = json!({
            "properties": {
                "unit": {"type": "string", "enum": ["metric", "imperial"], "default": "imperial"},
                "level": {"type": "integer", "enum": [2, 4]},
                "city": {"type": "string"}
            },
            "required": ["unit", "level", "city"]
        });
        assert_eq!(
            fallback_arguments(&schema),
            json!({"unit": "imperial", "level": 2, "city": "test"})
        );
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let schema = json!({
            "properties": {"q": {"type": "string"}, "limit": {"type": "integer"}},
            "required": ["q", "limit"]
        });
        assert_eq!(fallback_arguments(&schema), fallback_arguments(&schema));
    }

    #[tokio::test]
    async fn test_no_required_inputs_gives_empty_object() {
        let cap = capability(json!({"properties": {"q": {"type": "string"}}}));
        let synth = Fixed(Some(json!({"q": "ignored"})));
        assert_eq!(synthesize_arguments(&cap, Some(&synth)).await, json!({}));
        assert_eq!(synthesize_arguments(&capability(Value::Null), None).await, json!({}));
    }

    #[tokio::test]
    async fn test_complete_synthesis_is_used() {
        let cap = capability(json!({
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        }));
        let synth = Fixed(Some(json!({"city": "Berlin"})));
        assert_eq!(
            synthesize_arguments(&cap, Some(&synth)).await,
            json!({"city": "Berlin"})
        );
    }

    #[tokio::test]
    async fn test_incomplete_synthesis_falls_back() {
        let cap = capability(json!({
            "properties": {"city": {"type": "string"}, "days": {"type": "integer"}},
            "required": ["city", "days"]
        }));
        let partial = Fixed(Some(json!({"city": "Berlin"})));
        let nothing = Fixed(None);
        let expected = json!({"city": "test", "days": 1});
        assert_eq!(synthesize_arguments(&cap, Some(&partial)).await, expected);
        assert_eq!(synthesize_arguments(&cap, Some(&nothing)).await, expected);
    }
}
