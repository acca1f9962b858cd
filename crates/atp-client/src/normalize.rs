//! Provider tool-call normalization.
//!
//! LLM providers describe tool calls in different shapes:
//!
//! | provider  | shape                                              |
//! |-----------|----------------------------------------------------|
//! | openai    | `{id, function: {name, arguments}}`                |
//! | anthropic | `{id, name, input}`                                |
//! | mistral   | `{id, name, arguments}` or the openai shape        |
//! | generic   | any of the above keys                              |
//!
//! [`normalize_tool_calls`] turns a batch of any of them into
//! [`NormalizedToolCall`]s. Calls may be JSON values or any serializable SDK
//! type exposing the same fields. A malformed call yields a fallback entry
//! carrying an error note and never affects its neighbours.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::AtpError;

/// A provider with a known tool-call schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions.
    #[default]
    OpenAi,
    /// Anthropic messages.
    Anthropic,
    /// Mistral chat completions.
    #[serde(alias = "mistralai")]
    Mistral,
    /// Unrecognized provider; fields are guessed.
    Generic,
}

impl Provider {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Mistral => "mistral",
            Self::Generic => "generic",
        }
    }

    /// Parse a provider name, falling back to [`Provider::Generic`].
    pub fn lenient(name: &str) -> Self {
        name.parse().unwrap_or(Self::Generic)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AtpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "mistral" | "mistralai" => Ok(Self::Mistral),
            _ => Err(AtpError::UnknownProvider(s.to_string())),
        }
    }
}

/// A tool call in the canonical shape sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedToolCall {
    /// Provider-assigned call id; `error_{index}` for malformed calls.
    pub id: String,
    /// Function name; `unknown` for malformed calls.
    pub function: String,
    /// Decoded arguments.
    pub arguments: Map<String, Value>,
    /// Always `function`.
    #[serde(rename = "type")]
    pub call_type: String,
    /// Why the call could not be normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NormalizedToolCall {
    fn new(id: String, function: String, arguments: Map<String, Value>) -> Self {
        Self {
            id,
            function,
            arguments,
            call_type: "function".to_string(),
            error: None,
        }
    }

    fn malformed(index: usize, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(format!("error_{index}"), "unknown".to_string(), Map::new())
        }
    }

    /// Whether this entry stands in for a malformed call.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Normalize a batch of provider tool calls. Output order matches input order.
pub fn normalize_tool_calls<T: Serialize>(provider: Provider, calls: &[T]) -> Vec<NormalizedToolCall> {
    calls
        .iter()
        .enumerate()
        .map(|(index, call)| {
            serde_json::to_value(call)
                .map_err(|e| e.to_string())
                .and_then(|value| normalize_one(provider, &value))
                .unwrap_or_else(|error| {
                    warn!(provider = %provider, index, "Malformed tool call: {}", error);
                    NormalizedToolCall::malformed(index, error)
                })
        })
        .collect()
}

fn normalize_one(provider: Provider, call: &Value) -> Result<NormalizedToolCall, String> {
    let call = call
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", kind_of(call)))?;
    let id = match call.get("id") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
    };

    let (name, arguments) = match provider {
        Provider::OpenAi => {
            let function = call
                .get("function")
                .and_then(Value::as_object)
                .ok_or("missing 'function' object")?;
            (function.get("name"), function.get("arguments"))
        }
        Provider::Anthropic => (call.get("name"), call.get("input")),
        Provider::Mistral => match call.get("function").and_then(Value::as_object) {
            Some(function) => (function.get("name"), function.get("arguments")),
            None => (call.get("name"), call.get("arguments")),
        },
        Provider::Generic => {
            let (name, arguments) = match call.get("function") {
                Some(Value::Object(function)) => (function.get("name"), function.get("arguments")),
                Some(name @ Value::String(_)) => (Some(name), call.get("arguments")),
                _ => (call.get("name"), call.get("arguments")),
            };
            (name, arguments.or_else(|| call.get("input")))
        }
    };

    let name = name
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or("missing function name")?;
    Ok(NormalizedToolCall::new(id, name.to_string(), decode_arguments(arguments)?))
}

fn decode_arguments(arguments: Option<&Value>) -> Result<Map<String, Value>, String> {
    match arguments {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!("arguments must be an object, got {}", kind_of(&other))),
            Err(e) => Err(format!("arguments are not valid JSON: {e}")),
        },
        Some(other) => Err(format!("arguments must be an object, got {}", kind_of(other))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The provider-specific fragment acknowledging a tool result, for
/// re-injection into the conversation.
///
/// # Errors
///
/// Returns [`AtpError::UnknownProvider`] for names with no known schema.
pub fn acknowledgment(provider: &str, call_id: &str, function: &str, result: &Value) -> Result<Value, AtpError> {
    let content = match result {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    match provider.parse::<Provider>()? {
        Provider::OpenAi => Ok(json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": content,
        })),
        Provider::Mistral => Ok(json!({
            "role": "tool",
            "name": function,
            "tool_call_id": call_id,
            "content": content,
        })),
        Provider::Anthropic => Ok(json!({
            "type": "tool_result",
            "tool_use_id": call_id,
            "content": content,
        })),
        Provider::Generic => Err(AtpError::UnknownProvider(provider.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_openai_string_arguments_are_decoded() {
        let calls = [json!({
            "id": "call_1",
            "type": "function",
            "function": {"name": "get_weather", "arguments": "{\"city\": \"Lagos\"}"}
        })];
        let normalized = normalize_tool_calls(Provider::OpenAi, &calls);
        assert_eq!(
            normalized,
            vec![NormalizedToolCall::new(
                "call_1".into(),
                "get_weather".into(),
                args(json!({"city": "Lagos"}))
            )]
        );
    }

    #[test]
    fn test_anthropic_and_mistral_shapes() {
        let anthropic = normalize_tool_calls(
            Provider::Anthropic,
            &[json!({"id": "toolu_1", "type": "tool_use", "name": "search", "input": {"q": "rust"}})],
        );
        assert_eq!(anthropic[0].function, "search");
        assert_eq!(anthropic[0].arguments, args(json!({"q": "rust"})));

        let mistral = normalize_tool_calls(
            Provider::Mistral,
            &[
                json!({"id": "a", "name": "search", "arguments": {"q": "x"}}),
                json!({"id": "b", "function": {"name": "search", "arguments": "{\"q\": \"y\"}"}}),
            ],
        );
        assert_eq!(mistral[0].arguments, args(json!({"q": "x"})));
        assert_eq!(mistral[1].arguments, args(json!({"q": "y"})));
    }

    #[test]
    fn test_malformed_call_does_not_block_batch() {
        let calls = [
            json!({"id": "c1", "function": {"name": "first", "arguments": "{}"}}),
            json!({"id": "c2", "function": {"arguments": "{}"}}),
            json!({"id": "c3", "function": {"name": "third", "arguments": {"n": 3}}}),
        ];
        let normalized = normalize_tool_calls(Provider::OpenAi, &calls);

        assert_eq!(normalized.len(), 3);
        assert_eq!(normalized[0].function, "first");
        assert!(!normalized[0].is_error());
        assert_eq!(normalized[1].id, "error_1");
        assert_eq!(normalized[1].function, "unknown");
        assert_eq!(normalized[1].error.as_deref(), Some("missing function name"));
        assert_eq!(normalized[2].arguments, args(json!({"n": 3})));
    }

    #[test]
    fn test_invalid_argument_json_is_flagged() {
        let normalized = normalize_tool_calls(
            Provider::OpenAi,
            &[json!({"id": "c1", "function": {"name": "f", "arguments": "{not json"}})],
        );
        assert!(normalized[0].error.as_deref().unwrap().starts_with("arguments are not valid JSON"));
    }

    #[test]
    fn test_typed_calls_are_accepted() {
        #[derive(Serialize)]
        struct SdkFunction {
            name: String,
            arguments: String,
        }
        #[derive(Serialize)]
        struct SdkToolCall {
            id: String,
            function: SdkFunction,
        }

        let calls = vec![SdkToolCall {
            id: "call_9".into(),
            function: SdkFunction {
                name: "lookup".into(),
                arguments: "{\"key\": 1}".into(),
            },
        }];
        let normalized = normalize_tool_calls(Provider::Mistral, &calls);
        assert_eq!(normalized[0].id, "call_9");
        assert_eq!(normalized[0].arguments, args(json!({"key": 1})));
    }

    #[test]
    fn test_generic_guesses_fields() {
        let normalized = normalize_tool_calls(
            Provider::lenient("cohere"),
            &[
                json!({"id": "1", "function": "a", "arguments": {"x": 1}}),
                json!({"id": "2", "name": "b", "input": {"y": 2}}),
                json!("not a call"),
            ],
        );
        assert_eq!(normalized[0].function, "a");
        assert_eq!(normalized[1].arguments, args(json!({"y": 2})));
        assert_eq!(normalized[2].id, "error_2");
    }

    #[test]
    fn test_serialized_shape() {
        let call = NormalizedToolCall::new("c1".into(), "f".into(), Map::new());
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({"id": "c1", "function": "f", "arguments": {}, "type": "function"})
        );
    }

    #[test]
    fn test_provider_names() {
        assert_eq!("mistralai".parse::<Provider>().unwrap(), Provider::Mistral);
        assert_eq!("OpenAI".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert!(matches!("cohere".parse::<Provider>(), Err(AtpError::UnknownProvider(_))));
    }

    #[test]
    fn test_acknowledgments() {
        let result = json!({"temp": 21});
        assert_eq!(
            acknowledgment("openai", "call_1", "weather", &result).unwrap(),
            json!({"role": "tool", "tool_call_id": "call_1", "content": "{\"temp\":21}"})
        );
        assert_eq!(
            acknowledgment("anthropic", "toolu_1", "weather", &json!("sunny")).unwrap(),
            json!({"type": "tool_result", "tool_use_id": "toolu_1", "content": "sunny"})
        );
        assert_eq!(
            acknowledgment("mistral", "c", "weather", &result).unwrap()["name"],
            json!("weather")
        );
        assert!(matches!(
            acknowledgment("cohere", "c", "f", &result),
            Err(AtpError::UnknownProvider(ref name)) if name == "cohere"
        ));
    }
}
