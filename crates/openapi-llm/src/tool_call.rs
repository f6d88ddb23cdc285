//! Extraction of tool calls from provider responses.

use crate::dialect::Dialect;
use crate::error::{OpenApiError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tool name plus the JSON-decoded arguments the model supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Find the tool call in a provider response.
    ///
    /// The payload is searched depth first for an object carrying `name` and
    /// the dialect's argument field (`arguments`, `input` or `parameters`). If
    /// none is found the other dialects' fields are tried, so an envelope from
    /// any supported provider is accepted. String-encoded arguments are
    /// JSON-decoded.
    ///
    /// ```
    /// use openapi_llm::{Dialect, ToolCall};
    /// use serde_json::json;
    ///
    /// let message = json!({
    ///     "role": "assistant",
    ///     "tool_calls": [{
    ///         "id": "call_1",
    ///         "type": "function",
    ///         "function": {"name": "search", "arguments": "{\"q\": \"Tesla\"}"}
    ///     }]
    /// });
    /// let call = ToolCall::extract(&message, Dialect::OpenAi).unwrap();
    /// assert_eq!(call.name, "search");
    /// assert_eq!(call.arguments["q"], "Tesla");
    /// ```
    pub fn extract(payload: &Value, dialect: Dialect) -> Result<Self> {
        let fields = std::iter::once(dialect.arguments_field()).chain(
            Dialect::ALL
                .iter()
                .filter(|other| **other != dialect)
                .map(Dialect::arguments_field),
        );
        for field in fields {
            if let Some(found) = search(payload, field) {
                return Self::from_object(found, field);
            }
        }
        Err(OpenApiError::InvalidToolCall(format!(
            "no object with 'name' and '{}' found",
            dialect.arguments_field()
        )))
    }

    fn from_object(object: &Map<String, Value>, field: &str) -> Result<Self> {
        let name = object
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| OpenApiError::InvalidToolCall("tool name is not a string".to_string()))?;
        let arguments = match &object[field] {
            Value::Object(arguments) => arguments.clone(),
            Value::String(encoded) if encoded.trim().is_empty() => Map::new(),
            Value::String(encoded) => match serde_json::from_str::<Value>(encoded)? {
                Value::Object(arguments) => arguments,
                other => {
                    return Err(OpenApiError::InvalidToolCall(format!(
                        "'{}' of tool '{}' decodes to {}, expected an object",
                        field, name, other
                    )));
                }
            },
            other => {
                return Err(OpenApiError::InvalidToolCall(format!(
                    "'{}' of tool '{}' is {}, expected an object or a JSON string",
                    field, name, other
                )));
            }
        };
        Ok(Self::new(name, arguments))
    }
}

fn search<'a>(payload: &'a Value, field: &str) -> Option<&'a Map<String, Value>> {
    match payload {
        Value::Object(object) => {
            if object.get("name").is_some_and(Value::is_string) && object.contains_key(field) {
                return Some(object);
            }
            object.values().find_map(|value| search(value, field))
        }
        Value::Array(items) => items.iter().find_map(|item| search(item, field)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_anthropic_tool_use() {
        let message = json!({
            "id": "msg_01",
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Let me look that up."},
                {"type": "tool_use", "id": "toolu_01", "name": "search", "input": {"q": "Tesla"}}
            ]
        });
        let call = ToolCall::extract(&message, Dialect::Anthropic).unwrap();
        assert_eq!(call.name, "search");
        assert_eq!(call.arguments["q"], "Tesla");
    }

    #[test]
    fn test_extract_cohere_tool_call() {
        let response = json!({
            "text": "",
            "tool_calls": [{"name": "get_weather", "parameters": {"city": "Paris"}}]
        });
        let call = ToolCall::extract(&response, Dialect::Cohere).unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments["city"], "Paris");
    }

    #[test]
    fn test_extract_falls_back_to_other_envelopes() {
        let openai = json!({"function": {"name": "search", "arguments": "{\"q\": \"x\"}"}});
        let call = ToolCall::extract(&openai, Dialect::Cohere).unwrap();
        assert_eq!(call.arguments["q"], "x");
    }

    #[test]
    fn test_extract_empty_arguments() {
        let payload = json!({"function": {"name": "ping", "arguments": ""}});
        let call = ToolCall::extract(&payload, Dialect::OpenAi).unwrap();
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn test_extract_rejects_bad_payloads() {
        assert!(matches!(
            ToolCall::extract(&json!({"content": "hello"}), Dialect::OpenAi),
            Err(OpenApiError::InvalidToolCall(_))
        ));
        assert!(matches!(
            ToolCall::extract(&json!({"name": "x", "arguments": 5}), Dialect::OpenAi),
            Err(OpenApiError::InvalidToolCall(_))
        ));
        assert!(matches!(
            ToolCall::extract(&json!({"name": "x", "arguments": "{oops"}), Dialect::OpenAi),
            Err(OpenApiError::Json(_))
        ));
    }
}
