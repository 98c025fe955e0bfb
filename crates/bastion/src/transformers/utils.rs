use std::collections::{HashSet, VecDeque};

use serde_json::{Map, Value};

use crate::errors::FormatError;
use crate::models::response::Usage;
use crate::models::tool::ToolDefinition;

pub fn require<'a>(value: &'a Value, field: &str) -> Result<&'a Value, FormatError> {
    match value.get(field) {
        Some(Value::Null) | None => Err(FormatError::missing(field)),
        Some(found) => Ok(found),
    }
}

pub fn require_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, FormatError> {
    require(value, field)?
        .as_str()
        .ok_or_else(|| FormatError::invalid(field, "expected a string"))
}

pub fn require_array<'a>(value: &'a Value, field: &str) -> Result<&'a Vec<Value>, FormatError> {
    require(value, field)?
        .as_array()
        .ok_or_else(|| FormatError::invalid(field, "expected an array"))
}

pub fn require_object(value: &Value, what: &str) -> Result<(), FormatError> {
    if value.is_object() {
        Ok(())
    } else {
        Err(FormatError::invalid(what, "expected an object"))
    }
}

pub fn opt_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

pub fn opt_f32(value: &Value, field: &str) -> Option<f32> {
    value.get(field).and_then(Value::as_f64).map(|v| v as f32)
}

pub fn opt_u32(value: &Value, field: &str) -> Option<u32> {
    value
        .get(field)
        .and_then(Value::as_u64)
        .map(|v| v.min(u32::MAX as u64) as u32)
}

/// Read a list of strings, accepting a bare string as a one element list
pub fn opt_string_list(value: &Value, field: &str) -> Option<Vec<String>> {
    match value.get(field)? {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect(),
        ),
        _ => None,
    }
}

/// Synthesized call ids that have not been answered yet, so a result that carries only a
/// function name can be linked to the call it answers
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: VecDeque<(String, String)>,
}

impl PendingCalls {
    pub fn record(&mut self, name: &str, id: &str) {
        self.calls.push_back((name.to_string(), id.to_string()));
    }

    /// Take the oldest unanswered call for `name`
    pub fn answer(&mut self, name: &str) -> Option<String> {
        let position = self.calls.iter().position(|(pending, _)| pending == name)?;
        self.calls.remove(position).map(|(_, id)| id)
    }
}

/// Insert a field only when there is a value for it
pub fn insert_opt<T: Into<Value>>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), value.into());
    }
}

/// Parse tool call arguments, treating an empty payload as an empty object
pub fn parse_arguments(arguments: &str) -> Result<Value, FormatError> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(arguments)
        .map_err(|e| FormatError::invalid("tool_calls.function.arguments", e.to_string()))
}

/// Read token counts from a provider usage object
pub fn parse_usage(
    usage: Option<&Value>,
    prompt_key: &str,
    completion_key: &str,
    total_key: &str,
) -> Option<Usage> {
    let usage = usage?.as_object()?;
    let count = |key: &str| usage.get(key).and_then(Value::as_u64).map(|v| v as u32);
    let prompt = count(prompt_key);
    let completion = count(completion_key);
    if prompt.is_none() && completion.is_none() {
        return None;
    }
    Some(Usage::new(
        prompt.unwrap_or(0),
        completion.unwrap_or(0),
        count(total_key),
    ))
}

/// Providers reject requests that declare the same tool twice
pub fn check_unique_tool_names(tools: &[ToolDefinition]) -> Result<(), FormatError> {
    let mut names = HashSet::new();
    for tool in tools {
        if !names.insert(tool.name()) {
            return Err(FormatError::invalid(
                "tools",
                format!("duplicate tool name: {}", tool.name()),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pending_calls_answer_oldest_first() {
        let mut pending = PendingCalls::default();
        pending.record("lookup", "call_a");
        pending.record("fetch", "call_b");
        pending.record("lookup", "call_c");
        assert_eq!(pending.answer("lookup").as_deref(), Some("call_a"));
        assert_eq!(pending.answer("lookup").as_deref(), Some("call_c"));
        assert_eq!(pending.answer("lookup"), None);
        assert_eq!(pending.answer("fetch").as_deref(), Some("call_b"));
    }

    #[test]
    fn test_require_helpers() {
        let value = json!({"model": "gpt-4o", "messages": [], "n": null});
        assert_eq!(require_str(&value, "model").unwrap(), "gpt-4o");
        assert!(require_array(&value, "messages").unwrap().is_empty());
        assert!(matches!(
            require(&value, "n"),
            Err(FormatError::MissingField(field)) if field == "n"
        ));
        assert!(matches!(
            require_array(&value, "model"),
            Err(FormatError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments("").unwrap(), json!({}));
        assert_eq!(parse_arguments(r#"{"a": 1}"#).unwrap(), json!({"a": 1}));
        assert!(parse_arguments("{not json").is_err());
    }

    #[test]
    fn test_parse_usage() {
        let usage = json!({"input_tokens": 10, "output_tokens": 5});
        let parsed = parse_usage(Some(&usage), "input_tokens", "output_tokens", "total").unwrap();
        assert_eq!(parsed, Usage::new(10, 5, Some(15)));
        assert!(parse_usage(Some(&json!({})), "a", "b", "c").is_none());
        assert!(parse_usage(None, "a", "b", "c").is_none());
    }

    #[test]
    fn test_string_list() {
        let value = json!({"one": "x", "many": ["a", "b"]});
        assert_eq!(opt_string_list(&value, "one"), Some(vec!["x".to_string()]));
        assert_eq!(
            opt_string_list(&value, "many"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(opt_string_list(&value, "none"), None);
    }

    #[test]
    fn test_duplicate_tools() {
        let tools = vec![
            ToolDefinition::function("read_file", None, None),
            ToolDefinition::function("read_file", None, None),
        ];
        assert!(check_unique_tool_names(&tools).is_err());
        assert!(check_unique_tool_names(&tools[..1]).is_ok());
    }
}
