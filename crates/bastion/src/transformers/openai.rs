use serde_json::{json, Map, Value};

use super::base::{ProviderKind, ProviderTransformer};
use super::utils::{require_array, require_object, require_str, PendingCalls};
use crate::errors::FormatError;
use crate::models::message::Message;
use crate::models::request::ChatRequest;
use crate::models::response::{
    completion_id, unix_now, ChatChunk, ChatResponse, Choice, FinishReason, Usage,
};
use crate::models::tool::derive_call_id;

const ROLES: [&str; 6] = ["system", "developer", "user", "assistant", "tool", "function"];

/// Chat completions, the format the canonical models are shaped after
///
/// Conversion is mostly a typed parse, plus normalising the legacy function calling
/// fields into their tool calling replacements.
pub struct OpenAiTransformer;

impl OpenAiTransformer {
    /// Validate one wire message and rewrite the legacy function calling shapes. An
    /// assistant `function_call` becomes a tool call with a derived id, and the
    /// `function` message answering it becomes the matching `tool` message.
    fn normalize_message(
        index: usize,
        message: &Value,
        pending: &mut PendingCalls,
    ) -> Result<Value, FormatError> {
        require_object(message, &format!("messages[{}]", index))?;
        let role = require_str(message, "role")?;
        if !ROLES.contains(&role) {
            return Err(FormatError::invalid(
                format!("messages[{}].role", index),
                format!("unknown role '{}'", role),
            ));
        }

        let mut message = message.clone();
        if let Some(map) = message.as_object_mut() {
            if let Some(function_call) = map.remove("function_call") {
                if function_call.is_object() && !map.contains_key("tool_calls") {
                    let name = require_str(&function_call, "name")?;
                    let arguments = function_call
                        .get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("{}");
                    let id =
                        derive_call_id(&format!("messages[{}]:{}:{}", index, name, arguments));
                    pending.record(name, &id);
                    map.insert(
                        "tool_calls".to_string(),
                        json!([{
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": arguments}
                        }]),
                    );
                }
            }

            if role == "function" {
                let name = map
                    .remove("name")
                    .and_then(|name| name.as_str().map(String::from))
                    .ok_or_else(|| FormatError::missing(format!("messages[{}].name", index)))?;
                // Without a matching call the result keeps an id nothing resolves
                let id = pending.answer(&name).unwrap_or_else(|| {
                    derive_call_id(&format!("messages[{}]:{}:response", index, name))
                });
                map.insert("role".to_string(), json!("tool"));
                map.insert("tool_call_id".to_string(), json!(id));
            }
            map.retain(|_, value| !value.is_null());
        }
        Ok(message)
    }

    fn parse_message(index: usize, value: &Value) -> Result<Message, FormatError> {
        let normalized = Self::normalize_message(index, value, &mut PendingCalls::default())?;
        let message: Message = serde_json::from_value(normalized)?;
        message.validate()?;
        Ok(message)
    }

    fn legacy_tool_choice(function_call: &Value) -> Option<Value> {
        match function_call {
            Value::String(mode) if mode == "none" || mode == "auto" => Some(json!(mode)),
            Value::Object(named) => named
                .get("name")
                .and_then(Value::as_str)
                .map(|name| json!({"type": "function", "function": {"name": name}})),
            _ => None,
        }
    }

    fn parse_choice(index: usize, choice: &Value) -> Result<Choice, FormatError> {
        let message = Self::parse_message(index, &choice["message"])?;
        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(FinishReason::parse)
            .unwrap_or(FinishReason::Stop);
        Ok(Choice {
            index: choice
                .get("index")
                .and_then(Value::as_u64)
                .map(|i| i as u32)
                .unwrap_or(index as u32),
            message,
            finish_reason,
            logprobs: choice.get("logprobs").filter(|v| !v.is_null()).cloned(),
        })
    }
}

impl ProviderTransformer for OpenAiTransformer {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn request_to_canonical(&self, request: &Value) -> Result<ChatRequest, FormatError> {
        require_object(request, "request")?;
        require_str(request, "model")?;
        let mut pending = PendingCalls::default();
        let messages = require_array(request, "messages")?
            .iter()
            .enumerate()
            .map(|(i, message)| Self::normalize_message(i, message, &mut pending))
            .collect::<Result<Vec<_>, _>>()?;

        let mut map = request.as_object().cloned().unwrap_or_default();
        map.insert("messages".to_string(), Value::Array(messages));

        if let Some(functions) = map.remove("functions") {
            if !map.contains_key("tools") {
                let tools: Vec<Value> = functions
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(|function| json!({"type": "function", "function": function}))
                    .collect();
                map.insert("tools".to_string(), Value::Array(tools));
            }
        }
        if let Some(function_call) = map.remove("function_call") {
            if !map.contains_key("tool_choice") {
                if let Some(choice) = Self::legacy_tool_choice(&function_call) {
                    map.insert("tool_choice".to_string(), choice);
                }
            }
        }
        if let Some(max_completion_tokens) = map.remove("max_completion_tokens") {
            map.entry("max_tokens").or_insert(max_completion_tokens);
        }
        if let Some(Value::String(stop)) = map.get("stop") {
            let stop = json!([stop]);
            map.insert("stop".to_string(), stop);
        }
        // Explicit nulls mean absent
        map.retain(|_, value| !value.is_null());

        let canonical: ChatRequest = serde_json::from_value(Value::Object(map))?;
        for message in &canonical.messages {
            message.validate()?;
        }
        Ok(canonical)
    }

    fn request_from_canonical(&self, request: &ChatRequest) -> Result<Value, FormatError> {
        super::utils::check_unique_tool_names(request.tools())?;
        Ok(serde_json::to_value(request)?)
    }

    fn response_to_canonical(&self, response: &Value) -> Result<ChatResponse, FormatError> {
        require_object(response, "response")?;
        if let Some(error) = response.get("error").filter(|e| !e.is_null()) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| error.to_string());
            return Err(FormatError::ErrorEvent(message));
        }

        let choices = require_array(response, "choices")?;
        let choices = if choices.is_empty() {
            vec![Choice::refusal("no choices returned", FinishReason::Stop)]
        } else {
            choices
                .iter()
                .enumerate()
                .map(|(i, choice)| Self::parse_choice(i, choice))
                .collect::<Result<Vec<_>, _>>()?
        };

        let usage = match response.get("usage") {
            Some(usage) if usage.is_object() => Some(Usage::new(
                usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
                usage["total_tokens"].as_u64().map(|v| v as u32),
            )),
            _ => None,
        };

        Ok(ChatResponse {
            id: response
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(completion_id),
            object: "chat.completion".to_string(),
            created: response
                .get("created")
                .and_then(Value::as_i64)
                .unwrap_or_else(unix_now),
            model: response
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            choices,
            usage,
            system_fingerprint: response
                .get("system_fingerprint")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    fn response_from_canonical(&self, response: &ChatResponse) -> Result<Value, FormatError> {
        let mut value = serde_json::to_value(response)?;
        // The wire format always carries these keys, null when empty
        if let Some(choices) = value.get_mut("choices").and_then(Value::as_array_mut) {
            for choice in choices {
                let Some(choice) = choice.as_object_mut() else {
                    continue;
                };
                choice.entry("logprobs").or_insert(Value::Null);
                if let Some(message) = choice.get_mut("message").and_then(Value::as_object_mut) {
                    message.entry("content").or_insert(Value::Null);
                    message.entry("refusal").or_insert(Value::Null);
                }
            }
        }
        Ok(value)
    }

    fn chunk_to_canonical(&self, chunk: &Value) -> Result<Option<ChatChunk>, FormatError> {
        require_object(chunk, "chunk")?;
        if let Some(error) = chunk.get("error").filter(|e| !e.is_null()) {
            return Err(FormatError::ErrorEvent(error.to_string()));
        }
        let mut map: Map<String, Value> = chunk.as_object().cloned().unwrap_or_default();
        map.entry("object")
            .or_insert_with(|| json!("chat.completion.chunk"));
        map.entry("created").or_insert_with(|| json!(unix_now()));
        map.entry("choices").or_insert_with(|| json!([]));
        map.retain(|key, value| !(key == "usage" && value.is_null()));
        Ok(Some(serde_json::from_value(Value::Object(map))?))
    }
}
