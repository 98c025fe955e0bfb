use serde_json::{json, Map, Value};

use super::base::{ProviderKind, ProviderTransformer};
use super::utils::{
    check_unique_tool_names, insert_opt, opt_f32, opt_str, opt_string_list, opt_u32,
    parse_arguments, parse_usage, require, require_array, require_object, require_str,
};
use crate::errors::FormatError;
use crate::models::content::{data_url, parse_data_url, ContentPart, FileData, MessageContent};
use crate::models::message::Message;
use crate::models::request::ChatRequest;
use crate::models::response::{
    ChatChunk, ChatResponse, ChunkChoice, ChunkDelta, Choice, FinishReason, FunctionCallDelta,
    ToolCallDelta, Usage,
};
use crate::models::role::Role;
use crate::models::tool::{
    FunctionCall, ToolCall, ToolChoice, ToolChoiceMode, ToolDefinition,
};

pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic messages API
pub struct AnthropicTransformer;

fn finish_from_stop_reason(stop_reason: Option<&str>) -> FinishReason {
    match stop_reason {
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        // end_turn, stop_sequence, pause_turn and anything new
        _ => FinishReason::Stop,
    }
}

fn stop_reason_from_finish(finish_reason: FinishReason) -> &'static str {
    match finish_reason {
        FinishReason::Stop => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls | FinishReason::FunctionCall => "tool_use",
        FinishReason::ContentFilter => "refusal",
    }
}

/// Flatten a string or a list of text blocks into one string
fn flatten_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn source_to_part(kind: &str, source: &Value) -> Result<ContentPart, FormatError> {
    let source_type = require_str(source, "type")?;
    match (kind, source_type) {
        ("image", "base64") => Ok(ContentPart::image_url(data_url(
            require_str(source, "media_type")?,
            require_str(source, "data")?,
        ))),
        ("image", "url") => Ok(ContentPart::image_url(require_str(source, "url")?)),
        ("document", "base64") => Ok(ContentPart::File {
            file: FileData {
                file_data: Some(data_url(
                    require_str(source, "media_type")?,
                    require_str(source, "data")?,
                )),
                ..Default::default()
            },
        }),
        ("document", "url") => Ok(ContentPart::File {
            file: FileData {
                file_id: Some(require_str(source, "url")?.to_string()),
                ..Default::default()
            },
        }),
        ("document", "text") => Ok(ContentPart::text(require_str(source, "data")?)),
        (_, "file") => Ok(ContentPart::File {
            file: FileData {
                file_id: Some(require_str(source, "file_id")?.to_string()),
                ..Default::default()
            },
        }),
        _ => Err(FormatError::Unsupported(format!(
            "{} source type '{}'",
            kind, source_type
        ))),
    }
}

fn part_to_block(part: &ContentPart) -> Result<Option<Value>, FormatError> {
    let block = match part {
        ContentPart::Text { text } | ContentPart::Refusal { refusal: text } => {
            if text.is_empty() {
                return Ok(None);
            }
            json!({"type": "text", "text": text})
        }
        ContentPart::ImageUrl { image_url } => match parse_data_url(&image_url.url) {
            Some((media_type, data)) => json!({
                "type": "image",
                "source": {"type": "base64", "media_type": media_type, "data": data}
            }),
            None => json!({
                "type": "image",
                "source": {"type": "url", "url": image_url.url}
            }),
        },
        ContentPart::File { file } => {
            if let Some((media_type, data)) = file.file_data.as_deref().and_then(parse_data_url) {
                json!({
                    "type": "document",
                    "source": {"type": "base64", "media_type": media_type, "data": data}
                })
            } else if let Some(file_id) = &file.file_id {
                if file_id.starts_with("http://") || file_id.starts_with("https://") {
                    json!({"type": "document", "source": {"type": "url", "url": file_id}})
                } else {
                    json!({"type": "document", "source": {"type": "file", "file_id": file_id}})
                }
            } else {
                return Err(FormatError::invalid("file", "needs file_data or file_id"));
            }
        }
        ContentPart::InputAudio { .. } => {
            return Err(FormatError::Unsupported("input_audio content".to_string()))
        }
    };
    Ok(Some(block))
}

fn tool_call_to_block(call: &ToolCall) -> Result<Value, FormatError> {
    match call {
        ToolCall::Function { id, function } => Ok(json!({
            "type": "tool_use",
            "id": id,
            "name": function.name,
            "input": parse_arguments(&function.arguments)?,
        })),
        ToolCall::Custom { .. } => Err(FormatError::Unsupported("custom tool calls".to_string())),
    }
}

fn tool_use_to_call(block: &Value) -> Result<ToolCall, FormatError> {
    let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
    Ok(ToolCall::Function {
        id: require_str(block, "id")?.to_string(),
        function: FunctionCall {
            name: require_str(block, "name")?.to_string(),
            arguments: input.to_string(),
        },
    })
}

/// Push a turn, merging it into the previous one when the roles match
fn push_turn(turns: &mut Vec<(&'static str, Vec<Value>)>, role: &'static str, blocks: Vec<Value>) {
    if blocks.is_empty() {
        return;
    }
    match turns.last_mut() {
        Some((last_role, last_blocks)) if *last_role == role => last_blocks.extend(blocks),
        _ => turns.push((role, blocks)),
    }
}

impl AnthropicTransformer {
    /// Split one wire message into canonical messages. Tool results become their own
    /// tool messages, ahead of whatever else the user said in that turn.
    fn message_to_canonical(index: usize, message: &Value) -> Result<Vec<Message>, FormatError> {
        let role = require_str(message, "role")?;
        let role = match role {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            other => {
                return Err(FormatError::invalid(
                    format!("messages[{}].role", index),
                    format!("unknown role '{}'", other),
                ))
            }
        };

        let blocks = match require(message, "content")? {
            Value::String(text) => return Ok(vec![Message::new(role).with_content(text.as_str())]),
            Value::Array(blocks) => blocks,
            _ => {
                return Err(FormatError::invalid(
                    format!("messages[{}].content", index),
                    "expected a string or an array of blocks",
                ))
            }
        };

        let mut tool_results = Vec::new();
        let mut parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match require_str(block, "type")? {
                "text" => parts.push(ContentPart::text(require_str(block, "text")?)),
                kind @ ("image" | "document") => {
                    parts.push(source_to_part(kind, require(block, "source")?)?)
                }
                "tool_use" if role == Role::Assistant => tool_calls.push(tool_use_to_call(block)?),
                "tool_result" if role == Role::User => {
                    let id = require_str(block, "tool_use_id")?;
                    let text = flatten_text(block.get("content").unwrap_or(&Value::Null));
                    tool_results.push(Message::tool(id).with_content(text));
                }
                "thinking" | "redacted_thinking" => {}
                other => {
                    return Err(FormatError::Unsupported(format!(
                        "'{}' block in {} message",
                        other, role
                    )))
                }
            }
        }

        let mut messages = tool_results;
        if !parts.is_empty() || !tool_calls.is_empty() || messages.is_empty() {
            let mut converted = Message::new(role);
            if !parts.is_empty() {
                converted.content = Some(MessageContent::from_parts(parts));
            }
            if !tool_calls.is_empty() {
                converted.tool_calls = Some(tool_calls);
            }
            messages.push(converted);
        }
        Ok(messages)
    }

    fn message_to_blocks(message: &Message) -> Result<Vec<Value>, FormatError> {
        let mut blocks = Vec::new();
        if let Some(content) = &message.content {
            for part in content.parts() {
                if let Some(block) = part_to_block(&part)? {
                    blocks.push(block);
                }
            }
        }
        for call in message.tool_calls() {
            blocks.push(tool_call_to_block(call)?);
        }
        Ok(blocks)
    }

    fn tool_choice_from_wire(choice: &Value) -> Result<ToolChoice, FormatError> {
        match require_str(choice, "type")? {
            "auto" => Ok(ToolChoice::Mode(ToolChoiceMode::Auto)),
            "any" => Ok(ToolChoice::Mode(ToolChoiceMode::Required)),
            "none" => Ok(ToolChoice::Mode(ToolChoiceMode::None)),
            "tool" => Ok(ToolChoice::function(require_str(choice, "name")?)),
            other => Err(FormatError::invalid(
                "tool_choice.type",
                format!("unknown tool choice '{}'", other),
            )),
        }
    }

    fn tool_choice_to_wire(choice: &ToolChoice) -> Value {
        match choice {
            ToolChoice::Mode(ToolChoiceMode::Auto) => json!({"type": "auto"}),
            ToolChoice::Mode(ToolChoiceMode::Required) => json!({"type": "any"}),
            ToolChoice::Mode(ToolChoiceMode::None) => json!({"type": "none"}),
            ToolChoice::Named(named) => json!({"type": "tool", "name": named.function.name}),
        }
    }
}

impl ProviderTransformer for AnthropicTransformer {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn request_to_canonical(&self, request: &Value) -> Result<ChatRequest, FormatError> {
        require_object(request, "request")?;
        let model = require_str(request, "model")?;
        let max_tokens = require(request, "max_tokens")?
            .as_u64()
            .ok_or_else(|| FormatError::invalid("max_tokens", "expected a positive integer"))?;

        let mut messages = Vec::new();
        if let Some(system) = request.get("system").filter(|s| !s.is_null()) {
            let system = flatten_text(system);
            if !system.is_empty() {
                messages.push(Message::system().with_content(system));
            }
        }
        for (i, message) in require_array(request, "messages")?.iter().enumerate() {
            messages.extend(Self::message_to_canonical(i, message)?);
        }

        let mut canonical = ChatRequest::new(model, messages);
        if let Some(tools) = request.get("tools").and_then(Value::as_array) {
            let tools = tools
                .iter()
                .map(|tool| {
                    Ok(ToolDefinition::function(
                        require_str(tool, "name")?,
                        opt_str(tool, "description").map(String::from),
                        tool.get("input_schema").cloned(),
                    ))
                })
                .collect::<Result<Vec<_>, FormatError>>()?;
            canonical.tools = Some(tools);
        }
        if let Some(choice) = request.get("tool_choice").filter(|c| !c.is_null()) {
            canonical.tool_choice = Some(Self::tool_choice_from_wire(choice)?);
        }
        canonical.max_tokens = Some(max_tokens.min(u32::MAX as u64) as u32);
        canonical.temperature = opt_f32(request, "temperature");
        canonical.top_p = opt_f32(request, "top_p");
        canonical.stop = opt_string_list(request, "stop_sequences");
        canonical.stream = request.get("stream").and_then(Value::as_bool);
        Ok(canonical)
    }

    fn request_from_canonical(&self, request: &ChatRequest) -> Result<Value, FormatError> {
        let mut system = Vec::new();
        let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();

        for message in &request.messages {
            match message.role {
                Role::System | Role::Developer => {
                    let text = message.text();
                    if !text.is_empty() {
                        system.push(text);
                    }
                }
                Role::User => push_turn(&mut turns, "user", Self::message_to_blocks(message)?),
                Role::Assistant => {
                    push_turn(&mut turns, "assistant", Self::message_to_blocks(message)?)
                }
                Role::Tool => {
                    let id = message
                        .tool_call_id
                        .as_deref()
                        .ok_or_else(|| FormatError::missing("tool_call_id"))?;
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": id,
                        "content": message.text(),
                    });
                    push_turn(&mut turns, "user", vec![block]);
                }
                Role::Function => {
                    return Err(FormatError::Unsupported(
                        "function role messages".to_string(),
                    ))
                }
            }
        }

        let messages: Vec<Value> = turns
            .into_iter()
            .map(|(role, blocks)| json!({"role": role, "content": blocks}))
            .collect();

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(request.model));
        payload.insert(
            "max_tokens".to_string(),
            json!(request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        );
        payload.insert("messages".to_string(), Value::Array(messages));
        if !system.is_empty() {
            payload.insert("system".to_string(), json!(system.join("\n\n")));
        }

        let tools = request.tools();
        if !tools.is_empty() {
            check_unique_tool_names(tools)?;
            let tools = tools
                .iter()
                .map(|tool| match tool {
                    ToolDefinition::Function { function } => {
                        let mut spec = json!({
                            "name": function.name,
                            "input_schema": function
                                .parameters
                                .clone()
                                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                        });
                        if let Some(description) = &function.description {
                            spec["description"] = json!(description);
                        }
                        Ok(spec)
                    }
                    ToolDefinition::Custom { .. } => {
                        Err(FormatError::Unsupported("custom tools".to_string()))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            payload.insert("tools".to_string(), Value::Array(tools));
        }
        if let Some(choice) = &request.tool_choice {
            payload.insert("tool_choice".to_string(), Self::tool_choice_to_wire(choice));
        }
        insert_opt(&mut payload, "temperature", request.temperature);
        insert_opt(&mut payload, "top_p", request.top_p);
        insert_opt(&mut payload, "stop_sequences", request.stop.clone());
        insert_opt(&mut payload, "stream", request.stream);
        Ok(Value::Object(payload))
    }

    fn response_to_canonical(&self, response: &Value) -> Result<ChatResponse, FormatError> {
        require_object(response, "response")?;
        if opt_str(response, "type") == Some("error") {
            return Err(FormatError::ErrorEvent(
                opt_str(&response["error"], "message")
                    .unwrap_or("unknown error")
                    .to_string(),
            ));
        }

        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for block in require_array(response, "content")? {
            match opt_str(block, "type") {
                Some("text") => text.push(require_str(block, "text")?),
                Some("tool_use") => tool_calls.push(tool_use_to_call(block)?),
                _ => {}
            }
        }

        let mut message = Message::assistant();
        if !text.is_empty() || tool_calls.is_empty() {
            message.content = Some(MessageContent::Text(text.join("")));
        }
        if !tool_calls.is_empty() {
            message.tool_calls = Some(tool_calls);
        }
        let finish_reason = finish_from_stop_reason(opt_str(response, "stop_reason"));

        let mut canonical = ChatResponse::new(
            require_str(response, "model")?,
            vec![Choice::new(0, message, finish_reason)],
        )
        .with_usage(parse_usage(
            response.get("usage"),
            "input_tokens",
            "output_tokens",
            "total_tokens",
        ));
        if let Some(id) = opt_str(response, "id") {
            canonical.id = id.to_string();
        }
        Ok(canonical)
    }

    fn response_from_canonical(&self, response: &ChatResponse) -> Result<Value, FormatError> {
        let (content, finish_reason) = match response.choices.first() {
            Some(choice) => {
                let mut blocks = Self::message_to_blocks(&choice.message)?;
                if blocks.is_empty() {
                    if let Some(refusal) = &choice.message.refusal {
                        blocks.push(json!({"type": "text", "text": refusal}));
                    }
                }
                (blocks, choice.finish_reason)
            }
            None => (Vec::new(), FinishReason::Stop),
        };
        let usage = response.usage.unwrap_or_default();

        Ok(json!({
            "id": response.id,
            "type": "message",
            "role": "assistant",
            "model": response.model,
            "content": content,
            "stop_reason": stop_reason_from_finish(finish_reason),
            "stop_sequence": null,
            "usage": {
                "input_tokens": usage.prompt_tokens,
                "output_tokens": usage.completion_tokens,
            }
        }))
    }

    fn chunk_to_canonical(&self, chunk: &Value) -> Result<Option<ChatChunk>, FormatError> {
        let event = require_str(chunk, "type")?;
        let (id, model, delta, finish_reason, usage) = match event {
            "message_start" => {
                let message = require(chunk, "message")?;
                let delta = ChunkDelta {
                    role: Some(Role::Assistant),
                    ..Default::default()
                };
                let usage = parse_usage(
                    message.get("usage"),
                    "input_tokens",
                    "output_tokens",
                    "total_tokens",
                );
                (
                    opt_str(message, "id").unwrap_or_default(),
                    opt_str(message, "model").unwrap_or_default(),
                    delta,
                    None,
                    usage,
                )
            }
            "content_block_start" => {
                let block = require(chunk, "content_block")?;
                if opt_str(block, "type") != Some("tool_use") {
                    return Ok(None);
                }
                let delta = ChunkDelta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: opt_u32(chunk, "index").unwrap_or(0),
                        id: opt_str(block, "id").map(String::from),
                        kind: Some("function".to_string()),
                        function: Some(FunctionCallDelta {
                            name: opt_str(block, "name").map(String::from),
                            arguments: Some(String::new()),
                        }),
                    }]),
                    ..Default::default()
                };
                ("", "", delta, None, None)
            }
            "content_block_delta" => {
                let delta = require(chunk, "delta")?;
                let delta = match opt_str(delta, "type") {
                    Some("text_delta") => ChunkDelta {
                        content: Some(require_str(delta, "text")?.to_string()),
                        ..Default::default()
                    },
                    Some("input_json_delta") => ChunkDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: opt_u32(chunk, "index").unwrap_or(0),
                            function: Some(FunctionCallDelta {
                                name: None,
                                arguments: Some(
                                    opt_str(delta, "partial_json").unwrap_or_default().to_string(),
                                ),
                            }),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    },
                    // thinking and signature deltas never reach the client
                    _ => return Ok(None),
                };
                ("", "", delta, None, None)
            }
            "message_delta" => {
                let stop_reason = chunk
                    .get("delta")
                    .and_then(|delta| opt_str(delta, "stop_reason"));
                let usage = chunk
                    .get("usage")
                    .and_then(|usage| opt_u32(usage, "output_tokens"))
                    .map(|output| Usage::new(0, output, None));
                (
                    "",
                    "",
                    ChunkDelta::default(),
                    Some(finish_from_stop_reason(stop_reason)),
                    usage,
                )
            }
            "error" => {
                return Err(FormatError::ErrorEvent(
                    chunk
                        .get("error")
                        .and_then(|error| opt_str(error, "message"))
                        .unwrap_or("unknown error")
                        .to_string(),
                ))
            }
            // ping, content_block_stop, message_stop
            _ => return Ok(None),
        };

        let mut converted = ChatChunk::new(
            id,
            model,
            vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        );
        converted.usage = usage;
        Ok(Some(converted))
    }
}
