use serde_json::{json, Map, Value};

use super::base::{ProviderKind, ProviderTransformer};
use super::utils::{
    check_unique_tool_names, insert_opt, opt_f32, opt_str, opt_string_list, opt_u32,
    parse_arguments, parse_usage, require_array, require_object, require_str, PendingCalls,
};
use crate::errors::FormatError;
use crate::models::content::{
    data_url, parse_data_url, ContentPart, FileData, ImageUrl, InputAudio, MessageContent,
};
use crate::models::message::Message;
use crate::models::request::{ChatRequest, JsonSchemaFormat, ResponseFormat};
use crate::models::response::{
    ChatChunk, ChatResponse, ChunkChoice, ChunkDelta, Choice, FinishReason, FunctionCallDelta,
    ToolCallDelta,
};
use crate::models::role::Role;
use crate::models::tool::{
    derive_call_id, is_synthesized_call_id, FunctionCall, ToolCall, ToolChoice,
    ToolChoiceMode, ToolDefinition,
};

pub const DEFAULT_MODEL: &str = "gemini-pro";

/// Gemini generateContent
pub struct GeminiTransformer;

fn finish_from_wire(reason: Option<&str>, has_tool_calls: bool) -> FinishReason {
    match reason {
        Some("MAX_TOKENS") => FinishReason::Length,
        Some(
            "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" | "IMAGE_SAFETY",
        ) => FinishReason::ContentFilter,
        _ if has_tool_calls => FinishReason::ToolCalls,
        _ => FinishReason::Stop,
    }
}

fn finish_to_wire(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ToolCalls | FinishReason::FunctionCall => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ContentFilter => "SAFETY",
    }
}

fn audio_format(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/mp3" | "audio/mpeg" => Some("mp3"),
        _ => None,
    }
}

/// What one wire part turns into
enum Converted {
    Part(ContentPart),
    Call(ToolCall),
    Response(Message),
    Skip,
}

/// `location` names where the part sits in its payload and seeds the id of a call that
/// arrives without one
fn function_call_to_canonical(
    call: &Value,
    location: &str,
    pending: &mut PendingCalls,
) -> Result<ToolCall, FormatError> {
    let name = require_str(call, "name")?;
    let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
    let id = match opt_str(call, "id") {
        Some(id) => id.to_string(),
        None => {
            let id = derive_call_id(&format!("{}:{}:{}", location, name, args));
            pending.record(name, &id);
            id
        }
    };
    Ok(ToolCall::Function {
        id,
        function: FunctionCall {
            name: name.to_string(),
            arguments: args.to_string(),
        },
    })
}

fn part_to_canonical(
    part: &Value,
    location: &str,
    pending: &mut PendingCalls,
) -> Result<Converted, FormatError> {
    if part.get("thought").and_then(Value::as_bool) == Some(true) {
        return Ok(Converted::Skip);
    }
    if let Some(text) = part.get("text") {
        let text = text
            .as_str()
            .ok_or_else(|| FormatError::invalid("parts.text", "expected a string"))?;
        return Ok(Converted::Part(ContentPart::text(text)));
    }
    if let Some(inline) = part.get("inlineData") {
        let mime_type = require_str(inline, "mimeType")?;
        let data = require_str(inline, "data")?;
        let converted = if mime_type.starts_with("image/") {
            ContentPart::image_url(data_url(mime_type, data))
        } else if let Some(format) = audio_format(mime_type) {
            ContentPart::InputAudio {
                input_audio: InputAudio {
                    data: data.to_string(),
                    format: format.to_string(),
                },
            }
        } else {
            ContentPart::File {
                file: FileData {
                    file_data: Some(data_url(mime_type, data)),
                    ..Default::default()
                },
            }
        };
        return Ok(Converted::Part(converted));
    }
    if let Some(file) = part.get("fileData") {
        let uri = require_str(file, "fileUri")?;
        let converted = match opt_str(file, "mimeType") {
            Some(mime_type) if mime_type.starts_with("image/") => ContentPart::image_url(uri),
            _ => ContentPart::File {
                file: FileData {
                    file_id: Some(uri.to_string()),
                    ..Default::default()
                },
            },
        };
        return Ok(Converted::Part(converted));
    }
    if let Some(call) = part.get("functionCall") {
        return Ok(Converted::Call(function_call_to_canonical(
            call, location, pending,
        )?));
    }
    if let Some(response) = part.get("functionResponse") {
        let name = require_str(response, "name")?;
        let id = match opt_str(response, "id") {
            Some(id) => id.to_string(),
            // Nothing links this response to a call, provenance stays unresolvable
            None => pending
                .answer(name)
                .unwrap_or_else(|| derive_call_id(&format!("{}:{}:response", location, name))),
        };
        let payload = response.get("response").cloned().unwrap_or(Value::Null);
        return Ok(Converted::Response(
            Message::tool(id)
                .with_name(name)
                .with_content(payload.to_string()),
        ));
    }
    Err(FormatError::Unsupported(format!(
        "part with keys {:?}",
        part.as_object()
            .map(|o| o.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default()
    )))
}

fn part_to_wire(part: &ContentPart) -> Result<Option<Value>, FormatError> {
    let converted = match part {
        ContentPart::Text { text } | ContentPart::Refusal { refusal: text } => {
            if text.is_empty() {
                return Ok(None);
            }
            json!({"text": text})
        }
        ContentPart::ImageUrl {
            image_url: ImageUrl { url, .. },
        } => match parse_data_url(url) {
            Some((mime_type, data)) => json!({"inlineData": {"mimeType": mime_type, "data": data}}),
            None => json!({"fileData": {"fileUri": url}}),
        },
        ContentPart::InputAudio { input_audio } => {
            let mime_type = match input_audio.format.as_str() {
                "wav" => "audio/wav",
                "mp3" => "audio/mp3",
                other => {
                    return Err(FormatError::invalid(
                        "input_audio.format",
                        format!("unsupported audio format '{}'", other),
                    ))
                }
            };
            json!({"inlineData": {"mimeType": mime_type, "data": input_audio.data}})
        }
        ContentPart::File { file } => {
            if let Some((mime_type, data)) = file.file_data.as_deref().and_then(parse_data_url) {
                json!({"inlineData": {"mimeType": mime_type, "data": data}})
            } else if let Some(file_id) = &file.file_id {
                json!({"fileData": {"fileUri": file_id}})
            } else {
                return Err(FormatError::invalid("file", "needs file_data or file_id"));
            }
        }
    };
    Ok(Some(converted))
}

fn tool_call_to_wire(call: &ToolCall) -> Result<Value, FormatError> {
    match call {
        ToolCall::Function { id, function } => {
            let mut converted = json!({
                "name": function.name,
                "args": parse_arguments(&function.arguments)?,
            });
            if !is_synthesized_call_id(id) {
                converted["id"] = json!(id);
            }
            Ok(json!({"functionCall": converted}))
        }
        ToolCall::Custom { .. } => Err(FormatError::Unsupported("custom tool calls".to_string())),
    }
}

/// Find the function name of the call a tool result answers, scanning back from `position`
fn resolve_call_name<'a>(messages: &'a [Message], position: usize, id: &str) -> Option<&'a str> {
    messages[..position]
        .iter()
        .rev()
        .filter(|message| message.role == Role::Assistant)
        .find_map(|message| message.find_tool_call(id))
        .map(ToolCall::name)
}

fn function_response_to_wire(name: &str, id: &str, content: &str) -> Value {
    let response = match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(object)) => Value::Object(object),
        Ok(other) => json!({"content": other}),
        Err(_) => json!({"content": content}),
    };
    let mut converted = json!({"name": name, "response": response});
    if !is_synthesized_call_id(id) {
        converted["id"] = json!(id);
    }
    json!({"functionResponse": converted})
}

fn push_turn(turns: &mut Vec<(&'static str, Vec<Value>)>, role: &'static str, parts: Vec<Value>) {
    if parts.is_empty() {
        return;
    }
    match turns.last_mut() {
        Some((last_role, last_parts)) if *last_role == role => last_parts.extend(parts),
        _ => turns.push((role, parts)),
    }
}

impl GeminiTransformer {
    fn content_to_canonical(
        index: usize,
        content: &Value,
        pending: &mut PendingCalls,
    ) -> Result<Vec<Message>, FormatError> {
        let role = match opt_str(content, "role").unwrap_or("user") {
            "user" => Role::User,
            "model" => Role::Assistant,
            "function" => Role::Tool,
            other => {
                return Err(FormatError::invalid(
                    format!("contents[{}].role", index),
                    format!("unknown role '{}'", other),
                ))
            }
        };

        let mut parts = Vec::new();
        let mut calls = Vec::new();
        let mut responses = Vec::new();
        for (part_index, part) in require_array(content, "parts")?.iter().enumerate() {
            let location = format!("contents[{}].parts[{}]", index, part_index);
            match part_to_canonical(part, &location, pending)? {
                Converted::Part(part) => parts.push(part),
                Converted::Call(call) => calls.push(call),
                Converted::Response(message) => responses.push(message),
                Converted::Skip => {}
            }
        }

        // Tool results are their own turns, ahead of anything else said in this content
        let mut messages = responses;
        let speaker = if role == Role::Assistant {
            Role::Assistant
        } else {
            Role::User
        };
        if !calls.is_empty() && speaker != Role::Assistant {
            return Err(FormatError::invalid(
                format!("contents[{}].parts", index),
                "functionCall is only valid in model turns",
            ));
        }
        if !parts.is_empty() || !calls.is_empty() {
            let mut message = Message::new(speaker);
            if !parts.is_empty() {
                message.content = Some(MessageContent::from_parts(parts));
            }
            if !calls.is_empty() {
                message.tool_calls = Some(calls);
            }
            messages.push(message);
        }
        Ok(messages)
    }

    fn tool_choice_from_wire(config: &Value) -> Option<ToolChoice> {
        let config = config.get("functionCallingConfig")?;
        let allowed = config
            .get("allowedFunctionNames")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        match opt_str(config, "mode")? {
            "AUTO" => Some(ToolChoice::Mode(ToolChoiceMode::Auto)),
            "NONE" => Some(ToolChoice::Mode(ToolChoiceMode::None)),
            "ANY" => match allowed {
                [only] => only.as_str().map(ToolChoice::function),
                _ => Some(ToolChoice::Mode(ToolChoiceMode::Required)),
            },
            _ => None,
        }
    }

    fn tool_choice_to_wire(choice: &ToolChoice) -> Value {
        let config = match choice {
            ToolChoice::Mode(ToolChoiceMode::Auto) => json!({"mode": "AUTO"}),
            ToolChoice::Mode(ToolChoiceMode::Required) => json!({"mode": "ANY"}),
            ToolChoice::Mode(ToolChoiceMode::None) => json!({"mode": "NONE"}),
            ToolChoice::Named(named) => {
                json!({"mode": "ANY", "allowedFunctionNames": [named.function.name]})
            }
        };
        json!({"functionCallingConfig": config})
    }

    fn candidate_to_message(
        candidate: &Value,
        location: &str,
        pending: &mut PendingCalls,
    ) -> Result<Message, FormatError> {
        let mut message = Message::assistant();
        let mut text = Vec::new();
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for (part_index, part) in parts.iter().enumerate() {
            if part.get("thought").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            if let Some(part_text) = opt_str(part, "text") {
                text.push(part_text);
            } else if let Some(call) = part.get("functionCall") {
                let location = format!("{}.parts[{}]", location, part_index);
                message =
                    message.with_tool_call(function_call_to_canonical(call, &location, pending)?);
            }
        }
        if !text.is_empty() || !message.has_tool_calls() {
            message.content = Some(MessageContent::Text(text.join("")));
        }
        Ok(message)
    }

    fn blocked_choice(response: &Value) -> Choice {
        match response
            .get("promptFeedback")
            .and_then(|feedback| opt_str(feedback, "blockReason"))
        {
            Some(reason) => Choice::refusal(reason, FinishReason::ContentFilter),
            None => Choice::refusal("blocked", FinishReason::Stop),
        }
    }

    fn candidates(response: &Value) -> &[Value] {
        response
            .get("candidates")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl ProviderTransformer for GeminiTransformer {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn request_to_canonical(&self, request: &Value) -> Result<ChatRequest, FormatError> {
        require_object(request, "request")?;
        let contents = require_array(request, "contents")?;
        let model = opt_str(request, "model")
            .map(|model| model.trim_start_matches("models/"))
            .unwrap_or(DEFAULT_MODEL);

        let mut messages = Vec::new();
        if let Some(instruction) = request.get("systemInstruction").filter(|v| !v.is_null()) {
            let text = match instruction {
                Value::String(text) => text.clone(),
                other => other
                    .get("parts")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|part| opt_str(part, "text"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            };
            if !text.is_empty() {
                messages.push(Message::system().with_content(text));
            }
        }

        let mut pending = PendingCalls::default();
        for (i, content) in contents.iter().enumerate() {
            messages.extend(Self::content_to_canonical(i, content, &mut pending)?);
        }

        let mut canonical = ChatRequest::new(model, messages);

        let declarations: Vec<ToolDefinition> = request
            .get("tools")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|tool| tool.get("functionDeclarations").and_then(Value::as_array))
            .flatten()
            .map(|declaration| {
                Ok(ToolDefinition::function(
                    require_str(declaration, "name")?,
                    opt_str(declaration, "description").map(String::from),
                    declaration.get("parameters").cloned(),
                ))
            })
            .collect::<Result<_, FormatError>>()?;
        if !declarations.is_empty() {
            canonical.tools = Some(declarations);
        }
        canonical.tool_choice = request
            .get("toolConfig")
            .and_then(Self::tool_choice_from_wire);

        if let Some(config) = request.get("generationConfig") {
            canonical.temperature = opt_f32(config, "temperature");
            canonical.top_p = opt_f32(config, "topP");
            canonical.max_tokens = opt_u32(config, "maxOutputTokens");
            canonical.stop = opt_string_list(config, "stopSequences");
            if opt_str(config, "responseMimeType") == Some("application/json") {
                canonical.response_format = Some(match config.get("responseSchema") {
                    Some(schema) => ResponseFormat::JsonSchema {
                        json_schema: JsonSchemaFormat {
                            name: "response".to_string(),
                            schema: schema.clone(),
                            strict: None,
                        },
                    },
                    None => ResponseFormat::JsonObject,
                });
            }
        }
        Ok(canonical)
    }

    fn request_from_canonical(&self, request: &ChatRequest) -> Result<Value, FormatError> {
        let leading = request
            .messages
            .iter()
            .take_while(|message| message.role.is_instruction())
            .count();
        let instructions: Vec<Value> = request.messages[..leading]
            .iter()
            .map(|message| message.text())
            .filter(|text| !text.is_empty())
            .map(|text| json!({"text": text}))
            .collect();

        let mut turns: Vec<(&'static str, Vec<Value>)> = Vec::new();
        for (position, message) in request.messages.iter().enumerate().skip(leading) {
            match message.role {
                Role::System | Role::Developer | Role::User => {
                    let mut parts = Vec::new();
                    if let Some(content) = &message.content {
                        for part in content.parts() {
                            parts.extend(part_to_wire(&part)?);
                        }
                    }
                    push_turn(&mut turns, "user", parts);
                }
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if let Some(content) = &message.content {
                        for part in content.parts() {
                            parts.extend(part_to_wire(&part)?);
                        }
                    }
                    for call in message.tool_calls() {
                        parts.push(tool_call_to_wire(call)?);
                    }
                    push_turn(&mut turns, "model", parts);
                }
                Role::Tool => {
                    let id = message
                        .tool_call_id
                        .as_deref()
                        .ok_or_else(|| FormatError::missing("tool_call_id"))?;
                    let name = resolve_call_name(&request.messages, position, id).ok_or_else(|| {
                        FormatError::invalid(
                            "tool_call_id",
                            format!("no preceding tool call with id '{}'", id),
                        )
                    })?;
                    let part = function_response_to_wire(name, id, &message.text());
                    push_turn(&mut turns, "function", vec![part]);
                }
                Role::Function => {
                    let name = message
                        .name
                        .as_deref()
                        .ok_or_else(|| FormatError::missing("name"))?;
                    let part = json!({"functionResponse": {
                        "name": name,
                        "response": {"content": message.text()},
                    }});
                    push_turn(&mut turns, "function", vec![part]);
                }
            }
        }

        let contents: Vec<Value> = turns
            .into_iter()
            .map(|(role, parts)| json!({"role": role, "parts": parts}))
            .collect();

        let mut payload = Map::new();
        payload.insert("contents".to_string(), Value::Array(contents));
        if !instructions.is_empty() {
            payload.insert(
                "systemInstruction".to_string(),
                json!({"parts": instructions}),
            );
        }

        let tools = request.tools();
        if !tools.is_empty() {
            check_unique_tool_names(tools)?;
            let declarations = tools
                .iter()
                .map(|tool| match tool {
                    ToolDefinition::Function { function } => {
                        let mut declaration = json!({"name": function.name});
                        if let Some(description) = &function.description {
                            declaration["description"] = json!(description);
                        }
                        if let Some(parameters) = &function.parameters {
                            declaration["parameters"] = parameters.clone();
                        }
                        Ok(declaration)
                    }
                    ToolDefinition::Custom { .. } => {
                        Err(FormatError::Unsupported("custom tools".to_string()))
                    }
                })
                .collect::<Result<Vec<_>, _>>()?;
            payload.insert(
                "tools".to_string(),
                json!([{"functionDeclarations": declarations}]),
            );
        }
        if let Some(choice) = &request.tool_choice {
            payload.insert("toolConfig".to_string(), Self::tool_choice_to_wire(choice));
        }

        let mut generation = Map::new();
        insert_opt(&mut generation, "temperature", request.temperature);
        insert_opt(&mut generation, "topP", request.top_p);
        insert_opt(&mut generation, "maxOutputTokens", request.max_tokens);
        insert_opt(&mut generation, "stopSequences", request.stop.clone());
        match &request.response_format {
            Some(ResponseFormat::JsonObject) => {
                generation.insert("responseMimeType".to_string(), json!("application/json"));
            }
            Some(ResponseFormat::JsonSchema { json_schema }) => {
                generation.insert("responseMimeType".to_string(), json!("application/json"));
                generation.insert("responseSchema".to_string(), json_schema.schema.clone());
            }
            Some(ResponseFormat::Text) | None => {}
        }
        if !generation.is_empty() {
            payload.insert("generationConfig".to_string(), Value::Object(generation));
        }
        Ok(Value::Object(payload))
    }

    fn response_to_canonical(&self, response: &Value) -> Result<ChatResponse, FormatError> {
        require_object(response, "response")?;
        if let Some(error) = response.get("error") {
            return Err(FormatError::ErrorEvent(
                opt_str(error, "message").unwrap_or("unknown error").to_string(),
            ));
        }

        let mut pending = PendingCalls::default();
        let candidates = Self::candidates(response);
        let choices = if candidates.is_empty() {
            vec![Self::blocked_choice(response)]
        } else {
            candidates
                .iter()
                .enumerate()
                .map(|(i, candidate)| {
                    let location = format!(
                        "{}/candidates[{}]",
                        opt_str(response, "responseId").unwrap_or_default(),
                        i
                    );
                    let message = Self::candidate_to_message(candidate, &location, &mut pending)?;
                    let finish_reason =
                        finish_from_wire(opt_str(candidate, "finishReason"), message.has_tool_calls());
                    Ok(Choice::new(
                        opt_u32(candidate, "index").unwrap_or(i as u32),
                        message,
                        finish_reason,
                    ))
                })
                .collect::<Result<Vec<_>, FormatError>>()?
        };

        let mut canonical = ChatResponse::new(
            opt_str(response, "modelVersion").unwrap_or(DEFAULT_MODEL),
            choices,
        )
        .with_usage(parse_usage(
            response.get("usageMetadata"),
            "promptTokenCount",
            "candidatesTokenCount",
            "totalTokenCount",
        ));
        if let Some(id) = opt_str(response, "responseId") {
            canonical.id = id.to_string();
        }
        Ok(canonical)
    }

    fn response_from_canonical(&self, response: &ChatResponse) -> Result<Value, FormatError> {
        let mut payload = Map::new();

        // A lone refusal with nothing else is how a blocked prompt comes back
        let blocked = match response.choices.as_slice() {
            [choice]
                if choice.finish_reason == FinishReason::ContentFilter
                    && choice.message.content.as_ref().map_or(true, |c| c.is_empty())
                    && !choice.message.has_tool_calls() =>
            {
                choice.message.refusal.as_deref()
            }
            _ => None,
        };

        if let Some(reason) = blocked {
            payload.insert("candidates".to_string(), json!([]));
            payload.insert("promptFeedback".to_string(), json!({"blockReason": reason}));
        } else {
            let candidates = response
                .choices
                .iter()
                .map(|choice| {
                    let mut parts = Vec::new();
                    if let Some(content) = &choice.message.content {
                        for part in content.parts() {
                            parts.extend(part_to_wire(&part)?);
                        }
                    }
                    if parts.is_empty() {
                        if let Some(refusal) = &choice.message.refusal {
                            parts.push(json!({"text": refusal}));
                        }
                    }
                    for call in choice.message.tool_calls() {
                        parts.push(tool_call_to_wire(call)?);
                    }
                    Ok(json!({
                        "content": {"role": "model", "parts": parts},
                        "finishReason": finish_to_wire(choice.finish_reason),
                        "index": choice.index,
                    }))
                })
                .collect::<Result<Vec<_>, FormatError>>()?;
            payload.insert("candidates".to_string(), Value::Array(candidates));
        }

        if let Some(usage) = &response.usage {
            payload.insert(
                "usageMetadata".to_string(),
                json!({
                    "promptTokenCount": usage.prompt_tokens,
                    "candidatesTokenCount": usage.completion_tokens,
                    "totalTokenCount": usage.total_tokens,
                }),
            );
        }
        payload.insert("modelVersion".to_string(), json!(response.model));
        payload.insert("responseId".to_string(), json!(response.id));
        Ok(Value::Object(payload))
    }

    fn chunk_to_canonical(&self, chunk: &Value) -> Result<Option<ChatChunk>, FormatError> {
        require_object(chunk, "chunk")?;
        if let Some(error) = chunk.get("error") {
            return Err(FormatError::ErrorEvent(
                opt_str(error, "message").unwrap_or("unknown error").to_string(),
            ));
        }

        let mut pending = PendingCalls::default();
        let candidates = Self::candidates(chunk);
        let mut choices = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            let location = format!(
                "{}/candidates[{}]",
                opt_str(chunk, "responseId").unwrap_or_default(),
                i
            );
            let message = Self::candidate_to_message(candidate, &location, &mut pending)?;
            let finish_reason = opt_str(candidate, "finishReason")
                .map(|reason| finish_from_wire(Some(reason), message.has_tool_calls()));
            let tool_calls: Vec<ToolCallDelta> = message
                .tool_calls()
                .iter()
                .enumerate()
                .map(|(index, call)| ToolCallDelta {
                    index: index as u32,
                    id: Some(call.id().to_string()),
                    kind: Some("function".to_string()),
                    function: Some(FunctionCallDelta {
                        name: Some(call.name().to_string()),
                        arguments: Some(call.raw_arguments().to_string()),
                    }),
                })
                .collect();
            let text = message.text();
            choices.push(ChunkChoice {
                index: opt_u32(candidate, "index").unwrap_or(i as u32),
                delta: ChunkDelta {
                    role: Some(Role::Assistant),
                    content: (!text.is_empty()).then_some(text),
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    refusal: None,
                },
                finish_reason,
            });
        }

        if choices.is_empty() {
            if chunk.get("promptFeedback").is_some() {
                let blocked = Self::blocked_choice(chunk);
                choices.push(ChunkChoice {
                    index: 0,
                    delta: ChunkDelta {
                        role: Some(Role::Assistant),
                        refusal: blocked.message.refusal,
                        ..Default::default()
                    },
                    finish_reason: Some(blocked.finish_reason),
                });
            } else if chunk.get("usageMetadata").is_none() {
                return Ok(None);
            }
        }

        let mut converted = ChatChunk::new(
            opt_str(chunk, "responseId").unwrap_or_default(),
            opt_str(chunk, "modelVersion").unwrap_or(DEFAULT_MODEL),
            choices,
        );
        converted.usage = parse_usage(
            chunk.get("usageMetadata"),
            "promptTokenCount",
            "candidatesTokenCount",
            "totalTokenCount",
        );
        Ok(Some(converted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::response::Usage;

    fn roles(request: &ChatRequest) -> Vec<Role> {
        request.messages.iter().map(|m| m.role).collect()
    }

    #[test]
    fn test_mixed_parts_are_decomposed() {
        let request = json!({
            "systemInstruction": {"parts": [{"text": "You are helpful"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "Read a.txt"}]},
                {"role": "model", "parts": [
                    {"text": "Reading it now"},
                    {"functionCall": {"name": "read_file", "args": {"path": "a.txt"}}}
                ]},
                {"role": "function", "parts": [
                    {"functionResponse": {"name": "read_file", "response": {"content": "hi"}}}
                ]}
            ]
        });

        let canonical = GeminiTransformer.request_to_canonical(&request).unwrap();
        assert_eq!(canonical.model, DEFAULT_MODEL);
        assert_eq!(
            roles(&canonical),
            vec![Role::System, Role::User, Role::Assistant, Role::Tool]
        );

        let assistant = &canonical.messages[2];
        assert_eq!(assistant.text(), "Reading it now");
        let call = &assistant.tool_calls()[0];
        assert!(is_synthesized_call_id(call.id()));

        // the response links back to the synthesized call id
        let tool = &canonical.messages[3];
        assert_eq!(tool.tool_call_id.as_deref(), Some(call.id()));
        assert_eq!(tool.text(), r#"{"content":"hi"}"#);
    }

    #[test]
    fn test_function_responses_link_in_order() {
        let request = json!({
            "contents": [
                {"role": "model", "parts": [
                    {"functionCall": {"name": "lookup", "args": {"q": "a"}}},
                    {"functionCall": {"name": "lookup", "args": {"q": "b"}}}
                ]},
                {"role": "user", "parts": [
                    {"functionResponse": {"name": "lookup", "response": {"r": "a"}}},
                    {"functionResponse": {"name": "lookup", "response": {"r": "b"}}},
                    {"functionResponse": {"name": "other", "response": {}}}
                ]}
            ]
        });
        let canonical = GeminiTransformer.request_to_canonical(&request).unwrap();
        let calls = canonical.messages[0].tool_calls();
        assert_eq!(canonical.messages[1].tool_call_id.as_deref(), Some(calls[0].id()));
        assert_eq!(canonical.messages[2].tool_call_id.as_deref(), Some(calls[1].id()));

        // an unmatched response gets an id no call carries
        let orphan = canonical.messages[3].tool_call_id.as_deref().unwrap();
        assert!(is_synthesized_call_id(orphan));
        assert!(canonical.messages[0].find_tool_call(orphan).is_none());
    }

    #[test]
    fn test_synthesized_ids_survive_reconversion() {
        let request = json!({
            "contents": [
                {"role": "user", "parts": [{"text": "Look up a and b"}]},
                {"role": "model", "parts": [
                    {"functionCall": {"name": "lookup", "args": {"q": "a"}}},
                    {"functionCall": {"name": "lookup", "args": {"q": "a"}}}
                ]},
                {"role": "user", "parts": [
                    {"functionResponse": {"name": "lookup", "response": {"r": "a"}}},
                    {"functionResponse": {"name": "lookup", "response": {"r": "a"}}},
                    {"functionResponse": {"name": "orphan", "response": {}}}
                ]}
            ]
        });
        let first = GeminiTransformer.request_to_canonical(&request).unwrap();
        let second = GeminiTransformer.request_to_canonical(&request).unwrap();
        assert_eq!(first.messages, second.messages);

        // identical calls at different positions still get distinct ids
        let calls = first.messages[1].tool_calls();
        assert_ne!(calls[0].id(), calls[1].id());
        assert_eq!(first.messages[2].tool_call_id.as_deref(), Some(calls[0].id()));
        assert_eq!(first.messages[3].tool_call_id.as_deref(), Some(calls[1].id()));
    }

    #[test]
    fn test_native_ids_are_kept() {
        let request = json!({
            "contents": [
                {"role": "model", "parts": [{"functionCall": {"id": "fc_1", "name": "f", "args": {}}}]},
                {"role": "user", "parts": [{"functionResponse": {"id": "fc_1", "name": "f", "response": {}}}]}
            ]
        });
        let canonical = GeminiTransformer.request_to_canonical(&request).unwrap();
        assert_eq!(canonical.messages[0].tool_calls()[0].id(), "fc_1");
        assert_eq!(canonical.messages[1].tool_call_id.as_deref(), Some("fc_1"));

        let back = GeminiTransformer.request_from_canonical(&canonical).unwrap();
        assert_eq!(back["contents"][0]["parts"][0]["functionCall"]["id"], "fc_1");
    }

    #[test]
    fn test_role_totality() {
        let request = json!({
            "contents": [
                {"role": "user", "parts": [{"text": "q"}]},
                {"role": "model", "parts": [{"functionCall": {"name": "f", "args": {}}}]},
                {"role": "function", "parts": [{"functionResponse": {"name": "f", "response": {"ok": true}}}]},
                {"role": "model", "parts": [{"text": "done"}]}
            ]
        });
        let canonical = GeminiTransformer.request_to_canonical(&request).unwrap();
        let back = GeminiTransformer.request_from_canonical(&canonical).unwrap();
        let back_roles: Vec<&str> = back["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(back_roles, vec!["user", "model", "function", "model"]);
        assert_eq!(
            back["contents"][2]["parts"][0]["functionResponse"]["response"],
            json!({"ok": true})
        );
    }

    #[test]
    fn test_system_hoisting() {
        let request = ChatRequest::new(
            "gemini-1.5-pro",
            vec![
                Message::system().with_text("First"),
                Message::developer().with_text("Second"),
                Message::user().with_text("Hello"),
                Message::system().with_text("Late rule"),
            ],
        );
        let payload = GeminiTransformer.request_from_canonical(&request).unwrap();
        assert_eq!(
            payload["systemInstruction"],
            json!({"parts": [{"text": "First"}, {"text": "Second"}]})
        );
        // the late system message merges into the user turn
        assert_eq!(payload["contents"].as_array().unwrap().len(), 1);
        assert_eq!(payload["contents"][0]["parts"][1]["text"], "Late rule");
    }

    #[test]
    fn test_unresolvable_tool_result() {
        let request = ChatRequest::new(
            "gemini-pro",
            vec![Message::tool("call_missing").with_text("{}")],
        );
        assert!(GeminiTransformer.request_from_canonical(&request).is_err());
    }

    #[test]
    fn test_media_parts() {
        let request = json!({
            "contents": [{"role": "user", "parts": [
                {"inlineData": {"mimeType": "image/png", "data": "AAAA"}},
                {"inlineData": {"mimeType": "audio/wav", "data": "BBBB"}},
                {"inlineData": {"mimeType": "application/pdf", "data": "CCCC"}},
                {"fileData": {"mimeType": "video/mp4", "fileUri": "gs://bucket/v.mp4"}}
            ]}]
        });
        let canonical = GeminiTransformer.request_to_canonical(&request).unwrap();
        let parts = canonical.messages[0].content.as_ref().unwrap().parts();
        assert!(matches!(&parts[0], ContentPart::ImageUrl { image_url } if image_url.url == "data:image/png;base64,AAAA"));
        assert!(matches!(&parts[1], ContentPart::InputAudio { input_audio } if input_audio.format == "wav"));
        assert!(matches!(&parts[2], ContentPart::File { file } if file.file_data.is_some()));
        assert!(matches!(&parts[3], ContentPart::File { file } if file.file_id.as_deref() == Some("gs://bucket/v.mp4")));

        let back = GeminiTransformer.request_from_canonical(&canonical).unwrap();
        assert_eq!(
            back["contents"][0]["parts"][0],
            json!({"inlineData": {"mimeType": "image/png", "data": "AAAA"}})
        );
        assert_eq!(
            back["contents"][0]["parts"][3],
            json!({"fileData": {"fileUri": "gs://bucket/v.mp4"}})
        );
    }

    #[test]
    fn test_generation_config_and_tool_config() {
        let request = json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "tools": [{"functionDeclarations": [{"name": "f", "description": "does f"}]}],
            "toolConfig": {"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": ["f"]}},
            "generationConfig": {"temperature": 0.5, "maxOutputTokens": 64, "stopSequences": ["x"]}
        });
        let canonical = GeminiTransformer.request_to_canonical(&request).unwrap();
        assert_eq!(canonical.tools()[0].name(), "f");
        assert_eq!(canonical.tool_choice, Some(ToolChoice::function("f")));
        assert_eq!(canonical.temperature, Some(0.5));
        assert_eq!(canonical.max_tokens, Some(64));

        let back = GeminiTransformer.request_from_canonical(&canonical).unwrap();
        assert_eq!(back["generationConfig"]["maxOutputTokens"], 64);
        assert_eq!(
            back["toolConfig"]["functionCallingConfig"]["allowedFunctionNames"],
            json!(["f"])
        );
    }

    #[test]
    fn test_response_round_trip() {
        let response = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Hello"}]},
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 1, "totalTokenCount": 5},
            "modelVersion": "gemini-1.5-flash",
            "responseId": "resp_1"
        });
        let canonical = GeminiTransformer.response_to_canonical(&response).unwrap();
        assert_eq!(canonical.id, "resp_1");
        assert_eq!(canonical.model, "gemini-1.5-flash");
        assert_eq!(canonical.choices[0].message.text(), "Hello");
        assert_eq!(canonical.usage, Some(Usage::new(4, 1, Some(5))));

        let back = GeminiTransformer.response_from_canonical(&canonical).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_function_call_response() {
        let response = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"functionCall": {"name": "read_file", "args": {"path": "a"}}}
                ]},
                "finishReason": "STOP"
            }]
        });
        let canonical = GeminiTransformer.response_to_canonical(&response).unwrap();
        assert_eq!(canonical.choices[0].finish_reason, FinishReason::ToolCalls);
        assert!(canonical.choices[0].message.content.is_none());
    }

    #[test]
    fn test_no_candidates_placeholder() {
        let canonical = GeminiTransformer
            .response_to_canonical(&json!({"promptFeedback": {"blockReason": "SAFETY"}}))
            .unwrap();
        assert_eq!(canonical.choices.len(), 1);
        let choice = &canonical.choices[0];
        assert_eq!(choice.message.role, Role::Assistant);
        assert_eq!(choice.message.refusal.as_deref(), Some("SAFETY"));
        assert_eq!(choice.finish_reason, FinishReason::ContentFilter);

        let back = GeminiTransformer.response_from_canonical(&canonical).unwrap();
        assert_eq!(back["candidates"], json!([]));
        assert_eq!(back["promptFeedback"]["blockReason"], "SAFETY");

        let unexplained = GeminiTransformer.response_to_canonical(&json!({})).unwrap();
        assert_eq!(
            unexplained.choices[0].message.refusal.as_deref(),
            Some("blocked")
        );
    }

    #[test]
    fn test_finish_reason_closure() {
        for (wire, expected) in [
            ("STOP", FinishReason::Stop),
            ("MAX_TOKENS", FinishReason::Length),
            ("SAFETY", FinishReason::ContentFilter),
            ("RECITATION", FinishReason::ContentFilter),
            ("SPII", FinishReason::ContentFilter),
            ("OTHER", FinishReason::Stop),
            ("FINISH_REASON_UNSPECIFIED", FinishReason::Stop),
            ("SOMETHING_NEW", FinishReason::Stop),
        ] {
            assert_eq!(finish_from_wire(Some(wire), false), expected);
        }
        for reason in [
            FinishReason::Stop,
            FinishReason::Length,
            FinishReason::ToolCalls,
            FinishReason::ContentFilter,
            FinishReason::FunctionCall,
        ] {
            assert!(["STOP", "MAX_TOKENS", "SAFETY"].contains(&finish_to_wire(reason)));
        }
    }

    #[test]
    fn test_stream_chunk() {
        let chunk = GeminiTransformer
            .chunk_to_canonical(&json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}, "index": 0}],
                "modelVersion": "gemini-1.5-flash"
            }))
            .unwrap()
            .unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("Hel"));
        assert!(chunk.choices[0].finish_reason.is_none());

        assert!(GeminiTransformer
            .chunk_to_canonical(&json!({}))
            .unwrap()
            .is_none());
    }
}
