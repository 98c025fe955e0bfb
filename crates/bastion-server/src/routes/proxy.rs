use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap},
    routing::post,
    Json, Router,
};
use bastion::errors::FormatError;
use bastion::transformers::{base::ProviderKind, factory::transformer_for};
use serde_json::Value;

pub const DEFAULT_AGENT_ID: &str = "default";
pub const AGENT_ID_HEADER: &str = "x-agent-id";
const GEMINI_GENERATE: &str = "generateContent";
const GEMINI_STREAM: &str = "streamGenerateContent";

/// The model key from `Authorization: Bearer`, `x-api-key` or `x-goog-api-key`
fn api_key(headers: &HeaderMap) -> Result<String, ApiError> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let key = bearer.or_else(|| {
        ["x-api-key", "x-goog-api-key"]
            .iter()
            .find_map(|name| headers.get(*name).and_then(|value| value.to_str().ok()))
    });

    match key.map(str::trim) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(ApiError::Unauthorized("Missing API key".to_string())),
    }
}

fn agent_id(from_path: Option<String>, headers: &HeaderMap) -> String {
    from_path
        .or_else(|| {
            headers
                .get(AGENT_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .map(String::from)
        })
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| DEFAULT_AGENT_ID.to_string())
}

/// Split a `{model}:{action}` path segment and check the action is served
fn gemini_model(model_action: &str) -> Result<String, ApiError> {
    match model_action.split_once(':') {
        Some((model, GEMINI_GENERATE)) if !model.is_empty() => Ok(model.to_string()),
        Some((_, GEMINI_STREAM)) => Err(ApiError::NotSupported(
            "Streaming is not supported".to_string(),
        )),
        _ => Err(ApiError::NotFound(format!(
            "Unknown Gemini action: {}",
            model_action
        ))),
    }
}

/// Run one chat request through the gateway: convert it to canonical form, filter the
/// conversation, forward it in the provider's own format and convert the answer back.
async fn proxy_chat(
    state: AppState,
    kind: ProviderKind,
    agent_id: String,
    headers: HeaderMap,
    body: Bytes,
    model: Option<String>,
) -> Result<Json<Value>, ApiError> {
    let api_key = api_key(&headers)?;
    let body: Value = serde_json::from_slice(&body).map_err(FormatError::from)?;
    let transformer = transformer_for(kind);

    let mut request = transformer.request_to_canonical(&body)?;
    if let Some(model) = model {
        request.model = model;
    }
    if request.is_stream() {
        return Err(ApiError::NotSupported(
            "Streaming is not supported".to_string(),
        ));
    }

    let context = state
        .evaluator
        .evaluate_if_context_is_trusted(&request.messages, &agent_id, &api_key)
        .await?;
    tracing::info!(
        provider = %kind,
        agent_id,
        model = %request.model,
        messages = request.messages.len(),
        context_is_trusted = context.context_is_trusted,
        "evaluated conversation"
    );
    request.messages = context.filtered_messages;

    let payload = transformer.request_from_canonical(&request)?;
    let response = state
        .upstream
        .send(kind, &request.model, &api_key, &payload)
        .await?;
    let canonical = transformer.response_to_canonical(&response)?;
    Ok(Json(transformer.response_from_canonical(&canonical)?))
}

async fn openai_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let agent = agent_id(None, &headers);
    proxy_chat(state, ProviderKind::OpenAi, agent, headers, body, None).await
}

async fn openai_chat_for_agent(
    State(state): State<AppState>,
    Path(agent): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let agent = agent_id(Some(agent), &headers);
    proxy_chat(state, ProviderKind::OpenAi, agent, headers, body, None).await
}

async fn anthropic_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let agent = agent_id(None, &headers);
    proxy_chat(state, ProviderKind::Anthropic, agent, headers, body, None).await
}

async fn anthropic_messages_for_agent(
    State(state): State<AppState>,
    Path(agent): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let agent = agent_id(Some(agent), &headers);
    proxy_chat(state, ProviderKind::Anthropic, agent, headers, body, None).await
}

async fn gemini_generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let model = gemini_model(&model_action)?;
    let agent = agent_id(None, &headers);
    proxy_chat(state, ProviderKind::Gemini, agent, headers, body, Some(model)).await
}

async fn gemini_generate_for_agent(
    State(state): State<AppState>,
    Path((agent, model_action)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let model = gemini_model(&model_action)?;
    let agent = agent_id(Some(agent), &headers);
    proxy_chat(state, ProviderKind::Gemini, agent, headers, body, Some(model)).await
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/openai/chat/completions", post(openai_chat))
        .route(
            "/v1/openai/:agent_id/chat/completions",
            post(openai_chat_for_agent),
        )
        .route("/v1/anthropic/messages", post(anthropic_messages))
        .route(
            "/v1/anthropic/:agent_id/messages",
            post(anthropic_messages_for_agent),
        )
        .route("/v1/gemini/models/:model_action", post(gemini_generate))
        .route(
            "/v1/gemini/:agent_id/models/:model_action",
            post(gemini_generate_for_agent),
        )
        .with_state(state)
}
