use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::base::{Completion, CompletionOptions, InferenceClient};
use crate::errors::InferenceError;
use crate::models::message::Message;
use crate::models::request::ChatRequest;
use crate::transformers::base::ProviderTransformer;
use crate::transformers::openai::OpenAiTransformer;

pub const OPENAI_DEFAULT_HOST: &str = "https://api.openai.com";

/// Calls an OpenAI compatible chat completions endpoint
pub struct OpenAiClient {
    client: Client,
    host: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new<H: Into<String>, K: Into<String>>(host: H, api_key: K) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self {
            client,
            host: host.into(),
            api_key: api_key.into(),
        })
    }

    fn error_message(body: &Value) -> String {
        body.pointer("/error/message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| body.to_string())
    }

    async fn post(&self, payload: &Value) -> Result<Value, InferenceError> {
        let url = format!("{}/v1/chat/completions", self.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            status => {
                let body: Value = response.json().await.unwrap_or(Value::Null);
                Err(InferenceError::Status {
                    status: status.as_u16(),
                    message: Self::error_message(&body),
                })
            }
        }
    }
}

#[async_trait]
impl InferenceClient for OpenAiClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, InferenceError> {
        let mut request = ChatRequest::new(model, messages.to_vec());
        request.temperature = options.temperature;
        request.response_format = options.response_format.clone();

        let transformer = OpenAiTransformer;
        let payload = transformer.request_from_canonical(&request)?;
        let response = self.post(&payload).await?;
        let response = transformer.response_to_canonical(&response)?;

        let message = response
            .first_message()
            .ok_or(InferenceError::EmptyResponse)?;
        if message.content.is_none() {
            if let Some(refusal) = &message.refusal {
                tracing::warn!(model, refusal, "model refused to answer");
            }
        }

        let content = message.content.as_ref().map(|content| content.text());
        let structured_output = if options.expects_json() {
            content
                .as_deref()
                .and_then(|text| serde_json::from_str::<Value>(text).ok())
        } else {
            None
        };

        Ok(Completion {
            content,
            structured_output,
            usage: response.usage,
        })
    }
}
