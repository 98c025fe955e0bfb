use std::time::Duration;

use bastion::errors::InferenceError;
use bastion::transformers::base::ProviderKind;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

use crate::configuration::UpstreamSettings;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Forwards provider shaped requests to the real provider endpoints
pub struct Upstream {
    client: Client,
    settings: UpstreamSettings,
}

impl Upstream {
    pub fn new(settings: UpstreamSettings) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;
        Ok(Self { client, settings })
    }

    fn request(&self, kind: ProviderKind, model: &str, api_key: &str) -> RequestBuilder {
        match kind {
            ProviderKind::OpenAi => self
                .client
                .post(format!(
                    "{}/v1/chat/completions",
                    self.settings.openai_host.trim_end_matches('/')
                ))
                .bearer_auth(api_key),
            ProviderKind::Anthropic => self
                .client
                .post(format!(
                    "{}/v1/messages",
                    self.settings.anthropic_host.trim_end_matches('/')
                ))
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            ProviderKind::Gemini => self
                .client
                .post(format!(
                    "{}/v1beta/models/{}:generateContent",
                    self.settings.gemini_host.trim_end_matches('/'),
                    model
                ))
                .header("x-goog-api-key", api_key),
        }
    }

    /// Pull a readable message out of any of the three providers' error bodies
    fn error_message(body: &Value, fallback: &str) -> String {
        body.pointer("/error/message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| fallback.to_string())
    }

    pub async fn send(
        &self,
        kind: ProviderKind,
        model: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<Value, InferenceError> {
        tracing::debug!(provider = %kind, model, "forwarding request upstream");
        let response = self
            .request(kind, model, api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        tracing::warn!(provider = %kind, status = status.as_u16(), "upstream returned an error");
        Err(InferenceError::Status {
            status: status.as_u16(),
            message: Self::error_message(&body, &text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(uri: &str) -> UpstreamSettings {
        UpstreamSettings {
            openai_host: uri.to_string(),
            anthropic_host: uri.to_string(),
            gemini_host: uri.to_string(),
        }
    }

    #[tokio::test]
    async fn test_provider_endpoints_and_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-openai"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"provider": "openai"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"provider": "anthropic"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
            .and(header("x-goog-api-key", "goog-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"provider": "gemini"})))
            .mount(&server)
            .await;

        let upstream = Upstream::new(settings(&server.uri())).unwrap();
        let payload = json!({});
        for (kind, model, key) in [
            (ProviderKind::OpenAi, "gpt-4o", "sk-openai"),
            (ProviderKind::Anthropic, "claude", "sk-ant"),
            (ProviderKind::Gemini, "gemini-1.5-pro", "goog-key"),
        ] {
            let body = upstream.send(kind, model, key, &payload).await.unwrap();
            assert_eq!(body["provider"], kind.to_string());
        }
    }

    #[tokio::test]
    async fn test_error_status_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_json(json!({
                "type": "error",
                "error": {"type": "overloaded_error", "message": "Overloaded"}
            })))
            .mount(&server)
            .await;

        let upstream = Upstream::new(settings(&server.uri())).unwrap();
        let err = upstream
            .send(ProviderKind::Anthropic, "claude", "key", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 529);
        assert!(err.to_string().contains("Overloaded"));
    }
}
