use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::InferenceError;
use crate::models::message::Message;
use crate::models::request::{JsonSchemaFormat, ResponseFormat};
use crate::models::response::Usage;

/// Sampling and output constraints for one completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub response_format: Option<ResponseFormat>,
}

impl CompletionOptions {
    /// Temperature 0, free text output
    pub fn deterministic() -> Self {
        Self {
            temperature: Some(0.0),
            response_format: None,
        }
    }

    /// Constrain the output to a strict json schema
    pub fn with_json_schema<S: Into<String>>(mut self, name: S, schema: Value) -> Self {
        self.response_format = Some(ResponseFormat::JsonSchema {
            json_schema: JsonSchemaFormat {
                name: name.into(),
                schema,
                strict: Some(true),
            },
        });
        self
    }

    pub fn expects_json(&self) -> bool {
        matches!(
            self.response_format,
            Some(ResponseFormat::JsonObject) | Some(ResponseFormat::JsonSchema { .. })
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    /// The content parsed as JSON, when a json response format was requested and the
    /// model produced valid JSON
    pub structured_output: Option<Value>,
    pub usage: Option<Usage>,
}

impl Completion {
    pub fn text<S: Into<String>>(content: S) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn structured(output: Value) -> Self {
        Self {
            content: Some(output.to_string()),
            structured_output: Some(output),
            usage: None,
        }
    }

    /// The content with surrounding whitespace removed, empty when there is none
    pub fn trimmed_content(&self) -> String {
        self.content
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_string()
    }
}

/// A chat model the core can call, used for both dual-LLM roles
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<Completion, InferenceError>;
}

/// Builds an inference client for the api key that came with a request
pub trait ClientFactory: Send + Sync {
    fn create(&self, api_key: &str) -> Result<Arc<dyn InferenceClient>, InferenceError>;
}

/// The schema the quarantined model answers with: a single option index
pub fn multiple_choice_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "answer": {
                "type": "integer",
                "description": "The index of the selected option (0-based)"
            }
        },
        "required": ["answer"],
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_options() {
        let options = CompletionOptions::deterministic();
        assert_eq!(options.temperature, Some(0.0));
        assert!(!options.expects_json());

        let options = options.with_json_schema("multiple_choice_response", multiple_choice_schema());
        assert!(options.expects_json());
        match options.response_format {
            Some(ResponseFormat::JsonSchema { json_schema }) => {
                assert_eq!(json_schema.name, "multiple_choice_response");
                assert_eq!(json_schema.strict, Some(true));
                assert_eq!(json_schema.schema["required"], json!(["answer"]));
            }
            other => panic!("unexpected format {:?}", other),
        }
    }

    #[test]
    fn test_trimmed_content() {
        assert_eq!(Completion::text("  DONE \n").trimmed_content(), "DONE");
        assert_eq!(Completion::default().trimmed_content(), "");
        let structured = Completion::structured(json!({"answer": 1}));
        assert_eq!(structured.content.as_deref(), Some(r#"{"answer":1}"#));
    }
}
