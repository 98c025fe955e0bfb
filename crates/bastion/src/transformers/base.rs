use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::FormatError;
use crate::models::request::ChatRequest;
use crate::models::response::{ChatChunk, ChatResponse};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
/// The wire formats the gateway understands
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
}

/// Converts one provider's payloads to and from the canonical models
///
/// Implementations are pure: no I/O, and a failure never leaves a partial conversion.
pub trait ProviderTransformer: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn request_to_canonical(&self, request: &Value) -> Result<ChatRequest, FormatError>;

    fn request_from_canonical(&self, request: &ChatRequest) -> Result<Value, FormatError>;

    fn response_to_canonical(&self, response: &Value) -> Result<ChatResponse, FormatError>;

    fn response_from_canonical(&self, response: &ChatResponse) -> Result<Value, FormatError>;

    /// Convert one streamed event. Events with nothing chat relevant, like keep-alive pings,
    /// yield `None`.
    fn chunk_to_canonical(&self, chunk: &Value) -> Result<Option<ChatChunk>, FormatError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_provider_kind_names() {
        let names: Vec<String> = ProviderKind::iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["openai", "anthropic", "gemini"]);
        assert_eq!(ProviderKind::from_str("gemini").unwrap(), ProviderKind::Gemini);
        assert!(ProviderKind::from_str("bedrock").is_err());
    }
}
