use std::sync::Arc;

use super::base::{ClientFactory, InferenceClient};
use super::openai::{OpenAiClient, OPENAI_DEFAULT_HOST};
use crate::errors::InferenceError;

/// Builds [`OpenAiClient`]s against one host, keyed by the caller's api key
#[derive(Debug, Clone)]
pub struct OpenAiClientFactory {
    host: String,
}

impl OpenAiClientFactory {
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self { host: host.into() }
    }
}

impl Default for OpenAiClientFactory {
    fn default() -> Self {
        Self::new(OPENAI_DEFAULT_HOST)
    }
}

impl ClientFactory for OpenAiClientFactory {
    fn create(&self, api_key: &str) -> Result<Arc<dyn InferenceClient>, InferenceError> {
        Ok(Arc::new(OpenAiClient::new(self.host.clone(), api_key)?))
    }
}

/// Hands out the same client for every api key
pub struct SharedClientFactory {
    client: Arc<dyn InferenceClient>,
}

impl SharedClientFactory {
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self { client }
    }
}

impl ClientFactory for SharedClientFactory {
    fn create(&self, _api_key: &str) -> Result<Arc<dyn InferenceClient>, InferenceError> {
        Ok(Arc::clone(&self.client))
    }
}
