//! Decides what the upstream model may see of a conversation
//!
//! Every tool result is classified against the calling agent's trusted-data policies.
//! Blocked results are redacted. With dual-LLM analysis enabled every other result is
//! replaced by a quarantine summary, cached per tool call id so a result is analysed at
//! most once.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::dual_llm::events::{QuarantineObserver, TracingObserver};
use crate::dual_llm::subagent::{tool_result_data, DualLlmSubagent};
use crate::errors::{DualLlmError, InferenceError, TrustedContextError};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::policy::evaluator::TrustPolicyEvaluator;
use crate::policy::rule::UnmatchedToolTrust;
use crate::providers::base::{ClientFactory, InferenceClient};
use crate::stores::{DualLlmConfigStore, DualLlmResultStore, PolicyStore};

/// Redaction notice for a blocked tool result
pub fn blocked_notice(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => format!("[Content blocked by policy: {}]", reason),
        None => "[Content blocked by policy]".to_string(),
    }
}

/// Find the tool that produced a result by scanning backward from the result for the
/// assistant message that issued the call
pub fn resolve_tool_name<'a>(
    messages: &'a [Message],
    position: usize,
    tool_call_id: &str,
) -> Option<&'a str> {
    messages[..position.min(messages.len())]
        .iter()
        .rev()
        .filter(|message| message.role == Role::Assistant)
        .find_map(|message| message.find_tool_call(tool_call_id))
        .map(|call| call.name())
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrustedContext {
    pub filtered_messages: Vec<Message>,
    pub context_is_trusted: bool,
}

pub struct TrustedContextEvaluator {
    policies: TrustPolicyEvaluator,
    config_store: Arc<dyn DualLlmConfigStore>,
    result_store: Arc<dyn DualLlmResultStore>,
    clients: Arc<dyn ClientFactory>,
    observer: Arc<dyn QuarantineObserver>,
    quarantine_timeout: Option<Duration>,
}

impl TrustedContextEvaluator {
    pub fn new(
        policy_store: Arc<dyn PolicyStore>,
        config_store: Arc<dyn DualLlmConfigStore>,
        result_store: Arc<dyn DualLlmResultStore>,
        clients: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            policies: TrustPolicyEvaluator::new(policy_store),
            config_store,
            result_store,
            clients,
            observer: Arc::new(TracingObserver),
            quarantine_timeout: None,
        }
    }

    pub fn with_unmatched(mut self, unmatched: UnmatchedToolTrust) -> Self {
        self.policies = self.policies.with_unmatched(unmatched);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn QuarantineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Bound each quarantine run. A run that overruns is dropped and persists nothing.
    pub fn with_quarantine_timeout(mut self, timeout: Duration) -> Self {
        self.quarantine_timeout = Some(timeout);
        self
    }

    /// Classify every tool result, then rebuild the conversation with blocked results
    /// redacted and, when dual-LLM analysis is enabled, the rest replaced by quarantine
    /// summaries. Message order is preserved.
    pub async fn evaluate_if_context_is_trusted(
        &self,
        messages: &[Message],
        agent_id: &str,
        api_key: &str,
    ) -> Result<TrustedContext, TrustedContextError> {
        let config = self.config_store.get_default_config().await?;

        let mut blocked: HashMap<String, Option<String>> = HashMap::new();
        let mut has_untrusted_data = false;

        for (position, message) in messages.iter().enumerate() {
            if message.role != Role::Tool {
                continue;
            }
            let tool_call_id = message.tool_call_id.as_deref().unwrap_or_default();
            let Some(tool_name) = resolve_tool_name(messages, position, tool_call_id) else {
                tracing::info!(tool_call_id, "tool result has no matching call, treating as untrusted");
                has_untrusted_data = true;
                continue;
            };

            let tool_result = tool_result_data(message);
            match self.policies.evaluate(agent_id, tool_name, &tool_result).await {
                Ok(verdict) => {
                    if !verdict.is_trusted {
                        has_untrusted_data = true;
                    }
                    if verdict.is_blocked {
                        blocked.insert(tool_call_id.to_string(), verdict.reason);
                    }
                }
                Err(e) => {
                    tracing::error!(agent_id, tool_name, error = %e, "policy lookup failed, treating tool result as untrusted");
                    has_untrusted_data = true;
                }
            }
        }

        let mut filtered_messages = Vec::with_capacity(messages.len());
        let mut client: Option<Arc<dyn InferenceClient>> = None;

        for message in messages {
            if message.role != Role::Tool {
                filtered_messages.push(message.clone());
                continue;
            }
            let tool_call_id = message.tool_call_id.as_deref().unwrap_or_default();

            if let Some(reason) = blocked.get(tool_call_id) {
                filtered_messages.push(replace_content(message, blocked_notice(reason.as_deref())));
                continue;
            }
            if !config.enabled {
                filtered_messages.push(message.clone());
                continue;
            }

            if !tool_call_id.is_empty() {
                if let Some(cached) = self.result_store.find_by_tool_call_id(tool_call_id).await? {
                    tracing::debug!(tool_call_id, "using cached quarantine result");
                    filtered_messages.push(replace_content(message, cached.result));
                    continue;
                }
            }

            let quarantine_client = match client.clone() {
                Some(existing) => existing,
                None => {
                    let created = self.clients.create(api_key)?;
                    client = Some(Arc::clone(&created));
                    created
                }
            };
            let summary = self
                .quarantine(quarantine_client, agent_id, messages, message)
                .await?;
            filtered_messages.push(replace_content(message, summary));
        }

        Ok(TrustedContext {
            filtered_messages,
            context_is_trusted: !has_untrusted_data,
        })
    }

    /// Run one quarantine with the configuration as it is stored right now, so prompt
    /// and model edits apply to the next tool result even within a request
    async fn quarantine(
        &self,
        client: Arc<dyn InferenceClient>,
        agent_id: &str,
        messages: &[Message],
        tool_message: &Message,
    ) -> Result<String, TrustedContextError> {
        let config = self.config_store.get_default_config().await?;
        let subagent =
            DualLlmSubagent::new(config, agent_id, client, Arc::clone(&self.result_store))
                .with_observer(Arc::clone(&self.observer));

        let run = subagent.process_with_main_agent(messages, tool_message);
        let outcome = match self.quarantine_timeout {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| DualLlmError::from(InferenceError::Timeout))??,
            None => run.await?,
        };
        Ok(outcome.summary)
    }
}

/// The same message with its content swapped for a replacement text
fn replace_content<S: Into<String>>(message: &Message, replacement: S) -> Message {
    let mut message = message.clone();
    message.content = None;
    message.with_text(replacement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tool::ToolCall;
    use serde_json::{json, Value};

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::function(id, name, &json!({}))
    }

    #[test]
    fn test_resolve_tool_name_scans_backward() {
        let messages = vec![
            Message::assistant().with_tool_call(call("call_1", "old_tool")),
            Message::tool("call_1").with_text("a"),
            Message::assistant().with_tool_call(call("call_1", "new_tool")),
            Message::tool("call_1").with_text("b"),
            Message::assistant().with_tool_call(call("call_2", "late_tool")),
        ];
        assert_eq!(resolve_tool_name(&messages, 1, "call_1"), Some("old_tool"));
        assert_eq!(resolve_tool_name(&messages, 3, "call_1"), Some("new_tool"));
        // a call issued after the result does not count
        assert_eq!(resolve_tool_name(&messages, 3, "call_2"), None);
        assert_eq!(resolve_tool_name(&messages, 3, "missing"), None);
    }

    #[test]
    fn test_blocked_notice() {
        assert_eq!(
            blocked_notice(Some("secrets")),
            "[Content blocked by policy: secrets]"
        );
        assert_eq!(blocked_notice(None), "[Content blocked by policy]");
    }

    #[test]
    fn test_replace_content_keeps_call_id() {
        let original = Message::tool("call_9").with_text("raw").with_text("more raw");
        let message = replace_content(&original, "summary");
        assert_eq!(message.tool_call_id.as_deref(), Some("call_9"));
        assert_eq!(message.text(), "summary");
        assert_eq!(message.role, Role::Tool);
    }

    #[test]
    fn test_tool_result_parsing_is_lenient() {
        let message = Message::tool("c").with_text("[1, 2");
        assert_eq!(tool_result_data(&message), Value::String("[1, 2".to_string()));
    }
}
