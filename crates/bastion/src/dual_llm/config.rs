use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::Message;

pub const DEFAULT_MAIN_AGENT_PROMPT: &str = include_str!("../prompts/dual_llm_main.md");
pub const DEFAULT_QUARANTINED_AGENT_PROMPT: &str =
    include_str!("../prompts/dual_llm_quarantined.md");
pub const DEFAULT_SUMMARY_PROMPT: &str = include_str!("../prompts/dual_llm_summary.md");
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS
}

fn default_main_agent_prompt() -> String {
    DEFAULT_MAIN_AGENT_PROMPT.to_string()
}

fn default_quarantined_agent_prompt() -> String {
    DEFAULT_QUARANTINED_AGENT_PROMPT.to_string()
}

fn default_summary_prompt() -> String {
    DEFAULT_SUMMARY_PROMPT.to_string()
}

/// Deployment wide quarantine settings. Operators may edit these between requests, so
/// they are read fresh for every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualLlmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_main_agent_prompt")]
    pub main_agent_prompt: String,
    #[serde(default = "default_quarantined_agent_prompt")]
    pub quarantined_agent_prompt: String,
    #[serde(default = "default_summary_prompt")]
    pub summary_prompt: String,
    #[serde(default = "default_model")]
    pub main_model: String,
    #[serde(default = "default_model")]
    pub quarantined_model: String,
}

impl Default for DualLlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_rounds: DEFAULT_MAX_ROUNDS,
            main_agent_prompt: default_main_agent_prompt(),
            quarantined_agent_prompt: default_quarantined_agent_prompt(),
            summary_prompt: default_summary_prompt(),
            main_model: default_model(),
            quarantined_model: default_model(),
        }
    }
}

impl DualLlmConfig {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }
}

/// The persisted outcome of one quarantine run, keyed by the tool call it analysed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualLlmResult {
    pub id: String,
    pub agent_id: String,
    pub tool_call_id: String,
    pub conversation: Vec<Message>,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

impl DualLlmResult {
    pub fn new<A: Into<String>, T: Into<String>, R: Into<String>>(
        agent_id: A,
        tool_call_id: T,
        conversation: Vec<Message>,
        result: R,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            tool_call_id: tool_call_id.into(),
            conversation,
            result: result.into(),
            created_at: Utc::now(),
        }
    }
}
