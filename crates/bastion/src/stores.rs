//! Contracts for the state the core reads and writes but does not own
//!
//! Policies, the dual-LLM configuration and quarantine results all live in external
//! storage. The core only ever goes through these traits, and reads policies and
//! configuration fresh on every evaluation.
use async_trait::async_trait;

use crate::dual_llm::config::{DualLlmConfig, DualLlmResult};
use crate::errors::StoreError;
use crate::policy::rule::TrustedDataPolicy;

pub mod memory;

#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Policies scoped to the agent and tool, in evaluation order
    async fn list_policies(
        &self,
        agent_id: &str,
        tool_name: &str,
    ) -> Result<Vec<TrustedDataPolicy>, StoreError>;
}

#[async_trait]
pub trait DualLlmConfigStore: Send + Sync {
    async fn get_default_config(&self) -> Result<DualLlmConfig, StoreError>;
}

#[async_trait]
pub trait DualLlmResultStore: Send + Sync {
    async fn find_by_tool_call_id(
        &self,
        tool_call_id: &str,
    ) -> Result<Option<DualLlmResult>, StoreError>;

    /// Persist a result. A second result for the same tool call replaces the first.
    async fn create(&self, result: DualLlmResult) -> Result<DualLlmResult, StoreError>;
}
