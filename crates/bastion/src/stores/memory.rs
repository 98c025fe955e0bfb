use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DualLlmConfigStore, DualLlmResultStore, PolicyStore};
use crate::dual_llm::config::{DualLlmConfig, DualLlmResult};
use crate::errors::StoreError;
use crate::policy::rule::TrustedDataPolicy;

/// Policies held in process, in the order they were added
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<Vec<TrustedDataPolicy>>,
}

impl InMemoryPolicyStore {
    pub fn new(policies: Vec<TrustedDataPolicy>) -> Self {
        Self {
            policies: RwLock::new(policies),
        }
    }

    pub async fn add(&self, policy: TrustedDataPolicy) {
        self.policies.write().await.push(policy);
    }

    pub async fn replace_all(&self, policies: Vec<TrustedDataPolicy>) {
        *self.policies.write().await = policies;
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn list_policies(
        &self,
        agent_id: &str,
        tool_name: &str,
    ) -> Result<Vec<TrustedDataPolicy>, StoreError> {
        Ok(self
            .policies
            .read()
            .await
            .iter()
            .filter(|policy| policy.agent_id == agent_id && policy.applies_to(tool_name))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDualLlmConfigStore {
    config: RwLock<DualLlmConfig>,
}

impl InMemoryDualLlmConfigStore {
    pub fn new(config: DualLlmConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub async fn update(&self, config: DualLlmConfig) {
        *self.config.write().await = config;
    }
}

#[async_trait]
impl DualLlmConfigStore for InMemoryDualLlmConfigStore {
    async fn get_default_config(&self) -> Result<DualLlmConfig, StoreError> {
        Ok(self.config.read().await.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDualLlmResultStore {
    results: RwLock<HashMap<String, DualLlmResult>>,
}

impl InMemoryDualLlmResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl DualLlmResultStore for InMemoryDualLlmResultStore {
    async fn find_by_tool_call_id(
        &self,
        tool_call_id: &str,
    ) -> Result<Option<DualLlmResult>, StoreError> {
        Ok(self.results.read().await.get(tool_call_id).cloned())
    }

    async fn create(&self, result: DualLlmResult) -> Result<DualLlmResult, StoreError> {
        self.results
            .write()
            .await
            .insert(result.tool_call_id.clone(), result.clone());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::rule::{PolicyAction, PolicyOperator};

    fn policy(id: &str, agent_id: &str, tool_name: &str) -> TrustedDataPolicy {
        TrustedDataPolicy {
            id: id.to_string(),
            agent_id: agent_id.to_string(),
            mcp_server_name: None,
            tool_name: tool_name.to_string(),
            description: String::new(),
            attribute_path: "path".to_string(),
            operator: PolicyOperator::Equal,
            value: "x".to_string(),
            action: PolicyAction::MarkAsTrusted,
        }
    }

    #[tokio::test]
    async fn test_policies_are_scoped_and_ordered() {
        let store = InMemoryPolicyStore::new(vec![
            policy("1", "agent", "read_file"),
            policy("2", "other", "read_file"),
            policy("3", "agent", "write_file"),
        ]);
        store.add(policy("4", "agent", "read_file")).await;

        let ids: Vec<String> = store
            .list_policies("agent", "fs__read_file")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["1", "4"]);
    }

    #[tokio::test]
    async fn test_config_updates_are_visible() {
        let store = InMemoryDualLlmConfigStore::default();
        assert!(!store.get_default_config().await.unwrap().enabled);
        store.update(DualLlmConfig::default().enabled(true)).await;
        assert!(store.get_default_config().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_results_last_write_wins() {
        let store = InMemoryDualLlmResultStore::new();
        assert!(store.find_by_tool_call_id("call_1").await.unwrap().is_none());

        store
            .create(DualLlmResult::new("agent", "call_1", vec![], "first"))
            .await
            .unwrap();
        store
            .create(DualLlmResult::new("agent", "call_1", vec![], "second"))
            .await
            .unwrap();

        let found = store.find_by_tool_call_id("call_1").await.unwrap().unwrap();
        assert_eq!(found.result, "second");
        assert_eq!(store.len().await, 1);
    }
}
