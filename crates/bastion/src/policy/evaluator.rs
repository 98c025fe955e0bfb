use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::rule::{PolicyAction, TrustedDataPolicy, UnmatchedToolTrust};
use crate::errors::StoreError;
use crate::stores::PolicyStore;

/// The outcome of evaluating one tool result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustVerdict {
    pub is_trusted: bool,
    pub is_blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TrustVerdict {
    pub fn trusted() -> Self {
        Self {
            is_trusted: true,
            is_blocked: false,
            reason: None,
        }
    }

    pub fn untrusted() -> Self {
        Self {
            is_trusted: false,
            is_blocked: false,
            reason: None,
        }
    }

    fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    fn from_policy(policy: &TrustedDataPolicy) -> Self {
        let reason = Some(policy.description.clone()).filter(|d| !d.is_empty());
        match policy.action {
            PolicyAction::MarkAsTrusted => Self::trusted().with_reason(reason),
            PolicyAction::MarkAsUntrusted => Self::untrusted().with_reason(reason),
            PolicyAction::BlockAlways => Self {
                is_trusted: false,
                is_blocked: true,
                reason,
            },
        }
    }
}

/// Apply policies in order and return the verdict of the first one that matches.
///
/// A policy with an invalid pattern is skipped on its own; it never decides the
/// verdict for the others.
pub fn evaluate_policies(
    policies: &[TrustedDataPolicy],
    tool_result: &Value,
    unmatched: UnmatchedToolTrust,
) -> TrustVerdict {
    for policy in policies {
        match policy.matches(tool_result) {
            Ok(true) => return TrustVerdict::from_policy(policy),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(policy_id = %policy.id, error = %e, "skipping misconfigured policy");
            }
        }
    }
    match unmatched {
        UnmatchedToolTrust::Trusted => TrustVerdict::trusted(),
        UnmatchedToolTrust::Untrusted => TrustVerdict::untrusted(),
    }
}

/// Decides whether tool output can be trusted, using the policies of the agent that
/// called the tool
pub struct TrustPolicyEvaluator {
    store: Arc<dyn PolicyStore>,
    unmatched: UnmatchedToolTrust,
}

impl TrustPolicyEvaluator {
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            unmatched: UnmatchedToolTrust::default(),
        }
    }

    pub fn with_unmatched(mut self, unmatched: UnmatchedToolTrust) -> Self {
        self.unmatched = unmatched;
        self
    }

    pub async fn evaluate(
        &self,
        agent_id: &str,
        tool_name: &str,
        tool_result: &Value,
    ) -> Result<TrustVerdict, StoreError> {
        let policies = self.store.list_policies(agent_id, tool_name).await?;
        let verdict = evaluate_policies(&policies, tool_result, self.unmatched);
        tracing::debug!(
            agent_id,
            tool_name,
            policies = policies.len(),
            is_trusted = verdict.is_trusted,
            is_blocked = verdict.is_blocked,
            "evaluated tool result"
        );
        Ok(verdict)
    }
}
