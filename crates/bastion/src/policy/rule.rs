use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::path::{extract, stringify};
use crate::errors::PolicyError;

/// Separator between the MCP server name and the tool name in a namespaced tool
pub const SERVER_TOOL_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PolicyOperator {
    Equal,
    NotEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Regex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    #[default]
    MarkAsTrusted,
    MarkAsUntrusted,
    BlockAlways,
}

/// What to conclude about a tool result when no policy matches it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedToolTrust {
    #[default]
    Trusted,
    Untrusted,
}

fn new_policy_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedDataPolicy {
    #[serde(default = "new_policy_id")]
    pub id: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_server_name: Option<String>,
    pub tool_name: String,
    #[serde(default)]
    pub description: String,
    pub attribute_path: String,
    pub operator: PolicyOperator,
    pub value: String,
    #[serde(default)]
    pub action: PolicyAction,
}

impl TrustedDataPolicy {
    /// Whether this rule is scoped to `tool_name`.
    ///
    /// Tools are either bare (`read_file`) or namespaced by server (`files__read_file`).
    /// A rule without a server name matches the tool from any server.
    pub fn applies_to(&self, tool_name: &str) -> bool {
        if tool_name == self.tool_name {
            return true;
        }
        match tool_name.split_once(SERVER_TOOL_SEPARATOR) {
            Some((server, tool)) => {
                tool == self.tool_name
                    && self
                        .mcp_server_name
                        .as_deref()
                        .map_or(true, |expected| expected == server)
            }
            None => false,
        }
    }

    /// Test the rule against a tool result. A missing attribute never matches.
    pub fn matches(&self, tool_result: &Value) -> Result<bool, PolicyError> {
        let Some(extracted) = extract(tool_result, &self.attribute_path) else {
            return Ok(false);
        };
        let actual = stringify(extracted);
        let expected = self.value.as_str();
        Ok(match self.operator {
            PolicyOperator::Equal => actual == expected,
            PolicyOperator::NotEqual => actual != expected,
            PolicyOperator::Contains => actual.contains(expected),
            PolicyOperator::NotContains => !actual.contains(expected),
            PolicyOperator::StartsWith => actual.starts_with(expected),
            PolicyOperator::EndsWith => actual.ends_with(expected),
            PolicyOperator::Regex => Regex::new(expected)
                .map_err(|e| PolicyError::InvalidPattern {
                    policy_id: self.id.clone(),
                    message: e.to_string(),
                })?
                .is_match(&actual),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(operator: PolicyOperator, value: &str) -> TrustedDataPolicy {
        TrustedDataPolicy {
            id: "p1".to_string(),
            agent_id: "agent".to_string(),
            mcp_server_name: None,
            tool_name: "read_file".to_string(),
            description: String::new(),
            attribute_path: "path".to_string(),
            operator,
            value: value.to_string(),
            action: PolicyAction::MarkAsTrusted,
        }
    }

    #[test]
    fn test_operators() {
        let result = json!({"path": "/home/user/notes.txt"});
        for (operator, value, expected) in [
            (PolicyOperator::Equal, "/home/user/notes.txt", true),
            (PolicyOperator::Equal, "/home/user", false),
            (PolicyOperator::NotEqual, "/etc/passwd", true),
            (PolicyOperator::Contains, "/user/", true),
            (PolicyOperator::NotContains, "/user/", false),
            (PolicyOperator::StartsWith, "/home", true),
            (PolicyOperator::EndsWith, ".txt", true),
            (PolicyOperator::EndsWith, ".md", false),
            (PolicyOperator::Regex, r"^/home/\w+/.*\.txt$", true),
            (PolicyOperator::Regex, r"^/etc", false),
        ] {
            assert_eq!(
                policy(operator, value).matches(&result).unwrap(),
                expected,
                "{:?} {}",
                operator,
                value
            );
        }
    }

    #[test]
    fn test_missing_path_never_matches() {
        // even a negated operator needs the attribute to exist
        let rule = policy(PolicyOperator::NotEqual, "x");
        assert!(!rule.matches(&json!({"other": 1})).unwrap());
        assert!(!rule.matches(&json!("not an object")).unwrap());
    }

    #[test]
    fn test_non_string_values_are_stringified() {
        let mut rule = policy(PolicyOperator::Equal, "42");
        rule.attribute_path = "size".to_string();
        assert!(rule.matches(&json!({"size": 42})).unwrap());
    }

    #[test]
    fn test_invalid_regex() {
        let rule = policy(PolicyOperator::Regex, "([unclosed");
        assert!(matches!(
            rule.matches(&json!({"path": "x"})),
            Err(PolicyError::InvalidPattern { policy_id, .. }) if policy_id == "p1"
        ));
    }

    #[test]
    fn test_server_scoping() {
        let mut rule = policy(PolicyOperator::Equal, "x");
        assert!(rule.applies_to("read_file"));
        assert!(rule.applies_to("files__read_file"));
        assert!(rule.applies_to("other__read_file"));
        assert!(!rule.applies_to("write_file"));

        rule.mcp_server_name = Some("files".to_string());
        assert!(rule.applies_to("files__read_file"));
        assert!(!rule.applies_to("other__read_file"));
        assert!(rule.applies_to("read_file"));
    }

    #[test]
    fn test_deserialize_from_config() {
        let rule: TrustedDataPolicy = serde_json::from_value(json!({
            "agentId": "agent",
            "toolName": "read_file",
            "attributePath": "path",
            "operator": "notContains",
            "value": "/etc",
            "action": "block_always"
        }))
        .unwrap();
        assert_eq!(rule.operator, PolicyOperator::NotContains);
        assert_eq!(rule.action, PolicyAction::BlockAlways);
        assert!(!rule.id.is_empty());
    }
}
