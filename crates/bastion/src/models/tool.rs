use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Prefix of tool call ids allocated by the gateway rather than by a provider
pub const SYNTHETIC_CALL_ID_PREFIX: &str = "call_syn_";

/// Derive a tool call id for formats that do not carry one
///
/// The id depends only on `seed`, so a conversation that is re-sent on every turn keeps
/// the ids it was given the first time. Seeds must encode the call's position in the
/// payload to stay unique.
pub fn derive_call_id(seed: &str) -> String {
    let hex = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
        .simple()
        .to_string();
    format!("{}{}", SYNTHETIC_CALL_ID_PREFIX, &hex[..24])
}

pub fn is_synthesized_call_id(id: &str) -> bool {
    id.starts_with(SYNTHETIC_CALL_ID_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON encoded arguments, exactly as the model produced them
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCall {
    pub name: String,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
/// A tool invocation requested by the assistant
pub enum ToolCall {
    Function { id: String, function: FunctionCall },
    Custom { id: String, custom: CustomCall },
}

impl ToolCall {
    pub fn function<I: Into<String>, N: Into<String>>(id: I, name: N, arguments: &Value) -> Self {
        ToolCall::Function {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ToolCall::Function { id, .. } | ToolCall::Custom { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolCall::Function { function, .. } => &function.name,
            ToolCall::Custom { custom, .. } => &custom.name,
        }
    }

    /// Raw argument payload: the JSON text of a function call or the free-form custom input
    pub fn raw_arguments(&self) -> &str {
        match self {
            ToolCall::Function { function, .. } => &function.arguments,
            ToolCall::Custom { custom, .. } => &custom.input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
/// A tool the model is allowed to call
pub enum ToolDefinition {
    Function { function: FunctionDefinition },
    Custom { custom: CustomToolDefinition },
}

impl ToolDefinition {
    pub fn function<N: Into<String>>(
        name: N,
        description: Option<String>,
        parameters: Option<Value>,
    ) -> Self {
        ToolDefinition::Function {
            function: FunctionDefinition {
                name: name.into(),
                description,
                parameters,
                strict: None,
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolDefinition::Function { function } => &function.name,
            ToolDefinition::Custom { custom } => &custom.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoiceMode {
    None,
    Auto,
    Required,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedToolChoice {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: ToolChoiceFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
/// Either a calling mode or a single forced function
pub enum ToolChoice {
    Mode(ToolChoiceMode),
    Named(NamedToolChoice),
}

impl ToolChoice {
    pub fn function<S: Into<String>>(name: S) -> Self {
        ToolChoice::Named(NamedToolChoice {
            kind: "function".to_string(),
            function: ToolChoiceFunction { name: name.into() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_wire_shape() {
        let call = ToolCall::function("call_1", "read_file", &json!({"path": "/tmp/a"}));
        assert_eq!(
            serde_json::to_value(&call).unwrap(),
            json!({
                "type": "function",
                "id": "call_1",
                "function": {"name": "read_file", "arguments": "{\"path\":\"/tmp/a\"}"}
            })
        );

        let custom: ToolCall = serde_json::from_value(json!({
            "id": "call_2",
            "type": "custom",
            "custom": {"name": "grammar_tool", "input": "SELECT 1"}
        }))
        .unwrap();
        assert_eq!(custom.id(), "call_2");
        assert_eq!(custom.name(), "grammar_tool");
        assert_eq!(custom.raw_arguments(), "SELECT 1");
    }

    #[test]
    fn test_derived_ids_are_stable_and_marked() {
        let a = derive_call_id("contents[1].parts[0]:lookup");
        let b = derive_call_id("contents[1].parts[1]:lookup");
        assert_ne!(a, b);
        assert_eq!(a, derive_call_id("contents[1].parts[0]:lookup"));
        assert!(is_synthesized_call_id(&a));
        assert_eq!(a.len(), SYNTHETIC_CALL_ID_PREFIX.len() + 24);
        assert!(!is_synthesized_call_id("call_abc"));
    }

    #[test]
    fn test_tool_choice_variants() {
        let mode: ToolChoice = serde_json::from_value(json!("required")).unwrap();
        assert_eq!(mode, ToolChoice::Mode(ToolChoiceMode::Required));

        let named: ToolChoice = serde_json::from_value(json!({
            "type": "function",
            "function": {"name": "get_weather"}
        }))
        .unwrap();
        assert_eq!(named, ToolChoice::function("get_weather"));
    }
}
