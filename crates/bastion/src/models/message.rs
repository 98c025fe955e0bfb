use serde::{Deserialize, Serialize};

use super::content::{ContentPart, MessageContent};
use super::role::Role;
use super::tool::ToolCall;
use crate::errors::FormatError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A single turn in a canonical conversation
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Only present on tool messages, links the result back to its originating call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
}

impl Message {
    pub fn new(role: Role) -> Self {
        Message {
            role,
            content: None,
            name: None,
            tool_calls: None,
            tool_call_id: None,
            refusal: None,
        }
    }

    pub fn system() -> Self {
        Self::new(Role::System)
    }

    pub fn developer() -> Self {
        Self::new(Role::Developer)
    }

    pub fn user() -> Self {
        Self::new(Role::User)
    }

    pub fn assistant() -> Self {
        Self::new(Role::Assistant)
    }

    /// Create a tool result message answering the call with the given id
    pub fn tool<S: Into<String>>(tool_call_id: S) -> Self {
        Message {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool)
        }
    }

    /// Replace the content of the message
    pub fn with_content<C: Into<MessageContent>>(mut self, content: C) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Append a content part, promoting plain text content to a part list when needed
    pub fn with_part(mut self, part: ContentPart) -> Self {
        self.content = Some(match self.content.take() {
            None => MessageContent::Parts(vec![part]),
            Some(existing) => {
                let mut parts = existing.parts();
                parts.push(part);
                MessageContent::Parts(parts)
            }
        });
        self
    }

    /// Add text to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        if self.content.is_none() {
            self.with_content(MessageContent::Text(text.into()))
        } else {
            self.with_part(ContentPart::text(text))
        }
    }

    /// Add a tool call to the message
    pub fn with_tool_call(mut self, tool_call: ToolCall) -> Self {
        self.tool_calls.get_or_insert_with(Vec::new).push(tool_call);
        self
    }

    pub fn with_refusal<S: Into<String>>(mut self, refusal: S) -> Self {
        self.refusal = Some(refusal.into());
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The textual content of the message, empty when there is none
    pub fn text(&self) -> String {
        self.content
            .as_ref()
            .map(|content| content.text())
            .unwrap_or_default()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls().is_empty()
    }

    pub fn find_tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.tool_calls().iter().find(|call| call.id() == id)
    }

    /// Check the structural invariants of the role
    pub fn validate(&self) -> Result<(), FormatError> {
        match self.role {
            Role::Tool => {
                if self.tool_call_id.as_deref().map_or(true, str::is_empty) {
                    return Err(FormatError::MissingField("tool_call_id".to_string()));
                }
            }
            _ => {
                if self.tool_call_id.is_some() {
                    return Err(FormatError::InvalidField {
                        field: "tool_call_id".to_string(),
                        reason: format!("not allowed on {} messages", self.role),
                    });
                }
            }
        }
        if self.has_tool_calls() && self.role != Role::Assistant {
            return Err(FormatError::InvalidField {
                field: "tool_calls".to_string(),
                reason: format!("not allowed on {} messages", self.role),
            });
        }
        Ok(())
    }
}
