//! These models are the canonical representation every provider format is converted into
//!
//! The gateway speaks three wire formats:
//! - openai chat completions, sent by most agents and used for dual-llm inference
//! - anthropic messages
//! - gemini generateContent
//!
//! Policy evaluation and quarantine only ever look at the canonical types. The canonical
//! shape follows openai chat completions closely, since that is the richest superset of
//! the three, but it is not tied to any single vendor's quirks (legacy fields are
//! normalized away by the openai transformer).
pub mod content;
pub mod message;
pub mod request;
pub mod response;
pub mod role;
pub mod tool;
