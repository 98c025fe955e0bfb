//! The dual-LLM quarantine pattern
//!
//! A privileged main model never sees untrusted tool output. It asks multiple choice
//! questions, a quarantined model that can read the output answers them with an option
//! index, and the main model's view of the data is limited to the answers it got.
pub mod config;
pub mod events;
pub mod question;
pub mod subagent;
