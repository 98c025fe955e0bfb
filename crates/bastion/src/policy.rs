//! Trusted data policies decide, per tool result, whether the data may reach the
//! privileged model as is, must go through quarantine, or must be blocked outright.
pub mod evaluator;
pub mod path;
pub mod rule;
