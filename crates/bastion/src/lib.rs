pub mod dual_llm;
pub mod errors;
pub mod models;
pub mod policy;
pub mod prompt_template;
pub mod providers;
pub mod stores;
pub mod transformers;
pub mod trusted_context;
