pub mod base;
pub mod factory;
pub mod mock;
pub mod openai;
