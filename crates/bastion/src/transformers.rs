//! Conversion between provider wire formats and the canonical models
//!
//! Each provider gets one [`base::ProviderTransformer`]. The routing layer picks the
//! implementation from the endpoint it served, never by sniffing the payload shape.
pub mod anthropic;
pub mod base;
pub mod factory;
pub mod gemini;
pub mod openai;
pub mod utils;
