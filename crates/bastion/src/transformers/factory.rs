use super::{
    anthropic::AnthropicTransformer,
    base::{ProviderKind, ProviderTransformer},
    gemini::GeminiTransformer,
    openai::OpenAiTransformer,
};

pub fn transformer_for(kind: ProviderKind) -> Box<dyn ProviderTransformer> {
    match kind {
        ProviderKind::OpenAi => Box::new(OpenAiTransformer),
        ProviderKind::Anthropic => Box::new(AnthropicTransformer),
        ProviderKind::Gemini => Box::new(GeminiTransformer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_factory_covers_every_kind() {
        for kind in ProviderKind::iter() {
            assert_eq!(transformer_for(kind).kind(), kind);
        }
    }
}
