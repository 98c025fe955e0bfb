use std::sync::Arc;

use bastion::trusted_context::TrustedContextEvaluator;

use crate::upstream::Upstream;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub evaluator: Arc<TrustedContextEvaluator>,
    pub upstream: Arc<Upstream>,
}

impl AppState {
    pub fn new(evaluator: TrustedContextEvaluator, upstream: Upstream) -> Self {
        Self {
            evaluator: Arc::new(evaluator),
            upstream: Arc::new(upstream),
        }
    }
}
