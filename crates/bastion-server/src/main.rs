mod configuration;
mod error;
mod routes;
mod state;
mod upstream;

use std::sync::Arc;

use bastion::providers::factory::OpenAiClientFactory;
use bastion::stores::memory::{
    InMemoryDualLlmConfigStore, InMemoryDualLlmResultStore, InMemoryPolicyStore,
};
use bastion::trusted_context::TrustedContextEvaluator;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::configuration::{load_policies, Settings};
use crate::state::AppState;
use crate::upstream::Upstream;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("bastion=info,bastion_server=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::new()?;

    let policies = match &settings.policy.file {
        Some(path) => load_policies(path)?,
        None => Vec::new(),
    };
    info!(count = policies.len(), "loaded trusted data policies");

    let mut evaluator = TrustedContextEvaluator::new(
        Arc::new(InMemoryPolicyStore::new(policies)),
        Arc::new(InMemoryDualLlmConfigStore::new(settings.dual_llm.to_config())),
        Arc::new(InMemoryDualLlmResultStore::new()),
        Arc::new(OpenAiClientFactory::new(settings.dual_llm.host.clone())),
    )
    .with_unmatched(settings.policy.unmatched);
    if let Some(timeout) = settings.dual_llm.timeout() {
        evaluator = evaluator.with_quarantine_timeout(timeout);
    }

    let state = AppState::new(evaluator, Upstream::new(settings.upstream.clone())?);

    // Create router with CORS support
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
