// Export route modules
pub mod proxy;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new().merge(proxy::routes(state))
}
