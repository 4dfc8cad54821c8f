use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{accounts, handlers, middleware, orchestrator, tasks, videos};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Authenticated API routes
    let protected = Router::new()
        .route("/config", get(handlers::get_config))
        // Videos (crawler hand-off)
        .route("/videos", post(videos::create_video))
        .route("/videos", get(videos::list_videos))
        .route("/videos/{id}", get(videos::get_video))
        // Tasks
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/{id}", get(tasks::get_task))
        .route("/tasks/{id}/fail", post(tasks::fail_task))
        .route("/tasks/{id}/report", post(tasks::report_stage))
        // Accounts
        .route("/accounts", get(accounts::list_accounts))
        .route("/accounts", post(accounts::create_account))
        .route("/accounts/{id}/extend", post(accounts::extend_lease))
        .route("/accounts/{id}/release", post(accounts::release_lease))
        // Orchestrator
        .route("/orchestrator/status", get(orchestrator::get_status))
        .route("/orchestrator/tick", post(orchestrator::tick))
        .route("/orchestrator/reap", post(orchestrator::reap))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    // Health stays open for probes
    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .with_state(state.clone());

    // Prometheus scrape endpoint, also open
    let metrics_route = Router::new()
        .route("/metrics", get(handlers::metrics_endpoint))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .merge(metrics_route)
        .layer(from_fn(middleware::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
