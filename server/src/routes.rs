use axum::{extract::DefaultBodyLimit, middleware, Router};

use crate::auth::middleware::JwtSecret;
use crate::chat::{history, upload};
use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // WebSocket endpoint (auth via query param or bearer header, checked before upgrade)
    let ws_routes = Router::new().route(
        "/ws/chat",
        axum::routing::get(ws_handler::ws_upgrade),
    );

    // Authenticated routes (JWT required, validated by the Claims extractor)
    let chat_routes = Router::new()
        .route(
            "/api/chat/history",
            axum::routing::get(history::get_history),
        )
        .route(
            "/api/chat/upload",
            axum::routing::post(upload::upload_file)
                .layer(DefaultBodyLimit::max(state.chat.max_upload_bytes)),
        );

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(chat_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
