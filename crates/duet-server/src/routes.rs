use std::path::Path;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use duet_api::auth::{self, AppState};
use duet_api::error::ApiError;
use duet_api::messages;
use duet_api::middleware::{require_auth, verify_token};
use duet_gateway::connection;

/// Images arrive inline as base64 data URLs.
const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

#[derive(Deserialize)]
struct WsParams {
    token: String,
}

pub fn build_router(state: AppState, upload_dir: &Path) -> Router {
    let public_routes = Router::new()
        .route("/api/status", get(|| async { "Server is live" }))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/login", post(auth::login))
        .route("/ws", get(ws_upgrade))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/api/auth/check", get(auth::check))
        .route("/api/auth/update-profile", put(auth::update_profile))
        .route("/api/auth/delete/{id}", delete(auth::delete_user))
        .route("/api/messages/users", get(messages::get_users_for_sidebar))
        .route("/api/messages/{id}", get(messages::get_messages))
        .route("/api/messages/mark/{id}", put(messages::mark_message_as_seen))
        .route("/api/messages/send/{id}", post(messages::send_message))
        .route("/api/messages/delete-messages/{id}", delete(messages::delete_all_messages))
        .route("/api/messages/delete-message/{id}", delete(messages::delete_message_by_id))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// The token rides in the query string since browsers cannot set headers on upgrades.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let claims = verify_token(&state.jwt_secret, &params.token)?;
    let dispatcher = state.dispatcher.clone();

    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, claims.sub)))
}
