// Optional Bearer token authentication for the operator surface.
// If AUTH_SECRET env is set, /_hive routes (except health and metrics)
// require `Authorization: Bearer <secret>`. If not set, auth is disabled
// (dev mode). The trap surface is deliberately unauthenticated — every
// visitor is a subject, not a user.

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::state::AppState;

pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(secret) = state.auth_secret.as_deref() else {
        return next.run(request).await; // Dev mode — no auth required
    };

    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(t) if t == secret => next.run(request).await,
        Some(_) => {
            tracing::warn!(
                path = %request.uri().path(),
                "operator auth failed: bad token — probe or stale credential"
            );
            trap_shaped_401()
        }
        None => {
            tracing::warn!(
                path = %request.uri().path(),
                "operator auth failed: no bearer token"
            );
            trap_shaped_401()
        }
    }
}

/// A rejected operator call answers with the same 401 body the trap
/// serves everywhere else, so a visitor sweeping /_hive cannot tell the
/// operator surface apart from the rest of the honeypot.
fn trap_shaped_401() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Invalid or missing API key" })),
    )
        .into_response()
}
