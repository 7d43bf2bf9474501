pub mod auth;
pub mod detection;
pub mod error;
pub mod handlers;
pub mod models;
pub mod state;
pub mod watchdog;

use axum::Router;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::get;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

// ---------------------------------------------------------------------------
// Request-id middleware
// ---------------------------------------------------------------------------

/// Middleware that assigns a UUID correlation ID to every request.
/// - Adds the ID to the current tracing span for structured logging.
/// - Returns it as `X-Request-Id` response header. On the trap surface
///   this doubles as set dressing: real APIs send correlation IDs.
pub async fn request_id_middleware(
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    tracing::Span::current().record("request_id", tracing::field::display(&request_id));

    let mut response = next.run(request).await;

    if let Ok(val) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", val);
    }

    response
}

// ── OpenAPI documentation (operator surface only) ───────────────────────────

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HiveTrap Operator API",
        version = "1.2.0",
        description = "Agent-likeness detection honeypot — operator endpoints. \
                       Everything outside /_hive is the trap.",
        license(name = "MIT")
    ),
    paths(
        handlers::health,
        handlers::readiness,
        handlers::list_sessions,
        handlers::get_session,
        handlers::list_tokens,
        handlers::stats,
    ),
    components(schemas(
        models::HealthResponse,
        models::SessionSummary,
        models::SessionDetail,
        models::RequestRecord,
        models::TokenInfo,
        models::TrapStats,
        detection::DetectionResult,
        detection::scoring::Classification,
        detection::normalize::ApiKeyStatus,
    )),
    tags(
        (name = "health", description = "Health & readiness endpoints"),
        (name = "sessions", description = "Behavioral sessions reconstructed by the engine"),
        (name = "tokens", description = "Planted credential catalogue"),
        (name = "stats", description = "Aggregate trap statistics"),
    )
)]
pub struct ApiDoc;

/// Build the application router with the given state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    // Operator endpoints get a rate limit; the trap does not — flood
    // protection for analysis lives at the dispatch gate, and throttling
    // probes would distort the very behavior being measured.
    let ops_governor = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(60)
        .use_headers()
        .finish()
        .expect("operator rate-limit config is valid");

    let ops_public = Router::new()
        .route("/_hive/health", get(handlers::health))
        .route("/_hive/health/ready", get(handlers::readiness))
        .route("/_hive/metrics", get(handlers::metrics));

    let ops_protected = Router::new()
        .route("/_hive/sessions", get(handlers::list_sessions))
        .route("/_hive/sessions/{id}", get(handlers::get_session))
        .route("/_hive/tokens", get(handlers::list_tokens))
        .route("/_hive/stats", get(handlers::stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    ops_public
        .merge(ops_protected)
        .merge(
            SwaggerUi::new("/_hive/swagger-ui")
                .url("/_hive/api-docs/openapi.json", ApiDoc::openapi()),
        )
        .layer(GovernorLayer::new(ops_governor))
        // Everything else is prey: the wildcard trap answers any path,
        // any method, and feeds the detection engine.
        .fallback(handlers::trap)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}
