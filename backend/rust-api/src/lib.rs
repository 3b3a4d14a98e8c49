use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    // The exam page may be served from the upstream site's origin
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/exam", exam_routes().layer(cors))
        .route_layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn exam_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::exam::get_exam))
        .route("/start", post(handlers::exam::start_exam))
        .route("/goto", post(handlers::exam::go_to_question))
        .route("/next", post(handlers::exam::next_question))
        .route("/answer", post(handlers::exam::answer_question))
        .route("/skip", post(handlers::exam::toggle_skip))
        .route("/finalize-block", post(handlers::exam::finalize_block))
        .route("/skip-choice", post(handlers::exam::choose_skip))
        .route(
            "/skip-choice/cancel",
            post(handlers::exam::cancel_skip_choice),
        )
        .route("/end", post(handlers::exam::end_exam))
        .route("/result", get(handlers::exam::get_result))
        .route("/reload", post(handlers::exam::reload_exam))
        .route("/stream", get(handlers::sse::exam_stream))
}
