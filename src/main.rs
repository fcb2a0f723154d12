mod catalog;
mod config;
mod error;
mod handlers;
mod logging;
mod models;
mod query;
mod state;
mod submission;

use axum::{
    response::Html,
    routing::{get, post},
    Router,
};
use catalog::Catalog;
use config::{load_settings, Settings};
use error::AppError;
use state::AppState;
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{info, warn};

async fn root_handler() -> Html<String> {
    tokio::fs::read_to_string("templates/index.html")
        .await
        .map(Html)
        .unwrap_or_else(|_| Html("<h1>Could not load index.html</h1>".to_string()))
}

async fn load_catalog(settings: &Settings) -> Result<Catalog, AppError> {
    if let Some(path) = &settings.events_file {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => {
                let catalog = Catalog::from_json(&raw)?;
                info!(path = %path.display(), events = catalog.len(), "loaded events file");
                return Ok(catalog);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "events file unreadable, using bundled sample data"),
        }
    }
    let catalog = Catalog::seeded()?;
    info!(events = catalog.len(), "loaded bundled sample events");
    Ok(catalog)
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .nest_service("/assets", ServeDir::new("assets"))
        .route("/api/events", get(handlers::get_events))
        .route("/api/events/featured", get(handlers::get_featured_events))
        .route("/api/events/{id}", get(handlers::get_event_details))
        .route("/api/categories", get(handlers::get_categories))
        .route("/api/submission-categories", get(handlers::get_submission_categories))
        .route("/api/submissions", post(handlers::create_submission))
        .route(
            "/api/submissions/{id}",
            get(handlers::get_submission).patch(handlers::update_submission),
        )
        .route("/api/submissions/{id}/advance", post(handlers::advance_submission))
        .route("/api/submissions/{id}/back", post(handlers::back_submission))
        .route(
            "/api/submissions/{id}/categories/{category_id}",
            post(handlers::toggle_submission_category),
        )
        .route("/api/submissions/{id}/submit", post(handlers::submit_submission))
        .route("/api/submissions/{id}/reset", post(handlers::reset_submission))
        .route("/api/submissions/{id}/cancel", post(handlers::cancel_submission))
        .route("/api/admin/events/pending", get(handlers::get_pending_events))
        .route("/api/admin/events/{id}/approve", post(handlers::approve_event))
        .route("/api/admin/events/{id}/reject", post(handlers::reject_event))
        .route("/api/admin/stats", get(handlers::get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    logging::init_logging();
    let settings = load_settings();

    let catalog = load_catalog(&settings)
        .await
        .expect("failed to load event catalog");

    let addr = settings.addr();
    let app = router(AppState::new(Arc::new(catalog), settings));

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    info!("listening on {}", addr);
    axum::serve(listener, app).await.unwrap();
}
