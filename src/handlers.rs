use crate::{
    catalog::{CatalogStats, CategoryCount, EventSource, submission_categories},
    error::AppError,
    models::{Category, EventRecord},
    query::{self, FilterSpec, PageRequest, QueryResult, SortKey},
    state::AppState,
    submission::{DraftUpdate, FormError, FormSnapshot, SubmissionController},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const RELATED_LIMIT: usize = 3;

fn number(params: &HashMap<String, String>, key: &str) -> Option<usize> {
    params.get(key).and_then(|v| v.trim().parse().ok())
}

/// `sort`, `pageSize` and `cursor` drive ordering and paging; every other
/// key is offered to the filter, which ignores the ones it does not know.
pub async fn get_events(
    State(app_state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<QueryResult> {
    let page = PageRequest {
        size: number(&params, "pageSize")
            .filter(|n| *n > 0)
            .unwrap_or(app_state.settings.default_page_size),
        cursor: number(&params, "cursor").unwrap_or(0),
    };
    let sort = SortKey::parse_lenient(params.get("sort").map(String::as_str));
    let spec = FilterSpec::from_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    if !spec.is_empty() {
        debug!(?spec, "filtering events");
    }
    let records = app_state.catalog.list_approved_events();
    Json(query::query(&records, &spec, sort, page))
}

pub async fn get_featured_events(State(app_state): State<AppState>) -> Json<Vec<EventRecord>> {
    Json(app_state.catalog.featured_events())
}

#[derive(Debug, Serialize)]
pub struct EventDetails {
    event: EventRecord,
    related: Vec<EventRecord>,
}

pub async fn get_event_details(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EventDetails>, AppError> {
    let event = app_state.catalog.get_event(&id)?;
    let related = app_state.catalog.related_events(&event, RELATED_LIMIT);
    Ok(Json(EventDetails { event, related }))
}

pub async fn get_categories(State(app_state): State<AppState>) -> Json<Vec<CategoryCount>> {
    Json(app_state.catalog.category_counts())
}

pub async fn get_submission_categories() -> Json<Vec<Category>> {
    Json(submission_categories())
}

#[derive(Debug, Serialize)]
pub struct FormResponse {
    id: String,
    #[serde(flatten)]
    form: FormSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

type FormBody = (StatusCode, Json<FormResponse>);
type FormReply = Result<FormBody, AppError>;

fn form_reply<T>(id: String, form: &SubmissionController, outcome: Result<T, FormError>) -> FormBody {
    let (status, message) = match outcome {
        Ok(_) => (StatusCode::OK, None),
        Err(err) => {
            let status = match err {
                FormError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
                FormError::NotAllowed { .. } | FormError::InFlight => StatusCode::CONFLICT,
                FormError::Failed(_) => StatusCode::BAD_GATEWAY,
            };
            (status, Some(err.to_string()))
        }
    };
    (status, Json(FormResponse { id, form: form.snapshot(), message }))
}

pub async fn create_submission(State(app_state): State<AppState>) -> FormBody {
    let (id, form) = app_state.open_form();
    let (_, body) = form_reply(id, &form, Ok::<(), FormError>(()));
    (StatusCode::CREATED, body)
}

pub async fn get_submission(State(app_state): State<AppState>, Path(id): Path<String>) -> FormReply {
    let form = app_state.form(&id)?;
    Ok(form_reply(id, &form, Ok::<(), FormError>(())))
}

pub async fn update_submission(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<DraftUpdate>,
) -> FormReply {
    let form = app_state.form(&id)?;
    let outcome = form.update(update);
    Ok(form_reply(id, &form, outcome))
}

fn transition(
    app_state: &AppState,
    id: String,
    step: impl FnOnce(&SubmissionController) -> Result<(), FormError>,
) -> FormReply {
    let form = app_state.form(&id)?;
    let outcome = step(&form);
    Ok(form_reply(id, &form, outcome))
}

pub async fn advance_submission(State(app_state): State<AppState>, Path(id): Path<String>) -> FormReply {
    transition(&app_state, id, |form| form.advance())
}

pub async fn back_submission(State(app_state): State<AppState>, Path(id): Path<String>) -> FormReply {
    transition(&app_state, id, |form| form.back())
}

pub async fn reset_submission(State(app_state): State<AppState>, Path(id): Path<String>) -> FormReply {
    transition(&app_state, id, |form| form.reset())
}

/// Abandons the draft and closes the session; the id is unknown afterwards.
pub async fn cancel_submission(State(app_state): State<AppState>, Path(id): Path<String>) -> FormReply {
    let form = app_state.form(&id)?;
    let outcome = form.cancel();
    if outcome.is_ok() {
        app_state.close_form(&id);
    }
    Ok(form_reply(id, &form, outcome))
}

pub async fn toggle_submission_category(
    State(app_state): State<AppState>,
    Path((id, category_id)): Path<(String, String)>,
) -> FormReply {
    transition(&app_state, id, |form| form.toggle_category(&category_id))
}

pub async fn submit_submission(State(app_state): State<AppState>, Path(id): Path<String>) -> FormReply {
    let form: Arc<SubmissionController> = app_state.form(&id)?;
    let outcome = form.submit().await;
    if let Err(err) = &outcome {
        warn!(submission = %id, error = %err, "submission not accepted");
    }
    Ok(form_reply(id, &form, outcome))
}

pub async fn get_pending_events(State(app_state): State<AppState>) -> Json<Vec<EventRecord>> {
    Json(app_state.catalog.pending_events())
}

pub async fn approve_event(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<EventRecord>, AppError> {
    app_state.catalog.approve(&id).map(Json)
}

pub async fn reject_event(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    app_state.catalog.reject(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_stats(State(app_state): State<AppState>) -> Json<CatalogStats> {
    Json(app_state.catalog.stats())
}
