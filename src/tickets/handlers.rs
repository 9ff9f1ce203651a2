use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::info;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    parse_ticket_id, NewTicket, Page, Ticket, TicketCategory, TicketError, TicketFilter,
    TicketPatch, TicketStats, TicketStatus,
};
use crate::core::shared::state::AppState;
use crate::tasks::{
    dispatch_classifications, enqueue_classification, run_bulk_classification,
    select_for_classification, BulkClassifyOptions, BulkOutcome, BulkSummary, QueueError,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ticket(#[from] TicketError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Ticket(e) => e.into_response(),
            Self::Queue(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response(),
        }
    }
}

/// Query string for the list endpoint. Every field arrives as a string so
/// that empty values (`?status=`) can be ignored instead of rejected.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_number(name: &str, value: &Option<String>, default: u32) -> Result<u32, TicketError> {
    match non_empty(value) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| TicketError::Validation(format!("The {name} must be an integer."))),
    }
}

impl TryFrom<ListQuery> for TicketFilter {
    type Error = TicketError;

    fn try_from(query: ListQuery) -> Result<Self, Self::Error> {
        let defaults = TicketFilter::default();
        Ok(TicketFilter {
            status: non_empty(&query.status)
                .map(str::parse::<TicketStatus>)
                .transpose()?,
            category: non_empty(&query.category)
                .map(str::parse::<TicketCategory>)
                .transpose()?,
            search: non_empty(&query.search).map(str::to_string),
            page: parse_number("page", &query.page, defaults.page)?,
            per_page: parse_number("per_page", &query.per_page, defaults.per_page)?,
        })
    }
}

pub async fn list_tickets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Ticket>>, ApiError> {
    let filter = TicketFilter::try_from(query)?;
    Ok(Json(state.store.list(&filter).await?))
}

pub async fn create_ticket(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewTicket>,
) -> Result<(StatusCode, Json<Ticket>), ApiError> {
    let ticket = state.store.create(new).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Ticket>, ApiError> {
    let id = parse_ticket_id(&id)?;
    Ok(Json(state.store.get(id).await?))
}

pub async fn update_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(patch): Json<TicketPatch>,
) -> Result<Json<Ticket>, ApiError> {
    let id = parse_ticket_id(&id)?;
    let ticket = if patch.is_empty() {
        state.store.get(id).await?
    } else {
        state.store.update(id, patch).await?
    };
    Ok(Json(ticket))
}

pub async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_ticket_id(&id)?;
    state.store.delete(id).await?;
    Ok(Json(json!({ "message": "Ticket deleted successfully" })))
}

pub async fn classify_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let id = parse_ticket_id(&id)?;
    state.store.get(id).await?;
    enqueue_classification(&state.queue, id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Ticket classification job has been queued",
            "ticket_id": id,
            "queue": state.queue.name(),
        })),
    ))
}

/// A missing or empty body means default options. Any other body must be a
/// valid options object, otherwise the request is rejected with 422.
fn bulk_options(body: &[u8]) -> Result<BulkClassifyOptions, TicketError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(BulkClassifyOptions::default());
    }
    let options: BulkClassifyOptions = serde_json::from_slice(body)
        .map_err(|e| TicketError::Validation(format!("Invalid bulk classification options: {e}")))?;
    options.validate()?;
    Ok(options)
}

/// Dry runs answer inline with the preview. Live runs select the tickets,
/// hand the paced dispatch to a background task and answer 202.
pub async fn bulk_classify(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let options = bulk_options(&body)?;

    if options.dry_run {
        let outcome = run_bulk_classification(state.store.as_ref(), &state.queue, &options).await?;
        return Ok(Json(outcome).into_response());
    }

    let ids: Vec<Uuid> = select_for_classification(state.store.as_ref(), &options)
        .await?
        .iter()
        .map(|t| t.id)
        .collect();

    if ids.is_empty() {
        info!("No tickets found to classify.");
        return Ok(Json(BulkOutcome::Dispatched(BulkSummary::default())).into_response());
    }

    let total = ids.len();
    let queue = state.queue.clone();
    let delay = options.delay();
    tokio::spawn(async move {
        dispatch_classifications(&queue, &ids, delay).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "mode": "queued",
            "message": "Bulk classification has been started",
            "total": total,
            "queue": state.queue.name(),
        })),
    )
        .into_response())
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<TicketStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

pub async fn get_meta() -> Json<Value> {
    let statuses: Map<String, Value> = TicketStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), Value::from(s.label())))
        .collect();
    let categories: Vec<&str> = TicketCategory::ALL.iter().map(|c| c.as_str()).collect();

    Json(json!({
        "statuses": statuses,
        "categories": categories,
    }))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/bulk-classify", post(bulk_classify))
        .route(
            "/api/tickets/:id",
            get(get_ticket)
                .put(update_ticket)
                .patch(update_ticket)
                .delete(delete_ticket),
        )
        .route("/api/tickets/:id/classify", post(classify_ticket))
        .route("/api/stats", get(get_stats))
        .route("/api/meta", get(get_meta))
}
