use crate::domain::{CheckRecord, Inspection, InspectionRecord, Ticket, TicketTemplate};
use crate::error::Result;
use crate::server::AppState;
use crate::workflow::{
    BatchItemResult, CreateTicketRequest, GenerateSummary, ScheduledInspection, TicketFilter,
    UpdateTicketStatusRequest, UpdateTicketTemplateRequest,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
struct TemplateListQuery {
    archived: Option<bool>,
}

#[derive(Deserialize)]
struct GenerateForInspectionRequest {
    inspection_id: Uuid,
}

#[derive(Deserialize)]
struct SubmitCheckRecordRequest {
    value: Option<f64>,
    #[serde(default)]
    notes: String,
    submitted_by: Option<Uuid>,
}

#[derive(Serialize)]
struct SweepResult {
    tickets_created: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/sites/:sid/tickettemplate",
            get(list_ticket_templates).post(create_ticket_template),
        )
        .route(
            "/tickettemplate/:id",
            get(get_ticket_template).put(update_ticket_template),
        )
        .route("/sites/:sid/tickets", get(list_tickets).post(create_ticket))
        .route("/sites/:sid/tickets/batch", post(create_tickets_batch))
        .route("/tickets/:id", get(get_ticket))
        .route("/tickets/:id/status", put(update_ticket_status))
        .route(
            "/sites/:sid/inspections",
            get(list_inspections).post(create_inspection),
        )
        .route("/sites/:sid/inspections/due", get(list_due_inspections))
        .route(
            "/inspections/:id",
            get(get_inspection).put(update_inspection).delete(archive_inspection),
        )
        .route("/inspections/generate", post(generate_inspections))
        .route("/scheduledinspection/generate", post(generate_for_inspection))
        .route("/scheduledtickets/generate", post(generate_scheduled_tickets))
        .route("/checkrecords/:id/submit", post(submit_check_record))
        .route(
            "/inspectionrecords/:id/checkrecords",
            get(list_check_records),
        )
}

// -- ticket templates ---------------------------------------------------

async fn list_ticket_templates(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Query(query): Query<TemplateListQuery>,
) -> Result<Json<Vec<TicketTemplate>>> {
    Ok(Json(
        state
            .templates
            .get_ticket_templates(site_id, query.archived)
            .await?,
    ))
}

async fn create_ticket_template(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(template): Json<TicketTemplate>,
) -> Result<(StatusCode, Json<TicketTemplate>)> {
    let template = state
        .templates
        .create_ticket_template(site_id, template)
        .await?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn get_ticket_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> Result<Json<TicketTemplate>> {
    Ok(Json(state.templates.get_ticket_template(template_id).await?))
}

async fn update_ticket_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    Json(request): Json<UpdateTicketTemplateRequest>,
) -> Result<Json<TicketTemplate>> {
    Ok(Json(
        state
            .templates
            .update_ticket_template(template_id, request)
            .await?,
    ))
}

// -- tickets --------------------------------------------------------------

async fn list_tickets(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Query(filter): Query<TicketFilter>,
) -> Result<Json<Vec<Ticket>>> {
    Ok(Json(state.tickets.get_tickets(site_id, filter).await?))
}

async fn create_ticket(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(request): Json<CreateTicketRequest>,
) -> Result<(StatusCode, Json<Ticket>)> {
    let ticket = state.tickets.create_ticket(site_id, request).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn create_tickets_batch(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(requests): Json<Vec<CreateTicketRequest>>,
) -> Result<(StatusCode, Json<Vec<BatchItemResult>>)> {
    let results = state.tickets.create_tickets(site_id, requests).await;
    Ok((StatusCode::MULTI_STATUS, Json(results)))
}

async fn get_ticket(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<Ticket>> {
    Ok(Json(state.tickets.get_ticket(ticket_id).await?))
}

async fn update_ticket_status(
    State(state): State<AppState>,
    Path(ticket_id): Path<Uuid>,
    Json(request): Json<UpdateTicketStatusRequest>,
) -> Result<Json<Ticket>> {
    Ok(Json(
        state
            .tickets
            .update_ticket_status(ticket_id, request.status)
            .await?,
    ))
}

// -- inspections ----------------------------------------------------------

async fn list_inspections(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
) -> Result<Json<Vec<Inspection>>> {
    Ok(Json(state.inspections.get_inspections(site_id).await?))
}

async fn create_inspection(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(mut inspection): Json<Inspection>,
) -> Result<(StatusCode, Json<Inspection>)> {
    inspection.site_id = site_id;
    let inspection = state.inspections.create_inspection(inspection).await?;
    Ok((StatusCode::CREATED, Json(inspection)))
}

async fn list_due_inspections(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
) -> Result<Json<Vec<ScheduledInspection>>> {
    Ok(Json(
        state
            .generator
            .get_scheduled_inspections_for_site(site_id, Utc::now())
            .await?,
    ))
}

async fn get_inspection(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
) -> Result<Json<Inspection>> {
    Ok(Json(state.inspections.get_inspection(inspection_id).await?))
}

async fn update_inspection(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
    Json(mut inspection): Json<Inspection>,
) -> Result<Json<Inspection>> {
    inspection.id = Some(inspection_id);
    Ok(Json(state.inspections.update_inspection(inspection).await?))
}

async fn archive_inspection(
    State(state): State<AppState>,
    Path(inspection_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.inspections.archive_inspection(inspection_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// -- generation triggers ----------------------------------------------------

async fn generate_inspections(State(state): State<AppState>) -> Result<Json<GenerateSummary>> {
    Ok(Json(state.generator.generate(Utc::now()).await?))
}

async fn generate_for_inspection(
    State(state): State<AppState>,
    Json(request): Json<GenerateForInspectionRequest>,
) -> Result<Json<Option<InspectionRecord>>> {
    Ok(Json(
        state
            .generator
            .generate_for_inspection(request.inspection_id, Utc::now())
            .await?,
    ))
}

async fn generate_scheduled_tickets(State(state): State<AppState>) -> Result<Json<SweepResult>> {
    let tickets_created = state.templates.sweep(Utc::now()).await?;
    Ok(Json(SweepResult { tickets_created }))
}

// -- check records ----------------------------------------------------------

async fn submit_check_record(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
    Json(request): Json<SubmitCheckRecordRequest>,
) -> Result<Json<CheckRecord>> {
    Ok(Json(
        state
            .inspections
            .submit_check_record(record_id, request.value, request.notes, request.submitted_by)
            .await?,
    ))
}

async fn list_check_records(
    State(state): State<AppState>,
    Path(inspection_record_id): Path<Uuid>,
) -> Result<Json<Vec<CheckRecord>>> {
    Ok(Json(
        state.inspections.get_check_records(inspection_record_id).await?,
    ))
}
