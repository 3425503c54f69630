use crate::domain::Widget;
use crate::error::Result;
use crate::server::AppState;
use crate::sites::{CreateWidgetRequest, SiteWidgetRequest};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize)]
struct PositionedWidget {
    #[serde(flatten)]
    widget: Widget,
    position: i32,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/widgets", get(list_widgets).post(create_widget))
        .route("/widgets/:id", put(update_widget).delete(delete_widget))
        .route(
            "/sites/:sid/widgets",
            get(list_site_widgets).post(add_site_widget),
        )
        .route("/sites/:sid/widgets/:wid", delete(remove_site_widget))
}

async fn list_widgets(State(state): State<AppState>) -> Result<Json<Vec<Widget>>> {
    Ok(Json(state.widgets.get_widgets().await?))
}

async fn create_widget(
    State(state): State<AppState>,
    Json(request): Json<CreateWidgetRequest>,
) -> Result<(StatusCode, Json<Widget>)> {
    let widget = state.widgets.create_widget(request).await?;
    Ok((StatusCode::CREATED, Json(widget)))
}

async fn update_widget(
    State(state): State<AppState>,
    Path(widget_id): Path<Uuid>,
    Json(request): Json<CreateWidgetRequest>,
) -> Result<Json<Widget>> {
    Ok(Json(state.widgets.update_widget(widget_id, request).await?))
}

async fn delete_widget(
    State(state): State<AppState>,
    Path(widget_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.widgets.delete_widget(widget_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_site_widgets(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
) -> Result<Json<Vec<PositionedWidget>>> {
    let widgets = state
        .widgets
        .get_site_widgets(site_id)
        .await?
        .into_iter()
        .map(|(widget, position)| PositionedWidget { widget, position })
        .collect();
    Ok(Json(widgets))
}

async fn add_site_widget(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(request): Json<SiteWidgetRequest>,
) -> Result<StatusCode> {
    state.widgets.add_widget_to_site(site_id, request).await?;
    Ok(StatusCode::CREATED)
}

async fn remove_site_widget(
    State(state): State<AppState>,
    Path((site_id, widget_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    state
        .widgets
        .remove_widget_from_site(site_id, widget_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
