use crate::domain::{Floor, FloorModule};
use crate::error::{Error, Result};
use crate::server::AppState;
use crate::sites::{CreateFloorRequest, UpdateFloorRequest, Upload3dEntry, UploadFile};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
struct ListFloorsQuery {
    #[serde(default)]
    all: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sites/:sid/floors", get(list_floors).post(create_floor))
        .route("/sites/:sid/floors/initialize", post(initialize_floors))
        .route("/sites/:sid/floors/sortorder", put(update_sort_order))
        .route(
            "/sites/:sid/floors/:fid",
            get(get_floor).put(update_floor).delete(delete_floor),
        )
        .route("/sites/:sid/floors/:fid/modules", get(list_modules))
        .route("/sites/:sid/floors/:fid/2dmodules", post(upload_2d_modules))
        .route("/sites/:sid/floors/:fid/3dmodules", post(upload_3d_modules))
        .route(
            "/sites/:sid/floors/:fid/modules/:mid",
            delete(delete_module),
        )
}

async fn list_floors(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Query(query): Query<ListFloorsQuery>,
) -> Result<Json<Vec<Floor>>> {
    Ok(Json(state.floors.get_floors(site_id, query.all).await?))
}

async fn create_floor(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(request): Json<CreateFloorRequest>,
) -> Result<(StatusCode, Json<Floor>)> {
    let floor = state.floors.create_floor(site_id, request).await?;
    Ok((StatusCode::CREATED, Json(floor)))
}

async fn initialize_floors(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(codes): Json<Vec<String>>,
) -> Result<(StatusCode, Json<Vec<Floor>>)> {
    let floors = state.floors.initialize_site_floors(site_id, codes).await?;
    Ok((StatusCode::CREATED, Json(floors)))
}

async fn update_sort_order(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(ordered_ids): Json<Vec<Uuid>>,
) -> Result<StatusCode> {
    state.floors.update_sort_order(site_id, ordered_ids).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_floor(
    State(state): State<AppState>,
    Path((site_id, floor_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Floor>> {
    Ok(Json(state.floors.get_floor(site_id, floor_id).await?))
}

async fn update_floor(
    State(state): State<AppState>,
    Path((site_id, floor_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateFloorRequest>,
) -> Result<Json<Floor>> {
    Ok(Json(
        state.floors.update_floor(site_id, floor_id, request).await?,
    ))
}

async fn delete_floor(
    State(state): State<AppState>,
    Path((site_id, floor_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    state.floors.delete_floor(site_id, floor_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_modules(
    State(state): State<AppState>,
    Path((site_id, floor_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<FloorModule>>> {
    Ok(Json(state.floors.get_modules(site_id, floor_id).await?))
}

async fn upload_2d_modules(
    State(state): State<AppState>,
    Path((site_id, floor_id)): Path<(Uuid, Uuid)>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Vec<FloorModule>>)> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(e.to_string()))?
    {
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::BadRequest(e.to_string()))?
            .to_vec();
        files.push(UploadFile { file_name, bytes });
    }

    let modules = state
        .floors
        .upload_2d_modules(site_id, floor_id, files)
        .await?;
    Ok((StatusCode::CREATED, Json(modules)))
}

async fn upload_3d_modules(
    State(state): State<AppState>,
    Path((site_id, floor_id)): Path<(Uuid, Uuid)>,
    Json(entries): Json<Vec<Upload3dEntry>>,
) -> Result<(StatusCode, Json<Vec<FloorModule>>)> {
    let modules = state
        .floors
        .upload_3d_modules(site_id, floor_id, entries)
        .await?;
    Ok((StatusCode::CREATED, Json(modules)))
}

async fn delete_module(
    State(state): State<AppState>,
    Path((site_id, floor_id, module_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<StatusCode> {
    state
        .floors
        .delete_module(site_id, floor_id, module_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
