use crate::domain::{Asset, Device, Point, Twin, TwinRelationship};
use crate::error::Result;
use crate::pagination::Page;
use crate::server::AppState;
use crate::twins::AssetFilter;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
struct PageQuery {
    #[serde(rename = "pageSize")]
    page_size: Option<usize>,
}

#[derive(Deserialize)]
struct AssetQuery {
    category: Option<String>,
    model_id: Option<String>,
    floor_id: Option<Uuid>,
    search: Option<String>,
    #[serde(rename = "pageSize")]
    page_size: Option<usize>,
}

#[derive(Deserialize)]
struct DeviceQuery {
    connector_id: Option<Uuid>,
    #[serde(default)]
    include_points: bool,
}

#[derive(Deserialize)]
struct TrendIdsRequest {
    trend_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
struct UniqueIdsRequest {
    unique_ids: Vec<Uuid>,
}

#[derive(Serialize)]
struct TwinIdMapping {
    unique_id: Uuid,
    twin_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/admin/sites/:sid/twins", post(upsert_twin))
        .route(
            "/admin/sites/:sid/twins/:tid",
            get(get_twin).put(replace_twin).delete(delete_twin),
        )
        .route(
            "/admin/sites/:sid/twins/:tid/relationships",
            get(list_relationships).post(create_relationship),
        )
        .route("/sites/:sid/assets", get(list_assets))
        .route("/sites/:sid/assets/:id", get(get_asset))
        .route("/sites/:sid/assets/byUniqueId/:uid", get(get_asset_by_unique_id))
        .route("/sites/:sid/assets/forge/:fid", get(get_asset_by_forge_id))
        .route("/sites/:sid/points", get(list_points))
        .route("/sites/:sid/points/bytag/:tag", get(list_points_by_tag))
        .route(
            "/sites/:sid/points/byconnector/:cid",
            get(list_points_by_connector),
        )
        .route("/sites/:sid/points/byTrendIds", post(list_points_by_trend_ids))
        .route("/sites/:sid/devices", get(list_devices))
        .route("/sites/:sid/twins/byUniqueId", post(twin_ids_by_unique_ids))
}

async fn upsert_twin(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(twin): Json<Twin>,
) -> Result<(StatusCode, Json<Twin>)> {
    let twin = state.twins.upsert_twin(site_id, twin).await?;
    Ok((StatusCode::CREATED, Json(twin)))
}

async fn get_twin(
    State(state): State<AppState>,
    Path((site_id, twin_id)): Path<(Uuid, String)>,
) -> Result<Json<Twin>> {
    Ok(Json(state.twins.get_twin(site_id, &twin_id).await?))
}

async fn replace_twin(
    State(state): State<AppState>,
    Path((site_id, twin_id)): Path<(Uuid, String)>,
    Json(mut twin): Json<Twin>,
) -> Result<Json<Twin>> {
    twin.id = twin_id;
    Ok(Json(state.twins.upsert_twin(site_id, twin).await?))
}

async fn delete_twin(
    State(state): State<AppState>,
    Path((site_id, twin_id)): Path<(Uuid, String)>,
) -> Result<StatusCode> {
    state.twins.delete_twin(site_id, &twin_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_relationships(
    State(state): State<AppState>,
    Path((_site_id, twin_id)): Path<(Uuid, String)>,
) -> Result<Json<Vec<TwinRelationship>>> {
    Ok(Json(state.twins.get_relationships(&twin_id).await?))
}

async fn create_relationship(
    State(state): State<AppState>,
    Path((_site_id, twin_id)): Path<(Uuid, String)>,
    Json(mut relationship): Json<TwinRelationship>,
) -> Result<StatusCode> {
    relationship.source_id = twin_id;
    state.twins.upsert_relationship(relationship).await?;
    Ok(StatusCode::CREATED)
}

async fn list_assets(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Query(query): Query<AssetQuery>,
    headers: HeaderMap,
) -> Result<Json<Page<Asset>>> {
    let token = crate::api::continuation_token(&headers);
    let filter = AssetFilter {
        category: query.category,
        model_id: query.model_id,
        floor_id: query.floor_id,
        search: query.search,
    };
    Ok(Json(
        state
            .twins
            .get_assets(site_id, filter, token.as_deref(), query.page_size)
            .await?,
    ))
}

async fn get_asset(
    State(state): State<AppState>,
    Path((site_id, twin_id)): Path<(Uuid, String)>,
) -> Result<Json<Asset>> {
    Ok(Json(state.twins.get_asset(site_id, &twin_id).await?))
}

async fn get_asset_by_unique_id(
    State(state): State<AppState>,
    Path((site_id, unique_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Asset>> {
    Ok(Json(
        state.twins.get_asset_by_unique_id(site_id, unique_id).await?,
    ))
}

async fn get_asset_by_forge_id(
    State(state): State<AppState>,
    Path((site_id, forge_viewer_id)): Path<(Uuid, String)>,
) -> Result<Json<Asset>> {
    Ok(Json(
        state
            .twins
            .get_asset_by_forge_viewer_id(site_id, &forge_viewer_id)
            .await?,
    ))
}

async fn list_points(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
) -> Result<Json<Page<Point>>> {
    let token = crate::api::continuation_token(&headers);
    Ok(Json(
        state
            .twins
            .get_points(site_id, token.as_deref(), query.page_size)
            .await?,
    ))
}

async fn list_points_by_tag(
    State(state): State<AppState>,
    Path((site_id, tag)): Path<(Uuid, String)>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
) -> Result<Json<Page<Point>>> {
    let token = crate::api::continuation_token(&headers);
    Ok(Json(
        state
            .twins
            .get_points_by_tag(site_id, &tag, token.as_deref(), query.page_size)
            .await?,
    ))
}

async fn list_points_by_connector(
    State(state): State<AppState>,
    Path((site_id, connector_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<Point>>> {
    Ok(Json(
        state
            .twins
            .get_points_by_connector(site_id, connector_id)
            .await?,
    ))
}

async fn list_points_by_trend_ids(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(request): Json<TrendIdsRequest>,
) -> Result<Json<Vec<Point>>> {
    Ok(Json(
        state
            .twins
            .get_points_by_trend_ids(site_id, &request.trend_ids)
            .await?,
    ))
}

async fn list_devices(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<Vec<Device>>> {
    Ok(Json(
        state
            .twins
            .get_devices(site_id, query.connector_id, query.include_points)
            .await?,
    ))
}

async fn twin_ids_by_unique_ids(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(request): Json<UniqueIdsRequest>,
) -> Result<Json<Vec<TwinIdMapping>>> {
    let mappings = state
        .twins
        .get_twin_ids_by_unique_ids(site_id, &request.unique_ids)
        .await?
        .into_iter()
        .map(|(unique_id, twin_id)| TwinIdMapping { unique_id, twin_id })
        .collect();
    Ok(Json(mappings))
}
