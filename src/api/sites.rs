use crate::domain::{Site, SitePreferences};
use crate::error::{Error, Result};
use crate::server::AppState;
use crate::sites::{CreateSiteRequest, SiteFilter, UpdatePreferencesRequest, UpdateSiteRequest};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
struct ListSitesQuery {
    customer_id: Option<Uuid>,
    portfolio_id: Option<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sites", get(list_sites))
        .route(
            "/customers/:cid/portfolios/:pid/sites",
            get(list_portfolio_sites).post(create_site),
        )
        .route(
            "/sites/:id",
            get(get_site).put(update_site).delete(delete_site),
        )
        .route(
            "/sites/:id/preferences",
            get(get_preferences).put(update_preferences),
        )
        .route("/scopes/:scope_id/preferences", get(get_scope_preferences))
        .route("/sites/:id/logo", put(update_logo))
}

async fn list_sites(
    State(state): State<AppState>,
    Query(query): Query<ListSitesQuery>,
) -> Result<Json<Vec<Site>>> {
    let sites = state
        .sites
        .get_sites(SiteFilter {
            customer_id: query.customer_id,
            portfolio_id: query.portfolio_id,
            site_ids: None,
        })
        .await?;
    Ok(Json(sites))
}

async fn list_portfolio_sites(
    State(state): State<AppState>,
    Path((customer_id, portfolio_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<Site>>> {
    let sites = state
        .sites
        .get_sites(SiteFilter {
            customer_id: Some(customer_id),
            portfolio_id: Some(portfolio_id),
            site_ids: None,
        })
        .await?;
    Ok(Json(sites))
}

async fn create_site(
    State(state): State<AppState>,
    Path((customer_id, portfolio_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<CreateSiteRequest>,
) -> Result<(StatusCode, Json<Site>)> {
    let site = state
        .sites
        .create_site(customer_id, portfolio_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(site)))
}

async fn get_site(State(state): State<AppState>, Path(site_id): Path<Uuid>) -> Result<Json<Site>> {
    Ok(Json(state.sites.get_site(site_id).await?))
}

async fn update_site(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(request): Json<UpdateSiteRequest>,
) -> Result<Json<Site>> {
    Ok(Json(state.sites.update_site(site_id, request).await?))
}

async fn delete_site(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.sites.delete_site(site_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_preferences(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
) -> Result<Json<SitePreferences>> {
    Ok(Json(state.sites.get_preferences(site_id).await?))
}

#[derive(Deserialize)]
struct PreferencesBody {
    scope_id: Option<String>,
    #[serde(flatten)]
    update: UpdatePreferencesRequest,
}

async fn update_preferences(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    Json(body): Json<PreferencesBody>,
) -> Result<Json<SitePreferences>> {
    Ok(Json(
        state
            .sites
            .update_preferences(site_id, body.scope_id, body.update)
            .await?,
    ))
}

async fn get_scope_preferences(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
) -> Result<Json<SitePreferences>> {
    Ok(Json(state.sites.get_preferences_by_scope(&scope_id).await?))
}

async fn update_logo(
    State(state): State<AppState>,
    Path(site_id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<Site>> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(e.to_string()))?
        .ok_or_else(|| Error::BadRequest("A logo file is required".to_string()))?;
    let file_name = field.file_name().unwrap_or("logo").to_string();
    let bytes = field
        .bytes()
        .await
        .map_err(|e| Error::BadRequest(e.to_string()))?
        .to_vec();

    Ok(Json(
        state.sites.update_site_logo(site_id, &file_name, bytes).await?,
    ))
}
