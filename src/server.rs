//! HTTP server assembly: application state, router and startup.

use crate::api;
use crate::cache::SiteCaches;
use crate::clients::{
    DigitalTwinApiClient, ImageHubClient, LocalDigitalTwinApi, LocalImageHub,
    LoggingNotificationClient, NotificationClient, RemoteImageHub, RemoteNotificationClient,
};
use crate::config::Config;
use crate::directory::DirectoryService;
use crate::observability::metrics;
use crate::sites::{FloorService, SiteService, WidgetService};
use crate::storage::Storage;
use crate::twins::TwinService;
use crate::workflow::{InspectionGenerator, InspectionService, TicketService, TicketTemplateService};
use axum::http::{Method, Request};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use hyper::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<DirectoryService>,
    pub sites: Arc<SiteService>,
    pub floors: Arc<FloorService>,
    pub widgets: Arc<WidgetService>,
    pub twins: Arc<TwinService>,
    pub templates: Arc<TicketTemplateService>,
    pub tickets: Arc<TicketService>,
    pub inspections: Arc<InspectionService>,
    pub generator: Arc<InspectionGenerator>,
}

impl AppState {
    /// Wire the services from config. Image hub and notification clients
    /// fall back to local/no-op adapters when no URL is configured.
    pub fn build(config: &Config, storage: Arc<dyn Storage>) -> Self {
        let caches = SiteCaches::new(&config.cache);

        let image_hub: Arc<dyn ImageHubClient> = match &config.services.image_hub_url {
            Some(url) => Arc::new(RemoteImageHub::new(url.clone())),
            None => Arc::new(LocalImageHub::new()),
        };
        let notifications: Arc<dyn NotificationClient> = match &config.services.notification_url {
            Some(url) => Arc::new(RemoteNotificationClient::new(url.clone())),
            None => Arc::new(LoggingNotificationClient),
        };
        let twin_api: Arc<dyn DigitalTwinApiClient> =
            Arc::new(LocalDigitalTwinApi::new(storage.clone()));

        Self {
            directory: Arc::new(DirectoryService::new(
                storage.clone(),
                notifications.clone(),
            )),
            sites: Arc::new(SiteService::new(
                storage.clone(),
                caches.clone(),
                image_hub.clone(),
            )),
            floors: Arc::new(FloorService::new(
                storage.clone(),
                caches,
                image_hub,
                config.floor_modules.clone(),
            )),
            widgets: Arc::new(WidgetService::new(storage.clone())),
            twins: Arc::new(TwinService::new(storage.clone())),
            templates: Arc::new(TicketTemplateService::new(
                storage.clone(),
                twin_api,
                notifications,
                config.scheduling.advance_days,
            )),
            tickets: Arc::new(TicketService::new(storage.clone())),
            inspections: Arc::new(InspectionService::new(storage.clone())),
            generator: Arc::new(InspectionGenerator::new(storage)),
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "twinhub",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn prometheus_metrics() -> impl IntoResponse {
    metrics::render()
}

async fn track_requests<B>(request: Request<B>, next: Next<B>) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    metrics::api::request(path.clone());
    if response.status().is_client_error() || response.status().is_server_error() {
        metrics::api::request_error(path);
    }
    response
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .merge(api::directory::routes())
        .merge(api::sites::routes())
        .merge(api::floors::routes())
        .merge(api::widgets::routes())
        .merge(api::twins::routes())
        .merge(api::workflow::routes())
        .layer(middleware::from_fn(track_requests))
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> crate::error::Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("HTTP server listening on http://{addr}");
    Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .map_err(|e| crate::error::Error::Config(format!("Server error: {e}")))?;
    Ok(())
}
