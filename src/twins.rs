//! Digital twin graph: admin CRUD plus the asset/point/device read models
//! the rest of the platform consumes.
//!
//! Twins are classified by their model id: `dtmi:twinhub:asset:<category>;1`,
//! `dtmi:twinhub:point:<type>;1`, `dtmi:twinhub:device:<kind>;1`. Point and
//! device metadata (trend ids, external ids, connector ids, tags) lives in
//! the twin's `properties` document; linkage comes from relationships named
//! `isCapabilityOf` (point -> asset) and `hostedBy` (point -> device).

use crate::domain::{Asset, Device, Point, Twin, TwinRelationship};
use crate::error::{Error, Result};
use crate::pagination::{self, Page, DEFAULT_PAGE_SIZE};
use crate::storage::Storage;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const ASSET_MODEL_PREFIX: &str = "dtmi:twinhub:asset:";
pub const POINT_MODEL_PREFIX: &str = "dtmi:twinhub:point:";
pub const DEVICE_MODEL_PREFIX: &str = "dtmi:twinhub:device:";

pub const REL_IS_CAPABILITY_OF: &str = "isCapabilityOf";
pub const REL_HOSTED_BY: &str = "hostedBy";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetFilter {
    pub category: Option<String>,
    pub model_id: Option<String>,
    pub floor_id: Option<Uuid>,
    pub search: Option<String>,
}

pub struct TwinService {
    storage: Arc<dyn Storage>,
}

impl TwinService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    // -- admin twin CRUD ----------------------------------------------------

    pub async fn upsert_twin(&self, site_id: Uuid, mut twin: Twin) -> Result<Twin> {
        if twin.id.trim().is_empty() {
            return Err(Error::BadRequest("Twin id is required".to_string()));
        }
        if twin.model_id.trim().is_empty() {
            return Err(Error::BadRequest("Twin model id is required".to_string()));
        }
        twin.site_id = site_id;
        self.storage.upsert_twin(twin.clone()).await?;
        Ok(twin)
    }

    pub async fn get_twin(&self, site_id: Uuid, twin_id: &str) -> Result<Twin> {
        self.storage
            .get_twin(site_id, twin_id)
            .await?
            .ok_or_else(|| Error::not_found("Twin"))
    }

    pub async fn delete_twin(&self, site_id: Uuid, twin_id: &str) -> Result<()> {
        self.get_twin(site_id, twin_id).await?;
        self.storage.delete_twin(site_id, twin_id).await
    }

    pub async fn upsert_relationship(&self, relationship: TwinRelationship) -> Result<()> {
        if relationship.id.trim().is_empty() || relationship.name.trim().is_empty() {
            return Err(Error::BadRequest(
                "Relationship id and name are required".to_string(),
            ));
        }
        self.storage.upsert_relationship(relationship).await
    }

    pub async fn get_relationships(&self, twin_id: &str) -> Result<Vec<TwinRelationship>> {
        self.storage.get_relationships_for_twin(twin_id).await
    }

    /// Map legacy GUIDs to twin ids; GUIDs without a twin are omitted.
    pub async fn get_twin_ids_by_unique_ids(
        &self,
        site_id: Uuid,
        unique_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, String)>> {
        let twins = self.storage.get_twins_by_site(site_id).await?;
        let by_unique: HashMap<Uuid, String> =
            twins.into_iter().map(|t| (t.unique_id, t.id)).collect();
        Ok(unique_ids
            .iter()
            .filter_map(|uid| by_unique.get(uid).map(|id| (*uid, id.clone())))
            .collect())
    }

    // -- asset read model ---------------------------------------------------

    pub async fn get_assets(
        &self,
        site_id: Uuid,
        filter: AssetFilter,
        token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Page<Asset>> {
        let scope = format!("assets:{site_id}");
        let offset = pagination::decode_token(token, &scope)?;

        let twins = self.storage.get_twins_by_site(site_id).await?;
        let points = self.site_points(&twins).await?;

        let mut assets: Vec<Asset> = Vec::new();
        for twin in twins.iter().filter(|t| is_asset(t)) {
            let asset = self.to_asset(twin, &points);
            if let Some(category) = &filter.category {
                if !asset.category.eq_ignore_ascii_case(category) {
                    continue;
                }
            }
            if let Some(model_id) = &filter.model_id {
                if &asset.model_id != model_id {
                    continue;
                }
            }
            if let Some(floor_id) = filter.floor_id {
                if asset.floor_id != Some(floor_id) {
                    continue;
                }
            }
            if let Some(search) = &filter.search {
                let needle = search.to_ascii_lowercase();
                if !asset.name.to_ascii_lowercase().contains(&needle)
                    && !asset.twin_id.to_ascii_lowercase().contains(&needle)
                {
                    continue;
                }
            }
            assets.push(asset);
        }

        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        Ok(pagination::paginate(assets, offset, page_size, &scope))
    }

    pub async fn get_asset(&self, site_id: Uuid, twin_id: &str) -> Result<Asset> {
        let twin = self.get_twin(site_id, twin_id).await?;
        if !is_asset(&twin) {
            return Err(Error::not_found("Asset"));
        }
        let twins = self.storage.get_twins_by_site(site_id).await?;
        let points = self.site_points(&twins).await?;
        Ok(self.to_asset(&twin, &points))
    }

    pub async fn get_asset_by_unique_id(&self, site_id: Uuid, unique_id: Uuid) -> Result<Asset> {
        let twins = self.storage.get_twins_by_site(site_id).await?;
        let twin = twins
            .iter()
            .find(|t| is_asset(t) && t.unique_id == unique_id)
            .cloned()
            .ok_or_else(|| Error::not_found("Asset"))?;
        let points = self.site_points(&twins).await?;
        Ok(self.to_asset(&twin, &points))
    }

    pub async fn get_asset_by_forge_viewer_id(
        &self,
        site_id: Uuid,
        forge_viewer_id: &str,
    ) -> Result<Asset> {
        let twins = self.storage.get_twins_by_site(site_id).await?;
        let twin = twins
            .iter()
            .find(|t| {
                is_asset(t)
                    && property_str(t, "geometryViewerID").as_deref() == Some(forge_viewer_id)
            })
            .cloned()
            .ok_or_else(|| Error::not_found("Asset"))?;
        let points = self.site_points(&twins).await?;
        Ok(self.to_asset(&twin, &points))
    }

    // -- point read model ---------------------------------------------------

    pub async fn get_points(
        &self,
        site_id: Uuid,
        token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Page<Point>> {
        let scope = format!("points:{site_id}");
        let offset = pagination::decode_token(token, &scope)?;
        let twins = self.storage.get_twins_by_site(site_id).await?;
        let points = self.site_points(&twins).await?;
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        Ok(pagination::paginate(points, offset, page_size, &scope))
    }

    pub async fn get_points_by_tag(
        &self,
        site_id: Uuid,
        tag: &str,
        token: Option<&str>,
        page_size: Option<usize>,
    ) -> Result<Page<Point>> {
        let scope = format!("points:{site_id}:tag:{tag}");
        let offset = pagination::decode_token(token, &scope)?;
        let twins = self.storage.get_twins_by_site(site_id).await?;
        let points: Vec<Point> = self
            .site_points(&twins)
            .await?
            .into_iter()
            .filter(|p| p.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)))
            .collect();
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        Ok(pagination::paginate(points, offset, page_size, &scope))
    }

    pub async fn get_points_by_connector(
        &self,
        site_id: Uuid,
        connector_id: Uuid,
    ) -> Result<Vec<Point>> {
        let twins = self.storage.get_twins_by_site(site_id).await?;
        let points = self.site_points(&twins).await?;
        let device_ids: Vec<String> = twins
            .iter()
            .filter(|t| is_device(t) && property_uuid(t, "connectorID") == Some(connector_id))
            .map(|t| t.id.clone())
            .collect();
        Ok(points
            .into_iter()
            .filter(|p| {
                p.device_id
                    .as_ref()
                    .map(|d| device_ids.contains(d))
                    .unwrap_or(false)
            })
            .collect())
    }

    pub async fn get_points_by_trend_ids(
        &self,
        site_id: Uuid,
        trend_ids: &[Uuid],
    ) -> Result<Vec<Point>> {
        let twins = self.storage.get_twins_by_site(site_id).await?;
        let points = self.site_points(&twins).await?;
        Ok(points
            .into_iter()
            .filter(|p| p.trend_id.map(|t| trend_ids.contains(&t)).unwrap_or(false))
            .collect())
    }

    // -- device read model --------------------------------------------------

    pub async fn get_devices(
        &self,
        site_id: Uuid,
        connector_id: Option<Uuid>,
        include_points: bool,
    ) -> Result<Vec<Device>> {
        let twins = self.storage.get_twins_by_site(site_id).await?;
        let points = if include_points {
            self.site_points(&twins).await?
        } else {
            Vec::new()
        };

        let mut devices = Vec::new();
        for twin in twins.iter().filter(|t| is_device(t)) {
            if let Some(connector) = connector_id {
                if property_uuid(twin, "connectorID") != Some(connector) {
                    continue;
                }
            }
            let device_points: Vec<Point> = points
                .iter()
                .filter(|p| p.device_id.as_deref() == Some(twin.id.as_str()))
                .cloned()
                .collect();
            devices.push(Device {
                twin_id: twin.id.clone(),
                unique_id: twin.unique_id,
                site_id: twin.site_id,
                name: twin.name.clone(),
                connector_id: property_uuid(twin, "connectorID"),
                is_enabled: twin
                    .properties
                    .get("enabled")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true),
                points: device_points,
            });
        }
        Ok(devices)
    }

    // -- projection helpers -------------------------------------------------

    /// All point projections for a site, with device/asset linkage resolved
    /// from relationships.
    async fn site_points(&self, twins: &[Twin]) -> Result<Vec<Point>> {
        let mut points = Vec::new();
        for twin in twins.iter().filter(|t| is_point(t)) {
            let relationships = self.storage.get_relationships_for_twin(&twin.id).await?;
            let device_id = relationships
                .iter()
                .find(|r| r.name == REL_HOSTED_BY && r.source_id == twin.id)
                .map(|r| r.target_id.clone());
            let asset_ids: Vec<String> = relationships
                .iter()
                .filter(|r| r.name == REL_IS_CAPABILITY_OF && r.source_id == twin.id)
                .map(|r| r.target_id.clone())
                .collect();

            points.push(Point {
                twin_id: twin.id.clone(),
                unique_id: twin.unique_id,
                site_id: twin.site_id,
                name: twin.name.clone(),
                trend_id: property_uuid(twin, "trendID"),
                external_id: property_str(twin, "externalID").unwrap_or_default(),
                unit: property_str(twin, "unit").unwrap_or_default(),
                point_type: model_category(&twin.model_id, POINT_MODEL_PREFIX),
                tags: twin
                    .properties
                    .get("tags")
                    .and_then(|v| v.as_array())
                    .map(|tags| {
                        tags.iter()
                            .filter_map(|t| t.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default(),
                device_id,
                asset_ids,
            });
        }
        Ok(points)
    }

    fn to_asset(&self, twin: &Twin, site_points: &[Point]) -> Asset {
        let points: Vec<Point> = site_points
            .iter()
            .filter(|p| p.asset_ids.iter().any(|a| a == &twin.id))
            .cloned()
            .collect();
        Asset {
            twin_id: twin.id.clone(),
            unique_id: twin.unique_id,
            site_id: twin.site_id,
            name: twin.name.clone(),
            model_id: twin.model_id.clone(),
            floor_id: twin.floor_id,
            category: model_category(&twin.model_id, ASSET_MODEL_PREFIX),
            forge_viewer_id: property_str(twin, "geometryViewerID"),
            points,
        }
    }
}

fn is_asset(twin: &Twin) -> bool {
    twin.model_id.starts_with(ASSET_MODEL_PREFIX)
}

fn is_point(twin: &Twin) -> bool {
    twin.model_id.starts_with(POINT_MODEL_PREFIX)
}

fn is_device(twin: &Twin) -> bool {
    twin.model_id.starts_with(DEVICE_MODEL_PREFIX)
}

/// "dtmi:twinhub:asset:AirHandlingUnit;1" -> "AirHandlingUnit".
fn model_category(model_id: &str, prefix: &str) -> String {
    model_id
        .strip_prefix(prefix)
        .unwrap_or(model_id)
        .split(';')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn property_str(twin: &Twin, key: &str) -> Option<String> {
    twin.properties
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn property_uuid(twin: &Twin, key: &str) -> Option<Uuid> {
    twin.properties
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}
