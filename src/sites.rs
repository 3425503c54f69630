//! Sites, floors, floor-plan modules and dashboard widgets.

use crate::cache::SiteCaches;
use crate::calendar;
use crate::clients::ImageHubClient;
use crate::config::FloorModuleConfig;
use crate::domain::{
    Floor, FloorModule, ModuleType, Site, SitePreferences, SiteStatus, SiteWidget, Widget,
};
use crate::error::{Error, ErrorDescriptor, Result};
use crate::observability::metrics;
use crate::storage::Storage;
use chrono::Utc;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSiteRequest {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub suburb: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub postcode: String,
    #[serde(default)]
    pub country: String,
    pub timezone_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub area: Option<f64>,
    #[serde(default)]
    pub site_type: String,
    pub construction_year: Option<i32>,
    #[serde(default)]
    pub number_of_floors: i32,
    #[serde(default)]
    pub contact_name: String,
    #[serde(default)]
    pub contact_email: String,
    #[serde(default)]
    pub contact_phone: String,
    #[serde(default)]
    pub contact_title: String,
    pub date_opened: Option<chrono::NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSiteRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub suburb: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub country: Option<String>,
    pub timezone_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub area: Option<f64>,
    pub site_type: Option<String>,
    pub status: Option<SiteStatus>,
    pub construction_year: Option<i32>,
    pub number_of_floors: Option<i32>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_title: Option<String>,
}

/// Partial preferences update: only the provided sections are overwritten.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePreferencesRequest {
    pub time_machine: Option<serde_json::Value>,
    pub module_groups: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SiteFilter {
    pub customer_id: Option<Uuid>,
    pub portfolio_id: Option<Uuid>,
    pub site_ids: Option<Vec<Uuid>>,
}

pub struct SiteService {
    storage: Arc<dyn Storage>,
    caches: SiteCaches,
    image_hub: Arc<dyn ImageHubClient>,
}

impl SiteService {
    pub fn new(
        storage: Arc<dyn Storage>,
        caches: SiteCaches,
        image_hub: Arc<dyn ImageHubClient>,
    ) -> Self {
        Self {
            storage,
            caches,
            image_hub,
        }
    }

    pub async fn create_site(
        &self,
        customer_id: Uuid,
        portfolio_id: Uuid,
        request: CreateSiteRequest,
    ) -> Result<Site> {
        if request.name.trim().is_empty() || request.code.trim().is_empty() {
            return Err(Error::BadRequest(
                "Site name and code are required".to_string(),
            ));
        }
        // Fail early on bad timezone ids; everything downstream (scheduling,
        // occurrence math) depends on this resolving.
        calendar::resolve_timezone(&request.timezone_id)?;
        if self
            .storage
            .get_portfolio(portfolio_id)
            .await?
            .filter(|p| p.customer_id == customer_id)
            .is_none()
        {
            return Err(Error::not_found("Portfolio"));
        }

        let mut site = Site {
            id: None,
            customer_id,
            portfolio_id,
            name: request.name,
            code: request.code,
            address: request.address,
            suburb: request.suburb,
            state: request.state,
            postcode: request.postcode,
            country: request.country,
            timezone_id: request.timezone_id,
            latitude: request.latitude,
            longitude: request.longitude,
            area: request.area,
            site_type: request.site_type,
            status: SiteStatus::Operations,
            construction_year: request.construction_year,
            logo_id: None,
            number_of_floors: request.number_of_floors,
            contact_name: request.contact_name,
            contact_email: request.contact_email,
            contact_phone: request.contact_phone,
            contact_title: request.contact_title,
            created_at: Utc::now(),
            date_opened: request.date_opened,
        };
        self.storage.create_site(&mut site).await?;
        info!("Created site {} ({})", site.name, site.code);
        Ok(site)
    }

    pub async fn get_site(&self, site_id: Uuid) -> Result<Site> {
        if let Some(site) = self.caches.get_site(site_id).await {
            return Ok(site);
        }
        let site = self
            .storage
            .get_site(site_id)
            .await?
            .filter(|s| s.status != SiteStatus::Deleted)
            .ok_or_else(|| Error::not_found("Site"))?;
        self.caches.put_site(site.clone()).await;
        Ok(site)
    }

    pub async fn get_sites(&self, filter: SiteFilter) -> Result<Vec<Site>> {
        let sites = self.storage.get_sites().await?;
        Ok(sites
            .into_iter()
            .filter(|s| s.status != SiteStatus::Deleted)
            .filter(|s| filter.customer_id.map(|c| s.customer_id == c).unwrap_or(true))
            .filter(|s| {
                filter
                    .portfolio_id
                    .map(|p| s.portfolio_id == p)
                    .unwrap_or(true)
            })
            .filter(|s| {
                filter
                    .site_ids
                    .as_ref()
                    .map(|ids| s.id.map(|id| ids.contains(&id)).unwrap_or(false))
                    .unwrap_or(true)
            })
            .collect())
    }

    pub async fn update_site(&self, site_id: Uuid, request: UpdateSiteRequest) -> Result<Site> {
        let mut site = self.get_site(site_id).await?;
        if let Some(tz) = &request.timezone_id {
            calendar::resolve_timezone(tz)?;
            site.timezone_id = tz.clone();
        }
        if let Some(name) = request.name {
            site.name = name;
        }
        if let Some(address) = request.address {
            site.address = address;
        }
        if let Some(suburb) = request.suburb {
            site.suburb = suburb;
        }
        if let Some(state) = request.state {
            site.state = state;
        }
        if let Some(postcode) = request.postcode {
            site.postcode = postcode;
        }
        if let Some(country) = request.country {
            site.country = country;
        }
        if let Some(latitude) = request.latitude {
            site.latitude = Some(latitude);
        }
        if let Some(longitude) = request.longitude {
            site.longitude = Some(longitude);
        }
        if let Some(area) = request.area {
            site.area = Some(area);
        }
        if let Some(site_type) = request.site_type {
            site.site_type = site_type;
        }
        if let Some(status) = request.status {
            site.status = status;
        }
        if let Some(year) = request.construction_year {
            site.construction_year = Some(year);
        }
        if let Some(n) = request.number_of_floors {
            site.number_of_floors = n;
        }
        if let Some(v) = request.contact_name {
            site.contact_name = v;
        }
        if let Some(v) = request.contact_email {
            site.contact_email = v;
        }
        if let Some(v) = request.contact_phone {
            site.contact_phone = v;
        }
        if let Some(v) = request.contact_title {
            site.contact_title = v;
        }
        self.storage.update_site(&site).await?;
        self.caches.invalidate_site(site_id).await;
        Ok(site)
    }

    /// Sites are soft-deleted so historical tickets and records stay
    /// resolvable.
    pub async fn delete_site(&self, site_id: Uuid) -> Result<()> {
        let mut site = self.get_site(site_id).await?;
        site.status = SiteStatus::Deleted;
        self.storage.update_site(&site).await?;
        self.caches.invalidate_site(site_id).await;
        info!("Soft-deleted site {}", site_id);
        Ok(())
    }

    pub async fn update_site_logo(
        &self,
        site_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Site> {
        let mut site = self.get_site(site_id).await?;
        let stored = self
            .image_hub
            .create_site_logo(site_id, file_name, bytes)
            .await?;
        site.logo_id = Some(stored.image_id);
        self.storage.update_site(&site).await?;
        self.caches.invalidate_site(site_id).await;
        Ok(site)
    }

    pub async fn get_preferences(&self, site_id: Uuid) -> Result<SitePreferences> {
        self.get_site(site_id).await?;
        Ok(self
            .storage
            .get_site_preferences(site_id)
            .await?
            .unwrap_or_else(|| empty_preferences(site_id, String::new())))
    }

    pub async fn get_preferences_by_scope(&self, scope_id: &str) -> Result<SitePreferences> {
        self.storage
            .get_site_preferences_by_scope(scope_id)
            .await?
            .ok_or_else(|| Error::not_found("Site preferences"))
    }

    pub async fn update_preferences(
        &self,
        site_id: Uuid,
        scope_id: Option<String>,
        request: UpdatePreferencesRequest,
    ) -> Result<SitePreferences> {
        self.get_site(site_id).await?;
        let mut preferences = self
            .storage
            .get_site_preferences(site_id)
            .await?
            .unwrap_or_else(|| empty_preferences(site_id, String::new()));

        if let Some(scope_id) = scope_id {
            preferences.scope_id = scope_id;
        }
        if let Some(time_machine) = request.time_machine {
            preferences.time_machine = time_machine;
        }
        if let Some(module_groups) = request.module_groups {
            preferences.module_groups = module_groups;
        }
        self.storage
            .upsert_site_preferences(preferences.clone())
            .await?;
        Ok(preferences)
    }
}

fn empty_preferences(site_id: Uuid, scope_id: String) -> SitePreferences {
    SitePreferences {
        site_id,
        scope_id,
        time_machine: serde_json::json!({}),
        module_groups: serde_json::json!({}),
    }
}

// ---------------------------------------------------------------------------
// Floors and floor-plan modules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateFloorRequest {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub geometry: String,
    pub model_reference: Option<Uuid>,
    #[serde(default)]
    pub is_site_wide: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateFloorRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    pub geometry: Option<String>,
    pub model_reference: Option<Uuid>,
    pub is_site_wide: Option<bool>,
}

/// One file in a 2D plan upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// One entry in a 3D module upload.
#[derive(Debug, Clone, Deserialize)]
pub struct Upload3dEntry {
    pub file_name: String,
    pub url: String,
}

pub struct FloorService {
    storage: Arc<dyn Storage>,
    caches: SiteCaches,
    image_hub: Arc<dyn ImageHubClient>,
    module_config: FloorModuleConfig,
}

impl FloorService {
    pub fn new(
        storage: Arc<dyn Storage>,
        caches: SiteCaches,
        image_hub: Arc<dyn ImageHubClient>,
        module_config: FloorModuleConfig,
    ) -> Self {
        Self {
            storage,
            caches,
            image_hub,
            module_config,
        }
    }

    pub async fn create_floor(&self, site_id: Uuid, request: CreateFloorRequest) -> Result<Floor> {
        if request.code.trim().is_empty() {
            return Err(Error::BadRequest("Floor code is required".to_string()));
        }
        let existing = self.storage.get_floors_by_site(site_id).await?;
        self.check_floor_uniqueness(&existing, &request.code, request.model_reference, None)?;

        let sort_order = existing.iter().map(|f| f.sort_order).max().unwrap_or(-1) + 1;
        let mut floor = Floor {
            id: None,
            site_id,
            name: request.name,
            code: request.code,
            sort_order,
            geometry: request.geometry,
            model_reference: request.model_reference,
            is_site_wide: request.is_site_wide,
            is_decommissioned: false,
        };
        self.storage.create_floor(&mut floor).await?;
        self.caches.invalidate_floors(site_id).await;
        Ok(floor)
    }

    fn check_floor_uniqueness(
        &self,
        existing: &[Floor],
        code: &str,
        model_reference: Option<Uuid>,
        exclude_id: Option<Uuid>,
    ) -> Result<()> {
        let others = existing
            .iter()
            .filter(|f| !f.is_decommissioned && f.id != exclude_id);
        for floor in others {
            if floor.code.eq_ignore_ascii_case(code) {
                return Err(Error::BadRequest(format!(
                    "A floor with code {code} already exists on this site"
                )));
            }
            if model_reference.is_some() && floor.model_reference == model_reference {
                return Err(Error::BadRequest(
                    "A floor with this model reference already exists on this site".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub async fn get_floor(&self, site_id: Uuid, floor_id: Uuid) -> Result<Floor> {
        self.storage
            .get_floor(floor_id)
            .await?
            .filter(|f| f.site_id == site_id && !f.is_decommissioned)
            .ok_or_else(|| Error::not_found("Floor"))
    }

    /// List floors. With `all = false` only floors carrying a base 2D module
    /// or any 3D module are returned (the set a viewer can render).
    pub async fn get_floors(&self, site_id: Uuid, all: bool) -> Result<Vec<Floor>> {
        let floors = match self.caches.get_floors(site_id).await {
            Some(floors) => floors,
            None => {
                let floors: Vec<Floor> = self
                    .storage
                    .get_floors_by_site(site_id)
                    .await?
                    .into_iter()
                    .filter(|f| !f.is_decommissioned)
                    .collect();
                self.caches.put_floors(site_id, floors.clone()).await;
                floors
            }
        };

        if all {
            return Ok(floors);
        }

        let types = self.storage.get_module_types_by_site(site_id).await?;
        let types_by_id: HashMap<Uuid, &ModuleType> =
            types.iter().filter_map(|t| t.id.map(|id| (id, t))).collect();
        let base_type_ids: HashSet<Uuid> = types
            .iter()
            .filter(|t| !t.is_3d && !t.can_be_deleted)
            .filter_map(|t| t.id)
            .collect();

        let mut renderable = Vec::new();
        for floor in floors {
            let Some(floor_id) = floor.id else { continue };
            let modules = self.storage.get_modules_by_floor(floor_id).await?;
            let has_renderable = modules.iter().any(|m| {
                base_type_ids.contains(&m.module_type_id)
                    || types_by_id
                        .get(&m.module_type_id)
                        .map(|t| t.is_3d)
                        .unwrap_or(false)
            });
            if has_renderable {
                renderable.push(floor);
            }
        }
        Ok(renderable)
    }

    pub async fn update_floor(
        &self,
        site_id: Uuid,
        floor_id: Uuid,
        request: UpdateFloorRequest,
    ) -> Result<Floor> {
        let mut floor = self.get_floor(site_id, floor_id).await?;
        let existing = self.storage.get_floors_by_site(site_id).await?;

        let code = request.code.as_deref().unwrap_or(&floor.code);
        let model_reference = request.model_reference.or(floor.model_reference);
        self.check_floor_uniqueness(&existing, code, model_reference, Some(floor_id))?;

        if let Some(name) = request.name {
            floor.name = name;
        }
        if let Some(code) = request.code {
            floor.code = code;
        }
        if let Some(geometry) = request.geometry {
            floor.geometry = geometry;
        }
        if let Some(model_reference) = request.model_reference {
            floor.model_reference = Some(model_reference);
        }
        if let Some(is_site_wide) = request.is_site_wide {
            floor.is_site_wide = is_site_wide;
        }
        self.storage.update_floor(&floor).await?;
        self.caches.invalidate_floors(site_id).await;
        Ok(floor)
    }

    pub async fn delete_floor(&self, site_id: Uuid, floor_id: Uuid) -> Result<()> {
        let mut floor = self.get_floor(site_id, floor_id).await?;
        floor.is_decommissioned = true;
        self.storage.update_floor(&floor).await?;
        self.caches.invalidate_floors(site_id).await;
        Ok(())
    }

    /// Reorder all of a site's floors at once. The id set must match the
    /// site's active floors exactly.
    pub async fn update_sort_order(&self, site_id: Uuid, ordered_ids: Vec<Uuid>) -> Result<()> {
        let floors: Vec<Floor> = self
            .storage
            .get_floors_by_site(site_id)
            .await?
            .into_iter()
            .filter(|f| !f.is_decommissioned)
            .collect();

        let current: HashSet<Uuid> = floors.iter().filter_map(|f| f.id).collect();
        let requested: HashSet<Uuid> = ordered_ids.iter().copied().collect();
        if current != requested || ordered_ids.len() != requested.len() {
            return Err(Error::BadRequest(
                "Sort order must list every floor of the site exactly once".to_string(),
            ));
        }

        for (position, floor_id) in ordered_ids.iter().enumerate() {
            let mut floor = floors
                .iter()
                .find(|f| f.id == Some(*floor_id))
                .cloned()
                .ok_or_else(|| Error::not_found("Floor"))?;
            floor.sort_order = position as i32;
            self.storage.update_floor(&floor).await?;
        }
        self.caches.invalidate_floors(site_id).await;
        Ok(())
    }

    /// Bulk-create the floor ladder for a new site from a list of codes.
    pub async fn initialize_site_floors(
        &self,
        site_id: Uuid,
        codes: Vec<String>,
    ) -> Result<Vec<Floor>> {
        let mut created = Vec::with_capacity(codes.len());
        for (position, code) in codes.into_iter().enumerate() {
            if code.trim().is_empty() {
                return Err(Error::BadRequest("Floor code is required".to_string()));
            }
            let mut floor = Floor {
                id: None,
                site_id,
                name: code.clone(),
                code,
                sort_order: position as i32,
                geometry: String::new(),
                model_reference: None,
                is_site_wide: false,
                is_decommissioned: false,
            };
            self.storage.create_floor(&mut floor).await?;
            created.push(floor);
        }
        self.caches.invalidate_floors(site_id).await;
        Ok(created)
    }

    pub async fn get_modules(&self, site_id: Uuid, floor_id: Uuid) -> Result<Vec<FloorModule>> {
        self.get_floor(site_id, floor_id).await?;
        self.storage.get_modules_by_floor(floor_id).await
    }

    /// Upload 2D plan images for a floor. Every rule failure is collected
    /// into one validation error; nothing is persisted unless all files
    /// pass.
    pub async fn upload_2d_modules(
        &self,
        site_id: Uuid,
        floor_id: Uuid,
        files: Vec<UploadFile>,
    ) -> Result<Vec<FloorModule>> {
        let floor = self.get_floor(site_id, floor_id).await?;
        if files.is_empty() {
            return Err(Error::BadRequest("No files were provided".to_string()));
        }

        let module_types: Vec<ModuleType> = self
            .storage
            .get_module_types_by_site(site_id)
            .await?
            .into_iter()
            .filter(|t| !t.is_3d)
            .collect();
        let existing_modules = self.storage.get_modules_by_floor(floor_id).await?;

        let mut errors: Vec<ErrorDescriptor> = Vec::new();
        let mut planned: Vec<(UploadFile, ModuleType, u32, u32)> = Vec::new();
        let mut seen_types: HashSet<Uuid> = HashSet::new();
        let mut upload_dimensions: Option<(u32, u32)> = None;

        // Existing 2D imagery on the floor pins the expected dimensions.
        let existing_dimensions = existing_modules
            .iter()
            .find_map(|m| m.image_width.zip(m.image_height));

        for file in files {
            let name = file.file_name.clone();

            if !self.extension_allowed(&name) {
                errors.push(ErrorDescriptor::new(
                    name.clone(),
                    format!(
                        "File extension must be one of: {}",
                        self.module_config.allowed_extensions.join(", ")
                    ),
                ));
                continue;
            }

            if file.bytes.len() as u64 > self.module_config.max_size_bytes {
                errors.push(ErrorDescriptor::new(
                    name.clone(),
                    format!(
                        "File exceeds the maximum size of {} bytes",
                        self.module_config.max_size_bytes
                    ),
                ));
                continue;
            }

            let Some((width, height)) = sniff_image_dimensions(&file.bytes) else {
                errors.push(ErrorDescriptor::new(
                    name.clone(),
                    "File is not a readable PNG or JPEG image".to_string(),
                ));
                continue;
            };

            if width > self.module_config.max_width || height > self.module_config.max_height {
                errors.push(ErrorDescriptor::new(
                    name.clone(),
                    format!(
                        "Image dimensions {width}x{height} exceed the maximum of {}x{}",
                        self.module_config.max_width, self.module_config.max_height
                    ),
                ));
                continue;
            }

            match upload_dimensions {
                None => upload_dimensions = Some((width, height)),
                Some(expected) if expected != (width, height) => {
                    errors.push(ErrorDescriptor::new(
                        name.clone(),
                        "All images in one upload must have identical dimensions".to_string(),
                    ));
                    continue;
                }
                Some(_) => {}
            }

            if let Some((ew, eh)) = existing_dimensions {
                if (width, height) != (ew, eh) {
                    errors.push(ErrorDescriptor::new(
                        name.clone(),
                        format!(
                            "Image dimensions must match the floor's existing plans ({ew}x{eh})"
                        ),
                    ));
                    continue;
                }
            }

            let Some(module_type) = match_module_type(&module_types, &name) else {
                errors.push(ErrorDescriptor::new(
                    name.clone(),
                    "File name does not match any module type prefix for this site".to_string(),
                ));
                continue;
            };

            let type_id = module_type.id.unwrap_or_default();
            if !seen_types.insert(type_id) {
                errors.push(ErrorDescriptor::new(
                    name.clone(),
                    format!(
                        "More than one file matches module type {}",
                        module_type.name
                    ),
                ));
                continue;
            }

            planned.push((file, module_type.clone(), width, height));
        }

        // The floor must end up with its base plan, either pre-existing or
        // part of this upload.
        let base_type_ids: HashSet<Uuid> = module_types
            .iter()
            .filter(|t| !t.can_be_deleted)
            .filter_map(|t| t.id)
            .collect();
        let has_base_already = existing_modules
            .iter()
            .any(|m| base_type_ids.contains(&m.module_type_id));
        let upload_has_base = planned
            .iter()
            .any(|(_, t, _, _)| t.id.map(|id| base_type_ids.contains(&id)).unwrap_or(false));
        if !has_base_already && !upload_has_base {
            errors.push(ErrorDescriptor::new(
                floor.code.clone(),
                "The floor must have a base architecture plan".to_string(),
            ));
        }

        if !errors.is_empty() {
            metrics::uploads::modules_rejected(errors.len() as u64);
            return Err(Error::Validation(errors));
        }

        let mut saved = Vec::with_capacity(planned.len());
        for (file, module_type, width, height) in planned {
            let stored = self
                .image_hub
                .create_floor_module(site_id, floor_id, &file.file_name, file.bytes)
                .await?;

            // Replacing an existing module of the same type retires its old
            // image.
            let mut module = match existing_modules
                .iter()
                .find(|m| m.module_type_id == module_type.id.unwrap_or_default())
            {
                Some(previous) => {
                    if let Some(old_image) = previous.visual_id {
                        self.image_hub
                            .delete_floor_module(site_id, floor_id, old_image)
                            .await?;
                    }
                    previous.clone()
                }
                None => FloorModule {
                    id: None,
                    floor_id,
                    module_type_id: module_type.id.unwrap_or_default(),
                    name: String::new(),
                    visual_id: None,
                    url: None,
                    image_width: None,
                    image_height: None,
                },
            };
            module.name = file_stem(&file.file_name).to_string();
            module.visual_id = Some(stored.image_id);
            module.image_width = Some(width);
            module.image_height = Some(height);
            self.storage.upsert_module(&mut module).await?;
            saved.push(module);
        }

        metrics::uploads::modules_accepted(saved.len() as u64);
        self.caches.invalidate_floors(site_id).await;
        Ok(saved)
    }

    /// Register 3D viewer modules for a floor. Unknown module types are
    /// created on the fly from `group__name` file stems.
    pub async fn upload_3d_modules(
        &self,
        site_id: Uuid,
        floor_id: Uuid,
        entries: Vec<Upload3dEntry>,
    ) -> Result<Vec<FloorModule>> {
        self.get_floor(site_id, floor_id).await?;
        if entries.is_empty() {
            return Err(Error::BadRequest("No modules were provided".to_string()));
        }

        let mut module_types: Vec<ModuleType> = self
            .storage
            .get_module_types_by_site(site_id)
            .await?
            .into_iter()
            .filter(|t| t.is_3d)
            .collect();
        let existing_modules = self.storage.get_modules_by_floor(floor_id).await?;

        let mut errors: Vec<ErrorDescriptor> = Vec::new();
        let mut planned: Vec<(Upload3dEntry, ModuleType)> = Vec::new();
        let mut seen_types: HashSet<Uuid> = HashSet::new();

        for entry in entries {
            let name = entry.file_name.clone();
            if entry.url.trim().is_empty() {
                errors.push(ErrorDescriptor::new(
                    name.clone(),
                    "A viewer URL is required for 3D modules".to_string(),
                ));
                continue;
            }

            let module_type = match match_module_type(&module_types, &name) {
                Some(t) => t.clone(),
                None => {
                    let mut created = module_type_from_stem(site_id, &name);
                    self.storage.create_module_type(&mut created).await?;
                    module_types.push(created.clone());
                    created
                }
            };

            let type_id = module_type.id.unwrap_or_default();
            if !seen_types.insert(type_id) {
                errors.push(ErrorDescriptor::new(
                    name.clone(),
                    format!(
                        "More than one file matches module type {}",
                        module_type.name
                    ),
                ));
                continue;
            }

            planned.push((entry, module_type));
        }

        if !errors.is_empty() {
            metrics::uploads::modules_rejected(errors.len() as u64);
            return Err(Error::Validation(errors));
        }

        let mut saved = Vec::with_capacity(planned.len());
        for (entry, module_type) in planned {
            let mut module = existing_modules
                .iter()
                .find(|m| m.module_type_id == module_type.id.unwrap_or_default())
                .cloned()
                .unwrap_or(FloorModule {
                    id: None,
                    floor_id,
                    module_type_id: module_type.id.unwrap_or_default(),
                    name: String::new(),
                    visual_id: None,
                    url: None,
                    image_width: None,
                    image_height: None,
                });
            module.name = file_stem(&entry.file_name).to_string();
            module.url = Some(entry.url);
            self.storage.upsert_module(&mut module).await?;
            saved.push(module);
        }

        metrics::uploads::modules_accepted(saved.len() as u64);
        self.caches.invalidate_floors(site_id).await;
        Ok(saved)
    }

    pub async fn delete_module(
        &self,
        site_id: Uuid,
        floor_id: Uuid,
        module_id: Uuid,
    ) -> Result<()> {
        self.get_floor(site_id, floor_id).await?;
        let module = self
            .storage
            .get_module(module_id)
            .await?
            .filter(|m| m.floor_id == floor_id)
            .ok_or_else(|| Error::not_found("Floor module"))?;

        if let Some(module_type) = self.storage.get_module_type(module.module_type_id).await? {
            if !module_type.can_be_deleted {
                return Err(Error::BadRequest(format!(
                    "Modules of type {} cannot be deleted",
                    module_type.name
                )));
            }
        }

        if let Some(image_id) = module.visual_id {
            self.image_hub
                .delete_floor_module(site_id, floor_id, image_id)
                .await?;
        }
        self.storage.delete_module(module_id).await?;
        self.caches.invalidate_floors(site_id).await;
        Ok(())
    }

    fn extension_allowed(&self, file_name: &str) -> bool {
        let lower = file_name.to_ascii_lowercase();
        self.module_config
            .allowed_extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
    }
}

/// The longest module-type prefix matching the file name wins, so that
/// "base_site_l1.png" picks "base_site" over "base".
fn match_module_type<'a>(types: &'a [ModuleType], file_name: &str) -> Option<&'a ModuleType> {
    let lower = file_name.to_ascii_lowercase();
    types
        .iter()
        .filter(|t| lower.starts_with(&t.prefix.to_ascii_lowercase()))
        .max_by_key(|t| t.prefix.len())
}

/// Build a 3D module type from a `group__name` file stem.
fn module_type_from_stem(site_id: Uuid, file_name: &str) -> ModuleType {
    let stem = file_stem(file_name);
    let (group, name) = stem.split_once("__").unwrap_or(("Base", stem));
    ModuleType {
        id: None,
        site_id,
        name: name.to_string(),
        prefix: stem.to_string(),
        module_group: group.to_string(),
        sort_order: 0,
        can_be_deleted: true,
        is_3d: true,
    }
}

fn file_stem(file_name: &str) -> &str {
    file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name)
}

/// Minimal header sniffing for the two accepted formats; returns
/// `(width, height)`.
fn sniff_image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    png_dimensions(bytes).or_else(|| jpeg_dimensions(bytes))
}

fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    const MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    if bytes.len() < 24 || bytes[..8] != MAGIC || &bytes[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
    Some((width, height))
}

fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 4 || bytes[0] != 0xFF || bytes[1] != 0xD8 {
        return None;
    }
    let mut i = 2;
    while i + 4 <= bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }
        // Standalone markers carry no length.
        if (0xD0..=0xD9).contains(&marker) {
            i += 2;
            continue;
        }
        let length = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xC3 | 0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF);
        if is_sof {
            if i + 9 > bytes.len() {
                return None;
            }
            let height = u32::from(u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]));
            let width = u32::from(u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]));
            return Some((width, height));
        }
        i += 2 + length;
    }
    None
}

// ---------------------------------------------------------------------------
// Widgets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWidgetRequest {
    pub widget_type: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteWidgetRequest {
    pub widget_id: Uuid,
    pub position: i32,
}

pub struct WidgetService {
    storage: Arc<dyn Storage>,
}

impl WidgetService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn create_widget(&self, request: CreateWidgetRequest) -> Result<Widget> {
        if request.widget_type.trim().is_empty() {
            return Err(Error::BadRequest("Widget type is required".to_string()));
        }
        let mut widget = Widget {
            id: None,
            widget_type: request.widget_type,
            metadata: request.metadata,
        };
        self.storage.create_widget(&mut widget).await?;
        Ok(widget)
    }

    pub async fn get_widgets(&self) -> Result<Vec<Widget>> {
        self.storage.get_widgets().await
    }

    pub async fn update_widget(
        &self,
        widget_id: Uuid,
        request: CreateWidgetRequest,
    ) -> Result<Widget> {
        let mut widget = self
            .storage
            .get_widget(widget_id)
            .await?
            .ok_or_else(|| Error::not_found("Widget"))?;
        widget.widget_type = request.widget_type;
        widget.metadata = request.metadata;
        self.storage.update_widget(&widget).await?;
        Ok(widget)
    }

    pub async fn delete_widget(&self, widget_id: Uuid) -> Result<()> {
        self.storage
            .get_widget(widget_id)
            .await?
            .ok_or_else(|| Error::not_found("Widget"))?;
        self.storage.delete_widget(widget_id).await
    }

    pub async fn add_widget_to_site(&self, site_id: Uuid, request: SiteWidgetRequest) -> Result<()> {
        self.storage
            .get_widget(request.widget_id)
            .await?
            .ok_or_else(|| Error::not_found("Widget"))?;
        self.storage
            .upsert_site_widget(SiteWidget {
                site_id,
                widget_id: request.widget_id,
                position: request.position,
            })
            .await
    }

    pub async fn remove_widget_from_site(&self, site_id: Uuid, widget_id: Uuid) -> Result<()> {
        self.storage.delete_site_widget(site_id, widget_id).await
    }

    pub async fn get_site_widgets(&self, site_id: Uuid) -> Result<Vec<(Widget, i32)>> {
        let placements = self.storage.get_site_widgets(site_id).await?;
        let mut result = Vec::with_capacity(placements.len());
        for placement in placements {
            if let Some(widget) = self.storage.get_widget(placement.widget_id).await? {
                result.push((widget, placement.position));
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::LocalImageHub;
    use crate::config::CacheConfig;
    use crate::domain::{Customer, CustomerStatus, Portfolio};
    use crate::storage::InMemoryStorage;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
        bytes
    }

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        floors: FloorService,
        site_id: Uuid,
        floor_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let caches = SiteCaches::new(&CacheConfig::default());
        let image_hub = Arc::new(LocalImageHub::new());
        let floors = FloorService::new(
            storage.clone(),
            caches,
            image_hub,
            FloorModuleConfig::default(),
        );

        let site_id = Uuid::new_v4();
        let mut base = ModuleType {
            id: None,
            site_id,
            name: "Architecture".to_string(),
            prefix: "base".to_string(),
            module_group: "Base".to_string(),
            sort_order: 0,
            can_be_deleted: false,
            is_3d: false,
        };
        storage.create_module_type(&mut base).await.unwrap();
        let mut electrical = ModuleType {
            id: None,
            site_id,
            name: "Electrical".to_string(),
            prefix: "base_electrical".to_string(),
            module_group: "Services".to_string(),
            sort_order: 1,
            can_be_deleted: true,
            is_3d: false,
        };
        storage.create_module_type(&mut electrical).await.unwrap();

        let floor = floors
            .create_floor(
                site_id,
                CreateFloorRequest {
                    name: "Level 1".to_string(),
                    code: "L1".to_string(),
                    geometry: String::new(),
                    model_reference: None,
                    is_site_wide: false,
                },
            )
            .await
            .unwrap();

        Fixture {
            storage,
            floors,
            site_id,
            floor_id: floor.id.unwrap(),
        }
    }

    #[tokio::test]
    async fn create_site_requires_a_portfolio_under_the_customer() {
        let storage = Arc::new(InMemoryStorage::new());
        let service = SiteService::new(
            storage.clone(),
            SiteCaches::new(&CacheConfig::default()),
            Arc::new(LocalImageHub::new()),
        );

        let mut customer = Customer {
            id: None,
            name: "Acme".to_string(),
            status: CustomerStatus::Active,
            created_at: Utc::now(),
        };
        storage.create_customer(&mut customer).await.unwrap();
        let customer_id = customer.id.unwrap();
        let mut portfolio = Portfolio {
            id: None,
            customer_id,
            name: "Downtown".to_string(),
            created_at: Utc::now(),
        };
        storage.create_portfolio(&mut portfolio).await.unwrap();
        let portfolio_id = portfolio.id.unwrap();

        let request = || CreateSiteRequest {
            name: "One Main".to_string(),
            code: "OM".to_string(),
            address: String::new(),
            suburb: String::new(),
            state: String::new(),
            postcode: String::new(),
            country: String::new(),
            timezone_id: "America/Los_Angeles".to_string(),
            latitude: None,
            longitude: None,
            area: None,
            site_type: String::new(),
            construction_year: None,
            number_of_floors: 10,
            contact_name: String::new(),
            contact_email: String::new(),
            contact_phone: String::new(),
            contact_title: String::new(),
            date_opened: None,
        };

        let err = service
            .create_site(customer_id, Uuid::new_v4(), request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        // A portfolio under a different customer does not count either.
        let err = service
            .create_site(Uuid::new_v4(), portfolio_id, request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let site = service
            .create_site(customer_id, portfolio_id, request())
            .await
            .unwrap();
        assert_eq!(site.portfolio_id, portfolio_id);
    }

    #[test]
    fn sniffs_png_dimensions() {
        assert_eq!(sniff_image_dimensions(&png_bytes(640, 480)), Some((640, 480)));
        assert_eq!(sniff_image_dimensions(b"not an image"), None);
    }

    #[test]
    fn sniffs_jpeg_dimensions() {
        // SOI, APP0 (empty), SOF0 with 480x640.
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x02];
        bytes.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
        bytes.extend_from_slice(&480u16.to_be_bytes());
        bytes.extend_from_slice(&640u16.to_be_bytes());
        bytes.extend_from_slice(&[0x03, 0x01]);
        assert_eq!(sniff_image_dimensions(&bytes), Some((640, 480)));
    }

    #[test]
    fn longest_prefix_wins() {
        let site_id = Uuid::new_v4();
        let types = vec![
            ModuleType {
                id: Some(Uuid::new_v4()),
                site_id,
                name: "Architecture".to_string(),
                prefix: "base".to_string(),
                module_group: "Base".to_string(),
                sort_order: 0,
                can_be_deleted: false,
                is_3d: false,
            },
            ModuleType {
                id: Some(Uuid::new_v4()),
                site_id,
                name: "Electrical".to_string(),
                prefix: "base_electrical".to_string(),
                module_group: "Services".to_string(),
                sort_order: 1,
                can_be_deleted: true,
                is_3d: false,
            },
        ];
        let matched = match_module_type(&types, "base_electrical_l1.png").unwrap();
        assert_eq!(matched.name, "Electrical");
        let matched = match_module_type(&types, "base_l1.png").unwrap();
        assert_eq!(matched.name, "Architecture");
        assert!(match_module_type(&types, "hvac_l1.png").is_none());
    }

    #[tokio::test]
    async fn duplicate_floor_code_is_rejected() {
        let f = fixture().await;
        let err = f
            .floors
            .create_floor(
                f.site_id,
                CreateFloorRequest {
                    name: "Level One".to_string(),
                    code: "l1".to_string(),
                    geometry: String::new(),
                    model_reference: None,
                    is_site_wide: false,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn upload_errors_aggregate_and_nothing_persists() {
        let f = fixture().await;
        let files = vec![
            UploadFile {
                file_name: "base_l1.gif".to_string(),
                bytes: png_bytes(100, 100),
            },
            UploadFile {
                file_name: "unknown_l1.png".to_string(),
                bytes: png_bytes(100, 100),
            },
        ];
        let err = f
            .floors
            .upload_2d_modules(f.site_id, f.floor_id, files)
            .await
            .unwrap_err();
        match err {
            // Bad extension, no prefix match, and the missing base plan.
            Error::Validation(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(f
            .storage
            .get_modules_by_floor(f.floor_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn mismatched_dimensions_in_one_upload_are_rejected() {
        let f = fixture().await;
        let files = vec![
            UploadFile {
                file_name: "base_l1.png".to_string(),
                bytes: png_bytes(100, 100),
            },
            UploadFile {
                file_name: "base_electrical_l1.png".to_string(),
                bytes: png_bytes(200, 100),
            },
        ];
        let err = f
            .floors
            .upload_2d_modules(f.site_id, f.floor_id, files)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn upload_without_base_plan_is_rejected() {
        let f = fixture().await;
        let files = vec![UploadFile {
            file_name: "base_electrical_l1.png".to_string(),
            bytes: png_bytes(100, 100),
        }];
        let err = f
            .floors
            .upload_2d_modules(f.site_id, f.floor_id, files)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn valid_upload_persists_modules() {
        let f = fixture().await;
        let files = vec![
            UploadFile {
                file_name: "base_l1.png".to_string(),
                bytes: png_bytes(100, 100),
            },
            UploadFile {
                file_name: "base_electrical_l1.png".to_string(),
                bytes: png_bytes(100, 100),
            },
        ];
        let saved = f
            .floors
            .upload_2d_modules(f.site_id, f.floor_id, files)
            .await
            .unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved.iter().all(|m| m.visual_id.is_some()));
        assert_eq!(
            f.storage
                .get_modules_by_floor(f.floor_id)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn base_module_cannot_be_deleted() {
        let f = fixture().await;
        let files = vec![UploadFile {
            file_name: "base_l1.png".to_string(),
            bytes: png_bytes(100, 100),
        }];
        let saved = f
            .floors
            .upload_2d_modules(f.site_id, f.floor_id, files)
            .await
            .unwrap();

        let err = f
            .floors
            .delete_module(f.site_id, f.floor_id, saved[0].id.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn three_d_upload_creates_missing_types() {
        let f = fixture().await;
        let entries = vec![Upload3dEntry {
            file_name: "Services__Mechanical.nwd".to_string(),
            url: "https://viewer.example/mech".to_string(),
        }];
        let saved = f
            .floors
            .upload_3d_modules(f.site_id, f.floor_id, entries)
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);

        let created_type = f
            .storage
            .get_module_types_by_site(f.site_id)
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.is_3d)
            .unwrap();
        assert_eq!(created_type.name, "Mechanical");
        assert_eq!(created_type.module_group, "Services");
    }

    #[tokio::test]
    async fn sort_order_requires_exact_id_set() {
        let f = fixture().await;
        let other = f
            .floors
            .create_floor(
                f.site_id,
                CreateFloorRequest {
                    name: "Level 2".to_string(),
                    code: "L2".to_string(),
                    geometry: String::new(),
                    model_reference: None,
                    is_site_wide: false,
                },
            )
            .await
            .unwrap();

        // Missing a floor id.
        let err = f
            .floors
            .update_sort_order(f.site_id, vec![f.floor_id])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));

        f.floors
            .update_sort_order(f.site_id, vec![other.id.unwrap(), f.floor_id])
            .await
            .unwrap();
        let floors = f.floors.get_floors(f.site_id, true).await.unwrap();
        assert_eq!(floors[0].code, "L2");
        assert_eq!(floors[1].code, "L1");
    }
}
