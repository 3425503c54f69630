//! Client seam over the digital twin service. The default wiring is the
//! in-process twin store; a remote adapter exists for split deployments.

use crate::error::Result;
use crate::storage::Storage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinIdPair {
    pub unique_id: Uuid,
    pub twin_id: String,
}

#[async_trait]
pub trait DigitalTwinApiClient: Send + Sync {
    /// Map legacy asset GUIDs onto twin ids. GUIDs with no matching twin
    /// are omitted from the result.
    async fn get_twin_ids_by_unique_ids(
        &self,
        site_id: Uuid,
        unique_ids: &[Uuid],
    ) -> Result<Vec<TwinIdPair>>;
}

/// Resolves twin ids against the local twin store.
pub struct LocalDigitalTwinApi {
    storage: Arc<dyn Storage>,
}

impl LocalDigitalTwinApi {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl DigitalTwinApiClient for LocalDigitalTwinApi {
    async fn get_twin_ids_by_unique_ids(
        &self,
        site_id: Uuid,
        unique_ids: &[Uuid],
    ) -> Result<Vec<TwinIdPair>> {
        let twins = self.storage.get_twins_by_site(site_id).await?;
        let by_unique_id: HashMap<Uuid, String> = twins
            .into_iter()
            .map(|t| (t.unique_id, t.id))
            .collect();

        Ok(unique_ids
            .iter()
            .filter_map(|uid| {
                by_unique_id.get(uid).map(|twin_id| TwinIdPair {
                    unique_id: *uid,
                    twin_id: twin_id.clone(),
                })
            })
            .collect())
    }
}

/// Resolves twin ids against a remote twin service.
pub struct RemoteDigitalTwinApi {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteDigitalTwinApi {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl DigitalTwinApiClient for RemoteDigitalTwinApi {
    async fn get_twin_ids_by_unique_ids(
        &self,
        site_id: Uuid,
        unique_ids: &[Uuid],
    ) -> Result<Vec<TwinIdPair>> {
        let url = format!("{}/sites/{}/twins/byUniqueId", self.base_url, site_id);
        let pairs: Vec<TwinIdPair> = self
            .client
            .post(&url)
            .json(&unique_ids)
            .send()
            .await?
            .json()
            .await?;
        Ok(pairs)
    }
}
