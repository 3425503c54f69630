//! Client for the image hub, which stores floor plan imagery and site logos.

use crate::error::{Error, Result};
use crate::observability::metrics;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Stored-image handle returned by the hub after an upload.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredImage {
    pub image_id: Uuid,
}

#[async_trait]
pub trait ImageHubClient: Send + Sync {
    /// Upload floor plan imagery under `{site_id}/floors/{floor_id}` and
    /// return the hub's id for it.
    async fn create_floor_module(
        &self,
        site_id: Uuid,
        floor_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredImage>;

    async fn delete_floor_module(
        &self,
        site_id: Uuid,
        floor_id: Uuid,
        image_id: Uuid,
    ) -> Result<()>;

    async fn create_site_logo(
        &self,
        site_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredImage>;
}

/// Talks to a deployed image hub over HTTP.
pub struct RemoteImageHub {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteImageHub {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn post_image(&self, url: String, file_name: &str, bytes: Vec<u8>) -> Result<StoredImage> {
        metrics::clients::image_hub_request();
        debug!("Uploading {} ({} bytes) to image hub", file_name, bytes.len());

        let response = self
            .client
            .post(&url)
            .header("x-file-name", file_name)
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::BadRequest(format!(
                "Image hub rejected upload with status {}",
                response.status()
            )));
        }

        let stored: StoredImage = response.json().await?;
        Ok(stored)
    }
}

#[async_trait]
impl ImageHubClient for RemoteImageHub {
    async fn create_floor_module(
        &self,
        site_id: Uuid,
        floor_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredImage> {
        let url = format!("{}/{}/floors/{}", self.base_url, site_id, floor_id);
        self.post_image(url, file_name, bytes).await
    }

    async fn delete_floor_module(
        &self,
        site_id: Uuid,
        floor_id: Uuid,
        image_id: Uuid,
    ) -> Result<()> {
        metrics::clients::image_hub_request();
        let url = format!(
            "{}/{}/floors/{}/{}",
            self.base_url, site_id, floor_id, image_id
        );
        let response = self.client.delete(&url).send().await?;
        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(Error::BadRequest(format!(
                "Image hub rejected delete with status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn create_site_logo(
        &self,
        site_id: Uuid,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<StoredImage> {
        let url = format!("{}/{}/logo", self.base_url, site_id);
        self.post_image(url, file_name, bytes).await
    }
}

/// In-process stand-in used when no hub is configured and in tests. Keeps
/// only the ids so uploads can be asserted against.
#[derive(Default)]
pub struct LocalImageHub {
    images: Mutex<HashMap<Uuid, String>>,
}

impl LocalImageHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, image_id: Uuid) -> bool {
        self.images.lock().unwrap().contains_key(&image_id)
    }

    pub fn image_count(&self) -> usize {
        self.images.lock().unwrap().len()
    }

    fn store(&self, file_name: &str) -> StoredImage {
        let image_id = Uuid::new_v4();
        self.images
            .lock()
            .unwrap()
            .insert(image_id, file_name.to_string());
        StoredImage { image_id }
    }
}

#[async_trait]
impl ImageHubClient for LocalImageHub {
    async fn create_floor_module(
        &self,
        _site_id: Uuid,
        _floor_id: Uuid,
        file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<StoredImage> {
        Ok(self.store(file_name))
    }

    async fn delete_floor_module(
        &self,
        _site_id: Uuid,
        _floor_id: Uuid,
        image_id: Uuid,
    ) -> Result<()> {
        self.images.lock().unwrap().remove(&image_id);
        Ok(())
    }

    async fn create_site_logo(
        &self,
        _site_id: Uuid,
        file_name: &str,
        _bytes: Vec<u8>,
    ) -> Result<StoredImage> {
        Ok(self.store(file_name))
    }
}
