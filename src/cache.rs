//! TTL caches in front of the hot read paths (site and floor lookups).

use crate::config::CacheConfig;
use crate::domain::{Floor, Site};
use moka::future::Cache;
use std::time::Duration;
use uuid::Uuid;

/// Caches for the read-mostly site hierarchy. Writes go through the owning
/// service, which invalidates here after persisting.
#[derive(Clone)]
pub struct SiteCaches {
    sites: Cache<Uuid, Site>,
    floors: Cache<Uuid, Vec<Floor>>,
}

impl SiteCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            sites: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(config.site_ttl_secs))
                .build(),
            floors: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(Duration::from_secs(config.floor_ttl_secs))
                .build(),
        }
    }

    pub async fn get_site(&self, site_id: Uuid) -> Option<Site> {
        self.sites.get(&site_id).await
    }

    pub async fn put_site(&self, site: Site) {
        if let Some(id) = site.id {
            self.sites.insert(id, site).await;
        }
    }

    pub async fn invalidate_site(&self, site_id: Uuid) {
        self.sites.invalidate(&site_id).await;
    }

    /// Floors are cached per site, keyed by site id.
    pub async fn get_floors(&self, site_id: Uuid) -> Option<Vec<Floor>> {
        self.floors.get(&site_id).await
    }

    pub async fn put_floors(&self, site_id: Uuid, floors: Vec<Floor>) {
        self.floors.insert(site_id, floors).await;
    }

    pub async fn invalidate_floors(&self, site_id: Uuid) {
        self.floors.invalidate(&site_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SiteStatus;
    use chrono::Utc;

    fn sample_site(id: Uuid) -> Site {
        Site {
            id: Some(id),
            customer_id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            name: "One Main".to_string(),
            code: "OM".to_string(),
            address: "1 Main St".to_string(),
            suburb: "Seattle".to_string(),
            state: "WA".to_string(),
            postcode: "98101".to_string(),
            country: "US".to_string(),
            timezone_id: "America/Los_Angeles".to_string(),
            latitude: None,
            longitude: None,
            area: None,
            site_type: "Office".to_string(),
            status: SiteStatus::Operations,
            construction_year: None,
            logo_id: None,
            number_of_floors: 10,
            contact_name: String::new(),
            contact_email: String::new(),
            contact_phone: String::new(),
            contact_title: String::new(),
            created_at: Utc::now(),
            date_opened: None,
        }
    }

    #[tokio::test]
    async fn caches_and_invalidates_sites() {
        let caches = SiteCaches::new(&CacheConfig::default());
        let id = Uuid::new_v4();

        assert!(caches.get_site(id).await.is_none());
        caches.put_site(sample_site(id)).await;
        assert_eq!(caches.get_site(id).await.unwrap().name, "One Main");

        caches.invalidate_site(id).await;
        assert!(caches.get_site(id).await.is_none());
    }
}
