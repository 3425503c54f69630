//! libsql-backed storage. Entities are stored as JSON documents in a
//! `nodes` table keyed by `"{label}:{id}"`; twin relationships live in an
//! `edges` table. Secondary filters (by site, by customer) run over the
//! deserialized documents.

use crate::domain::*;
use crate::error::{Error, Result};
use crate::storage::Storage;
use async_trait::async_trait;
use libsql::{Builder, Connection, Database};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::env;
use tracing::info;
use uuid::Uuid;

fn db_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Database {
        message: format!("{context}: {e}"),
    }
}

pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    /// Connect to a remote Turso database using `LIBSQL_URL` and
    /// `LIBSQL_AUTH_TOKEN`.
    pub async fn new() -> Result<Self> {
        let url = env::var("LIBSQL_URL")
            .map_err(|_| db_err("Configuration", "LIBSQL_URL environment variable not set"))?;
        let auth_token = env::var("LIBSQL_AUTH_TOKEN").map_err(|_| {
            db_err("Configuration", "LIBSQL_AUTH_TOKEN environment variable not set")
        })?;

        info!("Connecting to database at {}", url);
        let db = Builder::new_remote(url, auth_token)
            .build()
            .await
            .map_err(|e| db_err("Failed to connect to database", e))?;
        Ok(Self { db })
    }

    /// Open a local database file.
    pub async fn new_local(path: &str) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| db_err("Failed to open local database", e))?;
        Ok(Self { db })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");
        let conn = self.connection().await?;

        let base = include_str!("../../migrations/001_create_nodes_and_edges.sql");
        conn.execute_batch(base)
            .await
            .map_err(|e| db_err("Failed to run base migration", e))?;

        let indexes = include_str!("../../migrations/002_indexes_and_pragmas.sql");
        conn.execute_batch(indexes)
            .await
            .map_err(|e| db_err("Failed to run index migration", e))?;

        Ok(())
    }

    async fn connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| db_err("Failed to get database connection", e))
    }

    async fn put<T: Serialize>(&self, label: &str, id: &str, value: &T) -> Result<()> {
        let conn = self.connection().await?;
        let data = serde_json::to_string(value)?;
        let node_id = format!("{label}:{id}");
        conn.execute(
            "INSERT INTO nodes (id, label, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, COALESCE((SELECT created_at FROM nodes WHERE id = ?1), datetime('now')), datetime('now'))
             ON CONFLICT(id) DO UPDATE SET
               data = excluded.data,
               updated_at = excluded.updated_at",
            libsql::params![node_id, label, data],
        )
        .await
        .map_err(|e| db_err("Failed to upsert node", e))?;
        Ok(())
    }

    async fn fetch<T: DeserializeOwned>(&self, label: &str, id: &str) -> Result<Option<T>> {
        let conn = self.connection().await?;
        let node_id = format!("{label}:{id}");
        let mut rows = conn
            .query(
                "SELECT data FROM nodes WHERE id = ?",
                libsql::params![node_id],
            )
            .await
            .map_err(|e| db_err("Failed to query node", e))?;

        match rows.next().await.map_err(|e| db_err("Failed to read row", e))? {
            Some(row) => {
                let data: String = row.get(0).map_err(|e| db_err("Failed to get data", e))?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn fetch_all<T: DeserializeOwned>(&self, label: &str) -> Result<Vec<T>> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query(
                "SELECT data FROM nodes WHERE label = ?",
                libsql::params![label],
            )
            .await
            .map_err(|e| db_err("Failed to query nodes", e))?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| db_err("Failed to read row", e))? {
            let data: String = row.get(0).map_err(|e| db_err("Failed to get data", e))?;
            results.push(serde_json::from_str(&data)?);
        }
        Ok(results)
    }

    async fn remove(&self, label: &str, id: &str) -> Result<()> {
        let conn = self.connection().await?;
        let node_id = format!("{label}:{id}");
        conn.execute("DELETE FROM nodes WHERE id = ?", libsql::params![node_id])
            .await
            .map_err(|e| db_err("Failed to delete node", e))?;
        Ok(())
    }

    fn assignment_key(assignment: &Assignment) -> String {
        format!(
            "{}:{}:{:?}:{}",
            assignment.principal_id, assignment.role, assignment.resource_type,
            assignment.resource_id
        )
    }
}

#[async_trait]
impl Storage for DatabaseStorage {
    async fn create_customer(&self, customer: &mut Customer) -> Result<()> {
        let id = Uuid::new_v4();
        customer.id = Some(id);
        self.put("customer", &id.to_string(), customer).await
    }

    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>> {
        self.fetch("customer", &customer_id.to_string()).await
    }

    async fn get_customers(&self) -> Result<Vec<Customer>> {
        self.fetch_all("customer").await
    }

    async fn update_customer(&self, customer: &Customer) -> Result<()> {
        let id = customer
            .id
            .ok_or_else(|| Error::BadRequest("Customer has no ID".to_string()))?;
        self.put("customer", &id.to_string(), customer).await
    }

    async fn create_portfolio(&self, portfolio: &mut Portfolio) -> Result<()> {
        let id = Uuid::new_v4();
        portfolio.id = Some(id);
        self.put("portfolio", &id.to_string(), portfolio).await
    }

    async fn get_portfolio(&self, portfolio_id: Uuid) -> Result<Option<Portfolio>> {
        self.fetch("portfolio", &portfolio_id.to_string()).await
    }

    async fn get_portfolios_by_customer(&self, customer_id: Uuid) -> Result<Vec<Portfolio>> {
        Ok(self
            .fetch_all::<Portfolio>("portfolio")
            .await?
            .into_iter()
            .filter(|p| p.customer_id == customer_id)
            .collect())
    }

    async fn create_user(&self, user: &mut User) -> Result<()> {
        let id = Uuid::new_v4();
        user.id = Some(id);
        self.put("user", &id.to_string(), user).await
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        self.fetch("user", &user_id.to_string()).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .fetch_all::<User>("user")
            .await?
            .into_iter()
            .find(|u| u.email.eq_ignore_ascii_case(email)))
    }

    async fn get_users_by_customer(&self, customer_id: Uuid) -> Result<Vec<User>> {
        Ok(self
            .fetch_all::<User>("user")
            .await?
            .into_iter()
            .filter(|u| u.customer_id == customer_id)
            .collect())
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let id = user
            .id
            .ok_or_else(|| Error::BadRequest("User has no ID".to_string()))?;
        self.put("user", &id.to_string(), user).await
    }

    async fn create_assignment(&self, assignment: Assignment) -> Result<()> {
        self.put("assignment", &Self::assignment_key(&assignment), &assignment)
            .await
    }

    async fn delete_assignment(&self, assignment: &Assignment) -> Result<()> {
        self.remove("assignment", &Self::assignment_key(assignment)).await
    }

    async fn get_assignments_by_principal(&self, principal_id: Uuid) -> Result<Vec<Assignment>> {
        Ok(self
            .fetch_all::<Assignment>("assignment")
            .await?
            .into_iter()
            .filter(|a| a.principal_id == principal_id)
            .collect())
    }

    async fn create_site(&self, site: &mut Site) -> Result<()> {
        let id = Uuid::new_v4();
        site.id = Some(id);
        self.put("site", &id.to_string(), site).await
    }

    async fn get_site(&self, site_id: Uuid) -> Result<Option<Site>> {
        self.fetch("site", &site_id.to_string()).await
    }

    async fn get_sites(&self) -> Result<Vec<Site>> {
        self.fetch_all("site").await
    }

    async fn update_site(&self, site: &Site) -> Result<()> {
        let id = site
            .id
            .ok_or_else(|| Error::BadRequest("Site has no ID".to_string()))?;
        self.put("site", &id.to_string(), site).await
    }

    async fn get_site_preferences(&self, site_id: Uuid) -> Result<Option<SitePreferences>> {
        self.fetch("site_preferences", &site_id.to_string()).await
    }

    async fn get_site_preferences_by_scope(
        &self,
        scope_id: &str,
    ) -> Result<Option<SitePreferences>> {
        Ok(self
            .fetch_all::<SitePreferences>("site_preferences")
            .await?
            .into_iter()
            .find(|p| p.scope_id == scope_id))
    }

    async fn upsert_site_preferences(&self, preferences: SitePreferences) -> Result<()> {
        self.put(
            "site_preferences",
            &preferences.site_id.to_string(),
            &preferences,
        )
        .await
    }

    async fn create_floor(&self, floor: &mut Floor) -> Result<()> {
        let id = Uuid::new_v4();
        floor.id = Some(id);
        self.put("floor", &id.to_string(), floor).await
    }

    async fn get_floor(&self, floor_id: Uuid) -> Result<Option<Floor>> {
        self.fetch("floor", &floor_id.to_string()).await
    }

    async fn get_floors_by_site(&self, site_id: Uuid) -> Result<Vec<Floor>> {
        Ok(self
            .fetch_all::<Floor>("floor")
            .await?
            .into_iter()
            .filter(|f| f.site_id == site_id)
            .collect())
    }

    async fn update_floor(&self, floor: &Floor) -> Result<()> {
        let id = floor
            .id
            .ok_or_else(|| Error::BadRequest("Floor has no ID".to_string()))?;
        self.put("floor", &id.to_string(), floor).await
    }

    async fn create_module_type(&self, module_type: &mut ModuleType) -> Result<()> {
        let id = Uuid::new_v4();
        module_type.id = Some(id);
        self.put("module_type", &id.to_string(), module_type).await
    }

    async fn get_module_types_by_site(&self, site_id: Uuid) -> Result<Vec<ModuleType>> {
        Ok(self
            .fetch_all::<ModuleType>("module_type")
            .await?
            .into_iter()
            .filter(|t| t.site_id == site_id)
            .collect())
    }

    async fn get_module_type(&self, module_type_id: Uuid) -> Result<Option<ModuleType>> {
        self.fetch("module_type", &module_type_id.to_string()).await
    }

    async fn upsert_module(&self, module: &mut FloorModule) -> Result<()> {
        let id = module.id.unwrap_or_else(Uuid::new_v4);
        module.id = Some(id);
        self.put("floor_module", &id.to_string(), module).await
    }

    async fn get_module(&self, module_id: Uuid) -> Result<Option<FloorModule>> {
        self.fetch("floor_module", &module_id.to_string()).await
    }

    async fn get_modules_by_floor(&self, floor_id: Uuid) -> Result<Vec<FloorModule>> {
        Ok(self
            .fetch_all::<FloorModule>("floor_module")
            .await?
            .into_iter()
            .filter(|m| m.floor_id == floor_id)
            .collect())
    }

    async fn delete_module(&self, module_id: Uuid) -> Result<()> {
        self.remove("floor_module", &module_id.to_string()).await
    }

    async fn create_widget(&self, widget: &mut Widget) -> Result<()> {
        let id = Uuid::new_v4();
        widget.id = Some(id);
        self.put("widget", &id.to_string(), widget).await
    }

    async fn get_widget(&self, widget_id: Uuid) -> Result<Option<Widget>> {
        self.fetch("widget", &widget_id.to_string()).await
    }

    async fn get_widgets(&self) -> Result<Vec<Widget>> {
        self.fetch_all("widget").await
    }

    async fn update_widget(&self, widget: &Widget) -> Result<()> {
        let id = widget
            .id
            .ok_or_else(|| Error::BadRequest("Widget has no ID".to_string()))?;
        self.put("widget", &id.to_string(), widget).await
    }

    async fn delete_widget(&self, widget_id: Uuid) -> Result<()> {
        self.remove("widget", &widget_id.to_string()).await
    }

    async fn upsert_site_widget(&self, site_widget: SiteWidget) -> Result<()> {
        let key = format!("{}:{}", site_widget.site_id, site_widget.widget_id);
        self.put("site_widget", &key, &site_widget).await
    }

    async fn delete_site_widget(&self, site_id: Uuid, widget_id: Uuid) -> Result<()> {
        self.remove("site_widget", &format!("{site_id}:{widget_id}")).await
    }

    async fn get_site_widgets(&self, site_id: Uuid) -> Result<Vec<SiteWidget>> {
        Ok(self
            .fetch_all::<SiteWidget>("site_widget")
            .await?
            .into_iter()
            .filter(|w| w.site_id == site_id)
            .collect())
    }

    async fn upsert_twin(&self, twin: Twin) -> Result<()> {
        let key = format!("{}:{}", twin.site_id, twin.id);
        self.put("twin", &key, &twin).await
    }

    async fn get_twin(&self, site_id: Uuid, twin_id: &str) -> Result<Option<Twin>> {
        self.fetch("twin", &format!("{site_id}:{twin_id}")).await
    }

    async fn get_twins_by_site(&self, site_id: Uuid) -> Result<Vec<Twin>> {
        Ok(self
            .fetch_all::<Twin>("twin")
            .await?
            .into_iter()
            .filter(|t| t.site_id == site_id)
            .collect())
    }

    async fn delete_twin(&self, site_id: Uuid, twin_id: &str) -> Result<()> {
        self.remove("twin", &format!("{site_id}:{twin_id}")).await
    }

    async fn upsert_relationship(&self, relationship: TwinRelationship) -> Result<()> {
        let conn = self.connection().await?;
        let data = serde_json::to_string(&relationship)?;
        conn.execute(
            "INSERT INTO edges (id, source_id, target_id, relation, data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, COALESCE((SELECT created_at FROM edges WHERE source_id = ?2 AND target_id = ?3 AND relation = ?4), datetime('now')), datetime('now'))
             ON CONFLICT(source_id, target_id, relation) DO UPDATE SET
               data = excluded.data,
               updated_at = excluded.updated_at",
            libsql::params![
                relationship.id,
                relationship.source_id,
                relationship.target_id,
                relationship.name,
                data
            ],
        )
        .await
        .map_err(|e| db_err("Failed to upsert edge", e))?;
        Ok(())
    }

    async fn get_relationships_for_twin(&self, twin_id: &str) -> Result<Vec<TwinRelationship>> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query(
                "SELECT data FROM edges WHERE source_id = ? OR target_id = ?",
                libsql::params![twin_id, twin_id],
            )
            .await
            .map_err(|e| db_err("Failed to query edges", e))?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(|e| db_err("Failed to read row", e))? {
            let data: String = row.get(0).map_err(|e| db_err("Failed to get data", e))?;
            results.push(serde_json::from_str(&data)?);
        }
        Ok(results)
    }

    async fn create_ticket(&self, ticket: &mut Ticket) -> Result<()> {
        let id = Uuid::new_v4();
        ticket.id = Some(id);
        self.put("ticket", &id.to_string(), ticket).await
    }

    async fn get_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>> {
        self.fetch("ticket", &ticket_id.to_string()).await
    }

    async fn get_tickets_by_site(&self, site_id: Uuid) -> Result<Vec<Ticket>> {
        Ok(self
            .fetch_all::<Ticket>("ticket")
            .await?
            .into_iter()
            .filter(|t| t.site_id == site_id)
            .collect())
    }

    async fn update_ticket(&self, ticket: &Ticket) -> Result<()> {
        let id = ticket
            .id
            .ok_or_else(|| Error::BadRequest("Ticket has no ID".to_string()))?;
        self.put("ticket", &id.to_string(), ticket).await
    }

    async fn ticket_occurrence_exists(
        &self,
        template_id: Uuid,
        twin_id: &str,
        occurrence: i64,
    ) -> Result<bool> {
        Ok(self.fetch_all::<Ticket>("ticket").await?.iter().any(|t| {
            t.template_id == Some(template_id)
                && t.twin_id.as_deref() == Some(twin_id)
                && t.occurrence == occurrence
        }))
    }

    async fn generate_sequence_number(&self, prefix: &str, key: &str) -> Result<String> {
        let conn = self.connection().await?;
        let counter_key = format!("{prefix}-{key}");
        let mut rows = conn
            .query(
                "INSERT INTO sequence_counters (key, value) VALUES (?1, 1)
                 ON CONFLICT(key) DO UPDATE SET value = value + 1
                 RETURNING value",
                libsql::params![counter_key.clone()],
            )
            .await
            .map_err(|e| db_err("Failed to advance sequence counter", e))?;

        let row = rows
            .next()
            .await
            .map_err(|e| db_err("Failed to read row", e))?
            .ok_or_else(|| db_err("Sequence counter", "no value returned"))?;
        let value: i64 = row.get(0).map_err(|e| db_err("Failed to get value", e))?;
        Ok(format!("{counter_key}-{value}"))
    }

    async fn create_ticket_template(&self, template: &mut TicketTemplate) -> Result<()> {
        let id = Uuid::new_v4();
        template.id = Some(id);
        self.put("ticket_template", &id.to_string(), template).await
    }

    async fn get_ticket_template(&self, template_id: Uuid) -> Result<Option<TicketTemplate>> {
        self.fetch("ticket_template", &template_id.to_string()).await
    }

    async fn get_ticket_templates(
        &self,
        site_id: Uuid,
        archived: Option<bool>,
    ) -> Result<Vec<TicketTemplate>> {
        Ok(self
            .fetch_all::<TicketTemplate>("ticket_template")
            .await?
            .into_iter()
            .filter(|t| t.site_id == site_id)
            .filter(|t| archived.map(|a| t.is_archived == a).unwrap_or(true))
            .collect())
    }

    async fn update_ticket_template(&self, template: &TicketTemplate) -> Result<()> {
        let id = template
            .id
            .ok_or_else(|| Error::BadRequest("Ticket template has no ID".to_string()))?;
        self.put("ticket_template", &id.to_string(), template).await
    }

    async fn create_inspection(&self, inspection: &mut Inspection) -> Result<()> {
        let id = Uuid::new_v4();
        inspection.id = Some(id);
        for check in &mut inspection.checks {
            check.id = Some(Uuid::new_v4());
            check.inspection_id = id;
        }
        self.put("inspection", &id.to_string(), inspection).await
    }

    async fn get_inspection(&self, inspection_id: Uuid) -> Result<Option<Inspection>> {
        self.fetch("inspection", &inspection_id.to_string()).await
    }

    async fn get_inspections_by_site(&self, site_id: Uuid) -> Result<Vec<Inspection>> {
        Ok(self
            .fetch_all::<Inspection>("inspection")
            .await?
            .into_iter()
            .filter(|i| i.site_id == site_id)
            .collect())
    }

    async fn update_inspection(&self, inspection: &Inspection) -> Result<()> {
        let id = inspection
            .id
            .ok_or_else(|| Error::BadRequest("Inspection has no ID".to_string()))?;
        self.put("inspection", &id.to_string(), inspection).await
    }

    async fn get_inspections_for_schedule(&self) -> Result<Vec<Inspection>> {
        Ok(self
            .fetch_all::<Inspection>("inspection")
            .await?
            .into_iter()
            .filter(|i| !i.is_archived)
            .collect())
    }

    async fn add_inspection_record(&self, record: &mut InspectionRecord) -> Result<()> {
        let id = Uuid::new_v4();
        record.id = Some(id);
        self.put("inspection_record", &id.to_string(), record).await
    }

    async fn get_inspection_record_for_occurrence(
        &self,
        inspection_id: Uuid,
        occurrence: i64,
    ) -> Result<Option<InspectionRecord>> {
        Ok(self
            .fetch_all::<InspectionRecord>("inspection_record")
            .await?
            .into_iter()
            .find(|r| r.inspection_id == inspection_id && r.occurrence == occurrence))
    }

    async fn get_check(&self, check_id: Uuid) -> Result<Option<Check>> {
        for inspection in self.fetch_all::<Inspection>("inspection").await? {
            if let Some(check) = inspection.checks.iter().find(|c| c.id == Some(check_id)) {
                return Ok(Some(check.clone()));
            }
        }
        Ok(None)
    }

    async fn update_check(&self, check: &Check) -> Result<()> {
        let mut inspection = self
            .fetch::<Inspection>("inspection", &check.inspection_id.to_string())
            .await?
            .ok_or_else(|| Error::not_found("Inspection"))?;
        let slot = inspection
            .checks
            .iter_mut()
            .find(|c| c.id == check.id)
            .ok_or_else(|| Error::not_found("Check"))?;
        *slot = check.clone();
        self.update_inspection(&inspection).await
    }

    async fn add_check_record(
        &self,
        record: &mut CheckRecord,
        last_record_id: Option<Uuid>,
    ) -> Result<()> {
        if let Some(last_id) = last_record_id {
            if let Some(mut previous) = self
                .fetch::<CheckRecord>("check_record", &last_id.to_string())
                .await?
            {
                if previous.status == CheckRecordStatus::Due {
                    previous.status = CheckRecordStatus::Missed;
                    self.put("check_record", &last_id.to_string(), &previous)
                        .await?;
                }
            }
        }

        let id = Uuid::new_v4();
        record.id = Some(id);
        self.put("check_record", &id.to_string(), record).await
    }

    async fn update_check_record(&self, record: &CheckRecord) -> Result<()> {
        let id = record
            .id
            .ok_or_else(|| Error::BadRequest("Check record has no ID".to_string()))?;
        self.put("check_record", &id.to_string(), record).await
    }

    async fn get_check_record(&self, record_id: Uuid) -> Result<Option<CheckRecord>> {
        self.fetch("check_record", &record_id.to_string()).await
    }

    async fn get_check_records_for_inspection_record(
        &self,
        inspection_record_id: Uuid,
    ) -> Result<Vec<CheckRecord>> {
        Ok(self
            .fetch_all::<CheckRecord>("check_record")
            .await?
            .into_iter()
            .filter(|r| r.inspection_record_id == inspection_record_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn local_storage(dir: &tempfile::TempDir) -> DatabaseStorage {
        let path = dir.path().join("twinhub.db");
        let storage = DatabaseStorage::new_local(path.to_str().unwrap())
            .await
            .unwrap();
        storage.run_migrations().await.unwrap();
        storage
    }

    #[tokio::test]
    async fn migrates_and_roundtrips_documents() {
        let dir = tempfile::tempdir().unwrap();
        let storage = local_storage(&dir).await;

        let mut customer = Customer {
            id: None,
            name: "Acme".to_string(),
            status: CustomerStatus::Active,
            created_at: Utc::now(),
        };
        storage.create_customer(&mut customer).await.unwrap();
        let fetched = storage
            .get_customer(customer.id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.name, "Acme");
    }

    #[tokio::test]
    async fn sequence_counters_advance_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let storage = local_storage(&dir).await;

        assert_eq!(
            storage.generate_sequence_number("OM", "T").await.unwrap(),
            "OM-T-1"
        );
        assert_eq!(
            storage.generate_sequence_number("OM", "T").await.unwrap(),
            "OM-T-2"
        );
    }
}
