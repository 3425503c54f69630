use super::traits::Storage;
use crate::domain::*;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// In-memory storage implementation for development/testing.
pub struct InMemoryStorage {
    customers: Arc<Mutex<HashMap<Uuid, Customer>>>,
    portfolios: Arc<Mutex<HashMap<Uuid, Portfolio>>>,
    users: Arc<Mutex<HashMap<Uuid, User>>>,
    assignments: Arc<Mutex<Vec<Assignment>>>,
    sites: Arc<Mutex<HashMap<Uuid, Site>>>,
    site_preferences: Arc<Mutex<HashMap<Uuid, SitePreferences>>>,
    floors: Arc<Mutex<HashMap<Uuid, Floor>>>,
    module_types: Arc<Mutex<HashMap<Uuid, ModuleType>>>,
    modules: Arc<Mutex<HashMap<Uuid, FloorModule>>>,
    widgets: Arc<Mutex<HashMap<Uuid, Widget>>>,
    site_widgets: Arc<Mutex<Vec<SiteWidget>>>,
    twins: Arc<Mutex<HashMap<String, Twin>>>,
    relationships: Arc<Mutex<HashMap<String, TwinRelationship>>>,
    tickets: Arc<Mutex<HashMap<Uuid, Ticket>>>,
    ticket_templates: Arc<Mutex<HashMap<Uuid, TicketTemplate>>>,
    inspections: Arc<Mutex<HashMap<Uuid, Inspection>>>,
    inspection_records: Arc<Mutex<HashMap<Uuid, InspectionRecord>>>,
    check_records: Arc<Mutex<HashMap<Uuid, CheckRecord>>>,
    sequence_counters: Arc<Mutex<HashMap<String, u64>>>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            customers: Arc::new(Mutex::new(HashMap::new())),
            portfolios: Arc::new(Mutex::new(HashMap::new())),
            users: Arc::new(Mutex::new(HashMap::new())),
            assignments: Arc::new(Mutex::new(Vec::new())),
            sites: Arc::new(Mutex::new(HashMap::new())),
            site_preferences: Arc::new(Mutex::new(HashMap::new())),
            floors: Arc::new(Mutex::new(HashMap::new())),
            module_types: Arc::new(Mutex::new(HashMap::new())),
            modules: Arc::new(Mutex::new(HashMap::new())),
            widgets: Arc::new(Mutex::new(HashMap::new())),
            site_widgets: Arc::new(Mutex::new(Vec::new())),
            twins: Arc::new(Mutex::new(HashMap::new())),
            relationships: Arc::new(Mutex::new(HashMap::new())),
            tickets: Arc::new(Mutex::new(HashMap::new())),
            ticket_templates: Arc::new(Mutex::new(HashMap::new())),
            inspections: Arc::new(Mutex::new(HashMap::new())),
            inspection_records: Arc::new(Mutex::new(HashMap::new())),
            check_records: Arc::new(Mutex::new(HashMap::new())),
            sequence_counters: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_customer(&self, customer: &mut Customer) -> Result<()> {
        let id = Uuid::new_v4();
        customer.id = Some(id);
        self.customers.lock().unwrap().insert(id, customer.clone());
        debug!("Created customer: {} with id {}", customer.name, id);
        Ok(())
    }

    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>> {
        Ok(self.customers.lock().unwrap().get(&customer_id).cloned())
    }

    async fn get_customers(&self) -> Result<Vec<Customer>> {
        let mut customers: Vec<Customer> =
            self.customers.lock().unwrap().values().cloned().collect();
        customers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(customers)
    }

    async fn update_customer(&self, customer: &Customer) -> Result<()> {
        let id = customer.id.ok_or_else(|| {
            Error::BadRequest("Cannot update customer without ID".to_string())
        })?;
        self.customers.lock().unwrap().insert(id, customer.clone());
        Ok(())
    }

    async fn create_portfolio(&self, portfolio: &mut Portfolio) -> Result<()> {
        let id = Uuid::new_v4();
        portfolio.id = Some(id);
        self.portfolios
            .lock()
            .unwrap()
            .insert(id, portfolio.clone());
        Ok(())
    }

    async fn get_portfolio(&self, portfolio_id: Uuid) -> Result<Option<Portfolio>> {
        Ok(self.portfolios.lock().unwrap().get(&portfolio_id).cloned())
    }

    async fn get_portfolios_by_customer(&self, customer_id: Uuid) -> Result<Vec<Portfolio>> {
        let mut portfolios: Vec<Portfolio> = self
            .portfolios
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.customer_id == customer_id)
            .cloned()
            .collect();
        portfolios.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(portfolios)
    }

    async fn create_user(&self, user: &mut User) -> Result<()> {
        let id = Uuid::new_v4();
        user.id = Some(id);
        self.users.lock().unwrap().insert(id, user.clone());
        debug!("Created user: {} with id {}", user.email, id);
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_users_by_customer(&self, customer_id: Uuid) -> Result<Vec<User>> {
        let mut users: Vec<User> = self
            .users
            .lock()
            .unwrap()
            .values()
            .filter(|u| u.customer_id == customer_id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn update_user(&self, user: &User) -> Result<()> {
        let id = user
            .id
            .ok_or_else(|| Error::BadRequest("Cannot update user without ID".to_string()))?;
        self.users.lock().unwrap().insert(id, user.clone());
        Ok(())
    }

    async fn create_assignment(&self, assignment: Assignment) -> Result<()> {
        let mut assignments = self.assignments.lock().unwrap();
        let exists = assignments.iter().any(|a| {
            a.principal_id == assignment.principal_id
                && a.role == assignment.role
                && a.resource_type == assignment.resource_type
                && a.resource_id == assignment.resource_id
        });
        if !exists {
            assignments.push(assignment);
        }
        Ok(())
    }

    async fn delete_assignment(&self, assignment: &Assignment) -> Result<()> {
        self.assignments.lock().unwrap().retain(|a| {
            !(a.principal_id == assignment.principal_id
                && a.role == assignment.role
                && a.resource_type == assignment.resource_type
                && a.resource_id == assignment.resource_id)
        });
        Ok(())
    }

    async fn get_assignments_by_principal(&self, principal_id: Uuid) -> Result<Vec<Assignment>> {
        Ok(self
            .assignments
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.principal_id == principal_id)
            .cloned()
            .collect())
    }

    async fn create_site(&self, site: &mut Site) -> Result<()> {
        let id = Uuid::new_v4();
        site.id = Some(id);
        self.sites.lock().unwrap().insert(id, site.clone());
        debug!("Created site: {} with id {}", site.name, id);
        Ok(())
    }

    async fn get_site(&self, site_id: Uuid) -> Result<Option<Site>> {
        Ok(self.sites.lock().unwrap().get(&site_id).cloned())
    }

    async fn get_sites(&self) -> Result<Vec<Site>> {
        let mut sites: Vec<Site> = self.sites.lock().unwrap().values().cloned().collect();
        sites.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sites)
    }

    async fn update_site(&self, site: &Site) -> Result<()> {
        let id = site
            .id
            .ok_or_else(|| Error::BadRequest("Cannot update site without ID".to_string()))?;
        self.sites.lock().unwrap().insert(id, site.clone());
        Ok(())
    }

    async fn get_site_preferences(&self, site_id: Uuid) -> Result<Option<SitePreferences>> {
        Ok(self
            .site_preferences
            .lock()
            .unwrap()
            .get(&site_id)
            .cloned())
    }

    async fn get_site_preferences_by_scope(
        &self,
        scope_id: &str,
    ) -> Result<Option<SitePreferences>> {
        Ok(self
            .site_preferences
            .lock()
            .unwrap()
            .values()
            .find(|p| p.scope_id == scope_id)
            .cloned())
    }

    async fn upsert_site_preferences(&self, preferences: SitePreferences) -> Result<()> {
        self.site_preferences
            .lock()
            .unwrap()
            .insert(preferences.site_id, preferences);
        Ok(())
    }

    async fn create_floor(&self, floor: &mut Floor) -> Result<()> {
        let id = Uuid::new_v4();
        floor.id = Some(id);
        self.floors.lock().unwrap().insert(id, floor.clone());
        debug!("Created floor: {} with id {}", floor.code, id);
        Ok(())
    }

    async fn get_floor(&self, floor_id: Uuid) -> Result<Option<Floor>> {
        Ok(self.floors.lock().unwrap().get(&floor_id).cloned())
    }

    async fn get_floors_by_site(&self, site_id: Uuid) -> Result<Vec<Floor>> {
        let mut floors: Vec<Floor> = self
            .floors
            .lock()
            .unwrap()
            .values()
            .filter(|f| f.site_id == site_id)
            .cloned()
            .collect();
        floors.sort_by_key(|f| (f.sort_order, f.code.clone()));
        Ok(floors)
    }

    async fn update_floor(&self, floor: &Floor) -> Result<()> {
        let id = floor
            .id
            .ok_or_else(|| Error::BadRequest("Cannot update floor without ID".to_string()))?;
        self.floors.lock().unwrap().insert(id, floor.clone());
        Ok(())
    }

    async fn create_module_type(&self, module_type: &mut ModuleType) -> Result<()> {
        let id = Uuid::new_v4();
        module_type.id = Some(id);
        self.module_types
            .lock()
            .unwrap()
            .insert(id, module_type.clone());
        Ok(())
    }

    async fn get_module_types_by_site(&self, site_id: Uuid) -> Result<Vec<ModuleType>> {
        let mut types: Vec<ModuleType> = self
            .module_types
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.site_id == site_id)
            .cloned()
            .collect();
        types.sort_by_key(|m| (m.sort_order, m.name.clone()));
        Ok(types)
    }

    async fn get_module_type(&self, module_type_id: Uuid) -> Result<Option<ModuleType>> {
        Ok(self
            .module_types
            .lock()
            .unwrap()
            .get(&module_type_id)
            .cloned())
    }

    async fn upsert_module(&self, module: &mut FloorModule) -> Result<()> {
        let id = module.id.unwrap_or_else(Uuid::new_v4);
        module.id = Some(id);
        self.modules.lock().unwrap().insert(id, module.clone());
        Ok(())
    }

    async fn get_module(&self, module_id: Uuid) -> Result<Option<FloorModule>> {
        Ok(self.modules.lock().unwrap().get(&module_id).cloned())
    }

    async fn get_modules_by_floor(&self, floor_id: Uuid) -> Result<Vec<FloorModule>> {
        let mut modules: Vec<FloorModule> = self
            .modules
            .lock()
            .unwrap()
            .values()
            .filter(|m| m.floor_id == floor_id)
            .cloned()
            .collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(modules)
    }

    async fn delete_module(&self, module_id: Uuid) -> Result<()> {
        self.modules.lock().unwrap().remove(&module_id);
        Ok(())
    }

    async fn create_widget(&self, widget: &mut Widget) -> Result<()> {
        let id = Uuid::new_v4();
        widget.id = Some(id);
        self.widgets.lock().unwrap().insert(id, widget.clone());
        Ok(())
    }

    async fn get_widget(&self, widget_id: Uuid) -> Result<Option<Widget>> {
        Ok(self.widgets.lock().unwrap().get(&widget_id).cloned())
    }

    async fn get_widgets(&self) -> Result<Vec<Widget>> {
        let mut widgets: Vec<Widget> = self.widgets.lock().unwrap().values().cloned().collect();
        widgets.sort_by(|a, b| a.widget_type.cmp(&b.widget_type));
        Ok(widgets)
    }

    async fn update_widget(&self, widget: &Widget) -> Result<()> {
        let id = widget
            .id
            .ok_or_else(|| Error::BadRequest("Cannot update widget without ID".to_string()))?;
        self.widgets.lock().unwrap().insert(id, widget.clone());
        Ok(())
    }

    async fn delete_widget(&self, widget_id: Uuid) -> Result<()> {
        self.widgets.lock().unwrap().remove(&widget_id);
        self.site_widgets
            .lock()
            .unwrap()
            .retain(|sw| sw.widget_id != widget_id);
        Ok(())
    }

    async fn upsert_site_widget(&self, site_widget: SiteWidget) -> Result<()> {
        let mut site_widgets = self.site_widgets.lock().unwrap();
        site_widgets.retain(|sw| {
            !(sw.site_id == site_widget.site_id && sw.widget_id == site_widget.widget_id)
        });
        site_widgets.push(site_widget);
        Ok(())
    }

    async fn delete_site_widget(&self, site_id: Uuid, widget_id: Uuid) -> Result<()> {
        self.site_widgets
            .lock()
            .unwrap()
            .retain(|sw| !(sw.site_id == site_id && sw.widget_id == widget_id));
        Ok(())
    }

    async fn get_site_widgets(&self, site_id: Uuid) -> Result<Vec<SiteWidget>> {
        let mut site_widgets: Vec<SiteWidget> = self
            .site_widgets
            .lock()
            .unwrap()
            .iter()
            .filter(|sw| sw.site_id == site_id)
            .cloned()
            .collect();
        site_widgets.sort_by_key(|sw| sw.position);
        Ok(site_widgets)
    }

    async fn upsert_twin(&self, twin: Twin) -> Result<()> {
        self.twins.lock().unwrap().insert(twin.id.clone(), twin);
        Ok(())
    }

    async fn get_twin(&self, site_id: Uuid, twin_id: &str) -> Result<Option<Twin>> {
        Ok(self
            .twins
            .lock()
            .unwrap()
            .get(twin_id)
            .filter(|t| t.site_id == site_id)
            .cloned())
    }

    async fn get_twins_by_site(&self, site_id: Uuid) -> Result<Vec<Twin>> {
        let mut twins: Vec<Twin> = self
            .twins
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.site_id == site_id)
            .cloned()
            .collect();
        twins.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(twins)
    }

    async fn delete_twin(&self, site_id: Uuid, twin_id: &str) -> Result<()> {
        let mut twins = self.twins.lock().unwrap();
        if twins
            .get(twin_id)
            .map(|t| t.site_id == site_id)
            .unwrap_or(false)
        {
            twins.remove(twin_id);
            self.relationships
                .lock()
                .unwrap()
                .retain(|_, r| r.source_id != twin_id && r.target_id != twin_id);
        }
        Ok(())
    }

    async fn upsert_relationship(&self, relationship: TwinRelationship) -> Result<()> {
        self.relationships
            .lock()
            .unwrap()
            .insert(relationship.id.clone(), relationship);
        Ok(())
    }

    async fn get_relationships_for_twin(&self, twin_id: &str) -> Result<Vec<TwinRelationship>> {
        let mut rels: Vec<TwinRelationship> = self
            .relationships
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.source_id == twin_id || r.target_id == twin_id)
            .cloned()
            .collect();
        rels.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rels)
    }

    async fn create_ticket(&self, ticket: &mut Ticket) -> Result<()> {
        let id = Uuid::new_v4();
        ticket.id = Some(id);
        self.tickets.lock().unwrap().insert(id, ticket.clone());
        debug!(
            "Created ticket: {} with id {}",
            ticket.sequence_number, id
        );
        Ok(())
    }

    async fn get_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>> {
        Ok(self.tickets.lock().unwrap().get(&ticket_id).cloned())
    }

    async fn get_tickets_by_site(&self, site_id: Uuid) -> Result<Vec<Ticket>> {
        let mut tickets: Vec<Ticket> = self
            .tickets
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.site_id == site_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.sequence_number.cmp(&b.sequence_number));
        Ok(tickets)
    }

    async fn update_ticket(&self, ticket: &Ticket) -> Result<()> {
        let id = ticket
            .id
            .ok_or_else(|| Error::BadRequest("Cannot update ticket without ID".to_string()))?;
        self.tickets.lock().unwrap().insert(id, ticket.clone());
        Ok(())
    }

    async fn ticket_occurrence_exists(
        &self,
        template_id: Uuid,
        twin_id: &str,
        occurrence: i64,
    ) -> Result<bool> {
        Ok(self.tickets.lock().unwrap().values().any(|t| {
            t.template_id == Some(template_id)
                && t.twin_id.as_deref() == Some(twin_id)
                && t.occurrence == occurrence
        }))
    }

    async fn generate_sequence_number(&self, prefix: &str, key: &str) -> Result<String> {
        let mut counters = self.sequence_counters.lock().unwrap();
        let counter_key = format!("{prefix}-{key}");
        let n = counters.entry(counter_key).or_insert(0);
        *n += 1;
        Ok(format!("{prefix}-{key}-{n}"))
    }

    async fn create_ticket_template(&self, template: &mut TicketTemplate) -> Result<()> {
        let id = Uuid::new_v4();
        template.id = Some(id);
        self.ticket_templates
            .lock()
            .unwrap()
            .insert(id, template.clone());
        Ok(())
    }

    async fn get_ticket_template(&self, template_id: Uuid) -> Result<Option<TicketTemplate>> {
        Ok(self
            .ticket_templates
            .lock()
            .unwrap()
            .get(&template_id)
            .cloned())
    }

    async fn get_ticket_templates(
        &self,
        site_id: Uuid,
        archived: Option<bool>,
    ) -> Result<Vec<TicketTemplate>> {
        let mut templates: Vec<TicketTemplate> = self
            .ticket_templates
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.site_id == site_id)
            .filter(|t| archived.map(|a| t.is_archived == a).unwrap_or(true))
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.sequence_number.cmp(&b.sequence_number));
        Ok(templates)
    }

    async fn update_ticket_template(&self, template: &TicketTemplate) -> Result<()> {
        let id = template.id.ok_or_else(|| {
            Error::BadRequest("Cannot update ticket template without ID".to_string())
        })?;
        self.ticket_templates
            .lock()
            .unwrap()
            .insert(id, template.clone());
        Ok(())
    }

    async fn create_inspection(&self, inspection: &mut Inspection) -> Result<()> {
        let id = Uuid::new_v4();
        inspection.id = Some(id);
        for check in &mut inspection.checks {
            check.id.get_or_insert_with(Uuid::new_v4);
            check.inspection_id = id;
        }
        self.inspections
            .lock()
            .unwrap()
            .insert(id, inspection.clone());
        debug!("Created inspection: {} with id {}", inspection.name, id);
        Ok(())
    }

    async fn get_inspection(&self, inspection_id: Uuid) -> Result<Option<Inspection>> {
        Ok(self
            .inspections
            .lock()
            .unwrap()
            .get(&inspection_id)
            .cloned())
    }

    async fn get_inspections_by_site(&self, site_id: Uuid) -> Result<Vec<Inspection>> {
        let mut inspections: Vec<Inspection> = self
            .inspections
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.site_id == site_id)
            .cloned()
            .collect();
        inspections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(inspections)
    }

    async fn update_inspection(&self, inspection: &Inspection) -> Result<()> {
        let id = inspection.id.ok_or_else(|| {
            Error::BadRequest("Cannot update inspection without ID".to_string())
        })?;
        self.inspections
            .lock()
            .unwrap()
            .insert(id, inspection.clone());
        Ok(())
    }

    async fn get_inspections_for_schedule(&self) -> Result<Vec<Inspection>> {
        let mut inspections: Vec<Inspection> = self
            .inspections
            .lock()
            .unwrap()
            .values()
            .filter(|i| !i.is_archived)
            .cloned()
            .collect();
        inspections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(inspections)
    }

    async fn add_inspection_record(&self, record: &mut InspectionRecord) -> Result<()> {
        let id = Uuid::new_v4();
        record.id = Some(id);
        self.inspection_records
            .lock()
            .unwrap()
            .insert(id, record.clone());
        Ok(())
    }

    async fn get_inspection_record_for_occurrence(
        &self,
        inspection_id: Uuid,
        occurrence: i64,
    ) -> Result<Option<InspectionRecord>> {
        Ok(self
            .inspection_records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.inspection_id == inspection_id && r.occurrence == occurrence)
            .cloned())
    }

    async fn get_check(&self, check_id: Uuid) -> Result<Option<Check>> {
        Ok(self
            .inspections
            .lock()
            .unwrap()
            .values()
            .flat_map(|i| i.checks.iter())
            .find(|c| c.id == Some(check_id))
            .cloned())
    }

    async fn update_check(&self, check: &Check) -> Result<()> {
        let mut inspections = self.inspections.lock().unwrap();
        if let Some(inspection) = inspections.get_mut(&check.inspection_id) {
            if let Some(existing) = inspection.checks.iter_mut().find(|c| c.id == check.id) {
                *existing = check.clone();
                return Ok(());
            }
        }
        Err(Error::not_found("Check"))
    }

    async fn add_check_record(
        &self,
        record: &mut CheckRecord,
        last_record_id: Option<Uuid>,
    ) -> Result<()> {
        let id = Uuid::new_v4();
        record.id = Some(id);

        let mut check_records = self.check_records.lock().unwrap();
        if let Some(last_id) = last_record_id {
            if let Some(last) = check_records.get_mut(&last_id) {
                if last.status == CheckRecordStatus::Due {
                    last.status = CheckRecordStatus::Missed;
                }
            }
        }
        check_records.insert(id, record.clone());
        Ok(())
    }

    async fn update_check_record(&self, record: &CheckRecord) -> Result<()> {
        let id = record.id.ok_or_else(|| {
            Error::BadRequest("Cannot update check record without ID".to_string())
        })?;
        self.check_records.lock().unwrap().insert(id, record.clone());
        Ok(())
    }

    async fn get_check_record(&self, record_id: Uuid) -> Result<Option<CheckRecord>> {
        Ok(self.check_records.lock().unwrap().get(&record_id).cloned())
    }

    async fn get_check_records_for_inspection_record(
        &self,
        inspection_record_id: Uuid,
    ) -> Result<Vec<CheckRecord>> {
        let mut records: Vec<CheckRecord> = self
            .check_records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.inspection_record_id == inspection_record_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.check_id);
        Ok(records)
    }
}
