use crate::domain::*;
use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Storage trait for persisting platform data (tenancy, sites and floors,
/// twin graph, workflow records). `create_*` methods assign the new id into
/// the passed record.
#[async_trait]
pub trait Storage: Send + Sync {
    // Customer / portfolio operations
    async fn create_customer(&self, customer: &mut Customer) -> Result<()>;
    async fn get_customer(&self, customer_id: Uuid) -> Result<Option<Customer>>;
    async fn get_customers(&self) -> Result<Vec<Customer>>;
    async fn update_customer(&self, customer: &Customer) -> Result<()>;

    async fn create_portfolio(&self, portfolio: &mut Portfolio) -> Result<()>;
    async fn get_portfolio(&self, portfolio_id: Uuid) -> Result<Option<Portfolio>>;
    async fn get_portfolios_by_customer(&self, customer_id: Uuid) -> Result<Vec<Portfolio>>;

    // User operations
    async fn create_user(&self, user: &mut User) -> Result<()>;
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn get_users_by_customer(&self, customer_id: Uuid) -> Result<Vec<User>>;
    async fn update_user(&self, user: &User) -> Result<()>;

    // Role assignments
    async fn create_assignment(&self, assignment: Assignment) -> Result<()>;
    async fn delete_assignment(&self, assignment: &Assignment) -> Result<()>;
    async fn get_assignments_by_principal(&self, principal_id: Uuid) -> Result<Vec<Assignment>>;

    // Site operations
    async fn create_site(&self, site: &mut Site) -> Result<()>;
    async fn get_site(&self, site_id: Uuid) -> Result<Option<Site>>;
    async fn get_sites(&self) -> Result<Vec<Site>>;
    async fn update_site(&self, site: &Site) -> Result<()>;

    async fn get_site_preferences(&self, site_id: Uuid) -> Result<Option<SitePreferences>>;
    async fn get_site_preferences_by_scope(&self, scope_id: &str)
        -> Result<Option<SitePreferences>>;
    async fn upsert_site_preferences(&self, preferences: SitePreferences) -> Result<()>;

    // Floor and module operations
    async fn create_floor(&self, floor: &mut Floor) -> Result<()>;
    async fn get_floor(&self, floor_id: Uuid) -> Result<Option<Floor>>;
    async fn get_floors_by_site(&self, site_id: Uuid) -> Result<Vec<Floor>>;
    async fn update_floor(&self, floor: &Floor) -> Result<()>;

    async fn create_module_type(&self, module_type: &mut ModuleType) -> Result<()>;
    async fn get_module_types_by_site(&self, site_id: Uuid) -> Result<Vec<ModuleType>>;
    async fn get_module_type(&self, module_type_id: Uuid) -> Result<Option<ModuleType>>;

    async fn upsert_module(&self, module: &mut FloorModule) -> Result<()>;
    async fn get_module(&self, module_id: Uuid) -> Result<Option<FloorModule>>;
    async fn get_modules_by_floor(&self, floor_id: Uuid) -> Result<Vec<FloorModule>>;
    async fn delete_module(&self, module_id: Uuid) -> Result<()>;

    // Widget operations
    async fn create_widget(&self, widget: &mut Widget) -> Result<()>;
    async fn get_widget(&self, widget_id: Uuid) -> Result<Option<Widget>>;
    async fn get_widgets(&self) -> Result<Vec<Widget>>;
    async fn update_widget(&self, widget: &Widget) -> Result<()>;
    async fn delete_widget(&self, widget_id: Uuid) -> Result<()>;

    async fn upsert_site_widget(&self, site_widget: SiteWidget) -> Result<()>;
    async fn delete_site_widget(&self, site_id: Uuid, widget_id: Uuid) -> Result<()>;
    async fn get_site_widgets(&self, site_id: Uuid) -> Result<Vec<SiteWidget>>;

    // Twin graph operations
    async fn upsert_twin(&self, twin: Twin) -> Result<()>;
    async fn get_twin(&self, site_id: Uuid, twin_id: &str) -> Result<Option<Twin>>;
    async fn get_twins_by_site(&self, site_id: Uuid) -> Result<Vec<Twin>>;
    async fn delete_twin(&self, site_id: Uuid, twin_id: &str) -> Result<()>;

    async fn upsert_relationship(&self, relationship: TwinRelationship) -> Result<()>;
    async fn get_relationships_for_twin(&self, twin_id: &str) -> Result<Vec<TwinRelationship>>;

    // Ticket operations
    async fn create_ticket(&self, ticket: &mut Ticket) -> Result<()>;
    async fn get_ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>>;
    async fn get_tickets_by_site(&self, site_id: Uuid) -> Result<Vec<Ticket>>;
    async fn update_ticket(&self, ticket: &Ticket) -> Result<()>;
    async fn ticket_occurrence_exists(
        &self,
        template_id: Uuid,
        twin_id: &str,
        occurrence: i64,
    ) -> Result<bool>;

    /// Allocate the next number for a prefix and render it as
    /// `"{prefix}-{key}-{n}"`.
    async fn generate_sequence_number(&self, prefix: &str, key: &str) -> Result<String>;

    // Ticket template operations
    async fn create_ticket_template(&self, template: &mut TicketTemplate) -> Result<()>;
    async fn get_ticket_template(&self, template_id: Uuid) -> Result<Option<TicketTemplate>>;
    async fn get_ticket_templates(
        &self,
        site_id: Uuid,
        archived: Option<bool>,
    ) -> Result<Vec<TicketTemplate>>;
    async fn update_ticket_template(&self, template: &TicketTemplate) -> Result<()>;

    // Inspection operations
    async fn create_inspection(&self, inspection: &mut Inspection) -> Result<()>;
    async fn get_inspection(&self, inspection_id: Uuid) -> Result<Option<Inspection>>;
    async fn get_inspections_by_site(&self, site_id: Uuid) -> Result<Vec<Inspection>>;
    async fn update_inspection(&self, inspection: &Inspection) -> Result<()>;
    /// All non-archived inspections across sites, for a generator sweep.
    async fn get_inspections_for_schedule(&self) -> Result<Vec<Inspection>>;

    async fn add_inspection_record(&self, record: &mut InspectionRecord) -> Result<()>;
    async fn get_inspection_record_for_occurrence(
        &self,
        inspection_id: Uuid,
        occurrence: i64,
    ) -> Result<Option<InspectionRecord>>;

    async fn get_check(&self, check_id: Uuid) -> Result<Option<Check>>;
    async fn update_check(&self, check: &Check) -> Result<()>;

    /// Persist a new check record. When `last_record_id` points at a record
    /// still in `Due` status, that record is marked `Missed` in the same
    /// operation.
    async fn add_check_record(
        &self,
        record: &mut CheckRecord,
        last_record_id: Option<Uuid>,
    ) -> Result<()>;
    async fn update_check_record(&self, record: &CheckRecord) -> Result<()>;
    async fn get_check_record(&self, record_id: Uuid) -> Result<Option<CheckRecord>>;
    async fn get_check_records_for_inspection_record(
        &self,
        inspection_record_id: Uuid,
    ) -> Result<Vec<CheckRecord>>;
}
