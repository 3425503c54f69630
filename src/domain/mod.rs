use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Tenancy hierarchy: a customer owns portfolios, portfolios contain sites.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Option<Uuid>,
    pub name: String,
    pub status: CustomerStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Option<Uuid>,
    pub customer_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteStatus {
    Construction,
    Operations,
    Selling,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: Option<Uuid>,
    pub customer_id: Uuid,
    pub portfolio_id: Uuid,
    pub name: String,
    pub code: String,
    pub address: String,
    pub suburb: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
    /// IANA timezone name (Windows zone ids from legacy data are aliased in
    /// the calendar module).
    pub timezone_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub area: Option<f64>,
    pub site_type: String,
    pub status: SiteStatus,
    pub construction_year: Option<i32>,
    pub logo_id: Option<Uuid>,
    pub number_of_floors: i32,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub contact_title: String,
    pub created_at: DateTime<Utc>,
    pub date_opened: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitePreferences {
    pub site_id: Uuid,
    /// Twin id of the site when preferences are addressed by scope.
    pub scope_id: String,
    pub time_machine: serde_json::Value,
    pub module_groups: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Floor {
    pub id: Option<Uuid>,
    pub site_id: Uuid,
    pub name: String,
    pub code: String,
    pub sort_order: i32,
    pub geometry: String,
    pub model_reference: Option<Uuid>,
    pub is_site_wide: bool,
    pub is_decommissioned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleType {
    pub id: Option<Uuid>,
    pub site_id: Uuid,
    pub name: String,
    /// Filename prefix used to match uploaded files to this type; the
    /// longest matching prefix wins.
    pub prefix: String,
    pub module_group: String,
    pub sort_order: i32,
    pub can_be_deleted: bool,
    pub is_3d: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FloorModule {
    pub id: Option<Uuid>,
    pub floor_id: Uuid,
    pub module_type_id: Uuid,
    pub name: String,
    /// Image hub blob id for 2D modules.
    pub visual_id: Option<Uuid>,
    /// Viewer URL for 3D modules.
    pub url: Option<String>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Widget {
    pub id: Option<Uuid>,
    pub widget_type: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteWidget {
    pub site_id: Uuid,
    pub widget_id: Uuid,
    pub position: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    Active,
    Inactive,
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Option<Uuid>,
    pub customer_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub company: String,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleResourceType {
    Customer,
    Portfolio,
    Site,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub principal_id: Uuid,
    pub role: String,
    pub resource_type: RoleResourceType,
    pub resource_id: Uuid,
}

// Digital twin graph.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Twin {
    /// Twin graph id, e.g. "BLDG-L01-AHU-001".
    pub id: String,
    /// Stable GUID carried over from legacy asset registries.
    pub unique_id: Uuid,
    pub site_id: Uuid,
    pub model_id: String,
    pub name: String,
    pub floor_id: Option<Uuid>,
    pub properties: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwinRelationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub twin_id: String,
    pub unique_id: Uuid,
    pub site_id: Uuid,
    pub name: String,
    pub model_id: String,
    pub floor_id: Option<Uuid>,
    pub category: String,
    /// Geometry viewer id when the asset has a 3D representation.
    pub forge_viewer_id: Option<String>,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub twin_id: String,
    pub unique_id: Uuid,
    pub site_id: Uuid,
    pub name: String,
    pub connector_id: Option<Uuid>,
    pub is_enabled: bool,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    pub twin_id: String,
    pub unique_id: Uuid,
    pub site_id: Uuid,
    pub name: String,
    pub trend_id: Option<Uuid>,
    pub external_id: String,
    pub unit: String,
    pub point_type: String,
    pub tags: Vec<String>,
    pub device_id: Option<String>,
    pub asset_ids: Vec<String>,
}

// Workflow: tickets, templates, inspections.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Open,
    InProgress,
    LimitedAvailability,
    Resolved,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssigneeType {
    NoAssignee,
    CustomerUser,
    WorkGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketTask {
    pub id: Option<Uuid>,
    pub name: String,
    pub task_type: String,
    pub is_completed: bool,
    pub decimal_places: Option<i32>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub unit: String,
    pub order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Option<Uuid>,
    pub customer_id: Uuid,
    pub site_id: Uuid,
    pub template_id: Option<Uuid>,
    pub sequence_number: String,
    pub status: TicketStatus,
    pub priority: i32,
    pub summary: String,
    pub description: String,
    pub floor_code: String,
    pub reporter_id: Option<Uuid>,
    pub reporter_name: String,
    pub reporter_phone: String,
    pub reporter_email: String,
    pub reporter_company: String,
    pub assignee_type: AssigneeType,
    pub assignee_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    /// Schedule occurrence index; 0 for ad-hoc tickets.
    pub occurrence: i64,
    pub scheduled_date: Option<NaiveDateTime>,
    pub due_date: Option<NaiveDateTime>,
    pub twin_id: Option<String>,
    pub issue_name: String,
    pub tasks: Vec<TicketTask>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceUnit {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// Recurring schedule attached to a ticket template. Dates are naive and
/// interpreted in the schedule's timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub start_date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
    pub timezone: String,
    pub occurs: RecurrenceUnit,
    pub interval: u32,
    pub max_occurrences: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateTwin {
    pub twin_id: String,
    pub twin_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateAsset {
    pub asset_id: Uuid,
    pub asset_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketTemplate {
    pub id: Option<Uuid>,
    pub customer_id: Uuid,
    pub site_id: Uuid,
    pub floor_code: String,
    pub sequence_number: String,
    pub priority: i32,
    pub status: TicketStatus,
    pub summary: String,
    pub description: String,
    pub reporter_id: Option<Uuid>,
    pub reporter_name: String,
    pub reporter_phone: String,
    pub reporter_email: String,
    pub reporter_company: String,
    pub assignee_type: AssigneeType,
    pub assignee_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub recurrence: Schedule,
    /// Added to the hit date to produce each generated ticket's due date.
    pub overdue_threshold_days: i64,
    pub twins: Vec<TemplateTwin>,
    pub assets: Vec<TemplateAsset>,
    pub tasks: Vec<TicketTask>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingUnit {
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckType {
    Numeric,
    Total,
    List,
    Date,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Check {
    pub id: Option<Uuid>,
    pub inspection_id: Uuid,
    pub name: String,
    pub check_type: CheckType,
    pub type_value: String,
    pub decimal_places: Option<i32>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub multiplier: Option<f64>,
    /// Name of another check this one depends on, if any.
    pub dependency_name: Option<String>,
    pub pause_start_date: Option<NaiveDateTime>,
    pub pause_end_date: Option<NaiveDateTime>,
    pub last_record_id: Option<Uuid>,
    pub is_archived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub id: Option<Uuid>,
    pub site_id: Uuid,
    pub name: String,
    pub floor_code: String,
    pub zone_id: Option<Uuid>,
    pub asset_twin_id: Option<String>,
    pub assigned_workgroup_id: Option<Uuid>,
    pub frequency: u32,
    pub frequency_unit: SchedulingUnit,
    /// Site-local wall-clock start; occurrence math runs on site time.
    pub start_date: NaiveDateTime,
    pub end_date: Option<NaiveDateTime>,
    pub is_archived: bool,
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionRecord {
    pub id: Option<Uuid>,
    pub inspection_id: Uuid,
    pub site_id: Uuid,
    pub occurrence: i64,
    pub effective_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckRecordStatus {
    Due,
    Overdue,
    Completed,
    Missed,
    NotRequired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: Option<Uuid>,
    pub inspection_id: Uuid,
    pub inspection_record_id: Uuid,
    pub check_id: Uuid,
    pub status: CheckRecordStatus,
    pub effective_date: DateTime<Utc>,
    pub submitted_value: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub submitted_by: Option<Uuid>,
    pub notes: String,
    /// Previous record for the same check, used for status chaining.
    pub last_record_id: Option<Uuid>,
}
