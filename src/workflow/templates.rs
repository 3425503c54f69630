//! Ticket templates and the schedule-hit engine that turns a template's
//! recurrence into scheduled tickets.
//!
//! A schedule hit carries the occurrence date. The occurrence index is keyed
//! by the recurrence unit (weekly schedules dedupe per week, monthly per
//! month, and so on) so a template can never produce two tickets for the
//! same twin in one occurrence window.

use crate::calendar;
use crate::clients::{DigitalTwinApiClient, NotificationClient, NotificationMessage};
use crate::domain::{
    RecurrenceUnit, Schedule, Ticket, TicketStatus, TicketTemplate,
};
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::storage::Storage;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One firing of a template's recurrence, dated with the occurrence date
/// (site-local).
#[derive(Debug, Clone)]
pub struct ScheduleHit {
    pub template_id: Uuid,
    pub hit_date: NaiveDateTime,
}

fn occurrence_index(unit: RecurrenceUnit, dt: NaiveDateTime) -> i64 {
    match unit {
        RecurrenceUnit::Daily => calendar::daydex(dt),
        RecurrenceUnit::Weekly => calendar::week_index(dt),
        RecurrenceUnit::Monthly => calendar::month_index(dt),
        RecurrenceUnit::Yearly => calendar::year_index(dt),
    }
}

/// Whether a schedule has an occurrence falling on `site_now`'s unit window.
fn schedule_is_due(schedule: &Schedule, site_now: NaiveDateTime) -> bool {
    if let Some(end) = schedule.end_date {
        if site_now > end {
            return false;
        }
    }
    let elapsed = occurrence_index(schedule.occurs, site_now)
        - occurrence_index(schedule.occurs, schedule.start_date);
    if elapsed < 0 || schedule.interval == 0 || elapsed % i64::from(schedule.interval) != 0 {
        return false;
    }
    if let Some(max) = schedule.max_occurrences {
        if elapsed / i64::from(schedule.interval) >= i64::from(max) {
            return false;
        }
    }
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTicketTemplateRequest {
    pub priority: Option<i32>,
    pub status: Option<TicketStatus>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub recurrence: Option<Schedule>,
    pub overdue_threshold_days: Option<i64>,
    pub twins: Option<Vec<crate::domain::TemplateTwin>>,
    pub assets: Option<Vec<crate::domain::TemplateAsset>>,
    pub tasks: Option<Vec<crate::domain::TicketTask>>,
    pub is_archived: Option<bool>,
    /// When twins/assets were added by this update, fire a hit for just the
    /// additions so they catch up with the current occurrence.
    #[serde(default)]
    pub perform_schedule_hit_on_added_assets: bool,
}

pub struct TicketTemplateService {
    storage: Arc<dyn Storage>,
    twin_api: Arc<dyn DigitalTwinApiClient>,
    notifications: Arc<dyn NotificationClient>,
    advance_days: i64,
}

impl TicketTemplateService {
    pub fn new(
        storage: Arc<dyn Storage>,
        twin_api: Arc<dyn DigitalTwinApiClient>,
        notifications: Arc<dyn NotificationClient>,
        advance_days: i64,
    ) -> Self {
        Self {
            storage,
            twin_api,
            notifications,
            advance_days,
        }
    }

    pub async fn create_ticket_template(
        &self,
        site_id: Uuid,
        mut template: TicketTemplate,
    ) -> Result<TicketTemplate> {
        let site = self
            .storage
            .get_site(site_id)
            .await?
            .ok_or_else(|| Error::not_found("Site"))?;
        calendar::resolve_timezone(&template.recurrence.timezone)?;
        if template.recurrence.interval == 0 {
            return Err(Error::BadRequest(
                "Recurrence interval must be at least 1".to_string(),
            ));
        }

        template.id = None;
        template.site_id = site_id;
        template.customer_id = site.customer_id;
        template.sequence_number = self
            .storage
            .generate_sequence_number(&site.code, "S")
            .await?;
        template.created_at = Utc::now();
        template.updated_at = template.created_at;
        self.storage.create_ticket_template(&mut template).await?;
        info!(
            "Created ticket template {} for site {}",
            template.sequence_number, site_id
        );

        // A start date already inside the advance window would otherwise be
        // missed by the next sweep; fire its hit now.
        let site_now = calendar::in_timezone(Utc::now(), &template.recurrence.timezone)?;
        let start = template.recurrence.start_date;
        let window_end = site_now + Duration::days(self.advance_days);
        if start <= window_end && calendar::daydex(start) >= calendar::daydex(site_now) {
            self.perform_schedule_hit(&ScheduleHit {
                template_id: template.id.unwrap_or_default(),
                hit_date: start,
            })
            .await?;
        }

        Ok(template)
    }

    pub async fn get_ticket_template(&self, template_id: Uuid) -> Result<TicketTemplate> {
        self.storage
            .get_ticket_template(template_id)
            .await?
            .ok_or_else(|| Error::not_found("Ticket template"))
    }

    pub async fn get_ticket_templates(
        &self,
        site_id: Uuid,
        archived: Option<bool>,
    ) -> Result<Vec<TicketTemplate>> {
        self.storage.get_ticket_templates(site_id, archived).await
    }

    pub async fn update_ticket_template(
        &self,
        template_id: Uuid,
        request: UpdateTicketTemplateRequest,
    ) -> Result<TicketTemplate> {
        let mut template = self.get_ticket_template(template_id).await?;

        let previous_twin_ids: HashSet<String> =
            template.twins.iter().map(|t| t.twin_id.clone()).collect();
        let previous_asset_ids: HashSet<Uuid> =
            template.assets.iter().map(|a| a.asset_id).collect();

        if let Some(priority) = request.priority {
            template.priority = priority;
        }
        if let Some(status) = request.status {
            template.status = status;
        }
        if let Some(summary) = request.summary {
            template.summary = summary;
        }
        if let Some(description) = request.description {
            template.description = description;
        }
        if let Some(assignee_id) = request.assignee_id {
            template.assignee_id = Some(assignee_id);
        }
        if let Some(recurrence) = request.recurrence {
            calendar::resolve_timezone(&recurrence.timezone)?;
            template.recurrence = recurrence;
        }
        if let Some(days) = request.overdue_threshold_days {
            template.overdue_threshold_days = days;
        }
        if let Some(twins) = request.twins {
            template.twins = twins;
        }
        if let Some(assets) = request.assets {
            template.assets = assets;
        }
        if let Some(tasks) = request.tasks {
            template.tasks = tasks;
        }
        if let Some(is_archived) = request.is_archived {
            template.is_archived = is_archived;
        }
        template.updated_at = Utc::now();
        self.storage.update_ticket_template(&template).await?;

        if request.perform_schedule_hit_on_added_assets {
            let added_twins: Vec<String> = template
                .twins
                .iter()
                .filter(|t| !previous_twin_ids.contains(&t.twin_id))
                .map(|t| t.twin_id.clone())
                .collect();
            let added_assets: Vec<Uuid> = template
                .assets
                .iter()
                .filter(|a| !previous_asset_ids.contains(&a.asset_id))
                .map(|a| a.asset_id)
                .collect();

            if !added_twins.is_empty() || !added_assets.is_empty() {
                let site_now =
                    calendar::in_timezone(Utc::now(), &template.recurrence.timezone)?;
                let hit = ScheduleHit {
                    template_id,
                    hit_date: site_now,
                };
                let mut twin_ids = added_twins;
                twin_ids.extend(self.resolve_asset_twin_ids(&template, &added_assets).await?);
                self.create_tickets_for_hit(&template, &hit, twin_ids).await?;
            }
        }

        Ok(template)
    }

    /// Resolve the twins a hit should ticket: the template's twins plus its
    /// assets (legacy GUIDs resolved through the twin service), minus any
    /// twin already ticketed for this occurrence.
    pub async fn scheduled_twins(&self, hit: &ScheduleHit) -> Result<Vec<String>> {
        let template = self.get_ticket_template(hit.template_id).await?;

        let asset_ids: Vec<Uuid> = template.assets.iter().map(|a| a.asset_id).collect();
        let mut twin_ids: Vec<String> =
            template.twins.iter().map(|t| t.twin_id.clone()).collect();
        twin_ids.extend(self.resolve_asset_twin_ids(&template, &asset_ids).await?);
        twin_ids.sort();
        twin_ids.dedup();

        let occurrence = occurrence_index(template.recurrence.occurs, hit.hit_date);
        let mut pending = Vec::with_capacity(twin_ids.len());
        for twin_id in twin_ids {
            let already_ticketed = self
                .storage
                .ticket_occurrence_exists(hit.template_id, &twin_id, occurrence)
                .await?;
            if already_ticketed {
                metrics::scheduler::occurrences_suppressed();
            } else {
                pending.push(twin_id);
            }
        }
        Ok(pending)
    }

    /// Fire one schedule hit: one ticket per pending twin, copying the
    /// template's fields.
    pub async fn perform_schedule_hit(&self, hit: &ScheduleHit) -> Result<Vec<Ticket>> {
        let template = self.get_ticket_template(hit.template_id).await?;
        if template.is_archived {
            return Ok(Vec::new());
        }
        let twin_ids = self.scheduled_twins(hit).await?;
        self.create_tickets_for_hit(&template, hit, twin_ids).await
    }

    /// Evaluate every active template against `utc_now` and fire the hits
    /// that are due.
    pub async fn sweep(&self, utc_now: DateTime<Utc>) -> Result<u64> {
        let mut created = 0u64;
        let sites = self.storage.get_sites().await?;
        for site in sites {
            let Some(site_id) = site.id else { continue };
            let templates = self
                .storage
                .get_ticket_templates(site_id, Some(false))
                .await?;
            for template in templates {
                let site_now = match calendar::in_timezone(utc_now, &template.recurrence.timezone)
                {
                    Ok(now) => now,
                    Err(_) => continue,
                };
                if !schedule_is_due(&template.recurrence, site_now) {
                    continue;
                }
                let hit = ScheduleHit {
                    template_id: template.id.unwrap_or_default(),
                    hit_date: site_now,
                };
                created += self.perform_schedule_hit(&hit).await?.len() as u64;
            }
        }
        metrics::scheduler::scheduled_tickets_created(created);
        Ok(created)
    }

    async fn resolve_asset_twin_ids(
        &self,
        template: &TicketTemplate,
        asset_ids: &[Uuid],
    ) -> Result<Vec<String>> {
        if asset_ids.is_empty() {
            return Ok(Vec::new());
        }
        let pairs = self
            .twin_api
            .get_twin_ids_by_unique_ids(template.site_id, asset_ids)
            .await?;
        Ok(pairs.into_iter().map(|p| p.twin_id).collect())
    }

    async fn create_tickets_for_hit(
        &self,
        template: &TicketTemplate,
        hit: &ScheduleHit,
        twin_ids: Vec<String>,
    ) -> Result<Vec<Ticket>> {
        let template_id = template
            .id
            .ok_or_else(|| Error::BadRequest("Template has no ID".to_string()))?;
        let occurrence = occurrence_index(template.recurrence.occurs, hit.hit_date);
        let due_date = hit.hit_date + Duration::days(template.overdue_threshold_days);

        let mut tickets = Vec::with_capacity(twin_ids.len());
        for twin_id in twin_ids {
            let mut tasks = template.tasks.clone();
            for (position, task) in tasks.iter_mut().enumerate() {
                task.order = position as i32 + 1;
                task.is_completed = false;
            }

            let mut ticket = Ticket {
                id: None,
                customer_id: template.customer_id,
                site_id: template.site_id,
                template_id: Some(template_id),
                sequence_number: self
                    .storage
                    .generate_sequence_number(&template.sequence_number, "T")
                    .await?,
                status: TicketStatus::Open,
                priority: template.priority,
                summary: template.summary.clone(),
                description: template.description.clone(),
                floor_code: template.floor_code.clone(),
                reporter_id: template.reporter_id,
                reporter_name: template.reporter_name.clone(),
                reporter_phone: template.reporter_phone.clone(),
                reporter_email: template.reporter_email.clone(),
                reporter_company: template.reporter_company.clone(),
                assignee_type: template.assignee_type,
                assignee_id: template.assignee_id,
                category_id: template.category_id,
                occurrence,
                scheduled_date: Some(hit.hit_date),
                due_date: Some(due_date),
                twin_id: Some(twin_id),
                issue_name: template.summary.clone(),
                tasks,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                closed_at: None,
            };
            self.storage.create_ticket(&mut ticket).await?;

            self.notifications
                .send(NotificationMessage {
                    template: "ticket-created".to_string(),
                    recipient_email: template.reporter_email.clone(),
                    data: json!({
                        "ticketId": ticket.id,
                        "sequenceNumber": ticket.sequence_number,
                        "summary": ticket.summary,
                        "dueDate": ticket.due_date,
                    }),
                })
                .await;

            tickets.push(ticket);
        }

        if !tickets.is_empty() {
            info!(
                "Schedule hit for template {} created {} tickets (occurrence {})",
                template.sequence_number,
                tickets.len(),
                occurrence
            );
        }
        Ok(tickets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{LocalDigitalTwinApi, LoggingNotificationClient};
    use crate::domain::{AssigneeType, TemplateTwin, TicketTask, Twin};
    use crate::storage::InMemoryStorage;
    use chrono::NaiveDate;

    fn local(y: i32, mo: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn schedule(start: NaiveDateTime, occurs: RecurrenceUnit, interval: u32) -> Schedule {
        Schedule {
            start_date: start,
            end_date: None,
            timezone: "UTC".to_string(),
            occurs,
            interval,
            max_occurrences: None,
        }
    }

    fn template(site_id: Uuid, recurrence: Schedule, twins: Vec<TemplateTwin>) -> TicketTemplate {
        TicketTemplate {
            id: None,
            customer_id: Uuid::new_v4(),
            site_id,
            floor_code: "L1".to_string(),
            sequence_number: String::new(),
            priority: 3,
            status: TicketStatus::Open,
            summary: "Quarterly filter change".to_string(),
            description: "Replace filters".to_string(),
            reporter_id: None,
            reporter_name: "Ops".to_string(),
            reporter_phone: String::new(),
            reporter_email: "ops@example.com".to_string(),
            reporter_company: String::new(),
            assignee_type: AssigneeType::NoAssignee,
            assignee_id: None,
            category_id: None,
            recurrence,
            overdue_threshold_days: 7,
            twins,
            assets: Vec::new(),
            tasks: vec![
                TicketTask {
                    id: None,
                    name: "Isolate unit".to_string(),
                    task_type: "Checkbox".to_string(),
                    is_completed: false,
                    decimal_places: None,
                    min_value: None,
                    max_value: None,
                    unit: String::new(),
                    order: 0,
                },
                TicketTask {
                    id: None,
                    name: "Record pressure drop".to_string(),
                    task_type: "Numeric".to_string(),
                    is_completed: false,
                    decimal_places: Some(1),
                    min_value: Some(0.0),
                    max_value: Some(500.0),
                    unit: "Pa".to_string(),
                    order: 0,
                },
            ],
            is_archived: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn twin_ref(id: &str) -> TemplateTwin {
        TemplateTwin {
            twin_id: id.to_string(),
            twin_name: id.to_string(),
        }
    }

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        service: TicketTemplateService,
        site_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let mut site = crate::domain::Site {
            id: None,
            customer_id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            name: "One Main".to_string(),
            code: "OM".to_string(),
            address: String::new(),
            suburb: String::new(),
            state: String::new(),
            postcode: String::new(),
            country: String::new(),
            timezone_id: "UTC".to_string(),
            latitude: None,
            longitude: None,
            area: None,
            site_type: String::new(),
            status: crate::domain::SiteStatus::Operations,
            construction_year: None,
            logo_id: None,
            number_of_floors: 1,
            contact_name: String::new(),
            contact_email: String::new(),
            contact_phone: String::new(),
            contact_title: String::new(),
            created_at: Utc::now(),
            date_opened: None,
        };
        storage.create_site(&mut site).await.unwrap();

        let service = TicketTemplateService::new(
            storage.clone(),
            Arc::new(LocalDigitalTwinApi::new(storage.clone())),
            Arc::new(LoggingNotificationClient),
            7,
        );
        Fixture {
            storage,
            service,
            site_id: site.id.unwrap(),
        }
    }

    #[test]
    fn weekly_schedules_dedupe_per_week() {
        let start = local(2021, 3, 1, 0);
        assert_eq!(
            occurrence_index(RecurrenceUnit::Weekly, start),
            occurrence_index(RecurrenceUnit::Weekly, local(2021, 3, 2, 0)),
        );
        assert_ne!(
            occurrence_index(RecurrenceUnit::Weekly, start),
            occurrence_index(RecurrenceUnit::Weekly, local(2021, 3, 10, 0)),
        );
    }

    #[test]
    fn schedule_due_respects_interval_and_caps() {
        let mut s = schedule(local(2021, 3, 1, 9), RecurrenceUnit::Daily, 2);
        assert!(schedule_is_due(&s, local(2021, 3, 1, 9)));
        assert!(!schedule_is_due(&s, local(2021, 3, 2, 9)));
        assert!(schedule_is_due(&s, local(2021, 3, 3, 9)));

        s.max_occurrences = Some(2);
        assert!(schedule_is_due(&s, local(2021, 3, 3, 9)));
        assert!(!schedule_is_due(&s, local(2021, 3, 5, 9)));

        s.max_occurrences = None;
        s.end_date = Some(local(2021, 3, 4, 0));
        assert!(!schedule_is_due(&s, local(2021, 3, 5, 9)));
    }

    #[tokio::test]
    async fn create_inside_advance_window_fires_immediately() {
        let f = fixture().await;
        let start = calendar::in_timezone(Utc::now(), "UTC").unwrap() + Duration::days(2);
        let created = f
            .service
            .create_ticket_template(
                f.site_id,
                template(
                    f.site_id,
                    schedule(start, RecurrenceUnit::Daily, 1),
                    vec![twin_ref("AHU-001"), twin_ref("AHU-002")],
                ),
            )
            .await
            .unwrap();

        let tickets = f.storage.get_tickets_by_site(f.site_id).await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert!(tickets
            .iter()
            .all(|t| t.template_id == created.id && t.scheduled_date == Some(start)));
        assert!(tickets
            .iter()
            .all(|t| t.due_date == Some(start + Duration::days(7))));
        // Task order is reassigned 1-based.
        assert_eq!(
            tickets[0].tasks.iter().map(|t| t.order).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn create_outside_advance_window_defers() {
        let f = fixture().await;
        let start = calendar::in_timezone(Utc::now(), "UTC").unwrap() + Duration::days(30);
        f.service
            .create_ticket_template(
                f.site_id,
                template(
                    f.site_id,
                    schedule(start, RecurrenceUnit::Daily, 1),
                    vec![twin_ref("AHU-001")],
                ),
            )
            .await
            .unwrap();
        assert!(f
            .storage
            .get_tickets_by_site(f.site_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn repeated_hit_does_not_duplicate_tickets() {
        let f = fixture().await;
        let start = calendar::in_timezone(Utc::now(), "UTC").unwrap() + Duration::days(30);
        let created = f
            .service
            .create_ticket_template(
                f.site_id,
                template(
                    f.site_id,
                    schedule(start, RecurrenceUnit::Weekly, 1),
                    vec![twin_ref("AHU-001")],
                ),
            )
            .await
            .unwrap();

        let hit = ScheduleHit {
            template_id: created.id.unwrap(),
            hit_date: start,
        };
        let first = f.service.perform_schedule_hit(&hit).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = f.service.perform_schedule_hit(&hit).await.unwrap();
        assert!(second.is_empty());

        // A different week is a new occurrence.
        let next_week = ScheduleHit {
            template_id: created.id.unwrap(),
            hit_date: start + Duration::days(7),
        };
        let third = f.service.perform_schedule_hit(&next_week).await.unwrap();
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn update_fires_hit_for_added_twins_only() {
        let f = fixture().await;
        let start = calendar::in_timezone(Utc::now(), "UTC").unwrap();
        let created = f
            .service
            .create_ticket_template(
                f.site_id,
                template(
                    f.site_id,
                    schedule(start, RecurrenceUnit::Daily, 1),
                    vec![twin_ref("AHU-001")],
                ),
            )
            .await
            .unwrap();
        let before = f.storage.get_tickets_by_site(f.site_id).await.unwrap().len();
        assert_eq!(before, 1);

        f.service
            .update_ticket_template(
                created.id.unwrap(),
                UpdateTicketTemplateRequest {
                    twins: Some(vec![twin_ref("AHU-001"), twin_ref("AHU-002")]),
                    perform_schedule_hit_on_added_assets: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let tickets = f.storage.get_tickets_by_site(f.site_id).await.unwrap();
        assert_eq!(tickets.len(), 2);
        assert_eq!(
            tickets
                .iter()
                .filter(|t| t.twin_id.as_deref() == Some("AHU-002"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn assets_resolve_to_twins_through_the_twin_service() {
        let f = fixture().await;
        let unique_id = Uuid::new_v4();
        f.storage
            .upsert_twin(Twin {
                id: "FCU-010".to_string(),
                unique_id,
                site_id: f.site_id,
                model_id: "dtmi:twinhub:asset:FanCoilUnit;1".to_string(),
                name: "FCU 10".to_string(),
                floor_id: None,
                properties: serde_json::json!({}),
            })
            .await
            .unwrap();

        let start = calendar::in_timezone(Utc::now(), "UTC").unwrap() + Duration::days(30);
        let mut t = template(
            f.site_id,
            schedule(start, RecurrenceUnit::Daily, 1),
            Vec::new(),
        );
        t.assets = vec![crate::domain::TemplateAsset {
            asset_id: unique_id,
            asset_name: "FCU 10".to_string(),
        }];
        let created = f.service.create_ticket_template(f.site_id, t).await.unwrap();

        let hit = ScheduleHit {
            template_id: created.id.unwrap(),
            hit_date: start,
        };
        let tickets = f.service.perform_schedule_hit(&hit).await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].twin_id.as_deref(), Some("FCU-010"));
    }
}
