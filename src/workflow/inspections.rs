//! Inspections, checks and the inspection record generator.
//!
//! An inspection is due when the elapsed whole units since its start date
//! (measured on the site's wall clock) are a non-negative multiple of its
//! frequency. Occurrence indices are unit-keyed (hour index for hourly
//! schedules, daydex for daily, and so on) so one record exists per
//! occurrence no matter how often the generator runs.

use crate::calendar;
use crate::domain::{
    Check, CheckRecord, CheckRecordStatus, Inspection, InspectionRecord, SchedulingUnit,
};
use crate::error::{Error, Result};
use crate::observability::metrics;
use crate::storage::Storage;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

fn occurrence_index(unit: SchedulingUnit, dt: NaiveDateTime) -> i64 {
    match unit {
        SchedulingUnit::Hours => calendar::hour_index(dt),
        SchedulingUnit::Days => calendar::daydex(dt),
        SchedulingUnit::Weeks => calendar::week_index(dt),
        SchedulingUnit::Months => calendar::month_index(dt),
        SchedulingUnit::Years => calendar::year_index(dt),
    }
}

fn is_due(inspection: &Inspection, site_now: NaiveDateTime) -> bool {
    if let Some(end) = inspection.end_date {
        if site_now > end {
            return false;
        }
    }
    let elapsed = occurrence_index(inspection.frequency_unit, site_now)
        - occurrence_index(inspection.frequency_unit, inspection.start_date);
    elapsed >= 0 && inspection.frequency > 0 && elapsed % i64::from(inspection.frequency) == 0
}

/// A due inspection with its site-local evaluation context attached.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledInspection {
    pub inspection: Inspection,
    pub site_now: NaiveDateTime,
    pub occurrence: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GenerateSummary {
    pub records_created: u64,
    pub suppressed: u64,
    pub skipped: u64,
}

pub struct InspectionService {
    storage: Arc<dyn Storage>,
}

impl InspectionService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn create_inspection(&self, mut inspection: Inspection) -> Result<Inspection> {
        if inspection.name.trim().is_empty() {
            return Err(Error::BadRequest("Inspection name is required".to_string()));
        }
        if inspection.frequency == 0 {
            return Err(Error::BadRequest(
                "Inspection frequency must be at least 1".to_string(),
            ));
        }
        if inspection.checks.is_empty() {
            return Err(Error::BadRequest(
                "An inspection needs at least one check".to_string(),
            ));
        }
        for check in &inspection.checks {
            if let Some(dependency) = &check.dependency_name {
                let exists = inspection
                    .checks
                    .iter()
                    .any(|c| &c.name == dependency && c.name != check.name);
                if !exists {
                    return Err(Error::BadRequest(format!(
                        "Check {} depends on unknown check {dependency}",
                        check.name
                    )));
                }
            }
        }
        inspection.id = None;
        self.storage.create_inspection(&mut inspection).await?;
        Ok(inspection)
    }

    pub async fn get_inspection(&self, inspection_id: Uuid) -> Result<Inspection> {
        self.storage
            .get_inspection(inspection_id)
            .await?
            .filter(|i| !i.is_archived)
            .ok_or_else(|| Error::not_found("Inspection"))
    }

    pub async fn get_inspections(&self, site_id: Uuid) -> Result<Vec<Inspection>> {
        Ok(self
            .storage
            .get_inspections_by_site(site_id)
            .await?
            .into_iter()
            .filter(|i| !i.is_archived)
            .collect())
    }

    pub async fn update_inspection(&self, inspection: Inspection) -> Result<Inspection> {
        if inspection.id.is_none() {
            return Err(Error::BadRequest(
                "Cannot update inspection without ID".to_string(),
            ));
        }
        self.storage.update_inspection(&inspection).await?;
        Ok(inspection)
    }

    pub async fn archive_inspection(&self, inspection_id: Uuid) -> Result<()> {
        let mut inspection = self.get_inspection(inspection_id).await?;
        inspection.is_archived = true;
        self.storage.update_inspection(&inspection).await
    }

    /// Mark a check record completed with the submitted reading.
    pub async fn submit_check_record(
        &self,
        record_id: Uuid,
        value: Option<f64>,
        notes: String,
        submitted_by: Option<Uuid>,
    ) -> Result<CheckRecord> {
        let mut record = self
            .storage
            .get_check_record(record_id)
            .await?
            .ok_or_else(|| Error::not_found("Check record"))?;
        if record.status == CheckRecordStatus::Completed {
            return Err(Error::BadRequest(
                "Check record has already been completed".to_string(),
            ));
        }

        let check = self
            .storage
            .get_check(record.check_id)
            .await?
            .ok_or_else(|| Error::not_found("Check"))?;
        if let Some(v) = value {
            let below = check.min_value.map(|min| v < min).unwrap_or(false);
            let above = check.max_value.map(|max| v > max).unwrap_or(false);
            if below || above {
                warn!(
                    "Check {} reading {} is outside thresholds (min {:?}, max {:?})",
                    check.name, v, check.min_value, check.max_value
                );
            }
        }

        record.status = CheckRecordStatus::Completed;
        record.submitted_value = value;
        record.submitted_at = Some(Utc::now());
        record.submitted_by = submitted_by;
        record.notes = notes;
        self.storage.update_check_record(&record).await?;
        Ok(record)
    }

    pub async fn get_check_records(&self, inspection_record_id: Uuid) -> Result<Vec<CheckRecord>> {
        self.storage
            .get_check_records_for_inspection_record(inspection_record_id)
            .await
    }
}

pub struct InspectionGenerator {
    storage: Arc<dyn Storage>,
}

impl InspectionGenerator {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// One generator sweep across every site. Inspections on sites that no
    /// longer resolve are skipped with a warning rather than failing the
    /// sweep.
    pub async fn generate(&self, utc_now: DateTime<Utc>) -> Result<GenerateSummary> {
        let started = Instant::now();
        let mut summary = GenerateSummary::default();

        for inspection in self.storage.get_inspections_for_schedule().await? {
            let Some(site) = self.storage.get_site(inspection.site_id).await? else {
                warn!(
                    "Skipping inspection {:?}: site {} not found",
                    inspection.id, inspection.site_id
                );
                summary.skipped += 1;
                continue;
            };

            let site_now = match calendar::in_timezone(utc_now, &site.timezone_id) {
                Ok(site_now) => site_now,
                Err(e) => {
                    warn!("Skipping inspection {:?}: {}", inspection.id, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            if !is_due(&inspection, site_now) {
                continue;
            }

            match self
                .generate_record(&inspection, utc_now, site_now)
                .await?
            {
                Some(_) => summary.records_created += 1,
                None => {
                    metrics::scheduler::occurrences_suppressed();
                    summary.suppressed += 1;
                }
            }
        }

        metrics::scheduler::sweep_duration(started.elapsed().as_secs_f64());
        metrics::scheduler::inspection_records_created(summary.records_created);
        info!(
            "Inspection sweep: {} created, {} suppressed, {} skipped",
            summary.records_created, summary.suppressed, summary.skipped
        );
        Ok(summary)
    }

    /// Inspections due for one site at `utc_now`.
    pub async fn get_scheduled_inspections_for_site(
        &self,
        site_id: Uuid,
        utc_now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledInspection>> {
        let site = self
            .storage
            .get_site(site_id)
            .await?
            .ok_or_else(|| Error::not_found("Site"))?;
        let site_now = calendar::in_timezone(utc_now, &site.timezone_id)?;

        Ok(self
            .storage
            .get_inspections_by_site(site_id)
            .await?
            .into_iter()
            .filter(|i| !i.is_archived && is_due(i, site_now))
            .map(|inspection| {
                let occurrence = occurrence_index(inspection.frequency_unit, site_now);
                ScheduledInspection {
                    inspection,
                    site_now,
                    occurrence,
                }
            })
            .collect())
    }

    /// Explicit single generation; `None` means the occurrence already has a
    /// record.
    pub async fn generate_for_inspection(
        &self,
        inspection_id: Uuid,
        utc_now: DateTime<Utc>,
    ) -> Result<Option<InspectionRecord>> {
        let inspection = self
            .storage
            .get_inspection(inspection_id)
            .await?
            .filter(|i| !i.is_archived)
            .ok_or_else(|| Error::not_found("Inspection"))?;
        let site = self
            .storage
            .get_site(inspection.site_id)
            .await?
            .ok_or_else(|| Error::not_found("Site"))?;
        let site_now = calendar::in_timezone(utc_now, &site.timezone_id)?;
        self.generate_record(&inspection, utc_now, site_now).await
    }

    async fn generate_record(
        &self,
        inspection: &Inspection,
        utc_now: DateTime<Utc>,
        site_now: NaiveDateTime,
    ) -> Result<Option<InspectionRecord>> {
        let inspection_id = inspection
            .id
            .ok_or_else(|| Error::BadRequest("Inspection has no ID".to_string()))?;
        let occurrence = occurrence_index(inspection.frequency_unit, site_now);

        if self
            .storage
            .get_inspection_record_for_occurrence(inspection_id, occurrence)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let mut record = InspectionRecord {
            id: None,
            inspection_id,
            site_id: inspection.site_id,
            occurrence,
            effective_date: utc_now,
        };
        self.storage.add_inspection_record(&mut record).await?;
        let record_id = record.id.ok_or_else(|| {
            Error::BadRequest("Storage did not assign an inspection record ID".to_string())
        })?;

        for check in inspection.checks.iter().filter(|c| !c.is_archived) {
            self.generate_check_record(check, record_id, utc_now, site_now)
                .await?;
        }

        Ok(Some(record))
    }

    /// Create the next record for one check. The status comes from the
    /// check's pause window and the fate of its previous record:
    /// paused -> NotRequired; previous Missed/Due/Overdue -> Overdue;
    /// previous Completed/NotRequired or none -> Due.
    pub async fn generate_check_record(
        &self,
        check: &Check,
        inspection_record_id: Uuid,
        utc_now: DateTime<Utc>,
        site_now: NaiveDateTime,
    ) -> Result<CheckRecord> {
        let check_id = check
            .id
            .ok_or_else(|| Error::BadRequest("Check has no ID".to_string()))?;

        let paused = match check.pause_start_date {
            Some(start) => {
                start <= site_now && check.pause_end_date.map(|end| end > site_now).unwrap_or(true)
            }
            None => false,
        };

        let status = if paused {
            CheckRecordStatus::NotRequired
        } else {
            let last_status = match check.last_record_id {
                Some(last_id) => self
                    .storage
                    .get_check_record(last_id)
                    .await?
                    .map(|r| r.status),
                None => None,
            };
            match last_status {
                Some(CheckRecordStatus::Missed)
                | Some(CheckRecordStatus::Due)
                | Some(CheckRecordStatus::Overdue) => CheckRecordStatus::Overdue,
                _ => CheckRecordStatus::Due,
            }
        };

        let mut record = CheckRecord {
            id: None,
            inspection_id: check.inspection_id,
            inspection_record_id,
            check_id,
            status,
            effective_date: utc_now,
            submitted_value: None,
            submitted_at: None,
            submitted_by: None,
            notes: String::new(),
            last_record_id: check.last_record_id,
        };
        self.storage
            .add_check_record(&mut record, check.last_record_id)
            .await?;

        let mut updated_check = check.clone();
        updated_check.last_record_id = record.id;
        self.storage.update_check(&updated_check).await?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CheckType, Site, SiteStatus};
    use crate::storage::InMemoryStorage;
    use chrono::{NaiveDate, TimeZone};

    fn site(timezone_id: &str) -> Site {
        Site {
            id: None,
            customer_id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            name: "Test Site".to_string(),
            code: "TS".to_string(),
            address: String::new(),
            suburb: String::new(),
            state: String::new(),
            postcode: String::new(),
            country: String::new(),
            timezone_id: timezone_id.to_string(),
            latitude: None,
            longitude: None,
            area: None,
            site_type: String::new(),
            status: SiteStatus::Operations,
            construction_year: None,
            logo_id: None,
            number_of_floors: 1,
            contact_name: String::new(),
            contact_email: String::new(),
            contact_phone: String::new(),
            contact_title: String::new(),
            created_at: Utc::now(),
            date_opened: None,
        }
    }

    fn check(name: &str) -> Check {
        Check {
            id: None,
            inspection_id: Uuid::nil(),
            name: name.to_string(),
            check_type: CheckType::Numeric,
            type_value: String::new(),
            decimal_places: Some(1),
            min_value: None,
            max_value: None,
            multiplier: None,
            dependency_name: None,
            pause_start_date: None,
            pause_end_date: None,
            last_record_id: None,
            is_archived: false,
        }
    }

    fn inspection(
        site_id: Uuid,
        frequency: u32,
        unit: SchedulingUnit,
        start: NaiveDateTime,
    ) -> Inspection {
        Inspection {
            id: None,
            site_id,
            name: "Chiller walkthrough".to_string(),
            floor_code: "L1".to_string(),
            zone_id: None,
            asset_twin_id: None,
            assigned_workgroup_id: None,
            frequency,
            frequency_unit: unit,
            start_date: start,
            end_date: None,
            is_archived: false,
            checks: vec![check("Supply temp")],
        }
    }

    fn local(y: i32, mo: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        generator: InspectionGenerator,
    }

    impl Fixture {
        async fn new() -> Self {
            let storage = Arc::new(InMemoryStorage::new());
            let generator = InspectionGenerator::new(storage.clone());
            Self { storage, generator }
        }

        async fn add_site(&self, timezone_id: &str) -> Uuid {
            let mut s = site(timezone_id);
            self.storage.create_site(&mut s).await.unwrap();
            s.id.unwrap()
        }

        async fn add_inspection(&self, inspection: Inspection) -> Uuid {
            let mut i = inspection;
            self.storage.create_inspection(&mut i).await.unwrap();
            i.id.unwrap()
        }
    }

    #[test]
    fn due_when_elapsed_units_are_a_multiple_of_frequency() {
        let site_id = Uuid::new_v4();
        let i = inspection(site_id, 8, SchedulingUnit::Hours, local(2021, 3, 1, 0));
        assert!(is_due(&i, local(2021, 3, 1, 0)));
        assert!(is_due(&i, local(2021, 3, 1, 8)));
        assert!(is_due(&i, local(2021, 3, 2, 0)));
        assert!(!is_due(&i, local(2021, 3, 1, 5)));
        // Before the start date.
        assert!(!is_due(&i, local(2021, 2, 28, 0)));
    }

    #[test]
    fn not_due_after_end_date() {
        let site_id = Uuid::new_v4();
        let mut i = inspection(site_id, 1, SchedulingUnit::Days, local(2021, 3, 1, 0));
        i.end_date = Some(local(2021, 3, 10, 0));
        assert!(is_due(&i, local(2021, 3, 10, 0)));
        assert!(!is_due(&i, local(2021, 3, 11, 0)));
    }

    #[tokio::test]
    async fn generates_once_per_occurrence() {
        let f = Fixture::new().await;
        let site_id = f.add_site("America/Los_Angeles").await;
        f.add_inspection(inspection(
            site_id,
            1,
            SchedulingUnit::Days,
            local(2021, 3, 1, 0),
        ))
        .await;

        let now = Utc.with_ymd_and_hms(2021, 3, 3, 10, 0, 0).unwrap();
        let first = f.generator.generate(now).await.unwrap();
        assert_eq!(first.records_created, 1);

        // A second sweep within the same occurrence is suppressed.
        let later = Utc.with_ymd_and_hms(2021, 3, 3, 12, 0, 0).unwrap();
        let second = f.generator.generate(later).await.unwrap();
        assert_eq!(second.records_created, 0);
        assert_eq!(second.suppressed, 1);
    }

    #[tokio::test]
    async fn occurrence_tracks_the_site_wall_clock() {
        let f = Fixture::new().await;
        let seattle = f.add_site("Pacific Standard Time").await;
        let sydney = f.add_site("AUS Eastern Standard Time").await;
        // Hourly inspections on both sites.
        let seattle_inspection = f
            .add_inspection(inspection(
                seattle,
                1,
                SchedulingUnit::Hours,
                local(2021, 3, 1, 0),
            ))
            .await;
        let sydney_inspection = f
            .add_inspection(inspection(
                sydney,
                1,
                SchedulingUnit::Hours,
                local(2021, 3, 1, 0),
            ))
            .await;

        // 2021-03-03T10:00Z = 02:00 in Seattle, 21:00 in Sydney.
        let now = Utc.with_ymd_and_hms(2021, 3, 3, 10, 0, 0).unwrap();
        f.generator.generate(now).await.unwrap();

        let seattle_record = f
            .storage
            .get_inspection_record_for_occurrence(seattle_inspection, 44_256 * 24 + 2)
            .await
            .unwrap();
        assert!(seattle_record.is_some());

        let sydney_record = f
            .storage
            .get_inspection_record_for_occurrence(sydney_inspection, 44_256 * 24 + 21)
            .await
            .unwrap();
        assert!(sydney_record.is_some());
    }

    #[tokio::test]
    async fn check_record_status_chain() {
        let f = Fixture::new().await;
        let site_id = f.add_site("UTC").await;
        let inspection_id = f
            .add_inspection(inspection(
                site_id,
                1,
                SchedulingUnit::Hours,
                local(2021, 3, 1, 0),
            ))
            .await;

        // First occurrence: a fresh check gets Due.
        let now = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        let record = f
            .generator
            .generate_for_inspection(inspection_id, now)
            .await
            .unwrap()
            .unwrap();
        let check_records = f
            .storage
            .get_check_records_for_inspection_record(record.id.unwrap())
            .await
            .unwrap();
        assert_eq!(check_records.len(), 1);
        assert_eq!(check_records[0].status, CheckRecordStatus::Due);
        let first_record_id = check_records[0].id.unwrap();

        // Second occurrence: the previous record was still Due, so the new
        // one is Overdue and the old one flips to Missed.
        let next = Utc.with_ymd_and_hms(2021, 3, 1, 1, 0, 0).unwrap();
        let record = f
            .generator
            .generate_for_inspection(inspection_id, next)
            .await
            .unwrap()
            .unwrap();
        let check_records = f
            .storage
            .get_check_records_for_inspection_record(record.id.unwrap())
            .await
            .unwrap();
        assert_eq!(check_records[0].status, CheckRecordStatus::Overdue);

        let previous = f
            .storage
            .get_check_record(first_record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(previous.status, CheckRecordStatus::Missed);
    }

    #[tokio::test]
    async fn out_of_threshold_reading_still_completes() {
        let f = Fixture::new().await;
        let site_id = f.add_site("UTC").await;
        let mut i = inspection(site_id, 1, SchedulingUnit::Hours, local(2021, 3, 1, 0));
        i.checks[0].min_value = Some(0.0);
        i.checks[0].max_value = Some(100.0);
        let inspection_id = f.add_inspection(i).await;

        let now = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        let record = f
            .generator
            .generate_for_inspection(inspection_id, now)
            .await
            .unwrap()
            .unwrap();
        let check_records = f
            .storage
            .get_check_records_for_inspection_record(record.id.unwrap())
            .await
            .unwrap();

        // Breaching the max threshold is flagged, not rejected.
        let service = InspectionService::new(f.storage.clone());
        let submitted = service
            .submit_check_record(
                check_records[0].id.unwrap(),
                Some(150.0),
                "reads high".to_string(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(submitted.status, CheckRecordStatus::Completed);
        assert_eq!(submitted.submitted_value, Some(150.0));
    }

    #[tokio::test]
    async fn paused_check_gets_not_required() {
        let f = Fixture::new().await;
        let site_id = f.add_site("UTC").await;
        let mut i = inspection(site_id, 1, SchedulingUnit::Hours, local(2021, 3, 1, 0));
        i.checks[0].pause_start_date = Some(local(2021, 2, 1, 0));
        i.checks[0].pause_end_date = None;
        let inspection_id = f.add_inspection(i).await;

        let now = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        let record = f
            .generator
            .generate_for_inspection(inspection_id, now)
            .await
            .unwrap()
            .unwrap();
        let check_records = f
            .storage
            .get_check_records_for_inspection_record(record.id.unwrap())
            .await
            .unwrap();
        assert_eq!(check_records[0].status, CheckRecordStatus::NotRequired);
    }

    #[tokio::test]
    async fn expired_pause_window_is_ignored() {
        let f = Fixture::new().await;
        let site_id = f.add_site("UTC").await;
        let mut i = inspection(site_id, 1, SchedulingUnit::Hours, local(2021, 3, 1, 0));
        i.checks[0].pause_start_date = Some(local(2021, 2, 1, 0));
        i.checks[0].pause_end_date = Some(local(2021, 2, 15, 0));
        let inspection_id = f.add_inspection(i).await;

        let now = Utc.with_ymd_and_hms(2021, 3, 1, 0, 0, 0).unwrap();
        let record = f
            .generator
            .generate_for_inspection(inspection_id, now)
            .await
            .unwrap()
            .unwrap();
        let check_records = f
            .storage
            .get_check_records_for_inspection_record(record.id.unwrap())
            .await
            .unwrap();
        assert_eq!(check_records[0].status, CheckRecordStatus::Due);
    }
}
