use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tower::ServiceExt;
use twinhub::calendar;
use twinhub::config::Config;
use twinhub::directory::CreateUserRequest;
use twinhub::domain::{
    Assignment, Check, CheckRecordStatus, CheckType, Inspection, RecurrenceUnit,
    RoleResourceType, Schedule, SchedulingUnit, TemplateTwin, TicketStatus, TicketTemplate,
};
use twinhub::server::{create_router, AppState};
use twinhub::sites::CreateSiteRequest;
use twinhub::storage::{InMemoryStorage, Storage};
use twinhub::workflow::CreateTicketRequest;
use uuid::Uuid;

fn app_state() -> AppState {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    AppState::build(&Config::default(), storage)
}

fn site_request(code: &str, timezone_id: &str) -> CreateSiteRequest {
    CreateSiteRequest {
        name: format!("{code} Tower"),
        code: code.to_string(),
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
        construction_year: None,
        number_of_floors: 10,
        contact_name: String::new(),
        contact_email: String::new(),
        contact_phone: String::new(),
        contact_title: String::new(),
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
        min_value: Some(0.0),
        max_value: Some(100.0),
        multiplier: None,
        dependency_name: None,
        pause_start_date: None,
        pause_end_date: None,
        last_record_id: None,
        is_archived: false,
    }
}

#[tokio::test]
async fn template_inside_advance_window_produces_tickets() -> Result<()> {
    let state = app_state();
    let customer = state.directory.create_customer("Acme".to_string()).await?;
    let customer_id = customer.id.unwrap();
    let portfolio = state
        .directory
        .create_portfolio(customer_id, "Downtown".to_string())
        .await?;
    let site = state
        .sites
        .create_site(
            customer_id,
            portfolio.id.unwrap(),
            site_request("OM", "Australia/Sydney"),
        )
        .await?;
    let site_id = site.id.unwrap();

    let site_now = calendar::in_timezone(Utc::now(), "Australia/Sydney")?;
    let template = TicketTemplate {
        id: None,
        customer_id,
        site_id,
        floor_code: "L1".to_string(),
        sequence_number: String::new(),
        priority: 2,
        status: TicketStatus::Open,
        summary: "Monthly filter change".to_string(),
        description: String::new(),
        reporter_id: None,
        reporter_name: String::new(),
        reporter_phone: String::new(),
        reporter_email: String::new(),
        reporter_company: String::new(),
        assignee_type: twinhub::domain::AssigneeType::NoAssignee,
        assignee_id: None,
        category_id: None,
        recurrence: Schedule {
            start_date: site_now,
            end_date: None,
            timezone: "Australia/Sydney".to_string(),
            occurs: RecurrenceUnit::Weekly,
            interval: 1,
            max_occurrences: None,
        },
        overdue_threshold_days: 3,
        twins: vec![
            TemplateTwin {
                twin_id: "OM-AHU-001".to_string(),
                twin_name: "AHU 001".to_string(),
            },
            TemplateTwin {
                twin_id: "OM-AHU-002".to_string(),
                twin_name: "AHU 002".to_string(),
            },
        ],
        assets: Vec::new(),
        tasks: Vec::new(),
        is_archived: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    let template = state.templates.create_ticket_template(site_id, template).await?;
    assert_eq!(template.sequence_number, "OM-S-1");

    // The start date is inside the advance window, so the hit fires at
    // creation: one ticket per template twin.
    let tickets = state
        .tickets
        .get_tickets(site_id, Default::default())
        .await?;
    assert_eq!(tickets.len(), 2);
    for ticket in &tickets {
        assert_eq!(ticket.template_id, template.id);
        assert_eq!(
            ticket.due_date,
            Some(site_now + Duration::days(3))
        );
        assert!(ticket.sequence_number.starts_with("OM-S-1-T-"));
    }

    // Another sweep in the same week must not duplicate the occurrence.
    state.templates.sweep(Utc::now()).await?;
    let tickets = state
        .tickets
        .get_tickets(site_id, Default::default())
        .await?;
    assert_eq!(tickets.len(), 2);

    Ok(())
}

#[tokio::test]
async fn inspection_sweep_creates_records_once_per_occurrence() -> Result<()> {
    let state = app_state();
    let customer = state.directory.create_customer("Acme".to_string()).await?;
    let customer_id = customer.id.unwrap();
    let portfolio = state
        .directory
        .create_portfolio(customer_id, "Downtown".to_string())
        .await?;
    let site = state
        .sites
        .create_site(
            customer_id,
            portfolio.id.unwrap(),
            site_request("SEA", "America/Los_Angeles"),
        )
        .await?;
    let site_id = site.id.unwrap();

    let site_now = calendar::in_timezone(Utc::now(), "America/Los_Angeles")?;
    let inspection = state
        .inspections
        .create_inspection(Inspection {
            id: None,
            site_id,
            name: "Daily plant room walk".to_string(),
            floor_code: "B1".to_string(),
            zone_id: None,
            asset_twin_id: None,
            assigned_workgroup_id: None,
            frequency: 1,
            frequency_unit: SchedulingUnit::Days,
            start_date: site_now - Duration::days(2),
            end_date: None,
            is_archived: false,
            checks: vec![check("Supply temp"), check("Return temp")],
        })
        .await?;

    let summary = state.generator.generate(Utc::now()).await?;
    assert_eq!(summary.records_created, 1);
    assert_eq!(summary.suppressed, 0);

    // Second sweep inside the same occurrence window is suppressed.
    let summary = state.generator.generate(Utc::now()).await?;
    assert_eq!(summary.records_created, 0);
    assert_eq!(summary.suppressed, 1);

    let due = state
        .generator
        .get_scheduled_inspections_for_site(site_id, Utc::now())
        .await?;
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].inspection.id, inspection.id);

    // One check record per active check, all Due, and submitting one
    // completes it.
    let record = state
        .generator
        .generate_for_inspection(inspection.id.unwrap(), Utc::now())
        .await?;
    assert!(record.is_none(), "occurrence already has a record");

    let stored = state
        .inspections
        .get_inspection(inspection.id.unwrap())
        .await?;
    let first_check_record_id = stored.checks[0].last_record_id.unwrap();
    let submitted = state
        .inspections
        .submit_check_record(first_check_record_id, Some(21.5), "ok".to_string(), None)
        .await?;
    assert_eq!(submitted.status, CheckRecordStatus::Completed);
    assert_eq!(submitted.submitted_value, Some(21.5));

    Ok(())
}

#[tokio::test]
async fn batch_ticket_creation_reports_per_item_outcomes() -> Result<()> {
    let state = app_state();
    let customer = state.directory.create_customer("Acme".to_string()).await?;
    let customer_id = customer.id.unwrap();
    let portfolio = state
        .directory
        .create_portfolio(customer_id, "Downtown".to_string())
        .await?;
    let site = state
        .sites
        .create_site(
            customer_id,
            portfolio.id.unwrap(),
            site_request("OM", "Australia/Sydney"),
        )
        .await?;
    let site_id = site.id.unwrap();

    let good = CreateTicketRequest {
        summary: "Leaking tap".to_string(),
        description: String::new(),
        priority: 3,
        floor_code: "L2".to_string(),
        reporter_id: None,
        reporter_name: String::new(),
        reporter_phone: String::new(),
        reporter_email: String::new(),
        reporter_company: String::new(),
        assignee_id: None,
        category_id: None,
        twin_id: None,
        issue_name: String::new(),
        tasks: Vec::new(),
    };
    let bad = CreateTicketRequest {
        summary: "   ".to_string(),
        ..good.clone()
    };

    let results = state.tickets.create_tickets(site_id, vec![good, bad]).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].status_code, 201);
    assert_eq!(results[0].ticket.as_ref().unwrap().sequence_number, "OM-T-1");
    assert_eq!(results[1].status_code, 400);
    assert!(results[1].ticket.is_none());

    Ok(())
}

#[tokio::test]
async fn eligibility_endpoint_answers_per_permission() -> Result<()> {
    let state = app_state();
    let customer = state.directory.create_customer("Acme".to_string()).await?;
    let customer_id = customer.id.unwrap();
    let portfolio = state
        .directory
        .create_portfolio(customer_id, "Downtown".to_string())
        .await?;
    let portfolio_id = portfolio.id.unwrap();
    let site = state
        .sites
        .create_site(
            customer_id,
            portfolio_id,
            site_request("OM", "Australia/Sydney"),
        )
        .await?;
    let site_id = site.id.unwrap();

    let user = state
        .directory
        .create_user(
            customer_id,
            CreateUserRequest {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                email: "ada@example.com".to_string(),
                phone: String::new(),
                company: String::new(),
            },
        )
        .await?;
    let user_id = user.id.unwrap();
    state
        .directory
        .create_assignment(Assignment {
            principal_id: user_id,
            role: "Portfolio Viewer".to_string(),
            resource_type: RoleResourceType::Portfolio,
            resource_id: portfolio_id,
        })
        .await?;

    let app = create_router(state);
    let eligibility = |permission: &str| {
        format!(
            "/users/{user_id}/permissions/{permission}/eligibility\
             ?customer_id={customer_id}&portfolio_id={portfolio_id}&site_id={site_id}"
        )
    };

    let response = app
        .clone()
        .oneshot(Request::builder().uri(eligibility("ViewSites")).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await?;
    let value: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(value["isEligible"], serde_json::Value::Bool(true));

    // The same assignment does not confer management rights.
    let response = app
        .oneshot(Request::builder().uri(eligibility("ManageSites")).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await?;
    let value: serde_json::Value = serde_json::from_slice(&body)?;
    assert_eq!(value["isEligible"], serde_json::Value::Bool(false));

    Ok(())
}
