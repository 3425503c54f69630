//! Ad-hoc ticket CRUD and batch creation.

use crate::domain::{AssigneeType, Ticket, TicketStatus, TicketTask};
use crate::error::{Error, Result};
use crate::storage::Storage;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTicketRequest {
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub floor_code: String,
    pub reporter_id: Option<Uuid>,
    #[serde(default)]
    pub reporter_name: String,
    #[serde(default)]
    pub reporter_phone: String,
    #[serde(default)]
    pub reporter_email: String,
    #[serde(default)]
    pub reporter_company: String,
    pub assignee_id: Option<Uuid>,
    pub category_id: Option<Uuid>,
    pub twin_id: Option<String>,
    #[serde(default)]
    pub issue_name: String,
    #[serde(default)]
    pub tasks: Vec<TicketTask>,
}

fn default_priority() -> i32 {
    3
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketFilter {
    pub status: Option<TicketStatus>,
    pub assignee_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateTicketStatusRequest {
    pub status: TicketStatus,
}

/// Per-item outcome of a batch create, surfaced as a 207 response.
#[derive(Debug, Clone, Serialize)]
pub struct BatchItemResult {
    pub index: usize,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<Ticket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct TicketService {
    storage: Arc<dyn Storage>,
}

impl TicketService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn create_ticket(
        &self,
        site_id: Uuid,
        request: CreateTicketRequest,
    ) -> Result<Ticket> {
        let site = self
            .storage
            .get_site(site_id)
            .await?
            .ok_or_else(|| Error::not_found("Site"))?;
        if request.summary.trim().is_empty() {
            return Err(Error::BadRequest("Ticket summary is required".to_string()));
        }

        let mut tasks = request.tasks;
        for (position, task) in tasks.iter_mut().enumerate() {
            task.order = position as i32 + 1;
        }

        let mut ticket = Ticket {
            id: None,
            customer_id: site.customer_id,
            site_id,
            template_id: None,
            sequence_number: self
                .storage
                .generate_sequence_number(&site.code, "T")
                .await?,
            status: TicketStatus::Open,
            priority: request.priority,
            summary: request.summary,
            description: request.description,
            floor_code: request.floor_code,
            reporter_id: request.reporter_id,
            reporter_name: request.reporter_name,
            reporter_phone: request.reporter_phone,
            reporter_email: request.reporter_email,
            reporter_company: request.reporter_company,
            assignee_type: if request.assignee_id.is_some() {
                AssigneeType::CustomerUser
            } else {
                AssigneeType::NoAssignee
            },
            assignee_id: request.assignee_id,
            category_id: request.category_id,
            occurrence: 0,
            scheduled_date: None,
            due_date: None,
            twin_id: request.twin_id,
            issue_name: request.issue_name,
            tasks,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
        };
        self.storage.create_ticket(&mut ticket).await?;
        Ok(ticket)
    }

    /// Create several tickets in one call; failures do not abort the batch.
    pub async fn create_tickets(
        &self,
        site_id: Uuid,
        requests: Vec<CreateTicketRequest>,
    ) -> Vec<BatchItemResult> {
        let mut results = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            match self.create_ticket(site_id, request).await {
                Ok(ticket) => results.push(BatchItemResult {
                    index,
                    status_code: 201,
                    ticket: Some(ticket),
                    error: None,
                }),
                Err(e) => results.push(BatchItemResult {
                    index,
                    status_code: match e {
                        Error::NotFound { .. } => 404,
                        Error::BadRequest(_) | Error::Validation(_) => 400,
                        _ => 500,
                    },
                    ticket: None,
                    error: Some(e.to_string()),
                }),
            }
        }
        results
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> Result<Ticket> {
        self.storage
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| Error::not_found("Ticket"))
    }

    pub async fn get_tickets(&self, site_id: Uuid, filter: TicketFilter) -> Result<Vec<Ticket>> {
        Ok(self
            .storage
            .get_tickets_by_site(site_id)
            .await?
            .into_iter()
            .filter(|t| filter.status.map(|s| t.status == s).unwrap_or(true))
            .filter(|t| {
                filter
                    .assignee_id
                    .map(|a| t.assignee_id == Some(a))
                    .unwrap_or(true)
            })
            .filter(|t| {
                filter
                    .template_id
                    .map(|id| t.template_id == Some(id))
                    .unwrap_or(true)
            })
            .collect())
    }

    pub async fn update_ticket_status(
        &self,
        ticket_id: Uuid,
        status: TicketStatus,
    ) -> Result<Ticket> {
        let mut ticket = self.get_ticket(ticket_id).await?;
        ticket.status = status;
        ticket.updated_at = Utc::now();
        ticket.closed_at = match status {
            TicketStatus::Closed | TicketStatus::Resolved => Some(Utc::now()),
            _ => None,
        };
        self.storage.update_ticket(&ticket).await?;
        Ok(ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Site, SiteStatus};
    use crate::storage::InMemoryStorage;

    async fn fixture() -> (TicketService, Uuid) {
        let storage = Arc::new(InMemoryStorage::new());
        let mut site = Site {
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
        };
        storage.create_site(&mut site).await.unwrap();
        (TicketService::new(storage), site.id.unwrap())
    }

    fn request(summary: &str) -> CreateTicketRequest {
        CreateTicketRequest {
            summary: summary.to_string(),
            description: String::new(),
            priority: 3,
            floor_code: "L1".to_string(),
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
        }
    }

    #[tokio::test]
    async fn sequence_numbers_increment_per_site_prefix() {
        let (service, site_id) = fixture().await;
        let first = service.create_ticket(site_id, request("Leak")).await.unwrap();
        let second = service
            .create_ticket(site_id, request("Noise"))
            .await
            .unwrap();
        assert_eq!(first.sequence_number, "OM-T-1");
        assert_eq!(second.sequence_number, "OM-T-2");
    }

    #[tokio::test]
    async fn batch_create_reports_per_item_results() {
        let (service, site_id) = fixture().await;
        let results = service
            .create_tickets(site_id, vec![request("Leak"), request("   ")])
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status_code, 201);
        assert!(results[0].ticket.is_some());
        assert_eq!(results[1].status_code, 400);
        assert!(results[1].error.is_some());
    }

    #[tokio::test]
    async fn closing_a_ticket_stamps_closed_at() {
        let (service, site_id) = fixture().await;
        let ticket = service.create_ticket(site_id, request("Leak")).await.unwrap();
        let closed = service
            .update_ticket_status(ticket.id.unwrap(), TicketStatus::Closed)
            .await
            .unwrap();
        assert!(closed.closed_at.is_some());

        let reopened = service
            .update_ticket_status(ticket.id.unwrap(), TicketStatus::InProgress)
            .await
            .unwrap();
        assert!(reopened.closed_at.is_none());
    }
}
