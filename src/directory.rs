//! Tenancy directory: customers, portfolios, users and role assignments.

use crate::clients::{NotificationClient, NotificationMessage};
use crate::domain::{
    Assignment, Customer, CustomerStatus, Portfolio, RoleResourceType, User, UserStatus,
};
use crate::error::{Error, Result};
use crate::storage::Storage;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Flattened role/permission grants. An assignment's role confers these
/// permissions on the assigned resource and everything beneath it.
static ROLE_GRANTS: &[(&str, &[&str])] = &[
    (
        "Customer Admin",
        &[
            "ManageUsers",
            "ViewUsers",
            "ManagePortfolios",
            "ViewPortfolios",
            "ManageSites",
            "ViewSites",
            "ManageFloors",
            "ManageConnectors",
            "ManageApps",
            "ViewApps",
        ],
    ),
    (
        "Portfolio Viewer",
        &["ViewPortfolios", "ViewSites", "ViewUsers"],
    ),
    (
        "Site Admin",
        &[
            "ManageUsers",
            "ViewUsers",
            "ManageSites",
            "ViewSites",
            "ManageFloors",
            "ManageConnectors",
            "ManageApps",
            "ViewApps",
        ],
    ),
    ("Site Viewer", &["ViewSites", "ViewApps"]),
];

fn known_role(role: &str) -> bool {
    ROLE_GRANTS.iter().any(|(name, _)| *name == role)
}

fn role_grants(role: &str, permission: &str) -> bool {
    ROLE_GRANTS
        .iter()
        .filter(|(name, _)| *name == role)
        .any(|(_, permissions)| {
            permissions
                .iter()
                .any(|p| p.eq_ignore_ascii_case(permission))
        })
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub company: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateUserRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
}

pub struct DirectoryService {
    storage: Arc<dyn Storage>,
    notifications: Arc<dyn NotificationClient>,
}

impl DirectoryService {
    pub fn new(storage: Arc<dyn Storage>, notifications: Arc<dyn NotificationClient>) -> Self {
        Self {
            storage,
            notifications,
        }
    }

    pub async fn create_customer(&self, name: String) -> Result<Customer> {
        if name.trim().is_empty() {
            return Err(Error::BadRequest("Customer name is required".to_string()));
        }
        let mut customer = Customer {
            id: None,
            name,
            status: CustomerStatus::Active,
            created_at: Utc::now(),
        };
        self.storage.create_customer(&mut customer).await?;
        info!("Created customer {}", customer.name);
        Ok(customer)
    }

    pub async fn get_customer(&self, customer_id: Uuid) -> Result<Customer> {
        self.storage
            .get_customer(customer_id)
            .await?
            .ok_or_else(|| Error::not_found("Customer"))
    }

    pub async fn get_customers(&self) -> Result<Vec<Customer>> {
        self.storage.get_customers().await
    }

    pub async fn update_customer(
        &self,
        customer_id: Uuid,
        name: Option<String>,
        status: Option<CustomerStatus>,
    ) -> Result<Customer> {
        let mut customer = self.get_customer(customer_id).await?;
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(Error::BadRequest("Customer name is required".to_string()));
            }
            customer.name = name;
        }
        if let Some(status) = status {
            customer.status = status;
        }
        self.storage.update_customer(&customer).await?;
        Ok(customer)
    }

    pub async fn create_portfolio(&self, customer_id: Uuid, name: String) -> Result<Portfolio> {
        // Verify the parent exists before creating under it.
        self.get_customer(customer_id).await?;
        if name.trim().is_empty() {
            return Err(Error::BadRequest("Portfolio name is required".to_string()));
        }
        let mut portfolio = Portfolio {
            id: None,
            customer_id,
            name,
            created_at: Utc::now(),
        };
        self.storage.create_portfolio(&mut portfolio).await?;
        Ok(portfolio)
    }

    pub async fn get_portfolios(&self, customer_id: Uuid) -> Result<Vec<Portfolio>> {
        self.get_customer(customer_id).await?;
        self.storage.get_portfolios_by_customer(customer_id).await
    }

    /// Create a user under a customer. Emails are unique across all
    /// customers, compared case-insensitively.
    pub async fn create_user(
        &self,
        customer_id: Uuid,
        request: CreateUserRequest,
    ) -> Result<User> {
        self.get_customer(customer_id).await?;

        let email = request.email.trim().to_string();
        if !EMAIL_RE.is_match(&email) {
            return Err(Error::BadRequest("A valid email is required".to_string()));
        }
        if self.storage.get_user_by_email(&email).await?.is_some() {
            return Err(Error::BadRequest(format!(
                "A user with email {email} already exists"
            )));
        }

        let mut user = User {
            id: None,
            customer_id,
            first_name: request.first_name,
            last_name: request.last_name,
            email,
            phone: request.phone,
            company: request.company,
            status: UserStatus::Pending,
            created_at: Utc::now(),
        };
        self.storage.create_user(&mut user).await?;
        info!("Created user {}", user.email);
        self.send_activation(&user).await;
        Ok(user)
    }

    async fn send_activation(&self, user: &User) {
        self.notifications
            .send(NotificationMessage {
                template: "user-activation".to_string(),
                recipient_email: user.email.clone(),
                data: json!({ "firstName": user.first_name, "userId": user.id }),
            })
            .await;
    }

    pub async fn initiate_password_reset(&self, email: &str) -> Result<()> {
        // Silently succeed for unknown emails so the endpoint does not leak
        // which addresses exist.
        if let Some(user) = self.storage.get_user_by_email(email).await? {
            self.notifications
                .send(NotificationMessage {
                    template: "password-reset".to_string(),
                    recipient_email: user.email.clone(),
                    data: json!({ "firstName": user.first_name, "userId": user.id }),
                })
                .await;
        }
        Ok(())
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User> {
        self.storage
            .get_user(user_id)
            .await?
            .ok_or_else(|| Error::not_found("User"))
    }

    pub async fn get_users(&self, customer_id: Uuid) -> Result<Vec<User>> {
        self.get_customer(customer_id).await?;
        Ok(self
            .storage
            .get_users_by_customer(customer_id)
            .await?
            .into_iter()
            .filter(|u| u.status != UserStatus::Inactive)
            .collect())
    }

    pub async fn update_user(&self, user_id: Uuid, request: UpdateUserRequest) -> Result<User> {
        let mut user = self.get_user(user_id).await?;
        if let Some(first_name) = request.first_name {
            user.first_name = first_name;
        }
        if let Some(last_name) = request.last_name {
            user.last_name = last_name;
        }
        if let Some(phone) = request.phone {
            user.phone = phone;
        }
        if let Some(company) = request.company {
            user.company = company;
        }
        self.storage.update_user(&user).await?;
        Ok(user)
    }

    pub async fn activate_user(&self, user_id: Uuid) -> Result<User> {
        let mut user = self.get_user(user_id).await?;
        user.status = UserStatus::Active;
        self.storage.update_user(&user).await?;
        Ok(user)
    }

    /// Users are never hard-deleted; deactivation keeps audit references
    /// (tickets, records) resolvable.
    pub async fn deactivate_user(&self, user_id: Uuid) -> Result<()> {
        let mut user = self.get_user(user_id).await?;
        user.status = UserStatus::Inactive;
        self.storage.update_user(&user).await?;
        info!("Deactivated user {}", user.email);
        Ok(())
    }

    pub async fn create_assignment(&self, assignment: Assignment) -> Result<()> {
        self.get_user(assignment.principal_id).await?;
        if !known_role(&assignment.role) {
            return Err(Error::BadRequest(format!(
                "Unknown role {}",
                assignment.role
            )));
        }
        self.storage.create_assignment(assignment).await
    }

    pub async fn delete_assignment(&self, assignment: &Assignment) -> Result<()> {
        self.storage.delete_assignment(assignment).await
    }

    pub async fn get_assignments(&self, principal_id: Uuid) -> Result<Vec<Assignment>> {
        self.storage.get_assignments_by_principal(principal_id).await
    }

    /// A user holds a permission on a site when an assignment on the site
    /// itself, on its portfolio, or on its customer carries a role that
    /// grants that permission. Unknown permissions match no role and so
    /// grant nothing.
    pub async fn can_access(
        &self,
        principal_id: Uuid,
        permission: &str,
        customer_id: Uuid,
        portfolio_id: Uuid,
        site_id: Uuid,
    ) -> Result<bool> {
        let assignments = self.storage.get_assignments_by_principal(principal_id).await?;
        Ok(assignments.iter().any(|a| {
            let in_scope = match a.resource_type {
                RoleResourceType::Site => a.resource_id == site_id,
                RoleResourceType::Portfolio => a.resource_id == portfolio_id,
                RoleResourceType::Customer => a.resource_id == customer_id,
            };
            in_scope && role_grants(&a.role, permission)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;

    use crate::clients::LoggingNotificationClient;

    fn service() -> DirectoryService {
        DirectoryService::new(
            Arc::new(InMemoryStorage::new()),
            Arc::new(LoggingNotificationClient),
        )
    }

    fn user_request(email: &str) -> CreateUserRequest {
        CreateUserRequest {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: email.to_string(),
            phone: String::new(),
            company: String::new(),
        }
    }

    #[tokio::test]
    async fn rejects_duplicate_email_case_insensitively() {
        let service = service();
        let customer = service.create_customer("Acme".to_string()).await.unwrap();
        let customer_id = customer.id.unwrap();

        service
            .create_user(customer_id, user_request("ada@example.com"))
            .await
            .unwrap();
        let err = service
            .create_user(customer_id, user_request("ADA@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn deactivated_users_are_hidden_from_listing() {
        let service = service();
        let customer = service.create_customer("Acme".to_string()).await.unwrap();
        let customer_id = customer.id.unwrap();

        let user = service
            .create_user(customer_id, user_request("ada@example.com"))
            .await
            .unwrap();
        service.deactivate_user(user.id.unwrap()).await.unwrap();

        assert!(service.get_users(customer_id).await.unwrap().is_empty());
        // Still resolvable by id for audit references.
        assert_eq!(
            service.get_user(user.id.unwrap()).await.unwrap().status,
            UserStatus::Inactive
        );
    }

    #[tokio::test]
    async fn permission_walk_covers_hierarchy() {
        let service = service();
        let customer = service.create_customer("Acme".to_string()).await.unwrap();
        let customer_id = customer.id.unwrap();
        let portfolio = service
            .create_portfolio(customer_id, "Downtown".to_string())
            .await
            .unwrap();
        let portfolio_id = portfolio.id.unwrap();
        let site_id = Uuid::new_v4();

        let user = service
            .create_user(customer_id, user_request("ada@example.com"))
            .await
            .unwrap();
        let user_id = user.id.unwrap();

        assert!(!service
            .can_access(user_id, "ViewSites", customer_id, portfolio_id, site_id)
            .await
            .unwrap());

        service
            .create_assignment(Assignment {
                principal_id: user_id,
                role: "Portfolio Viewer".to_string(),
                resource_type: RoleResourceType::Portfolio,
                resource_id: portfolio_id,
            })
            .await
            .unwrap();

        assert!(service
            .can_access(user_id, "ViewSites", customer_id, portfolio_id, site_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn eligibility_depends_on_the_permission_asked_about() {
        let service = service();
        let customer = service.create_customer("Acme".to_string()).await.unwrap();
        let customer_id = customer.id.unwrap();
        let portfolio_id = Uuid::new_v4();
        let site_id = Uuid::new_v4();

        let user = service
            .create_user(customer_id, user_request("ada@example.com"))
            .await
            .unwrap();
        let user_id = user.id.unwrap();

        service
            .create_assignment(Assignment {
                principal_id: user_id,
                role: "Site Viewer".to_string(),
                resource_type: RoleResourceType::Site,
                resource_id: site_id,
            })
            .await
            .unwrap();

        // A viewer role on the site grants viewing, not managing.
        assert!(service
            .can_access(user_id, "ViewSites", customer_id, portfolio_id, site_id)
            .await
            .unwrap());
        assert!(!service
            .can_access(user_id, "ManageSites", customer_id, portfolio_id, site_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unknown_roles_cannot_be_assigned() {
        let service = service();
        let customer = service.create_customer("Acme".to_string()).await.unwrap();
        let customer_id = customer.id.unwrap();
        let user = service
            .create_user(customer_id, user_request("ada@example.com"))
            .await
            .unwrap();

        let err = service
            .create_assignment(Assignment {
                principal_id: user.id.unwrap(),
                role: "Superuser".to_string(),
                resource_type: RoleResourceType::Customer,
                resource_id: customer_id,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }
}
