use crate::directory::{CreateUserRequest, UpdateUserRequest};
use crate::domain::{Assignment, Customer, CustomerStatus, Portfolio, RoleResourceType, User};
use crate::error::Result;
use crate::server::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
struct CreateCustomerRequest {
    name: String,
}

#[derive(Deserialize)]
struct UpdateCustomerRequest {
    name: Option<String>,
    status: Option<CustomerStatus>,
}

#[derive(Deserialize)]
struct CreatePortfolioRequest {
    name: String,
}

#[derive(Deserialize)]
struct AssignmentRequest {
    role: String,
    resource_type: RoleResourceType,
    resource_id: Uuid,
}

#[derive(Deserialize)]
struct EligibilityQuery {
    customer_id: Uuid,
    portfolio_id: Uuid,
    site_id: Uuid,
}

#[derive(Deserialize)]
struct PasswordResetRequest {
    email: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/customers", get(get_customers).post(create_customer))
        .route("/customers/:id", get(get_customer).put(update_customer))
        .route(
            "/customers/:id/portfolios",
            get(get_portfolios).post(create_portfolio),
        )
        .route("/customers/:id/users", get(get_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(deactivate_user),
        )
        .route("/users/:id/activate", post(activate_user))
        .route(
            "/users/:id/permissionAssignments",
            get(get_assignments)
                .post(create_assignment)
                .delete(delete_assignment),
        )
        .route(
            "/users/:id/permissions/:permission_id/eligibility",
            get(check_eligibility),
        )
        .route("/users/password-reset", post(password_reset))
}

async fn get_customers(State(state): State<AppState>) -> Result<Json<Vec<Customer>>> {
    Ok(Json(state.directory.get_customers().await?))
}

async fn create_customer(
    State(state): State<AppState>,
    Json(request): Json<CreateCustomerRequest>,
) -> Result<(StatusCode, Json<Customer>)> {
    let customer = state.directory.create_customer(request.name).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

async fn get_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Customer>> {
    Ok(Json(state.directory.get_customer(customer_id).await?))
}

async fn update_customer(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<UpdateCustomerRequest>,
) -> Result<Json<Customer>> {
    Ok(Json(
        state
            .directory
            .update_customer(customer_id, request.name, request.status)
            .await?,
    ))
}

async fn get_portfolios(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Vec<Portfolio>>> {
    Ok(Json(state.directory.get_portfolios(customer_id).await?))
}

async fn create_portfolio(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<CreatePortfolioRequest>,
) -> Result<(StatusCode, Json<Portfolio>)> {
    let portfolio = state
        .directory
        .create_portfolio(customer_id, request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(portfolio)))
}

async fn get_users(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<Vec<User>>> {
    Ok(Json(state.directory.get_users(customer_id).await?))
}

async fn create_user(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>)> {
    let user = state.directory.create_user(customer_id, request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(State(state): State<AppState>, Path(user_id): Path<Uuid>) -> Result<Json<User>> {
    Ok(Json(state.directory.get_user(user_id).await?))
}

async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<User>> {
    Ok(Json(state.directory.update_user(user_id, request).await?))
}

async fn activate_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>> {
    Ok(Json(state.directory.activate_user(user_id).await?))
}

async fn deactivate_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.directory.deactivate_user(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_assignments(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Assignment>>> {
    Ok(Json(state.directory.get_assignments(user_id).await?))
}

async fn create_assignment(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<AssignmentRequest>,
) -> Result<StatusCode> {
    state
        .directory
        .create_assignment(Assignment {
            principal_id: user_id,
            role: request.role,
            resource_type: request.resource_type,
            resource_id: request.resource_id,
        })
        .await?;
    Ok(StatusCode::CREATED)
}

async fn delete_assignment(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<AssignmentRequest>,
) -> Result<StatusCode> {
    state
        .directory
        .delete_assignment(&Assignment {
            principal_id: user_id,
            role: request.role,
            resource_type: request.resource_type,
            resource_id: request.resource_id,
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn check_eligibility(
    State(state): State<AppState>,
    Path((user_id, permission_id)): Path<(Uuid, String)>,
    Query(query): Query<EligibilityQuery>,
) -> Result<Json<serde_json::Value>> {
    let eligible = state
        .directory
        .can_access(
            user_id,
            &permission_id,
            query.customer_id,
            query.portfolio_id,
            query.site_id,
        )
        .await?;
    Ok(Json(serde_json::json!({ "isEligible": eligible })))
}

async fn password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<StatusCode> {
    state.directory.initiate_password_reset(&request.email).await?;
    Ok(StatusCode::NO_CONTENT)
}
