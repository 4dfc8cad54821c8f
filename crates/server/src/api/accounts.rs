//! Account API handlers (provisioning and lease administration).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use conveyor_core::{
    Account, AccountError, AccountStore, CreateAccountRequest, CreateStorageInstanceRequest,
    LeaseError,
};

use super::handlers::ErrorResponse;
use crate::state::AppState;

/// Default daily quota for new accounts (15 GiB).
const DEFAULT_DAILY_QUOTA_BYTES: i64 = 15 * 1024 * 1024 * 1024;

/// Default storage capacity for new instances (100 GiB).
const DEFAULT_STORAGE_CAPACITY_BYTES: i64 = 100 * 1024 * 1024 * 1024;

/// Request body for provisioning an account
#[derive(Debug, Deserialize)]
pub struct CreateAccountBody {
    /// Provider login
    pub email: String,
    /// Quota window ceiling in bytes
    pub daily_quota_bytes: Option<i64>,
    /// Capacity of the backing storage instance in bytes
    pub storage_capacity_bytes: Option<i64>,
}

/// Response for account provisioning
#[derive(Debug, Serialize)]
pub struct CreateAccountResponse {
    pub account: Account,
    pub storage_instance_id: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn account_error_response(e: AccountError) -> ApiError {
    match e {
        AccountError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            ErrorResponse::new(format!("Account not found: {}", id)),
        ),
        AccountError::StorageInstanceNotFound(id) => (
            StatusCode::NOT_FOUND,
            ErrorResponse::new(format!("Storage instance not found: {}", id)),
        ),
        AccountError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e)),
    }
}

/// List all accounts
pub async fn list_accounts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Account>>, ApiError> {
    state
        .accounts()
        .list()
        .map(Json)
        .map_err(account_error_response)
}

/// Provision an account together with its backing storage instance
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateAccountBody>,
) -> Result<(StatusCode, Json<CreateAccountResponse>), ApiError> {
    let instance = state
        .accounts()
        .create_storage_instance(CreateStorageInstanceRequest {
            capacity_bytes: body
                .storage_capacity_bytes
                .unwrap_or(DEFAULT_STORAGE_CAPACITY_BYTES),
        })
        .map_err(account_error_response)?;

    let account = state
        .accounts()
        .create(CreateAccountRequest {
            email: body.email,
            storage_instance_id: Some(instance.id.clone()),
            daily_quota_bytes: body.daily_quota_bytes.unwrap_or(DEFAULT_DAILY_QUOTA_BYTES),
        })
        .map_err(account_error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAccountResponse {
            account,
            storage_instance_id: instance.id,
        }),
    ))
}

/// Extend a held lease so a long-running upload outlives the reaper's
/// timeout. Returns 409 when the caller no longer holds the lease, in
/// which case it must abandon its in-flight work.
pub async fn extend_lease(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ExtendLeaseResponse>, ApiError> {
    match state.leases().extend(&id) {
        Ok(expires_at) => Ok(Json(ExtendLeaseResponse {
            account_id: id,
            lease_expires_at: expires_at.to_rfc3339(),
        })),
        Err(LeaseError::LeaseLost(account_id)) => Err((
            StatusCode::CONFLICT,
            ErrorResponse::new(format!("lease lost on account {}", account_id)),
        )),
        Err(LeaseError::Store(e)) => Err(account_error_response(e)),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(e))),
    }
}

/// Response for a lease extension
#[derive(Debug, Serialize)]
pub struct ExtendLeaseResponse {
    pub account_id: String,
    pub lease_expires_at: String,
}

/// Release an account's lease (operator override)
pub async fn release_lease(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Account>, ApiError> {
    state
        .accounts()
        .release_lease(&id)
        .map_err(account_error_response)?;

    match state.accounts().get(&id) {
        Ok(Some(account)) => Ok(Json(account)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            ErrorResponse::new(format!("Account not found: {}", id)),
        )),
        Err(e) => Err(account_error_response(e)),
    }
}
