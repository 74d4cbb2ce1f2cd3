//! User, group, and role administration handlers.
//!
//! # Purpose
//! Exposes the account directory and the provisioning saga. Reads require a
//! caller identity; every mutation also requires global authority.
//!
//! # Security considerations
//! - Initial passwords are passed to the provider and never logged or echoed.
use crate::api::error::{ApiError, api_not_found};
use crate::api::types::{
    CreateUserRequest, CreateUserResponse, OrphanListResponse, RoleNamesRequest, SearchQuery,
    UpdateUserRequest, UpdateUserResponse, UserListQuery, UserListResponse,
};
use crate::api::{caller_from_headers, run_cancellable};
use crate::app::AppState;
use crate::identity::directory::{AccountChanges, DirectoryQuery};
use crate::identity::gateway::{Account, AccountUpdate, Group, Role};
use crate::identity::provisioning::ProvisioningRequest;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};

pub(crate) async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserListQuery>,
) -> Result<Json<UserListResponse>, ApiError> {
    caller_from_headers(&headers)?;
    let page = state
        .directory
        .list_accounts(&DirectoryQuery {
            search: query.search,
            group: query.group,
            page_number: query.page,
            page_size: query.page_size,
        })
        .await?;
    Ok(Json(UserListResponse {
        items: page.items,
        total: page.total,
        page: query.page.max(1),
        page_size: query.page_size.clamp(1, 200),
    }))
}

/// Provision a new account and its initial groups.
///
/// # Errors
/// - 400 for invalid username, email, or password.
/// - 409 when the username exists or an orphaned account blocks it.
/// - 500 `compensation_failed` when cleanup after a failure also failed.
pub(crate) async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreateUserResponse>), ApiError> {
    let caller = caller_from_headers(&headers)?;
    state.authority.ensure_global_authority(&caller).await?;
    let saga = state.saga.clone();
    let request = ProvisioningRequest {
        username: body.username,
        email: body.email,
        first_name: body.first_name,
        last_name: body.last_name,
        initial_password: body.password,
        temporary_password: body.temporary_password,
        groups: body.groups,
    };
    let provisioned =
        run_cancellable(move |cancel| async move { saga.provision(request, &cancel).await })
            .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateUserResponse {
            account_id: provisioned.account_id,
            groups: provisioned.groups,
        }),
    ))
}

pub(crate) async fn get_user(
    Path(account_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Account>, ApiError> {
    caller_from_headers(&headers)?;
    Ok(Json(state.directory.get_account(&account_id).await?))
}

pub(crate) async fn update_user(
    Path(account_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<UpdateUserResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    state.authority.ensure_global_authority(&caller).await?;
    let directory = state.directory.clone();
    let changes = AccountChanges {
        update: AccountUpdate {
            first_name: body.first_name,
            last_name: body.last_name,
            enabled: body.enabled,
        },
        groups: body.groups.map(|groups| groups.into_iter().collect()),
    };
    let (account, group_sync) = run_cancellable(move |cancel| async move {
        let group_sync = directory
            .update_account(&account_id, &changes, &cancel)
            .await?;
        let account = directory.get_account(&account_id).await?;
        Ok((account, group_sync))
    })
    .await?;
    Ok(Json(UpdateUserResponse {
        account,
        group_sync,
    }))
}

pub(crate) async fn deactivate_user(
    Path(account_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let caller = caller_from_headers(&headers)?;
    state.authority.ensure_global_authority(&caller).await?;
    state.directory.deactivate_account(&account_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn list_orphans(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<OrphanListResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    state.authority.ensure_global_authority(&caller).await?;
    Ok(Json(OrphanListResponse {
        items: state.saga.orphaned_accounts(),
    }))
}

/// Clear an orphan entry once an operator removed the provider account.
pub(crate) async fn clear_orphan(
    Path(username): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let caller = caller_from_headers(&headers)?;
    state.authority.ensure_global_authority(&caller).await?;
    match state.saga.clear_orphan(&username) {
        Some(orphan) => {
            tracing::info!(username = %orphan.username, account_id = ?orphan.account_id, "orphan entry cleared");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(api_not_found("orphan not found")),
    }
}

pub(crate) async fn list_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Group>>, ApiError> {
    caller_from_headers(&headers)?;
    Ok(Json(
        state.directory.list_groups(query.search.as_deref()).await?,
    ))
}

pub(crate) async fn list_roles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Role>>, ApiError> {
    caller_from_headers(&headers)?;
    Ok(Json(state.directory.realm_roles().await?))
}

pub(crate) async fn group_roles(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Role>>, ApiError> {
    caller_from_headers(&headers)?;
    Ok(Json(state.directory.group_roles(&group_id).await?))
}

pub(crate) async fn add_group_roles(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleNamesRequest>,
) -> Result<Json<Vec<Role>>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    state.authority.ensure_global_authority(&caller).await?;
    Ok(Json(
        state
            .directory
            .add_roles_to_group(&group_id, &body.roles)
            .await?,
    ))
}

pub(crate) async fn remove_group_roles(
    Path(group_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RoleNamesRequest>,
) -> Result<Json<Vec<Role>>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    state.authority.ensure_global_authority(&caller).await?;
    Ok(Json(
        state
            .directory
            .remove_roles_from_group(&group_id, &body.roles)
            .await?,
    ))
}
