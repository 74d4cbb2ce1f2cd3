//! Project membership API handlers.
//!
//! # Purpose
//! Binds the membership authority's operations to HTTP. Handlers read the
//! caller from the forwarded identity header, run the operation cancellably,
//! and return the operation report alongside the affected membership ids.
use crate::api::error::ApiError;
use crate::api::types::{
    AddManagersRequest, AddMembersRequest, EnrollmentResponse, MemberListResponse,
    ProjectUpsertRequest, RemovalResponse, RemoveMembersRequest, RoleChangeResponse, RoleResponse,
    UpdateRoleRequest,
};
use crate::api::{caller_from_headers, run_cancellable};
use crate::app::AppState;
use crate::membership::ReconcileReport;
use crate::model::{NO_ROLE, Project};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

/// Record a project reference pushed by the project service.
///
/// # Errors
/// - 403 unless the caller holds global authority.
pub(crate) async fn upsert_project(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ProjectUpsertRequest>,
) -> Result<Json<Project>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let authority = state.authority.clone();
    let project = Project {
        project_id,
        name: body.name,
        parent_project_id: body.parent_project_id,
    };
    let project = run_cancellable(move |_| async move {
        authority.register_project(&caller, project).await
    })
    .await?;
    Ok(Json(project))
}

pub(crate) async fn get_project(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Project>, ApiError> {
    caller_from_headers(&headers)?;
    Ok(Json(state.authority.project(project_id).await?))
}

pub(crate) async fn add_managers(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AddManagersRequest>,
) -> Result<(StatusCode, Json<EnrollmentResponse>), ApiError> {
    let caller = caller_from_headers(&headers)?;
    let authority = state.authority.clone();
    let report = run_cancellable(move |cancel| async move {
        authority
            .add_managers(project_id, &caller, &body.account_ids, &cancel)
            .await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(report.into())))
}

pub(crate) async fn remove_managers(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RemoveMembersRequest>,
) -> Result<Json<RemovalResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let authority = state.authority.clone();
    let report = run_cancellable(move |cancel| async move {
        authority
            .remove_managers(project_id, &caller, &body.membership_ids, &cancel)
            .await
    })
    .await?;
    Ok(Json(report.into()))
}

pub(crate) async fn list_members(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MemberListResponse>, ApiError> {
    caller_from_headers(&headers)?;
    let items = state.authority.list_members(project_id).await?;
    Ok(Json(MemberListResponse { items }))
}

/// Bulk-add members with per-entry roles.
///
/// Returns 201 with the created membership ids, the per-account group sync
/// outcome, and the ids that were skipped as unknown or already enrolled.
///
/// # Errors
/// - 403 for a restricted role or a caller that does not manage the project.
/// - 409 `all_members_already_exist` when nothing new remains.
pub(crate) async fn add_members(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AddMembersRequest>,
) -> Result<(StatusCode, Json<EnrollmentResponse>), ApiError> {
    let caller = caller_from_headers(&headers)?;
    let authority = state.authority.clone();
    let report = run_cancellable(move |cancel| async move {
        authority
            .add_members(project_id, &caller, &body.members, &cancel)
            .await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(report.into())))
}

pub(crate) async fn remove_members(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RemoveMembersRequest>,
) -> Result<Json<RemovalResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let authority = state.authority.clone();
    let report = run_cancellable(move |cancel| async move {
        authority
            .remove_members(project_id, &caller, &body.membership_ids, &cancel)
            .await
    })
    .await?;
    Ok(Json(report.into()))
}

pub(crate) async fn update_member_role(
    Path((project_id, membership_id)): Path<(Uuid, Uuid)>,
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<UpdateRoleRequest>,
) -> Result<Json<RoleChangeResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let authority = state.authority.clone();
    let report = run_cancellable(move |cancel| async move {
        authority
            .update_member_role(project_id, &caller, membership_id, &body.role, &cancel)
            .await
    })
    .await?;
    Ok(Json(RoleChangeResponse {
        membership_id: report.membership.membership_id,
        report,
    }))
}

/// The caller's own role in the project, or `"None"`.
pub(crate) async fn my_role(
    Path(project_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RoleResponse>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let role = state
        .authority
        .get_role(project_id, &caller.account_id)
        .await?;
    Ok(Json(RoleResponse {
        project_id,
        role: role
            .map(|role| role.as_str().to_string())
            .unwrap_or_else(|| NO_ROLE.to_string()),
        account_id: caller.account_id,
    }))
}

pub(crate) async fn reconcile_account(
    Path(account_id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReconcileReport>, ApiError> {
    let caller = caller_from_headers(&headers)?;
    let authority = state.authority.clone();
    let report = run_cancellable(move |cancel| async move {
        authority
            .reconcile_account(&caller, &account_id, &cancel)
            .await
    })
    .await?;
    Ok(Json(report))
}
