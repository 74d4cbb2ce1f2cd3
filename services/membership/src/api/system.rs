//! System/health API handlers.
//!
//! # Purpose and responsibility
//! Lightweight endpoints for probes and operators: store health and the
//! effective role-group mapping and membership policy.
//!
//! # Key invariants and assumptions
//! - Health checks must be fast and side-effect free; they never call the
//!   identity provider.
use crate::api::error::ApiError;
use crate::api::types::HealthStatus;
use crate::app::AppState;
use crate::error::MembershipError;
use crate::membership::MembershipPolicy;
use crate::model::RoleGroups;
use axum::Json;
use axum::extract::State;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SystemInfo {
    pub role_groups: RoleGroups,
    pub policy: MembershipPolicy,
}

/// Return the configured role groups and membership policy.
///
/// # Errors
/// - Does not return errors.
pub(crate) async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    Json(SystemInfo {
        role_groups: state.authority.role_groups().clone(),
        policy: state.authority.policy(),
    })
}

/// Probe the membership store.
///
/// # Errors
/// - Returns 502 `infrastructure` if the store probe fails.
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    state
        .store
        .health_check()
        .await
        .map_err(MembershipError::from)?;
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
        storage: state.store.backend_name().to_string(),
        durable: state.store.is_durable(),
    }))
}
